//! End-to-end scenarios solved with the bundled microlp backend.

use anyhow::Result;
use chrono::NaiveDate;
use ehub_algo::{HubModelBuilder, HubSolution, NamedConstraint, SolveOutcome};
use ehub_core::{
    ArcSpec, CapexModel, EconomicsSpec, FitErrorKind, HubError, InvestmentPeriod, ModelConfig, NetworkEconomics, NetworkSpec, Node,
    PerformanceCurve, PerformanceSpec, SpecificationError, StoragePerformance, TechnologySpec, TimeHorizon,
    Topology,
};
use ehub_ts::{SeriesKey, SeriesKind, TimeSeriesStore};

const TOL: f64 = 1e-6;

/// Routes builder and solver logs to the test output; honours `RUST_LOG`.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn single_node(steps: usize, node: Node) -> Topology {
    init_logging();
    let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    Topology::builder(TimeHorizon::hourly(start, steps))
        .carrier("electricity")
        .carrier("heat")
        .carrier("gas")
        .node(
            node.with_carrier("electricity")
                .with_carrier("heat")
                .with_carrier("gas"),
        )
        .investment_period(InvestmentPeriod::new("2030", 1.0))
        .build()
        .unwrap()
}

/// Gas boiler at 90 % efficiency, annualized over one year.
fn boiler(unit_capex: f64) -> TechnologySpec {
    TechnologySpec::new("n", "Boiler", "CONV1", EconomicsSpec::linear(unit_capex, 1.0, 0.0))
        .with_size_bounds(0.0, 20.0)
        .with_input("gas")
        .with_output("heat")
        .with_performance(PerformanceSpec {
            curve: Some(PerformanceCurve::new(vec![0.0, 1.0]).with_output("heat", vec![0.0, 0.9])),
            ..PerformanceSpec::default()
        })
}

fn gas_supply(series: TimeSeriesStore, steps: usize, price: f64) -> TimeSeriesStore {
    series
        .with(SeriesKey::carrier("n", "gas", SeriesKind::ImportLimit), vec![100.0; steps])
        .unwrap()
        .with(SeriesKey::carrier("n", "gas", SeriesKind::ImportPrice), vec![price; steps])
        .unwrap()
}

fn optimal(outcome: SolveOutcome<HubSolution>) -> HubSolution {
    match outcome {
        SolveOutcome::Optimal(solution) => solution,
        SolveOutcome::Infeasible => panic!("expected an optimal solution, model is infeasible"),
        SolveOutcome::Unbounded => panic!("expected an optimal solution, model is unbounded"),
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < TOL, "expected {}, got {}", expected, actual);
}

#[test]
fn test_boiler_balances_every_step() -> Result<()> {
    let topo = single_node(3, Node::new("n").with_new_technology("Boiler"));
    let series = gas_supply(TimeSeriesStore::for_topology(&topo), 3, 2.0)
        .with(SeriesKey::carrier("n", "heat", SeriesKind::Demand), vec![4.5, 9.0, 0.0])?;

    let assembled = HubModelBuilder::new(topo, series, ModelConfig::default())
        .with_technology(boiler(10.0))
        .build()?;
    let balances: Vec<NamedConstraint> = assembled
        .model()
        .constraints()
        .iter()
        .filter(|c| c.name.contains("/balance/"))
        .cloned()
        .collect();
    assert_eq!(balances.len(), 9);

    let solution = optimal(assembled.solve()?);
    for c in &balances {
        assert!(c.relation.residual(solution.solution()).abs() < TOL, "{}", c.name);
    }

    // size follows peak heat, gas follows heat / 0.9
    assert_close(solution.value("n/Boiler/size", 0).unwrap(), 9.0);
    let gas = solution.series("n/import/gas").unwrap();
    assert_close(gas[0], 5.0);
    assert_close(gas[1], 10.0);
    assert_close(gas[2], 0.0);
    assert_close(solution.report().total_capex, 90.0);
    assert_close(solution.report().import_cost, 30.0);
    assert_close(solution.objective(), 120.0);
    Ok(())
}

#[test]
fn test_unmet_demand_is_infeasible() -> Result<()> {
    let topo = single_node(2, Node::new("n"));
    let series = TimeSeriesStore::for_topology(&topo)
        .with(SeriesKey::carrier("n", "heat", SeriesKind::Demand), vec![5.0, 5.0])?;
    let outcome = HubModelBuilder::new(topo, series, ModelConfig::default())
        .build()?
        .solve()?;
    assert!(matches!(outcome, SolveOutcome::Infeasible));
    Ok(())
}

#[test]
fn test_storage_shifts_cheap_import() -> Result<()> {
    let topo = single_node(4, Node::new("n").with_new_technology("Battery"));
    let series = TimeSeriesStore::for_topology(&topo)
        .with(
            SeriesKey::carrier("n", "electricity", SeriesKind::ImportLimit),
            vec![100.0, 0.0, 0.0, 0.0],
        )?
        .with(
            SeriesKey::carrier("n", "electricity", SeriesKind::ImportPrice),
            vec![1.0; 4],
        )?
        .with(
            SeriesKey::carrier("n", "electricity", SeriesKind::Demand),
            vec![0.0, 0.0, 5.0, 0.0],
        )?;
    let battery = TechnologySpec::new("n", "Battery", "STOR", EconomicsSpec::linear(1.0, 1.0, 0.0))
        .with_size_bounds(0.0, 100.0)
        .with_input("electricity")
        .with_output("electricity")
        .with_performance(PerformanceSpec {
            storage: Some(StoragePerformance::default()),
            ..PerformanceSpec::default()
        });

    let solution = optimal(
        HubModelBuilder::new(topo, series, ModelConfig::default())
            .with_technology(battery)
            .build()?
            .solve()?,
    );
    let level = solution.series("n/Battery/level").unwrap();
    for (actual, expected) in level.iter().zip([5.0, 5.0, 0.0, 0.0]) {
        assert_close(*actual, expected);
    }
    assert_close(solution.value("n/Battery/size", 0).unwrap(), 5.0);
    assert_close(solution.objective(), 10.0);

    let report = &solution.technologies()[0];
    assert_eq!(report.name, "Battery");
    assert_close(report.final_level.unwrap(), 0.0);
    Ok(())
}

#[test]
fn test_decommissioning_keeps_fixed_opex_on_installed_size() -> Result<()> {
    let topo = single_node(2, Node::new("n").with_existing_technology("Boiler", 100.0));
    let series = gas_supply(TimeSeriesStore::for_topology(&topo), 2, 1.0);
    let mut spec = boiler(10.0).with_size_bounds(0.0, 100.0).with_existing(100.0, true);
    spec.economics = spec.economics.with_opex(0.0, 0.02).with_decommission_cost(3.0);

    let mut assembled = HubModelBuilder::new(topo, series, ModelConfig::default())
        .with_technology(spec)
        .build()?;
    let size = assembled.variable("n/Boiler/size", 0).unwrap();
    assembled.model_mut().eq("pin_size", size, 60.0);

    let solution = optimal(assembled.solve()?);
    // 40 units removed at 3 each; fixed opex stays on the as-new value of 100 units
    assert_close(solution.value("n/Boiler/capex", 0).unwrap(), 120.0);
    assert_close(solution.value("n/Boiler/capex_aux", 0).unwrap(), 1000.0);
    assert_close(solution.value("n/Boiler/opex_fixed", 0).unwrap(), 20.0);
    assert_close(solution.report().total_capex, 120.0);
    assert_close(solution.report().total_opex, 20.0);
    Ok(())
}

/// Solve with the boiler pinned at `size` and return its capex.
fn piecewise_capex_at(values: Vec<f64>, size: f64) -> Result<f64> {
    let topo = single_node(1, Node::new("n").with_new_technology("Boiler"));
    let series = gas_supply(TimeSeriesStore::for_topology(&topo), 1, 1.0);
    let mut spec = boiler(0.0).with_size_bounds(0.0, 100.0);
    spec.economics = spec.economics.with_capex(CapexModel::Piecewise {
        breakpoints: vec![0.0, 50.0, 100.0],
        values,
    });

    let mut assembled = HubModelBuilder::new(topo, series, ModelConfig::default())
        .with_technology(spec)
        .build()?;
    assert!(assembled.needs_relaxation());
    let size_var = assembled.variable("n/Boiler/size", 0).unwrap();
    assembled.model_mut().eq("pin_size", size_var, size);

    let solution = optimal(assembled.solve()?);
    assert_close(solution.report().total_capex, solution.value("n/Boiler/capex_aux", 0).unwrap());
    Ok(solution.report().total_capex)
}

#[test]
fn test_piecewise_capex_follows_concave_curve() -> Result<()> {
    // the chord between 0 and 100 would give 825; the curve gives 850
    assert_close(piecewise_capex_at(vec![0.0, 600.0, 1100.0], 75.0)?, 850.0);
    Ok(())
}

#[test]
fn test_piecewise_capex_follows_convex_curve() -> Result<()> {
    // 500 + 0.5 * (1200 - 500), below the 900 of the chord
    assert_close(piecewise_capex_at(vec![0.0, 500.0, 1200.0], 75.0)?, 850.0);
    assert_close(piecewise_capex_at(vec![0.0, 500.0, 1200.0], 20.0)?, 200.0);
    Ok(())
}

#[test]
fn test_emission_signs_and_carbon_cost() -> Result<()> {
    let topo = single_node(1, Node::new("n").with_new_technology("Boiler"));
    let series = gas_supply(TimeSeriesStore::for_topology(&topo), 1, 1.0)
        .with(SeriesKey::carrier("n", "heat", SeriesKind::Demand), vec![9.0])?
        .with(SeriesKey::carrier("n", "heat", SeriesKind::ExportLimit), vec![9.0])?
        .with(SeriesKey::carrier("n", "heat", SeriesKind::ExportPrice), vec![2.0])?
        .with(SeriesKey::carrier("n", "heat", SeriesKind::ExportEmissionFactor), vec![-0.5])?
        .with(SeriesKey::node("n", SeriesKind::CarbonTax), vec![1.0])?
        .with(SeriesKey::node("n", SeriesKind::CarbonSubsidy), vec![1.0])?;
    let spec = boiler(0.0).with_emission_factor(0.2);

    let solution = optimal(
        HubModelBuilder::new(topo, series, ModelConfig::default())
            .with_technology(spec)
            .build()?
            .solve()?,
    );
    // 18 heat from 20 gas: 9 for demand, 9 exported
    let report = solution.report();
    assert_close(report.emissions_positive, 4.0);
    assert_close(report.emissions_negative, 4.5);
    assert_close(report.net_emissions, -0.5);
    assert_close(report.carbon_cost, -0.5);
    assert_close(report.import_cost, 20.0);
    assert_close(report.export_revenue, 18.0);
    assert_close(report.total_cost, 1.5);
    assert_close(solution.objective(), 1.5);
    Ok(())
}

#[test]
fn test_identical_days_aggregate_without_changing_cost() -> Result<()> {
    let steps = 48;
    let demand: Vec<f64> = (0..steps).map(|t| 5.0 + 0.1 * (t % 24) as f64).collect();
    let run = |typical_days: usize| -> Result<(f64, usize)> {
        let topo = single_node(steps, Node::new("n").with_new_technology("Boiler"));
        let series = gas_supply(TimeSeriesStore::for_topology(&topo), steps, 1.0)
            .with(SeriesKey::carrier("n", "heat", SeriesKind::Demand), demand.clone())?;
        let mut config = ModelConfig::default();
        config.aggregation.typical_days = typical_days;
        let assembled = HubModelBuilder::new(topo, series, config)
            .with_technology(boiler(10.0))
            .build()?;
        let representative = assembled.mapping().n_representative();
        Ok((optimal(assembled.solve()?).objective(), representative))
    };

    let (full, full_steps) = run(0)?;
    let (aggregated, aggregated_steps) = run(1)?;
    assert_eq!(full_steps, 48);
    assert_eq!(aggregated_steps, 24);
    assert!((full - aggregated).abs() < 1e-6 * full.abs().max(1.0));
    Ok(())
}

#[test]
fn test_network_delivers_with_losses() -> Result<()> {
    init_logging();
    let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let topo = Topology::builder(TimeHorizon::hourly(start, 2))
        .carrier("heat")
        .carrier("gas")
        .node(
            Node::new("a")
                .with_carrier("heat")
                .with_carrier("gas")
                .with_new_technology("Boiler"),
        )
        .node(Node::new("b").with_carrier("heat"))
        .investment_period(InvestmentPeriod::new("2030", 1.0))
        .build()?;
    let series = TimeSeriesStore::for_topology(&topo)
        .with(SeriesKey::carrier("b", "heat", SeriesKind::Demand), vec![9.0, 0.0])?
        .with(SeriesKey::carrier("a", "gas", SeriesKind::ImportLimit), vec![100.0, 100.0])?
        .with(SeriesKey::carrier("a", "gas", SeriesKind::ImportPrice), vec![1.0, 1.0])?;
    let mut spec = boiler(1.0);
    spec.node = "a".into();
    let pipe = NetworkSpec::new("dh", "heat", NetworkEconomics::linear(0.01, 1.0, 0.0))
        .with_arc(ArcSpec::new("a", "b", 100.0))
        .with_size_bounds(0.0, 20.0)
        .with_loss_per_km(0.001);

    let solution = optimal(
        HubModelBuilder::new(topo, series, ModelConfig::default())
            .with_technology(spec)
            .with_network(pipe)
            .build()?
            .solve()?,
    );
    // 10 sent from a arrive as 9 at b
    assert_close(solution.value("dh/a-b/flow", 0).unwrap(), 10.0);
    assert_close(solution.value("dh/a-b/size", 0).unwrap(), 10.0);
    assert_close(solution.value("a/Boiler/size", 0).unwrap(), 10.0);

    let networks = solution.networks();
    assert_eq!(networks.len(), 1);
    let (from, to, size) = &networks[0].sizes[0];
    assert_eq!((from.as_str(), to.as_str()), ("a", "b"));
    assert_close(*size, 10.0);
    Ok(())
}

#[test]
fn test_carried_over_size_is_fixed_next_period() -> Result<()> {
    let demand = |peak: f64| -> Result<(Topology, TimeSeriesStore)> {
        let topo = single_node(2, Node::new("n").with_new_technology("Boiler"));
        let series = gas_supply(TimeSeriesStore::for_topology(&topo), 2, 1.0)
            .with(SeriesKey::carrier("n", "heat", SeriesKind::Demand), vec![peak, 1.0])?;
        Ok((topo, series))
    };

    let (topo, series) = demand(5.0)?;
    let first = optimal(
        HubModelBuilder::new(topo, series, ModelConfig::default())
            .with_technology(boiler(10.0))
            .build()?
            .solve()?,
    );
    assert_close(first.value("n/Boiler/size", 0).unwrap(), 5.0);
    let carried = first.carry_over();
    assert_eq!(carried.technologies.len(), 1);

    // installed capacity costs nothing in the next period
    let (topo, series) = demand(4.0)?;
    let second = optimal(
        HubModelBuilder::new(topo, series, ModelConfig::default())
            .with_carried_over(carried.clone())
            .build()?
            .solve()?,
    );
    assert_close(second.report().total_capex, 0.0);
    assert_close(second.value("n/Boiler/size", 0).unwrap(), 5.0);

    let (topo, series) = demand(6.0)?;
    let outgrown = HubModelBuilder::new(topo, series, ModelConfig::default())
        .with_carried_over(carried)
        .build()?
        .solve()?;
    assert!(matches!(outgrown, SolveOutcome::Infeasible));
    Ok(())
}

#[test]
fn test_carried_over_instance_must_fit_new_period() -> Result<()> {
    let topo = single_node(4, Node::new("n").with_new_technology("Reservoir"));
    let series = TimeSeriesStore::for_topology(&topo)
        .with(SeriesKey::technology("n", "Reservoir", SeriesKind::NaturalInflow), vec![1.0; 4])?;
    let reservoir = TechnologySpec::new("n", "Reservoir", "STOR", EconomicsSpec::linear(1.0, 1.0, 0.0))
        .with_size_bounds(0.0, 50.0)
        .with_input("electricity")
        .with_output("electricity")
        .with_performance(PerformanceSpec {
            storage: Some(StoragePerformance::default()),
            ..PerformanceSpec::default()
        });
    let first = optimal(
        HubModelBuilder::new(topo, series, ModelConfig::default())
            .with_technology(reservoir)
            .build()?
            .solve()?,
    );
    let carried = first.carry_over();

    // the inflow was fitted on four steps
    let longer = single_node(6, Node::new("n"));
    let Err(err) = HubModelBuilder::new(longer, TimeSeriesStore::new(6), ModelConfig::default())
        .with_carried_over(carried.clone())
        .build()
    else {
        panic!("a four-step fit must not be reused on a six-step horizon");
    };
    match err {
        HubError::Fit(e) => assert_eq!(e.kind, FitErrorKind::SeriesLength { expected: 6, actual: 4 }),
        other => panic!("expected a fit error, got {other:?}"),
    }

    let elsewhere = single_node(4, Node::new("m"));
    let Err(err) = HubModelBuilder::new(elsewhere, TimeSeriesStore::new(4), ModelConfig::default())
        .with_carried_over(carried)
        .build()
    else {
        panic!("a carried instance must not outlive its node");
    };
    assert!(matches!(err, HubError::Specification(SpecificationError::UnknownNode { .. })));
    Ok(())
}

#[test]
fn test_solution_serializes_to_json() -> Result<()> {
    let topo = single_node(1, Node::new("n").with_new_technology("Boiler"));
    let series = gas_supply(TimeSeriesStore::for_topology(&topo), 1, 1.0)
        .with(SeriesKey::carrier("n", "heat", SeriesKind::Demand), vec![4.5])?;
    let solution = optimal(
        HubModelBuilder::new(topo, series, ModelConfig::default())
            .with_technology(boiler(1.0))
            .build()?
            .solve()?,
    );
    let json: serde_json::Value = serde_json::from_str(&solution.to_json()?)?;
    assert!(json["objective"].as_f64().is_some());
    assert_eq!(json["technologies"][0]["name"], "Boiler");
    assert!(json["terms"]["total_cost"].as_f64().is_some());
    Ok(())
}
