use ehub_core::{
    Archetype, Carrier, Diagnostics, FitError, HubResult, Node, PerformanceConfig, SpecificationError, TechnologySpec,
    Topology,
};
use ehub_ts::TimeSeriesStore;
use serde::Serialize;

use crate::fit::{fit_technology, FittedPerformance};
use crate::synthesis::SizeRule;

/// A validated, fitted technology ready for synthesis.
#[derive(Debug, Clone, Serialize)]
pub struct TechnologyInstance {
    spec: TechnologySpec,
    archetype: Archetype,
    rule: SizeRule,
    fitted: FittedPerformance,
    /// Storage/sink level carried in from a previous investment period
    initial_level: f64,
}

impl TechnologyInstance {
    /// Validate `spec` against the topology and fit its performance.
    pub fn new(
        spec: TechnologySpec,
        topology: &Topology,
        series: &TimeSeriesStore,
        config: &PerformanceConfig,
    ) -> HubResult<Self> {
        let archetype = spec.archetype()?;
        let entity = spec.entity();
        let node = topology.require_node(&spec.node, &entity)?;
        for carrier in spec.input_carriers.iter().chain(&spec.output_carriers) {
            topology.require_carrier_at(node, carrier, &entity)?;
        }
        let rule = size_rule(&spec, node, &entity)?;
        check_carriers(&spec, archetype, &entity)?;

        spec.economics.validate(&entity)?;
        match rule {
            SizeRule::New { min, max, .. } => spec.economics.capex.validate(&entity, min, max)?,
            SizeRule::Fixed(size) | SizeRule::Decommissionable { initial: size, .. } => {
                spec.economics.capex.validate(&entity, size, size)?
            }
        }

        let fitted = fit_technology(
            &spec,
            archetype,
            series,
            config,
            topology.horizon().resolution_hours,
        )?;
        Ok(Self {
            spec,
            archetype,
            rule,
            fitted,
            initial_level: 0.0,
        })
    }

    /// Clone this instance into the next investment period as an existing
    /// asset of `size`, starting from `final_level`.
    pub fn carry_over(&self, size: f64, final_level: f64) -> Self {
        let mut spec = self.spec.clone();
        spec.existing = true;
        spec.size_initial = Some(size);
        let rule = if spec.decommission_allowed {
            SizeRule::Decommissionable {
                initial: size,
                min: spec.size_min.min(size),
            }
        } else {
            SizeRule::Fixed(size)
        };
        Self {
            spec,
            archetype: self.archetype,
            rule,
            fitted: self.fitted.clone(),
            initial_level: final_level.max(0.0),
        }
    }

    /// Check a carried-over instance against the period it is carried
    /// into: its node and carriers must still exist and every fitted series
    /// must span the new horizon.
    pub fn check_against(&self, topology: &Topology) -> HubResult<()> {
        let entity = self.spec.entity();
        let node = topology.require_node(&self.spec.node, &entity)?;
        for carrier in self.spec.input_carriers.iter().chain(&self.spec.output_carriers) {
            topology.require_carrier_at(node, carrier, &entity)?;
        }
        self.fitted.check_horizon(topology.steps()).map_err(|kind| FitError {
            node: self.spec.node.clone(),
            technology: self.spec.name.clone(),
            kind,
        })?;
        Ok(())
    }

    pub fn spec(&self) -> &TechnologySpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn node(&self) -> &str {
        &self.spec.node
    }

    pub fn archetype(&self) -> Archetype {
        self.archetype
    }

    pub fn size_rule(&self) -> SizeRule {
        self.rule
    }

    pub fn fitted(&self) -> &FittedPerformance {
        &self.fitted
    }

    pub fn initial_level(&self) -> f64 {
        self.initial_level
    }

    /// Record non-fatal observations about this instance.
    pub fn diagnose(&self, diagnostics: &mut Diagnostics) {
        let entity = self.prefix();
        if let SizeRule::New { max, .. } = self.rule {
            if max <= 0.0 {
                diagnostics.warn("technology", "candidate technology has zero maximum size", entity.clone());
            }
        }
        if self.archetype == Archetype::Res {
            let peak = self.fitted.output_bounds.values().map(|b| b.max()).fold(0.0, f64::max);
            if peak > 1.0 {
                diagnostics.warn("fit", format!("capacity factor peaks at {:.2}, above 1", peak), entity);
            }
        }
    }

    /// Variable name prefix `node/technology`.
    pub fn prefix(&self) -> String {
        format!("{}/{}", self.spec.node, self.spec.name)
    }
}

fn size_rule(spec: &TechnologySpec, node: &Node, entity: &str) -> Result<SizeRule, SpecificationError> {
    if !(spec.rated_power.is_finite() && spec.rated_power > 0.0) {
        return Err(SpecificationError::invalid(entity, "rated_power", "must be positive"));
    }

    if spec.existing {
        let listed = node.existing_technologies.get(&spec.name).copied().ok_or_else(|| {
            SpecificationError::invalid(entity, "existing", "not listed among the node's installed technologies")
        })?;
        let initial = spec.size_initial.unwrap_or(listed);
        if !(initial.is_finite() && initial >= 0.0) {
            return Err(SpecificationError::invalid(entity, "size_initial", "must be non-negative"));
        }
        if !spec.decommission_allowed {
            return Ok(SizeRule::Fixed(initial));
        }
        if spec.size_min < 0.0 || spec.size_min > initial {
            return Err(SpecificationError::invalid(
                entity,
                "size_min",
                format!("must lie in [0, size_initial = {}]", initial),
            ));
        }
        return Ok(SizeRule::Decommissionable {
            initial,
            min: spec.size_min,
        });
    }

    if !node.new_technologies.contains(&spec.name) {
        return Err(SpecificationError::invalid(
            entity,
            "existing",
            "not listed among the node's candidate technologies",
        ));
    }
    if !(spec.size_max.is_finite() && spec.size_min >= 0.0 && spec.size_min <= spec.size_max) {
        return Err(SpecificationError::invalid(
            entity,
            "size bounds",
            format!("need 0 <= size_min <= size_max, got [{}, {}]", spec.size_min, spec.size_max),
        ));
    }
    if spec.size_is_int && spec.size_min.ceil() > spec.size_max.floor() {
        return Err(SpecificationError::invalid(
            entity,
            "size bounds",
            "no integer size between size_min and size_max",
        ));
    }
    Ok(SizeRule::New {
        min: spec.size_min,
        max: spec.size_max,
        integer: spec.size_is_int,
    })
}

fn check_carriers(spec: &TechnologySpec, archetype: Archetype, entity: &str) -> Result<(), SpecificationError> {
    if let Some(main) = &spec.main_input_carrier {
        if !spec.input_carriers.contains(main) {
            return Err(SpecificationError::invalid(
                entity,
                "main_input_carrier",
                format!("'{}' is not an input carrier", main),
            ));
        }
    }
    if let Some(main) = &spec.main_output_carrier {
        if !spec.output_carriers.contains(main) {
            return Err(SpecificationError::invalid(
                entity,
                "main_output_carrier",
                format!("'{}' is not an output carrier", main),
            ));
        }
    }

    let shape = |ok: bool, reason: &str| {
        if ok {
            Ok(())
        } else {
            Err(SpecificationError::invalid(
                entity,
                "carriers",
                format!("{} {}", archetype, reason),
            ))
        }
    };

    match archetype {
        Archetype::Res => shape(
            spec.input_carriers.is_empty() && !spec.output_carriers.is_empty(),
            "needs output carriers and no inputs",
        ),
        Archetype::Conv1 | Archetype::Conv2 | Archetype::Conv3 => shape(
            !spec.input_carriers.is_empty() && !spec.output_carriers.is_empty(),
            "needs input and output carriers",
        ),
        Archetype::Stor => {
            shape(
                !spec.input_carriers.is_empty() && spec.output_carriers.len() == 1,
                "needs one stored input and exactly one output carrier",
            )?;
            let consumed = spec
                .performance
                .storage
                .as_ref()
                .map(|s| s.energy_consumption.keys().collect::<Vec<_>>())
                .unwrap_or_default();
            check_secondary_inputs(spec, &consumed, entity)
        }
        Archetype::Sink => {
            shape(
                !spec.input_carriers.is_empty() && spec.output_carriers.is_empty(),
                "needs input carriers and no outputs",
            )?;
            let mut consumed: Vec<&Carrier> = Vec::new();
            if let Some(sink) = &spec.performance.sink {
                consumed.extend(sink.energy_consumption.keys());
                if let Some(c) = &sink.compression {
                    consumed.push(&c.carrier);
                }
            }
            check_secondary_inputs(spec, &consumed, entity)
        }
    }
}

/// Consumption carriers must be declared inputs other than the main input,
/// and every non-main input must be consumed by something.
fn check_secondary_inputs(spec: &TechnologySpec, consumed: &[&Carrier], entity: &str) -> Result<(), SpecificationError> {
    let main = spec.main_input();
    for carrier in consumed {
        if Some(*carrier) == main || !spec.input_carriers.contains(carrier) {
            return Err(SpecificationError::invalid(
                entity,
                "energy_consumption",
                format!("'{}' must be a secondary input carrier", carrier),
            ));
        }
    }
    for carrier in &spec.input_carriers {
        if Some(carrier) != main && !consumed.contains(&carrier) {
            return Err(SpecificationError::invalid(
                entity,
                "input_carriers",
                format!("secondary input '{}' has no consumption coefficient", carrier),
            ));
        }
    }
    Ok(())
}
