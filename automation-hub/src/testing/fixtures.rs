//! Pipeline fixtures.

use crate::core::StageKind;
use crate::pipeline::{PipelineDefinition, StageDefinition};

/// A `business-logic` stage depending on `deps`.
#[must_use]
pub fn stage(id: &str, deps: &[&str]) -> StageDefinition {
    StageDefinition::new(id, StageKind::BusinessLogic).with_dependencies(deps.iter().copied())
}

/// A definition with an explicit ID and the given stages.
#[must_use]
pub fn definition(id: &str, stages: Vec<StageDefinition>) -> PipelineDefinition {
    stages
        .into_iter()
        .fold(PipelineDefinition::new(id).with_id(id), PipelineDefinition::with_stage)
}

/// `a`, then `b` and `c` both depending on `a`.
#[must_use]
pub fn fan_out(id: &str) -> PipelineDefinition {
    definition(
        id,
        vec![stage("a", &[]), stage("b", &["a"]), stage("c", &["a"])],
    )
}
