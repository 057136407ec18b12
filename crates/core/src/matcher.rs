//! Event-to-waiter correlation. Pure attribute comparison, no I/O.

use crate::model::{IncomingEvent, WaiterScope};
use crate::trigger::{PipelineStartEvent, PipelineStartTrigger};

/// Exact equality where an empty value never matches anything.
fn same(lhs: &str, rhs: &str) -> bool {
    !lhs.is_empty() && lhs == rhs
}

/// Whether a step-state event belongs to a waiter's scope.
pub fn matches(event: &IncomingEvent, scope: &WaiterScope) -> bool {
    same(&event.program_id, &scope.program_id) && same(&event.pipeline_id, &scope.pipeline_id)
}

/// Whether a pipeline-start event concerns a trigger. Adds project identity to
/// the step-state comparison.
pub fn trigger_matches(event: &PipelineStartEvent, trigger: &PipelineStartTrigger) -> bool {
    same(&event.project, &trigger.project)
        && same(&event.program_id, &trigger.program_id)
        && same(&event.pipeline_id, &trigger.pipeline_id)
}
