//! Capability the host engine provides to a suspended step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::messages::Message;
use crate::model::{StepAction, WaiterId};

/// How a suspended step finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure { reason: String },
    Aborted,
}

/// What the host should show while the step is paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseContext {
    AwaitingEvent,
    AwaitingDecision {
        waiter_id: WaiterId,
        action: StepAction,
        execution_id: String,
    },
}

/// Suspension primitive of the host engine, as seen by one waiter.
///
/// `resume` is called exactly once per waiter.
#[async_trait]
pub trait Suspendable: Send + Sync {
    /// Append a message to the step's visible log.
    async fn log(&self, message: &Message);

    /// Block (or keep blocking) the step, showing `context`.
    async fn pause(&self, context: PauseContext);

    /// Unblock the step with its final outcome.
    async fn resume(&self, outcome: StepOutcome);
}
