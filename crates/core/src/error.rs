use thiserror::Error;

use crate::model::WaiterId;

/// Failures of waiter lifecycle and decision operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaiterError {
    #[error("no pipeline build data was recorded for this workflow")]
    MissingBuildData,
    #[error("waiter {0} is not registered")]
    UnknownWaiter(WaiterId),
    #[error("waiter {0} has already recorded an outcome")]
    AlreadyResolved(WaiterId),
    #[error("waiter {0} is not waiting for a decision")]
    NotGated(WaiterId),
    #[error("unsupported decision: {0:?}")]
    InvalidDecision(String),
}
