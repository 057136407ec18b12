//! Human approval gate: turns a proceed/cancel decision into exactly one
//! advance or cancel call on the external execution.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{CredentialResolver, ExecutionTarget, PipelineApi};
use crate::error::WaiterError;
use crate::host::StepOutcome;
use crate::messages::{Message, Operation};
use crate::model::{StepAction, WaiterId};
use crate::registry::WaiterRegistry;
use crate::waiter::StepWaiter;

/// Human decision on an open gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Proceed,
    Cancel,
}

impl Decision {
    pub const CHOICES: [Decision; 2] = [Decision::Proceed, Decision::Cancel];

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Proceed => "proceed",
            Decision::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = WaiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proceed" => Ok(Decision::Proceed),
            "cancel" => Ok(Decision::Cancel),
            other => Err(WaiterError::InvalidDecision(other.to_string())),
        }
    }
}

/// The decision form shown for an open gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePrompt {
    pub waiter_id: WaiterId,
    pub action: StepAction,
    pub execution_id: String,
    pub message: String,
    pub choices: Vec<Decision>,
}

#[derive(Clone)]
pub struct ApprovalGate {
    registry: Arc<WaiterRegistry>,
    credentials: Arc<dyn CredentialResolver>,
    api: Arc<dyn PipelineApi>,
}

impl ApprovalGate {
    pub fn new(
        registry: Arc<WaiterRegistry>,
        credentials: Arc<dyn CredentialResolver>,
        api: Arc<dyn PipelineApi>,
    ) -> Self {
        Self {
            registry,
            credentials,
            api,
        }
    }

    /// Prompt for the waiter's open gate, if it has one.
    pub async fn prompt(&self, waiter_id: &WaiterId) -> Result<Option<GatePrompt>, WaiterError> {
        let waiter = self
            .registry
            .get(waiter_id)
            .ok_or_else(|| WaiterError::UnknownWaiter(waiter_id.clone()))?;
        let Some(pending) = waiter.pending().await else {
            return Ok(None);
        };
        let message = Message::WaitingApproval {
            action: pending.action,
            execution_id: pending.execution_id.clone(),
        };
        Ok(Some(GatePrompt {
            waiter_id: waiter_id.clone(),
            action: pending.action,
            execution_id: pending.execution_id,
            message: message.to_string(),
            choices: Decision::CHOICES.to_vec(),
        }))
    }

    /// Parses a raw form submission before deciding. Unsupported choices are
    /// rejected without touching the waiter.
    pub async fn submit(&self, waiter_id: &WaiterId, choice: &str) -> Result<StepOutcome, WaiterError> {
        let decision = match choice.parse::<Decision>() {
            Ok(decision) => decision,
            Err(err) => {
                warn!(%waiter_id, choice, "rejecting unsupported decision");
                return Err(err);
            }
        };
        self.decide(waiter_id, decision).await
    }

    /// Carries out a decision on an open gate.
    ///
    /// The first decision wins; later ones (and events racing with it) see
    /// [`WaiterError::AlreadyResolved`]. API failures fail the host step with
    /// the error text. The claimed decision runs on its own task, so dropping
    /// the caller's future cannot leave the gate half decided.
    pub async fn decide(&self, waiter_id: &WaiterId, decision: Decision) -> Result<StepOutcome, WaiterError> {
        let waiter = self
            .registry
            .get(waiter_id)
            .ok_or_else(|| WaiterError::UnknownWaiter(waiter_id.clone()))?;
        let gate = self.clone();
        let task = tokio::spawn(async move { gate.carry_out(&waiter, decision).await });
        match task.await {
            Ok(result) => result,
            Err(err) => std::panic::resume_unwind(err.into_panic()),
        }
    }

    async fn carry_out(&self, waiter: &StepWaiter, decision: Decision) -> Result<StepOutcome, WaiterError> {
        let waiter_id = waiter.id();
        let claim = waiter.claim_gate().await?;

        let scope = waiter.scope().clone();
        let target = ExecutionTarget {
            program_id: scope.program_id.clone(),
            pipeline_id: scope.pipeline_id.clone(),
            execution_id: claim.pending().execution_id.clone(),
        };
        let operation = match decision {
            Decision::Proceed => Operation::Advance,
            Decision::Cancel => Operation::Cancel,
        };
        info!(%waiter_id, %decision, %target, "carrying out gate decision");

        let result = match self.credentials.authenticate(&scope.project).await {
            Ok(token) => match operation {
                Operation::Advance => self.api.advance_execution(&token, &target).await,
                Operation::Cancel => self.api.cancel_execution(&token, &target).await,
            },
            Err(err) => Err(err),
        };

        let outcome = match (result, decision) {
            (Ok(()), Decision::Proceed) => {
                claim
                    .log(&Message::ExecutionAdvanced {
                        execution_id: target.execution_id.clone(),
                    })
                    .await;
                StepOutcome::Success
            }
            (Ok(()), Decision::Cancel) => {
                claim
                    .log(&Message::ExecutionCancelled {
                        execution_id: target.execution_id.clone(),
                    })
                    .await;
                StepOutcome::Aborted
            }
            (Err(err), _) => {
                warn!(%waiter_id, %operation, %target, error = %err, "pipeline API call failed");
                claim
                    .log(&Message::ApiFailure {
                        operation,
                        program_id: target.program_id.clone(),
                        pipeline_id: target.pipeline_id.clone(),
                        execution_id: target.execution_id.clone(),
                        error: err.to_string(),
                    })
                    .await;
                StepOutcome::Failure {
                    reason: err.to_string(),
                }
            }
        };

        claim.resolve(outcome.clone()).await;
        self.registry.remove(waiter_id);
        Ok(outcome)
    }
}
