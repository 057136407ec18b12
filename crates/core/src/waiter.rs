//! Durable state machine for one suspended host workflow step.
//!
//! ```text
//! ACTIVE_WAIT --(gating step WAITING)--> GATED_WAIT --(decision)--> RESOLVED
//!      |                                      |
//!      +--(any other watched event)-----------+--(execution moved on)--> RESOLVED
//! ```
//!
//! All transitions take the per-waiter lock, so an incoming event and a human
//! decision never both record an outcome. Different waiters never share a lock.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::WaiterError;
use crate::host::{PauseContext, StepOutcome, Suspendable};
use crate::messages::Message;
use crate::model::{BuildContext, IncomingEvent, StepAction, StepStatus, WaiterId, WaiterScope};
use crate::util::now_ms;

/// Gate currently exposed to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingGate {
    pub action: StepAction,
    /// Execution reported by the event that opened the gate.
    pub execution_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaiterPhase {
    ActiveWait,
    GatedWait,
    Resolved,
}

/// Serializable snapshot of a waiter, persisted with the host workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterRecord {
    pub waiter_id: WaiterId,
    pub scope: WaiterScope,
    /// Empty means every step kind.
    #[serde(default)]
    pub watched: BTreeSet<StepAction>,
    pub outcome_recorded: bool,
    #[serde(default)]
    pub pending: Option<PendingGate>,
    pub created_at_ms: i64,
}

/// Effect of delivering something to a waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed: unwatched step kind, or the outcome is already recorded.
    Ignored,
    /// Step kind not recognized; logged as an error, still waiting.
    Unrecognized,
    /// A gate was opened and waits for a human decision.
    Gated,
    /// The open gate was reported again; prompt re-shown, nothing else.
    Refreshed,
    Resolved(StepOutcome),
}

#[derive(Debug, Default)]
struct WaiterState {
    outcome_recorded: bool,
    pending: Option<PendingGate>,
    resolution: Option<StepOutcome>,
}

pub struct StepWaiter {
    id: WaiterId,
    scope: WaiterScope,
    watched: BTreeSet<StepAction>,
    created_at_ms: i64,
    host: Arc<dyn Suspendable>,
    state: Mutex<WaiterState>,
}

impl std::fmt::Debug for StepWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepWaiter")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}

impl StepWaiter {
    /// Suspends a host step until a matching event (or decision) resolves it.
    ///
    /// Without usable build data the host step fails right away and no waiter
    /// is created.
    pub async fn start(
        build: Option<&BuildContext>,
        watched: impl IntoIterator<Item = StepAction>,
        host: Arc<dyn Suspendable>,
    ) -> Result<Self, WaiterError> {
        Self::start_with_id(WaiterId::new(), build, watched, host).await
    }

    /// Like [`StepWaiter::start`], for hosts that key their step by the
    /// waiter id before the waiter exists.
    pub async fn start_with_id(
        id: WaiterId,
        build: Option<&BuildContext>,
        watched: impl IntoIterator<Item = StepAction>,
        host: Arc<dyn Suspendable>,
    ) -> Result<Self, WaiterError> {
        let scope = match WaiterScope::from_build(build) {
            Ok(scope) => scope,
            Err(err) => {
                error!(waiter_id = %id, error = %err, "cannot wait for pipeline step events");
                host.log(&Message::MissingBuildData).await;
                host.resume(StepOutcome::Failure {
                    reason: err.to_string(),
                })
                .await;
                return Err(err);
            }
        };

        let waiter = Self {
            id,
            scope,
            watched: watched.into_iter().collect(),
            created_at_ms: now_ms(),
            host,
            state: Mutex::new(WaiterState::default()),
        };

        info!(
            waiter_id = %waiter.id,
            program_id = %waiter.scope.program_id,
            pipeline_id = %waiter.scope.pipeline_id,
            "waiting for pipeline step events"
        );
        waiter.host.log(&Message::Waiting).await;
        waiter.host.pause(PauseContext::AwaitingEvent).await;
        Ok(waiter)
    }

    /// Rebuilds a waiter persisted before a restart. The host is assumed to
    /// still hold its own pause, so nothing is re-announced.
    pub fn from_record(record: WaiterRecord, host: Arc<dyn Suspendable>) -> Self {
        Self {
            id: record.waiter_id,
            scope: record.scope,
            watched: record.watched,
            created_at_ms: record.created_at_ms,
            host,
            state: Mutex::new(WaiterState {
                outcome_recorded: record.outcome_recorded,
                pending: record.pending,
                resolution: None,
            }),
        }
    }

    pub fn id(&self) -> &WaiterId {
        &self.id
    }

    pub fn scope(&self) -> &WaiterScope {
        &self.scope
    }

    pub async fn record(&self) -> WaiterRecord {
        let state = self.state.lock().await;
        WaiterRecord {
            waiter_id: self.id.clone(),
            scope: self.scope.clone(),
            watched: self.watched.clone(),
            outcome_recorded: state.outcome_recorded,
            pending: state.pending.clone(),
            created_at_ms: self.created_at_ms,
        }
    }

    pub async fn phase(&self) -> WaiterPhase {
        let state = self.state.lock().await;
        if state.resolution.is_some() {
            WaiterPhase::Resolved
        } else if state.pending.is_some() {
            WaiterPhase::GatedWait
        } else {
            WaiterPhase::ActiveWait
        }
    }

    pub async fn pending(&self) -> Option<PendingGate> {
        self.state.lock().await.pending.clone()
    }

    pub async fn resolution(&self) -> Option<StepOutcome> {
        self.state.lock().await.resolution.clone()
    }

    /// Applies one step-state event that already matched this waiter's scope.
    pub async fn on_event(&self, event: &IncomingEvent) -> Transition {
        let mut state = self.state.lock().await;

        if state.outcome_recorded {
            debug!(
                waiter_id = %self.id,
                execution_id = %event.execution_id,
                action = %event.step_action,
                status = %event.status,
                "outcome already recorded; dropping event"
            );
            return Transition::Ignored;
        }

        let Some(action) = event.step_action.known() else {
            error!(
                waiter_id = %self.id,
                execution_id = %event.execution_id,
                program_id = %event.program_id,
                pipeline_id = %event.pipeline_id,
                action = %event.step_action,
                "unknown step action"
            );
            self.host
                .log(&Message::UnknownStepAction {
                    action: event.step_action.to_string(),
                })
                .await;
            return Transition::Unrecognized;
        };

        if !self.watched.is_empty() && !self.watched.contains(&action) {
            debug!(waiter_id = %self.id, %action, "step action not watched; ignoring");
            return Transition::Ignored;
        }

        self.host
            .log(&Message::EventOccurred {
                execution_id: event.execution_id.clone(),
                action: action.to_string(),
                status: event.status,
            })
            .await;

        let waiting_on_gate = action.is_gating() && event.status == StepStatus::Waiting;
        match state.pending.clone() {
            Some(pending) if pending.action == action && event.status == StepStatus::Waiting => {
                debug!(waiter_id = %self.id, %action, "gate reported again; refreshing prompt");
                self.host
                    .pause(PauseContext::AwaitingDecision {
                        waiter_id: self.id.clone(),
                        action,
                        execution_id: pending.execution_id,
                    })
                    .await;
                Transition::Refreshed
            }
            Some(pending) => {
                info!(
                    waiter_id = %self.id,
                    gate = %pending.action,
                    %action,
                    status = %event.status,
                    "execution moved past the open gate"
                );
                self.finish(&mut state, StepOutcome::Success).await
            }
            None if waiting_on_gate => {
                state.pending = Some(PendingGate {
                    action,
                    execution_id: event.execution_id.clone(),
                });
                info!(
                    waiter_id = %self.id,
                    execution_id = %event.execution_id,
                    %action,
                    "gate opened; waiting for a decision"
                );
                self.host
                    .log(&Message::WaitingApproval {
                        action,
                        execution_id: event.execution_id.clone(),
                    })
                    .await;
                self.host
                    .pause(PauseContext::AwaitingDecision {
                        waiter_id: self.id.clone(),
                        action,
                        execution_id: event.execution_id.clone(),
                    })
                    .await;
                Transition::Gated
            }
            None => self.finish(&mut state, StepOutcome::Success).await,
        }
    }

    /// Administrative override: resolve successfully without an event or a
    /// decision, whatever the current gate.
    pub async fn end_quietly(&self) -> Result<Transition, WaiterError> {
        let mut state = self.state.lock().await;
        if state.resolution.is_some() {
            return Err(WaiterError::AlreadyResolved(self.id.clone()));
        }
        info!(waiter_id = %self.id, "ending wait quietly");
        self.host.log(&Message::EndQuietly).await;
        Ok(self.finish(&mut state, StepOutcome::Success).await)
    }

    /// Host-initiated interruption. Never touches the external execution.
    pub async fn abort(&self) -> Result<Transition, WaiterError> {
        let mut state = self.state.lock().await;
        if state.resolution.is_some() {
            return Err(WaiterError::AlreadyResolved(self.id.clone()));
        }
        info!(waiter_id = %self.id, "wait interrupted by host");
        self.host.log(&Message::Interrupted).await;
        Ok(self.finish(&mut state, StepOutcome::Aborted).await)
    }

    /// Takes exclusive ownership of the open gate for a human decision.
    ///
    /// The outcome is recorded before this returns, so any event or decision
    /// arriving afterwards is a no-op. The lock is held until the claim resolves;
    /// a claim dropped unresolved reopens the gate.
    pub(crate) async fn claim_gate(&self) -> Result<GateClaim<'_>, WaiterError> {
        let mut state = self.state.lock().await;
        if state.outcome_recorded || state.resolution.is_some() {
            return Err(WaiterError::AlreadyResolved(self.id.clone()));
        }
        let pending = state
            .pending
            .clone()
            .ok_or_else(|| WaiterError::NotGated(self.id.clone()))?;
        state.outcome_recorded = true;
        Ok(GateClaim {
            waiter: self,
            state,
            pending,
            resolved: false,
        })
    }

    async fn finish(&self, state: &mut WaiterState, outcome: StepOutcome) -> Transition {
        state.outcome_recorded = true;
        state.pending = None;
        state.resolution = Some(outcome.clone());
        info!(waiter_id = %self.id, ?outcome, "wait resolved");
        self.host.resume(outcome.clone()).await;
        Transition::Resolved(outcome)
    }
}

/// Exclusive hold on an open gate while its decision is carried out.
pub(crate) struct GateClaim<'a> {
    waiter: &'a StepWaiter,
    state: MutexGuard<'a, WaiterState>,
    pending: PendingGate,
    resolved: bool,
}

impl GateClaim<'_> {
    pub(crate) fn pending(&self) -> &PendingGate {
        &self.pending
    }

    pub(crate) async fn log(&self, message: &Message) {
        self.waiter.host.log(message).await;
    }

    pub(crate) async fn resolve(mut self, outcome: StepOutcome) -> Transition {
        let transition = self.waiter.finish(&mut self.state, outcome).await;
        self.resolved = true;
        transition
    }
}

impl Drop for GateClaim<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.state.resolution.is_none() {
            warn!(waiter_id = %self.waiter.id, "gate decision abandoned; gate reopened");
            self.state.outcome_recorded = false;
        }
    }
}
