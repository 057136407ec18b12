#![forbid(unsafe_code)]

//! Event-correlated suspension of host workflow steps on external pipeline
//! executions, with a human approval gate for the step kinds that need one.

pub mod api;
pub mod error;
pub mod fake;
pub mod gate;
pub mod host;
pub mod matcher;
pub mod messages;
pub mod model;
pub mod registry;
pub mod router;
pub mod trigger;
pub mod waiter;

mod util;

pub use api::{AccessToken, ApiError, ApiErrorKind, CredentialResolver, ExecutionTarget, PipelineApi};
pub use error::WaiterError;
pub use gate::{ApprovalGate, Decision, GatePrompt};
pub use host::{PauseContext, StepOutcome, Suspendable};
pub use messages::Message;
pub use model::{
    BuildContext, IncomingEvent, ReportedAction, StepAction, StepStatus, UnknownStepAction,
    WaiterId, WaiterScope,
};
pub use registry::WaiterRegistry;
pub use router::{Delivery, NotificationRouter};
pub use trigger::{
    JobScheduler, PipelineLookup, PipelineStartEvent, PipelineStartTrigger, StartCause,
    TriggerError, TriggerSet,
};
pub use util::{new_ulid, now_ms};
pub use waiter::{PendingGate, StepWaiter, Transition, WaiterPhase, WaiterRecord};
