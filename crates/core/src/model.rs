use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::WaiterError;
use crate::util::new_ulid;

/// Kind of step inside an external pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepAction {
    Validate,
    Build,
    CodeQuality,
    SecurityTest,
    LoadTest,
    AssetsTest,
    UiTest,
    ContentAudit,
    Approval,
    Managed,
    Schedule,
    Deploy,
}

impl StepAction {
    /// Every step kind the external service reports.
    pub const ALL: [StepAction; 12] = [
        StepAction::Validate,
        StepAction::Build,
        StepAction::CodeQuality,
        StepAction::SecurityTest,
        StepAction::LoadTest,
        StepAction::AssetsTest,
        StepAction::UiTest,
        StepAction::ContentAudit,
        StepAction::Approval,
        StepAction::Managed,
        StepAction::Schedule,
        StepAction::Deploy,
    ];

    /// Wire name of the step kind.
    pub fn as_str(self) -> &'static str {
        match self {
            StepAction::Validate => "validate",
            StepAction::Build => "build",
            StepAction::CodeQuality => "codeQuality",
            StepAction::SecurityTest => "securityTest",
            StepAction::LoadTest => "loadTest",
            StepAction::AssetsTest => "assetsTest",
            StepAction::UiTest => "uiTest",
            StepAction::ContentAudit => "contentAudit",
            StepAction::Approval => "approval",
            StepAction::Managed => "managed",
            StepAction::Schedule => "schedule",
            StepAction::Deploy => "deploy",
        }
    }

    /// Whether a WAITING status on this kind needs a human decision before the
    /// external execution can continue.
    pub fn is_gating(self) -> bool {
        match self {
            StepAction::CodeQuality | StepAction::Approval => true,
            StepAction::Validate
            | StepAction::Build
            | StepAction::SecurityTest
            | StepAction::LoadTest
            | StepAction::AssetsTest
            | StepAction::UiTest
            | StepAction::ContentAudit
            | StepAction::Managed
            | StepAction::Schedule
            | StepAction::Deploy => false,
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step action name that is not one of [`StepAction::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown step action: {0}")]
pub struct UnknownStepAction(pub String);

impl FromStr for StepAction {
    type Err = UnknownStepAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownStepAction(s.to_string()))
    }
}

/// Step action exactly as an event reported it.
///
/// Unrecognized names are kept verbatim so they can be surfaced in the
/// workflow log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReportedAction {
    Known(StepAction),
    Unrecognized(String),
}

impl ReportedAction {
    /// The recognized step kind, if any.
    pub fn known(&self) -> Option<StepAction> {
        match self {
            ReportedAction::Known(action) => Some(*action),
            ReportedAction::Unrecognized(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReportedAction::Known(action) => action.as_str(),
            ReportedAction::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for ReportedAction {
    fn from(raw: String) -> Self {
        match raw.parse() {
            Ok(action) => ReportedAction::Known(action),
            Err(UnknownStepAction(raw)) => ReportedAction::Unrecognized(raw),
        }
    }
}

impl From<&str> for ReportedAction {
    fn from(raw: &str) -> Self {
        ReportedAction::from(raw.to_string())
    }
}

impl From<StepAction> for ReportedAction {
    fn from(action: StepAction) -> Self {
        ReportedAction::Known(action)
    }
}

impl From<ReportedAction> for String {
    fn from(action: ReportedAction) -> Self {
        match action {
            ReportedAction::Known(action) => action.as_str().to_string(),
            ReportedAction::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for ReportedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one step of an external pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    NotStarted,
    Running,
    Waiting,
    Finished,
    Error,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::NotStarted => "NOT_STARTED",
            StepStatus::Running => "RUNNING",
            StepStatus::Waiting => "WAITING",
            StepStatus::Finished => "FINISHED",
            StepStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step-status notification from the external pipeline service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingEvent {
    pub source_project_id: String,
    pub program_id: String,
    pub pipeline_id: String,
    pub execution_id: String,
    pub step_action: ReportedAction,
    pub status: StepStatus,
}

/// What the host recorded when it started the external pipeline for a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildContext {
    /// Project whose credentials are used for API calls.
    pub project: String,
    pub program_id: String,
    pub pipeline_id: String,
    pub execution_id: String,
}

/// Scope a waiter consumes events for. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterScope {
    pub project: String,
    pub program_id: String,
    pub pipeline_id: String,
    /// Execution started by the host build this waiter belongs to.
    pub build_correlation_id: String,
}

impl WaiterScope {
    /// Derives the scope from the host's recorded build context.
    pub fn from_build(build: Option<&BuildContext>) -> Result<Self, WaiterError> {
        let build = build.ok_or(WaiterError::MissingBuildData)?;
        let fields = [
            &build.project,
            &build.program_id,
            &build.pipeline_id,
            &build.execution_id,
        ];
        if fields.iter().any(|field| field.trim().is_empty()) {
            return Err(WaiterError::MissingBuildData);
        }
        Ok(Self {
            project: build.project.clone(),
            program_id: build.program_id.clone(),
            pipeline_id: build.pipeline_id.clone(),
            build_correlation_id: build.execution_id.clone(),
        })
    }
}

/// Stable waiter identifier; doubles as the decision form key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaiterId(pub String);

impl WaiterId {
    pub fn new() -> Self {
        Self(new_ulid().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WaiterId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for WaiterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_action_wire_names_round_trip_through_from_str() {
        for action in StepAction::ALL {
            assert_eq!(action.as_str().parse::<StepAction>(), Ok(action));
        }
        assert_eq!(
            "Unknown".parse::<StepAction>(),
            Err(UnknownStepAction("Unknown".into()))
        );
    }

    #[test]
    fn only_code_quality_and_approval_gate() {
        let gating: Vec<_> = StepAction::ALL.into_iter().filter(|a| a.is_gating()).collect();
        assert_eq!(gating, vec![StepAction::CodeQuality, StepAction::Approval]);
    }

    #[test]
    fn reported_action_keeps_unrecognized_names() {
        let known: ReportedAction = serde_json::from_str(r#""codeQuality""#).unwrap();
        assert_eq!(known, ReportedAction::Known(StepAction::CodeQuality));

        let unknown: ReportedAction = serde_json::from_str(r#""Unknown""#).unwrap();
        assert_eq!(unknown, ReportedAction::Unrecognized("Unknown".into()));
        assert_eq!(serde_json::to_string(&unknown).unwrap(), r#""Unknown""#);
    }

    #[test]
    fn step_status_uses_screaming_snake_case() {
        let status: StepStatus = serde_json::from_str(r#""NOT_STARTED""#).unwrap();
        assert_eq!(status, StepStatus::NotStarted);
        assert_eq!(StepStatus::Waiting.to_string(), "WAITING");
        assert!(serde_json::from_str::<StepStatus>(r#""PAUSED""#).is_err());
    }

    #[test]
    fn incoming_event_uses_camel_case_fields() {
        let event: IncomingEvent = serde_json::from_value(serde_json::json!({
            "sourceProjectId": "weretail",
            "programId": "1",
            "pipelineId": "2",
            "executionId": "3",
            "stepAction": "build",
            "status": "RUNNING",
        }))
        .unwrap();
        assert_eq!(event.step_action, ReportedAction::Known(StepAction::Build));
        assert_eq!(event.status, StepStatus::Running);
    }

    #[test]
    fn scope_requires_complete_build_context() {
        assert_eq!(WaiterScope::from_build(None), Err(WaiterError::MissingBuildData));

        let mut build = BuildContext {
            project: "weretail".into(),
            program_id: "1".into(),
            pipeline_id: "2".into(),
            execution_id: "3".into(),
        };
        let scope = WaiterScope::from_build(Some(&build)).unwrap();
        assert_eq!(scope.build_correlation_id, "3");

        build.pipeline_id = " ".into();
        assert_eq!(
            WaiterScope::from_build(Some(&build)),
            Err(WaiterError::MissingBuildData)
        );
    }
}
