//! In-memory collaborators for tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{AccessToken, ApiError, CredentialResolver, ExecutionTarget, PipelineApi};
use crate::host::{PauseContext, StepOutcome, Suspendable};
use crate::messages::{Message, Operation};
use crate::trigger::{JobScheduler, PipelineLookup, StartCause};

/// One call received by [`FakePipelineApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub op: Operation,
    pub target: ExecutionTarget,
}

/// Records calls; optionally fails or delays every call.
#[derive(Debug, Default)]
pub struct FakePipelineApi {
    calls: Mutex<Vec<ApiCall>>,
    failure: Option<ApiError>,
    delay: Option<Duration>,
}

impl FakePipelineApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: ApiError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn call(&self, op: Operation, target: &ExecutionTarget) -> Result<(), ApiError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ApiCall {
                op,
                target: target.clone(),
            });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PipelineApi for FakePipelineApi {
    async fn advance_execution(
        &self,
        _token: &AccessToken,
        target: &ExecutionTarget,
    ) -> Result<(), ApiError> {
        self.call(Operation::Advance, target).await
    }

    async fn cancel_execution(
        &self,
        _token: &AccessToken,
        target: &ExecutionTarget,
    ) -> Result<(), ApiError> {
        self.call(Operation::Cancel, target).await
    }
}

/// Hands out the same token for every project, or always fails.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    result: Result<AccessToken, ApiError>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            result: Ok(AccessToken::new(token)),
        }
    }

    pub fn rejecting(error: ApiError) -> Self {
        Self { result: Err(error) }
    }
}

impl Default for StaticCredentials {
    fn default() -> Self {
        Self::new("test-token")
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn authenticate(&self, _project: &str) -> Result<AccessToken, ApiError> {
        self.result.clone()
    }
}

/// Host step that just remembers what it was told.
#[derive(Debug, Default)]
pub struct RecordingHost {
    messages: Mutex<Vec<Message>>,
    pauses: Mutex<Vec<PauseContext>>,
    outcomes: Mutex<Vec<StepOutcome>>,
}

impl RecordingHost {
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Message texts as the host log would show them.
    pub fn log_lines(&self) -> Vec<String> {
        self.messages().iter().map(ToString::to_string).collect()
    }

    pub fn pauses(&self) -> Vec<PauseContext> {
        self.pauses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn outcomes(&self) -> Vec<StepOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Suspendable for RecordingHost {
    async fn log(&self, message: &Message) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
    }

    async fn pause(&self, context: PauseContext) {
        self.pauses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(context);
    }

    async fn resume(&self, outcome: StepOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome);
    }
}

/// Fixed name-to-id directory.
#[derive(Debug, Default)]
pub struct FakeLookup {
    projects: HashSet<String>,
    programs: HashMap<(String, String), String>,
    pipelines: HashMap<(String, String, String), String>,
}

impl FakeLookup {
    pub fn with_project(mut self, project: &str) -> Self {
        self.projects.insert(project.to_string());
        self
    }

    pub fn with_program(mut self, project: &str, name: &str, id: &str) -> Self {
        self.programs
            .insert((project.to_string(), name.to_string()), id.to_string());
        self
    }

    pub fn with_pipeline(mut self, project: &str, program_id: &str, name: &str, id: &str) -> Self {
        self.pipelines.insert(
            (project.to_string(), program_id.to_string(), name.to_string()),
            id.to_string(),
        );
        self
    }
}

#[async_trait]
impl PipelineLookup for FakeLookup {
    async fn project_exists(&self, project: &str) -> Result<bool, ApiError> {
        Ok(self.projects.contains(project))
    }

    async fn program_id(&self, project: &str, name: &str) -> Result<Option<String>, ApiError> {
        Ok(self
            .programs
            .get(&(project.to_string(), name.to_string()))
            .cloned())
    }

    async fn pipeline_id(
        &self,
        project: &str,
        program_id: &str,
        name: &str,
    ) -> Result<Option<String>, ApiError> {
        Ok(self
            .pipelines
            .get(&(project.to_string(), program_id.to_string(), name.to_string()))
            .cloned())
    }
}

/// Records scheduled jobs; jobs named in `missing` are refused.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    missing: HashSet<String>,
    scheduled: Mutex<Vec<(String, StartCause)>>,
}

impl RecordingScheduler {
    pub fn with_missing<'a>(jobs: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            missing: jobs.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn scheduled(&self) -> Vec<(String, StartCause)> {
        self.scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl JobScheduler for RecordingScheduler {
    async fn schedule(&self, job: &str, cause: StartCause) -> bool {
        if self.missing.contains(job) {
            return false;
        }
        self.scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job.to_string(), cause));
        true
    }
}
