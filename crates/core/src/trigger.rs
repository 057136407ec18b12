//! Starting host jobs when an external pipeline execution starts.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::matcher;

/// Notification that an external pipeline execution has started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStartEvent {
    /// Unique id of the notification, carried into the job's start cause.
    pub event_id: String,
    pub project: String,
    pub program_id: String,
    pub pipeline_id: String,
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("project {0} does not exist")]
    MissingProject(String),
    #[error("program {0:?} not found")]
    MissingProgram(String),
    #[error("pipeline {0:?} not found")]
    MissingPipeline(String),
    #[error(transparent)]
    Lookup(#[from] ApiError),
}

/// Name-to-id lookups against the external pipeline service.
#[async_trait]
pub trait PipelineLookup: Send + Sync {
    async fn project_exists(&self, project: &str) -> Result<bool, ApiError>;

    async fn program_id(&self, project: &str, name: &str) -> Result<Option<String>, ApiError>;

    async fn pipeline_id(
        &self,
        project: &str,
        program_id: &str,
        name: &str,
    ) -> Result<Option<String>, ApiError>;
}

/// Why a job was started.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCause {
    pub event_id: String,
}

/// Host capability to start a job. Returns `false` when the job no longer
/// exists or cannot be started.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn schedule(&self, job: &str, cause: StartCause) -> bool;
}

/// A resolved start trigger attached to one host job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStartTrigger {
    pub project: String,
    pub program_id: String,
    pub pipeline_id: String,
    pub job: String,
}

/// `Some(id)` when the reference is already a numeric identifier.
fn numeric_id(reference: &str) -> Option<String> {
    reference.trim().parse::<u64>().ok().map(|id| id.to_string())
}

impl PipelineStartTrigger {
    /// Resolves program and pipeline references (numeric id or name).
    pub async fn resolve(
        project: &str,
        program_ref: &str,
        pipeline_ref: &str,
        job: &str,
        lookup: &dyn PipelineLookup,
    ) -> Result<Self, TriggerError> {
        if project.trim().is_empty() || !lookup.project_exists(project).await? {
            return Err(TriggerError::MissingProject(project.to_string()));
        }

        let program_id = match numeric_id(program_ref) {
            Some(id) => id,
            None => lookup
                .program_id(project, program_ref)
                .await?
                .ok_or_else(|| TriggerError::MissingProgram(program_ref.to_string()))?,
        };

        let pipeline_id = match numeric_id(pipeline_ref) {
            Some(id) => id,
            None => lookup
                .pipeline_id(project, &program_id, pipeline_ref)
                .await?
                .ok_or_else(|| TriggerError::MissingPipeline(pipeline_ref.to_string()))?,
        };

        Ok(Self {
            project: project.to_string(),
            program_id,
            pipeline_id,
            job: job.to_string(),
        })
    }

    pub fn interested_in(&self, event: &PipelineStartEvent) -> bool {
        matcher::trigger_matches(event, self)
    }
}

/// Registered start triggers.
#[derive(Debug, Default)]
pub struct TriggerSet {
    triggers: RwLock<Vec<PipelineStartTrigger>>,
}

impl TriggerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a trigger, replacing any earlier trigger for the same job.
    pub fn add(&self, trigger: PipelineStartTrigger) {
        let mut triggers = self.triggers.write().unwrap_or_else(PoisonError::into_inner);
        triggers.retain(|t| t.job != trigger.job);
        triggers.push(trigger);
    }

    pub fn list(&self) -> Vec<PipelineStartTrigger> {
        self.triggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Schedules every interested job. Returns how many were scheduled.
    pub async fn route(&self, event: &PipelineStartEvent, scheduler: &dyn JobScheduler) -> usize {
        let interested: Vec<_> = self
            .list()
            .into_iter()
            .filter(|trigger| trigger.interested_in(event))
            .collect();
        debug!(event_id = %event.event_id, interested = interested.len(), "routing pipeline start");

        let mut scheduled = 0;
        for trigger in interested {
            let cause = StartCause {
                event_id: event.event_id.clone(),
            };
            if scheduler.schedule(&trigger.job, cause).await {
                info!(job = %trigger.job, event_id = %event.event_id, "scheduled job for pipeline start");
                scheduled += 1;
            } else {
                warn!(job = %trigger.job, event_id = %event.event_id, "job missing or not buildable; skipped");
            }
        }
        scheduled
    }
}
