use async_trait::async_trait;
use pipeline_gate_core::{now_ms, JobScheduler, StartCause};
use tracing::{info, warn};

use crate::config::GateConfig;
use crate::db::{Db, JobStart};

/// Queues starts of the host jobs declared in the config file.
#[derive(Clone)]
pub struct StoreScheduler {
    db: Db,
    config: GateConfig,
}

impl StoreScheduler {
    pub fn new(db: Db, config: GateConfig) -> Self {
        Self { db, config }
    }
}

#[async_trait]
impl JobScheduler for StoreScheduler {
    async fn schedule(&self, job: &str, cause: StartCause) -> bool {
        if !self.config.has_job(job) {
            return false;
        }
        let start = JobStart {
            job: job.to_string(),
            cause,
            at_ms: now_ms(),
        };
        match self.db.record_job_start(&start).await {
            Ok(()) => {
                info!(job, event_id = %start.cause.event_id, "job start queued");
                true
            }
            Err(e) => {
                warn!(job, error = %e, "queueing job start failed");
                false
            }
        }
    }
}
