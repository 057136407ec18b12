//! Host workflow step backed by the store: the visible log and final status
//! survive restarts.

use async_trait::async_trait;
use pipeline_gate_core::{now_ms, Message, PauseContext, StepOutcome, Suspendable, WaiterId};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::db::{Db, HostStepRecord, HostStepState, LogLine};

pub struct HostStep {
    db: Db,
    record: Mutex<HostStepRecord>,
}

impl HostStep {
    pub fn new(db: Db, step_id: WaiterId) -> Self {
        Self::from_record(db, HostStepRecord::paused(step_id))
    }

    pub fn from_record(db: Db, record: HostStepRecord) -> Self {
        Self {
            db,
            record: Mutex::new(record),
        }
    }

    pub async fn snapshot(&self) -> HostStepRecord {
        self.record.lock().await.clone()
    }

    async fn update(&self, apply: impl FnOnce(&mut HostStepRecord)) {
        let mut record = self.record.lock().await;
        apply(&mut record);
        record.updated_at_ms = now_ms();
        if let Err(e) = self.db.upsert_step(&record).await {
            error!(step_id = %record.step_id, error = %e, "persisting host step failed");
        }
    }
}

#[async_trait]
impl Suspendable for HostStep {
    async fn log(&self, message: &Message) {
        let line = LogLine {
            at_ms: now_ms(),
            key: message.key().to_string(),
            text: message.to_string(),
        };
        self.update(|record| record.log.push(line)).await;
    }

    async fn pause(&self, context: PauseContext) {
        self.update(|record| {
            record.status = HostStepState::Paused;
            record.pause = Some(context);
        })
        .await;
    }

    async fn resume(&self, outcome: StepOutcome) {
        self.update(|record| {
            record.pause = None;
            match &outcome {
                StepOutcome::Success => record.status = HostStepState::Succeeded,
                StepOutcome::Failure { reason } => {
                    record.status = HostStepState::Failed;
                    record.failure = Some(reason.clone());
                }
                StepOutcome::Aborted => record.status = HostStepState::Aborted,
            }
        })
        .await;
        info!(?outcome, "host step resumed");
    }
}
