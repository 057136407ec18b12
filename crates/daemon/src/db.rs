//! Embedded SurrealDB store for waiter records, host steps, triggers and job
//! starts.

use std::path::Path;

use anyhow::{Context, Result};
use pipeline_gate_core::{
    now_ms, PauseContext, PipelineStartTrigger, StartCause, WaiterId, WaiterRecord,
};
use serde::{Deserialize, Serialize};
use surrealdb::engine::local::SurrealKv;
use surrealdb::Surreal;

pub type SurrealConn = surrealdb::engine::local::Db;
pub type SurrealDb = Surreal<SurrealConn>;

const WAITER: &str = "waiter";
const STEP: &str = "host_step";
const TRIGGER: &str = "start_trigger";
const JOB_START: &str = "job_start";

#[derive(Clone)]
pub struct Db {
    inner: SurrealDb,
}

/// Host-visible status of a suspended step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStepState {
    Paused,
    Succeeded,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub at_ms: i64,
    pub key: String,
    pub text: String,
}

/// A host workflow step attached to one waiter (same id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStepRecord {
    pub step_id: WaiterId,
    pub status: HostStepState,
    #[serde(default)]
    pub pause: Option<PauseContext>,
    #[serde(default)]
    pub log: Vec<LogLine>,
    #[serde(default)]
    pub failure: Option<String>,
    pub updated_at_ms: i64,
}

impl HostStepRecord {
    pub fn paused(step_id: WaiterId) -> Self {
        Self {
            step_id,
            status: HostStepState::Paused,
            pause: None,
            log: Vec::new(),
            failure: None,
            updated_at_ms: now_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStart {
    pub job: String,
    pub cause: StartCause,
    pub at_ms: i64,
}

impl Db {
    pub async fn connect(db_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(db_dir)
            .with_context(|| format!("creating db_dir {}", db_dir.display()))?;

        let db_path = db_dir
            .to_str()
            .context("db_dir must be valid utf-8")?
            .to_string();

        let inner = Surreal::new::<SurrealKv>(db_path)
            .await
            .context("connecting to embedded SurrealKV")?;

        inner
            .use_ns("pipeline_gate")
            .use_db("main")
            .await
            .context("selecting surreal namespace/db")?;

        Ok(Self { inner })
    }

    pub async fn upsert_waiter(&self, record: &WaiterRecord) -> Result<()> {
        let _: Option<WaiterRecord> = self
            .inner
            .upsert((WAITER, record.waiter_id.to_string()))
            .content(record.clone())
            .await
            .with_context(|| format!("saving waiter {}", record.waiter_id))?;
        Ok(())
    }

    pub async fn delete_waiter(&self, id: &WaiterId) -> Result<()> {
        let _: Option<WaiterRecord> = self
            .inner
            .delete((WAITER, id.to_string()))
            .await
            .with_context(|| format!("deleting waiter {id}"))?;
        Ok(())
    }

    pub async fn list_waiters(&self) -> Result<Vec<WaiterRecord>> {
        let mut records: Vec<WaiterRecord> = self
            .inner
            .select(WAITER)
            .await
            .context("listing waiters")?;
        records.sort_by_key(|r| r.created_at_ms);
        Ok(records)
    }

    pub async fn upsert_step(&self, step: &HostStepRecord) -> Result<()> {
        let _: Option<HostStepRecord> = self
            .inner
            .upsert((STEP, step.step_id.to_string()))
            .content(step.clone())
            .await
            .with_context(|| format!("saving host step {}", step.step_id))?;
        Ok(())
    }

    pub async fn get_step(&self, id: &WaiterId) -> Result<Option<HostStepRecord>> {
        let step: Option<HostStepRecord> = self
            .inner
            .select((STEP, id.to_string()))
            .await
            .with_context(|| format!("loading host step {id}"))?;
        Ok(step)
    }

    pub async fn upsert_trigger(&self, trigger: &PipelineStartTrigger) -> Result<()> {
        let _: Option<PipelineStartTrigger> = self
            .inner
            .upsert((TRIGGER, trigger.job.clone()))
            .content(trigger.clone())
            .await
            .with_context(|| format!("saving trigger for job {}", trigger.job))?;
        Ok(())
    }

    pub async fn list_triggers(&self) -> Result<Vec<PipelineStartTrigger>> {
        let triggers: Vec<PipelineStartTrigger> = self
            .inner
            .select(TRIGGER)
            .await
            .context("listing triggers")?;
        Ok(triggers)
    }

    pub async fn record_job_start(&self, start: &JobStart) -> Result<()> {
        let key = format!("{}_{}", start.job, start.cause.event_id);
        let _: Option<JobStart> = self
            .inner
            .upsert((JOB_START, key))
            .content(start.clone())
            .await
            .with_context(|| format!("recording start of job {}", start.job))?;
        Ok(())
    }

    pub async fn list_job_starts(&self, job: &str) -> Result<Vec<JobStart>> {
        let mut res = self
            .inner
            .query("SELECT * FROM job_start WHERE job = $job ORDER BY at_ms ASC;")
            .bind(("job", job.to_string()))
            .await
            .context("listing job starts")?;
        let starts: Vec<JobStart> = res.take(0)?;
        Ok(starts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_gate_core::{StepAction, WaiterScope};

    async fn db() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::connect(&dir.path().join("db")).await.unwrap();
        (dir, db)
    }

    fn record() -> WaiterRecord {
        WaiterRecord {
            waiter_id: WaiterId::new(),
            scope: WaiterScope {
                project: "weretail".into(),
                program_id: "1".into(),
                pipeline_id: "2".into(),
                build_correlation_id: "3".into(),
            },
            watched: [StepAction::CodeQuality, StepAction::Build].into_iter().collect(),
            outcome_recorded: false,
            pending: None,
            created_at_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn waiter_records_upsert_list_delete() {
        let (_dir, db) = db().await;
        let mut rec = record();
        db.upsert_waiter(&rec).await.unwrap();

        rec.pending = Some(pipeline_gate_core::PendingGate {
            action: StepAction::CodeQuality,
            execution_id: "9".into(),
        });
        db.upsert_waiter(&rec).await.unwrap();
        assert_eq!(db.list_waiters().await.unwrap(), vec![rec.clone()]);

        db.delete_waiter(&rec.waiter_id).await.unwrap();
        assert!(db.list_waiters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn host_steps_round_trip() {
        let (_dir, db) = db().await;
        let id = WaiterId::new();
        let mut step = HostStepRecord::paused(id.clone());
        step.pause = Some(PauseContext::AwaitingEvent);
        step.log.push(LogLine {
            at_ms: 1,
            key: "info_waiting".into(),
            text: "Waiting for pipeline step events.".into(),
        });
        db.upsert_step(&step).await.unwrap();
        assert_eq!(db.get_step(&id).await.unwrap(), Some(step));
        assert_eq!(db.get_step(&WaiterId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn triggers_and_job_starts() {
        let (_dir, db) = db().await;
        let trigger = PipelineStartTrigger {
            project: "weretail".into(),
            program_id: "1".into(),
            pipeline_id: "2".into(),
            job: "deploy".into(),
        };
        db.upsert_trigger(&trigger).await.unwrap();
        db.upsert_trigger(&trigger).await.unwrap();
        assert_eq!(db.list_triggers().await.unwrap(), vec![trigger]);

        let start = JobStart {
            job: "deploy".into(),
            cause: StartCause {
                event_id: "evt".into(),
            },
            at_ms: 5,
        };
        db.record_job_start(&start).await.unwrap();
        assert_eq!(db.list_job_starts("deploy").await.unwrap(), vec![start]);
        assert!(db.list_job_starts("other").await.unwrap().is_empty());
    }
}
