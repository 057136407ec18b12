use std::collections::BTreeSet;
use std::sync::Arc;

use pipeline_gate_core::{
    ApprovalGate, BuildContext, CredentialResolver, Delivery, GatePrompt, IncomingEvent,
    JobScheduler, NotificationRouter, PendingGate, PipelineApi, PipelineLookup, PipelineStartEvent,
    PipelineStartTrigger, StepAction, StepOutcome, StepWaiter, TriggerError, TriggerSet,
    WaiterError, WaiterId, WaiterPhase, WaiterRegistry, WaiterScope,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::db::{Db, HostStepRecord, HostStepState, JobStart};
use crate::host::HostStep;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Waiter(#[from] WaiterError),
    #[error(transparent)]
    Trigger(#[from] TriggerError),
    #[error("step {step_id}: {source}")]
    StepFailed {
        step_id: WaiterId,
        source: WaiterError,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWaiter {
    #[serde(default)]
    pub build: Option<BuildContext>,
    /// Step kinds to wake on; empty means all.
    #[serde(default)]
    pub actions: Vec<StepAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRequest {
    pub project: String,
    /// Program id or name.
    pub program: String,
    /// Pipeline id or name.
    pub pipeline: String,
    pub job: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaiterView {
    pub waiter_id: WaiterId,
    pub scope: WaiterScope,
    pub watched: BTreeSet<StepAction>,
    pub phase: WaiterPhase,
    pub pending: Option<PendingGate>,
    pub prompt: Option<GatePrompt>,
    pub created_at_ms: i64,
}

/// Hosts the waiter core: creation, event delivery, decisions and persistence.
pub struct GateService {
    db: Db,
    registry: Arc<WaiterRegistry>,
    router: NotificationRouter,
    gate: ApprovalGate,
    triggers: TriggerSet,
    lookup: Arc<dyn PipelineLookup>,
    scheduler: Arc<dyn JobScheduler>,
    persist_lock: Mutex<()>,
}

impl GateService {
    pub fn new(
        db: Db,
        credentials: Arc<dyn CredentialResolver>,
        api: Arc<dyn PipelineApi>,
        lookup: Arc<dyn PipelineLookup>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        let registry = Arc::new(WaiterRegistry::new());
        Self {
            router: NotificationRouter::new(registry.clone()),
            gate: ApprovalGate::new(registry.clone(), credentials, api),
            db,
            registry,
            triggers: TriggerSet::new(),
            lookup,
            scheduler,
            persist_lock: Mutex::new(()),
        }
    }

    /// Re-registers waiters and triggers persisted before a restart.
    pub async fn reattach(&self) -> anyhow::Result<usize> {
        for trigger in self.db.list_triggers().await? {
            self.triggers.add(trigger);
        }

        let mut count = 0;
        for record in self.db.list_waiters().await? {
            let step = match self.db.get_step(&record.waiter_id).await? {
                Some(step) => step,
                None => HostStepRecord::paused(record.waiter_id.clone()),
            };
            if step.status != HostStepState::Paused {
                // The step finished but its waiter record outlived it.
                warn!(waiter_id = %record.waiter_id, status = ?step.status, "dropping waiter of a finished step");
                self.db.delete_waiter(&record.waiter_id).await?;
                continue;
            }
            if record.outcome_recorded {
                warn!(waiter_id = %record.waiter_id, "reattaching waiter with a recorded outcome; it will stay inert");
            }
            let host = Arc::new(HostStep::from_record(self.db.clone(), step));
            self.registry
                .register(Arc::new(StepWaiter::from_record(record, host)));
            count += 1;
        }
        info!(waiters = count, triggers = self.triggers.list().len(), "reattached persisted state");
        Ok(count)
    }

    pub async fn create_waiter(&self, req: CreateWaiter) -> ServiceResult<WaiterId> {
        let id = WaiterId::new();
        let host = Arc::new(HostStep::new(self.db.clone(), id.clone()));
        let waiter = StepWaiter::start_with_id(id.clone(), req.build.as_ref(), req.actions, host)
            .await
            .map_err(|source| ServiceError::StepFailed {
                step_id: id.clone(),
                source,
            })?;
        self.registry.register(Arc::new(waiter));
        self.persist(&id).await?;
        Ok(id)
    }

    pub async fn route_event(&self, event: &IncomingEvent) -> ServiceResult<Vec<Delivery>> {
        let deliveries = self.router.route(event).await;
        for delivery in &deliveries {
            self.persist(&delivery.waiter_id).await?;
        }
        info!(
            program_id = %event.program_id,
            pipeline_id = %event.pipeline_id,
            execution_id = %event.execution_id,
            matched = deliveries.len(),
            "routed step-state event"
        );
        Ok(deliveries)
    }

    pub async fn decide(&self, id: &WaiterId, choice: &str) -> ServiceResult<StepOutcome> {
        let outcome = self.gate.submit(id, choice).await?;
        self.persist(id).await?;
        Ok(outcome)
    }

    pub async fn end_quietly(&self, id: &WaiterId) -> ServiceResult<()> {
        let waiter = self.waiter(id)?;
        waiter.end_quietly().await?;
        self.registry.remove(id);
        self.persist(id).await?;
        Ok(())
    }

    pub async fn abort(&self, id: &WaiterId) -> ServiceResult<()> {
        let waiter = self.waiter(id)?;
        waiter.abort().await?;
        self.registry.remove(id);
        self.persist(id).await?;
        Ok(())
    }

    pub async fn waiter_view(&self, id: &WaiterId) -> ServiceResult<WaiterView> {
        let waiter = self.waiter(id)?;
        self.view(&waiter).await
    }

    pub async fn list_waiters(&self) -> ServiceResult<Vec<WaiterView>> {
        let mut views = Vec::new();
        for waiter in self.registry.snapshot() {
            match self.view(&waiter).await {
                Ok(view) => views.push(view),
                // Resolved between snapshot and view.
                Err(ServiceError::Waiter(WaiterError::UnknownWaiter(_))) => {}
                Err(e) => return Err(e),
            }
        }
        views.sort_by_key(|v| v.created_at_ms);
        Ok(views)
    }

    pub async fn step(&self, id: &WaiterId) -> ServiceResult<HostStepRecord> {
        self.db
            .get_step(id)
            .await?
            .ok_or_else(|| WaiterError::UnknownWaiter(id.clone()).into())
    }

    pub async fn add_trigger(&self, req: TriggerRequest) -> ServiceResult<PipelineStartTrigger> {
        let trigger = PipelineStartTrigger::resolve(
            &req.project,
            &req.program,
            &req.pipeline,
            &req.job,
            self.lookup.as_ref(),
        )
        .await?;
        self.db.upsert_trigger(&trigger).await?;
        self.triggers.add(trigger.clone());
        info!(job = %trigger.job, program_id = %trigger.program_id, pipeline_id = %trigger.pipeline_id, "start trigger registered");
        Ok(trigger)
    }

    pub async fn pipeline_started(&self, event: &PipelineStartEvent) -> usize {
        self.triggers.route(event, self.scheduler.as_ref()).await
    }

    pub async fn job_starts(&self, job: &str) -> ServiceResult<Vec<JobStart>> {
        Ok(self.db.list_job_starts(job).await?)
    }

    fn waiter(&self, id: &WaiterId) -> ServiceResult<Arc<StepWaiter>> {
        self.registry
            .get(id)
            .ok_or_else(|| WaiterError::UnknownWaiter(id.clone()).into())
    }

    async fn view(&self, waiter: &StepWaiter) -> ServiceResult<WaiterView> {
        let record = waiter.record().await;
        let prompt = self.gate.prompt(waiter.id()).await?;
        Ok(WaiterView {
            waiter_id: record.waiter_id,
            scope: record.scope,
            watched: record.watched,
            phase: waiter.phase().await,
            pending: record.pending,
            prompt,
            created_at_ms: record.created_at_ms,
        })
    }

    /// Writes the waiter's current record, or deletes it once the waiter has
    /// left the registry. Serialized so the last write reflects the latest state.
    ///
    /// A record is only deleted once the store holds the step's final status;
    /// otherwise it is kept so the wait survives a restart.
    async fn persist(&self, id: &WaiterId) -> anyhow::Result<()> {
        let _guard = self.persist_lock.lock().await;
        let mut live = None;
        if let Some(waiter) = self.registry.get(id) {
            if waiter.phase().await != WaiterPhase::Resolved {
                live = Some(waiter.record().await);
            }
        }
        if let Some(record) = live {
            return self.db.upsert_waiter(&record).await;
        }
        match self.db.get_step(id).await? {
            Some(step) if step.status != HostStepState::Paused => self.db.delete_waiter(id).await,
            _ => {
                error!(waiter_id = %id, "final step status not stored; keeping waiter record");
                Ok(())
            }
        }
    }
}
