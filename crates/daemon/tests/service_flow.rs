use std::sync::Arc;

use pipeline_gate_core::fake::{FakeLookup, FakePipelineApi, RecordingScheduler, StaticCredentials};
use pipeline_gate_core::{
    ApiError, BuildContext, IncomingEvent, PauseContext, PipelineStartEvent, ReportedAction,
    StepAction, StepOutcome, StepStatus, WaiterError, WaiterId, WaiterPhase,
};
use pipeline_gate_daemon::db::{Db, HostStepState};
use pipeline_gate_daemon::service::{CreateWaiter, GateService, ServiceError, TriggerRequest};

struct Fixture {
    _dir: tempfile::TempDir,
    db: Db,
    api: Arc<FakePipelineApi>,
    scheduler: Arc<RecordingScheduler>,
}

impl Fixture {
    async fn new(api: FakePipelineApi) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::connect(&dir.path().join("db")).await.unwrap();
        Self {
            _dir: dir,
            db,
            api: Arc::new(api),
            scheduler: Arc::new(RecordingScheduler::with_missing(["retired"])),
        }
    }

    /// A fresh service over the same store, as after a process restart.
    fn service(&self) -> GateService {
        let lookup = FakeLookup::default()
            .with_project("weretail")
            .with_program("weretail", "Acme", "1")
            .with_pipeline("weretail", "1", "Prod", "1");
        GateService::new(
            self.db.clone(),
            Arc::new(StaticCredentials::default()),
            self.api.clone(),
            Arc::new(lookup),
            self.scheduler.clone(),
        )
    }
}

fn create(actions: &[StepAction]) -> CreateWaiter {
    CreateWaiter {
        build: Some(BuildContext {
            project: "weretail".into(),
            program_id: "1".into(),
            pipeline_id: "1".into(),
            execution_id: "1".into(),
        }),
        actions: actions.to_vec(),
    }
}

fn event(action: impl Into<ReportedAction>, status: StepStatus) -> IncomingEvent {
    IncomingEvent {
        source_project_id: "weretail".into(),
        program_id: "1".into(),
        pipeline_id: "1".into(),
        execution_id: "ExecutionId".into(),
        step_action: action.into(),
        status,
    }
}

#[tokio::test]
async fn event_resolution_is_visible_in_step_record() {
    let fx = Fixture::new(FakePipelineApi::new()).await;
    let svc = fx.service();
    let id = svc.create_waiter(create(&[StepAction::Build])).await.unwrap();

    let step = svc.step(&id).await.unwrap();
    assert_eq!(step.status, HostStepState::Paused);
    assert_eq!(step.pause, Some(PauseContext::AwaitingEvent));
    assert_eq!(fx.db.list_waiters().await.unwrap().len(), 1);

    let deliveries = svc
        .route_event(&event(StepAction::Build, StepStatus::Running))
        .await
        .unwrap();
    assert_eq!(deliveries.len(), 1);

    let step = svc.step(&id).await.unwrap();
    assert_eq!(step.status, HostStepState::Succeeded);
    assert!(step.log.iter().any(|line| line.key == "info_eventOccurred"
        && line.text.contains("ExecutionId")
        && line.text.contains("build")
        && line.text.contains("RUNNING")));
    assert!(fx.db.list_waiters().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_build_data_fails_step_without_waiter() {
    let fx = Fixture::new(FakePipelineApi::new()).await;
    let svc = fx.service();

    let err = svc
        .create_waiter(CreateWaiter {
            build: None,
            actions: vec![],
        })
        .await
        .unwrap_err();
    let (step_id, source) = match err {
        ServiceError::StepFailed { step_id, source } => (step_id, source),
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(source, WaiterError::MissingBuildData);

    let step = svc.step(&step_id).await.unwrap();
    assert_eq!(step.status, HostStepState::Failed);
    assert!(step.log.iter().any(|line| line.key == "error_missingBuildData"));
    assert!(svc.list_waiters().await.unwrap().is_empty());
    assert!(fx.db.list_waiters().await.unwrap().is_empty());
}

#[tokio::test]
async fn gated_waiter_survives_restart_and_accepts_decision() {
    let fx = Fixture::new(FakePipelineApi::new()).await;
    let id = {
        let svc = fx.service();
        let id = svc
            .create_waiter(create(&[StepAction::CodeQuality, StepAction::Build]))
            .await
            .unwrap();
        svc.route_event(&event(StepAction::CodeQuality, StepStatus::Waiting))
            .await
            .unwrap();
        id
    };

    let svc = fx.service();
    assert_eq!(svc.reattach().await.unwrap(), 1);

    let view = svc.waiter_view(&id).await.unwrap();
    assert_eq!(view.phase, WaiterPhase::GatedWait);
    let prompt = view.prompt.unwrap();
    assert_eq!(prompt.execution_id, "ExecutionId");

    assert_eq!(svc.decide(&id, "proceed").await.unwrap(), StepOutcome::Success);
    assert_eq!(fx.api.calls().len(), 1);

    let step = svc.step(&id).await.unwrap();
    assert_eq!(step.status, HostStepState::Succeeded);
    // Log written before the restart is kept.
    assert!(step.log.iter().any(|line| line.key == "prompt_waitingApproval"));
    assert!(step.log.iter().any(|line| line.key == "info_executionAdvanced"));
    assert!(fx.db.list_waiters().await.unwrap().is_empty());

    assert!(matches!(
        svc.decide(&id, "cancel").await,
        Err(ServiceError::Waiter(WaiterError::UnknownWaiter(_)))
    ));
}

#[tokio::test]
async fn active_waiter_survives_restart() {
    let fx = Fixture::new(FakePipelineApi::new()).await;
    let id = fx
        .service()
        .create_waiter(create(&[StepAction::Build]))
        .await
        .unwrap();

    let svc = fx.service();
    svc.reattach().await.unwrap();
    svc.route_event(&event(StepAction::Build, StepStatus::Running))
        .await
        .unwrap();
    assert_eq!(svc.step(&id).await.unwrap().status, HostStepState::Succeeded);
}

#[tokio::test]
async fn finished_step_is_not_reattached() {
    let fx = Fixture::new(FakePipelineApi::new()).await;
    let id = fx
        .service()
        .create_waiter(create(&[]))
        .await
        .unwrap();

    // Crash after the step's final status was stored, before the waiter
    // record was removed.
    let mut step = fx.db.get_step(&id).await.unwrap().unwrap();
    step.status = HostStepState::Aborted;
    step.pause = None;
    fx.db.upsert_step(&step).await.unwrap();

    let svc = fx.service();
    assert_eq!(svc.reattach().await.unwrap(), 0);
    assert!(fx.db.list_waiters().await.unwrap().is_empty());

    let deliveries = svc
        .route_event(&event(StepAction::Build, StepStatus::Running))
        .await
        .unwrap();
    assert!(deliveries.is_empty());
    assert_eq!(svc.step(&id).await.unwrap().status, HostStepState::Aborted);
}

#[tokio::test]
async fn api_failure_marks_step_failed() {
    let fx = Fixture::new(FakePipelineApi::failing(ApiError::unauthorized("token expired"))).await;
    let svc = fx.service();
    let id = svc.create_waiter(create(&[])).await.unwrap();
    svc.route_event(&event(StepAction::Approval, StepStatus::Waiting))
        .await
        .unwrap();

    let outcome = svc.decide(&id, "cancel").await.unwrap();
    assert!(matches!(outcome, StepOutcome::Failure { .. }));

    let step = svc.step(&id).await.unwrap();
    assert_eq!(step.status, HostStepState::Failed);
    assert_eq!(
        step.failure.as_deref(),
        Some("authorization failure: token expired")
    );
    assert!(step
        .log
        .iter()
        .any(|line| line.key == "error_apiFailure" && line.text.contains("token expired")));
}

#[tokio::test]
async fn end_quietly_and_abort() {
    let fx = Fixture::new(FakePipelineApi::new()).await;
    let svc = fx.service();

    let quiet = svc.create_waiter(create(&[])).await.unwrap();
    svc.route_event(&event(StepAction::CodeQuality, StepStatus::Waiting))
        .await
        .unwrap();
    svc.end_quietly(&quiet).await.unwrap();
    assert_eq!(svc.step(&quiet).await.unwrap().status, HostStepState::Succeeded);

    let aborted = svc.create_waiter(create(&[])).await.unwrap();
    svc.abort(&aborted).await.unwrap();
    assert_eq!(svc.step(&aborted).await.unwrap().status, HostStepState::Aborted);
    assert!(matches!(
        svc.abort(&aborted).await,
        Err(ServiceError::Waiter(WaiterError::UnknownWaiter(_)))
    ));

    assert!(fx.api.calls().is_empty());
    assert!(fx.db.list_waiters().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_and_unwatched_events_keep_waiting() {
    let fx = Fixture::new(FakePipelineApi::new()).await;
    let svc = fx.service();
    let id = svc.create_waiter(create(&[StepAction::Deploy])).await.unwrap();

    svc.route_event(&event(StepAction::Build, StepStatus::Running))
        .await
        .unwrap();
    svc.route_event(&event("Unknown", StepStatus::Waiting))
        .await
        .unwrap();

    let view = svc.waiter_view(&id).await.unwrap();
    assert_eq!(view.phase, WaiterPhase::ActiveWait);
    let step = svc.step(&id).await.unwrap();
    assert_eq!(step.status, HostStepState::Paused);
    assert!(step.log.iter().any(|line| line.key == "error_unknownStepAction"));
    assert!(!step.log.iter().any(|line| line.key == "info_eventOccurred"));
}

#[tokio::test]
async fn unknown_waiter_is_reported() {
    let fx = Fixture::new(FakePipelineApi::new()).await;
    let svc = fx.service();
    let missing = WaiterId::from("01HZZZZZZZZZZZZZZZZZZZZZZZ");
    assert!(matches!(
        svc.waiter_view(&missing).await,
        Err(ServiceError::Waiter(WaiterError::UnknownWaiter(_)))
    ));
    assert!(matches!(
        svc.step(&missing).await,
        Err(ServiceError::Waiter(WaiterError::UnknownWaiter(_)))
    ));
}

#[tokio::test]
async fn triggers_schedule_jobs_and_persist() {
    let fx = Fixture::new(FakePipelineApi::new()).await;
    {
        let svc = fx.service();
        let trigger = svc
            .add_trigger(TriggerRequest {
                project: "weretail".into(),
                program: "Acme".into(),
                pipeline: "Prod".into(),
                job: "deploy".into(),
            })
            .await
            .unwrap();
        assert_eq!((trigger.program_id.as_str(), trigger.pipeline_id.as_str()), ("1", "1"));

        assert!(matches!(
            svc.add_trigger(TriggerRequest {
                project: "weretail".into(),
                program: "Unknown".into(),
                pipeline: "1".into(),
                job: "other".into(),
            })
            .await,
            Err(ServiceError::Trigger(_))
        ));
    }

    let svc = fx.service();
    svc.reattach().await.unwrap();
    let start = PipelineStartEvent {
        event_id: "evt-7".into(),
        project: "weretail".into(),
        program_id: "1".into(),
        pipeline_id: "1".into(),
        execution_id: "3".into(),
    };
    assert_eq!(svc.pipeline_started(&start).await, 1);
    let scheduled = fx.scheduler.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].0, "deploy");
    assert_eq!(scheduled[0].1.event_id, "evt-7");
}
