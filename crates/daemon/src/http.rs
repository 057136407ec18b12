use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pipeline_gate_core::{
    IncomingEvent, PipelineStartEvent, PipelineStartTrigger, StepOutcome, TriggerError,
    WaiterError, WaiterId,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::{HostStepRecord, JobStart};
use crate::service::{CreateWaiter, GateService, ServiceError, TriggerRequest, WaiterView};

#[derive(Clone)]
pub struct AppState {
    svc: Arc<GateService>,
}

pub fn router(svc: Arc<GateService>) -> Router {
    let state = AppState { svc };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/waiters", get(list_waiters).post(create_waiter))
        .route("/v1/waiters/{id}", get(show_waiter))
        .route("/v1/waiters/{id}/decision", post(decide))
        .route("/v1/waiters/{id}/end-quietly", post(end_quietly))
        .route("/v1/waiters/{id}/abort", post(abort))
        .route("/v1/steps/{id}", get(show_step))
        .route("/v1/events/step-state", post(step_state_event))
        .route("/v1/events/pipeline-start", post(pipeline_start_event))
        .route("/v1/triggers", post(add_trigger))
        .route("/v1/jobs/{job}/starts", get(job_starts))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedWaiter {
    pub waiter_id: WaiterId,
}

async fn create_waiter(
    State(st): State<AppState>,
    Json(req): Json<CreateWaiter>,
) -> Result<Json<CreatedWaiter>, AppError> {
    let waiter_id = st.svc.create_waiter(req).await?;
    Ok(Json(CreatedWaiter { waiter_id }))
}

async fn list_waiters(State(st): State<AppState>) -> Result<Json<Vec<WaiterView>>, AppError> {
    Ok(Json(st.svc.list_waiters().await?))
}

async fn show_waiter(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WaiterView>, AppError> {
    Ok(Json(st.svc.waiter_view(&WaiterId(id)).await?))
}

async fn show_step(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HostStepRecord>, AppError> {
    Ok(Json(st.svc.step(&WaiterId(id)).await?))
}

/// Decision form: `{"action": "proceed" | "cancel"}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionForm {
    pub action: String,
}

async fn decide(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<DecisionForm>,
) -> Result<Json<StepOutcome>, AppError> {
    Ok(Json(st.svc.decide(&WaiterId(id), &form.action).await?))
}

async fn end_quietly(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    st.svc.end_quietly(&WaiterId(id)).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn abort(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    st.svc.abort(&WaiterId(id)).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn step_state_event(
    State(st): State<AppState>,
    Json(event): Json<IncomingEvent>,
) -> Result<Json<serde_json::Value>, AppError> {
    let deliveries = st.svc.route_event(&event).await?;
    Ok(Json(json!({ "matched": deliveries.len() })))
}

async fn pipeline_start_event(
    State(st): State<AppState>,
    Json(event): Json<PipelineStartEvent>,
) -> Json<serde_json::Value> {
    let scheduled = st.svc.pipeline_started(&event).await;
    Json(json!({ "scheduled": scheduled }))
}

async fn add_trigger(
    State(st): State<AppState>,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<PipelineStartTrigger>, AppError> {
    Ok(Json(st.svc.add_trigger(req).await?))
}

async fn job_starts(
    State(st): State<AppState>,
    Path(job): Path<String>,
) -> Result<Json<Vec<JobStart>>, AppError> {
    Ok(Json(st.svc.job_starts(&job).await?))
}

#[derive(Debug)]
pub struct AppError(ServiceError);

impl<E: Into<ServiceError>> From<E> for AppError {
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

/// HTTP status for a service failure.
pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Waiter(e) | ServiceError::StepFailed { source: e, .. } => match e {
            WaiterError::MissingBuildData | WaiterError::InvalidDecision(_) => {
                StatusCode::BAD_REQUEST
            }
            WaiterError::UnknownWaiter(_) => StatusCode::NOT_FOUND,
            WaiterError::AlreadyResolved(_) | WaiterError::NotGated(_) => StatusCode::CONFLICT,
        },
        ServiceError::Trigger(TriggerError::Lookup(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Trigger(_) => StatusCode::BAD_REQUEST,
        ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, %status, "request rejected");
        }
        let body = Json(json!({
            "error": self.0.to_string()
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_gate_core::ApiError;

    #[test]
    fn errors_map_to_statuses() {
        let id = WaiterId::from("w");
        let cases = [
            (ServiceError::Waiter(WaiterError::UnknownWaiter(id.clone())), StatusCode::NOT_FOUND),
            (ServiceError::Waiter(WaiterError::AlreadyResolved(id.clone())), StatusCode::CONFLICT),
            (ServiceError::Waiter(WaiterError::NotGated(id.clone())), StatusCode::CONFLICT),
            (
                ServiceError::Waiter(WaiterError::InvalidDecision("maybe".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::StepFailed {
                    step_id: id,
                    source: WaiterError::MissingBuildData,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::Trigger(TriggerError::MissingProgram("Acme".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::Trigger(TriggerError::Lookup(ApiError::transport("down"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServiceError::Internal(anyhow::anyhow!("db")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err}");
        }
    }
}
