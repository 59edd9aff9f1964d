use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use loadsim_types::LoadPlanRequest;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::ServiceState;

pub fn router() -> Router<ServiceState> {
    Router::new().route("/runs", routing::post(start_run))
}

/// Response to a started run.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    /// Identifier of the run, used to correlate logs.
    pub run_id: Uuid,
    /// Number of requests in the plan.
    pub planned_requests: usize,
    /// Number of batches submitted to the queue.
    pub batches: usize,
    /// Number of batches that were not fully accepted by the queue.
    pub failed_batches: usize,
}

async fn start_run(
    State(state): State<ServiceState>,
    request: Result<Json<LoadPlanRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = request.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let run_id = Uuid::now_v7();
    let mut rng = SmallRng::from_os_rng();
    let report = state
        .trigger
        .trigger(request, &mut rng)
        .instrument(tracing::info_span!("run", %run_id))
        .await?;

    let response = RunResponse {
        run_id,
        planned_requests: report.requests,
        batches: report.batches,
        failed_batches: report.failures.len(),
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}
