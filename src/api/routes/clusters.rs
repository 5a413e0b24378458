use crate::api::dto::{ClusterParams, RecalculateRequest, RecalculateResponse};
use crate::api::{with_deadline, AppState};
use crate::cluster::{ClusterView, MANUAL_PRIORITY};
use crate::error::{AppError, Envelope};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use log::info;

pub async fn get_clusters(
    State(state): State<AppState>,
    Query(params): Query<ClusterParams>,
) -> Result<Json<Envelope<ClusterView>>, AppError> {
    let query = params.validate()?;
    let view = with_deadline(state.request_timeout, state.clusters.get_clusters(&query)).await?;
    Ok(Json(Envelope::ok(view)))
}

/// 空请求体为全量重算；`{"cells": [...]}` 为差量重算
pub async fn recalculate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<RecalculateResponse>), AppError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RecalculateRequest::default()
    } else {
        serde_json::from_slice::<RecalculateRequest>(&body).map_err(|e| {
            AppError::invalid_parameter(format!("request body must look like {{\"cells\": [...]}}: {}", e))
        })?
    };

    let outcome = if request.cells.is_empty() {
        state.queue.enqueue(MANUAL_PRIORITY).await?
    } else {
        state
            .queue
            .enqueue_cells(MANUAL_PRIORITY, request.cells)
            .await?
    };
    if !outcome.enqueued {
        return Err(AppError::conflict(
            "already_running",
            "a cluster recalculation is already pending or running",
        ));
    }
    info!("手动触发聚合重算: {:?}", outcome.job_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(RecalculateResponse {
            message: "cluster recalculation enqueued".to_string(),
            enqueued: true,
            job_id: outcome.job_id,
        }),
    ))
}
