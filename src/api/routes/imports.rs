use crate::api::dto::{ImportJobEnvelope, StartImportRequest};
use crate::api::{with_deadline, AppState};
use crate::error::{AppError, Envelope, ErrorKind};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

pub async fn get_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<ImportJobEnvelope>>, AppError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| AppError::invalid_parameter("id must be a UUID"))?;
    let job = with_deadline(state.request_timeout, state.import_jobs.find_by_id(id))
        .await?
        .ok_or_else(|| AppError::not_found(format!("import job {} not found", id)))?;
    Ok(Json(Envelope::ok(ImportJobEnvelope { job: job.into() })))
}

pub async fn start_import(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Envelope<ImportJobEnvelope>>), AppError> {
    let request: StartImportRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::invalid_parameter("request body must look like {\"cityCode\": \"...\"}"))?;
    let city_code = request.validate()?;
    let service = state.imports.as_ref().ok_or_else(|| {
        AppError::new(
            ErrorKind::Internal,
            "imports_disabled",
            "upstream feature service is not configured",
        )
    })?;

    let cancel = state.shutdown.child_token();
    let job = service.start_import(&city_code, &cancel).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Envelope::ok(ImportJobEnvelope { job: job.into() })),
    ))
}
