use crate::api::dto::{FieldDto, FieldListDto, FieldParams};
use crate::api::{with_deadline, AppState};
use crate::error::{AppError, Envelope};
use axum::extract::{Query, State};
use axum::Json;

pub async fn list_fields(
    State(state): State<AppState>,
    Query(params): Query<FieldParams>,
) -> Result<Json<Envelope<FieldListDto>>, AppError> {
    let filter = params.validate()?;
    let page = with_deadline(state.request_timeout, state.fields.list(&filter)).await?;
    Ok(Json(Envelope::ok(FieldListDto {
        fields: page.fields.into_iter().map(FieldDto::from).collect(),
        total: page.total,
    })))
}
