//! 请求参数校验与响应体。每个校验失败对应一条独立的错误信息。

use crate::cluster::ClusterQuery;
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::model::{Field, FieldFilter, H3Indexes, ImportJob, ImportJobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_ZOOM: f64 = 1.0;
pub const MAX_ZOOM: f64 = 22.0;
pub const MAX_PAGE_SIZE: u64 = 1000;

/// 查询串原样接收，数值在这里解析，错误信息才能统一
#[derive(Debug, Default, Deserialize)]
pub struct ClusterParams {
    pub zoom: Option<String>,
    pub sw_lat: Option<String>,
    pub sw_lng: Option<String>,
    pub ne_lat: Option<String>,
    pub ne_lng: Option<String>,
}

fn number(name: &str, raw: Option<&str>) -> Result<f64, AppError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::invalid_parameter(format!("{} is required", name)))?;
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AppError::invalid_parameter(format!("{} must be a number", name)))
}

fn latitude(name: &str, raw: Option<&str>) -> Result<f64, AppError> {
    let v = number(name, raw)?;
    if !(-90.0..=90.0).contains(&v) {
        return Err(AppError::invalid_parameter(format!(
            "{} must be within [-90, 90]",
            name
        )));
    }
    Ok(v)
}

fn longitude(name: &str, raw: Option<&str>) -> Result<f64, AppError> {
    let v = number(name, raw)?;
    if !(-180.0..=180.0).contains(&v) {
        return Err(AppError::invalid_parameter(format!(
            "{} must be within [-180, 180]",
            name
        )));
    }
    Ok(v)
}

impl ClusterParams {
    pub fn validate(&self) -> Result<ClusterQuery, AppError> {
        let zoom = number("zoom", self.zoom.as_deref())?;
        if !(MIN_ZOOM..=MAX_ZOOM).contains(&zoom) {
            return Err(AppError::invalid_parameter(format!(
                "zoom must be within [{:.1}, {:.1}]",
                MIN_ZOOM, MAX_ZOOM
            )));
        }
        let sw_lat = latitude("sw_lat", self.sw_lat.as_deref())?;
        let sw_lng = longitude("sw_lng", self.sw_lng.as_deref())?;
        let ne_lat = latitude("ne_lat", self.ne_lat.as_deref())?;
        let ne_lng = longitude("ne_lng", self.ne_lng.as_deref())?;
        if sw_lat > ne_lat {
            return Err(AppError::invalid_parameter(
                "sw_lat must be less than or equal to ne_lat",
            ));
        }
        Ok(ClusterQuery {
            zoom,
            south_west: Coordinate::new(sw_lat, sw_lng),
            north_east: Coordinate::new(ne_lat, ne_lng),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FieldParams {
    pub city_code: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl FieldParams {
    pub fn validate(&self) -> Result<FieldFilter, AppError> {
        let mut filter = FieldFilter {
            city_code: self
                .city_code
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ..FieldFilter::default()
        };
        if let Some(raw) = self.limit.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            filter.limit = raw
                .parse::<u64>()
                .ok()
                .filter(|l| (1..=MAX_PAGE_SIZE).contains(l))
                .ok_or_else(|| {
                    AppError::invalid_parameter(format!(
                        "limit must be an integer within [1, {}]",
                        MAX_PAGE_SIZE
                    ))
                })?;
        }
        if let Some(raw) = self.offset.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            filter.offset = raw.parse::<u64>().map_err(|_| {
                AppError::invalid_parameter("offset must be a non-negative integer")
            })?;
        }
        Ok(filter)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RecalculateRequest {
    #[serde(default)]
    pub cells: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculateResponse {
    pub message: String,
    pub enqueued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImportRequest {
    pub city_code: Option<String>,
}

impl StartImportRequest {
    pub fn validate(&self) -> Result<String, AppError> {
        let code = self
            .city_code
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::invalid_parameter("cityCode is required"))?;
        // 会成为对象存储路径的一段
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AppError::invalid_parameter(
                "cityCode may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(code.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDto {
    pub id: Uuid,
    pub city_code: String,
    pub centroid: Option<Coordinate>,
    pub area_sqm: Option<f64>,
    pub h3: H3Indexes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Field> for FieldDto {
    fn from(f: Field) -> Self {
        Self {
            id: f.id,
            city_code: f.city_code,
            centroid: f.centroid,
            area_sqm: f.area_sqm,
            h3: f.h3,
            created_at: f.created_at,
            updated_at: f.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FieldListDto {
    pub fields: Vec<FieldDto>,
    pub total: u64,
}

pub fn api_status(status: &ImportJobStatus) -> &'static str {
    match status {
        ImportJobStatus::Pending => "pending",
        ImportJobStatus::Processing => "processing",
        ImportJobStatus::Completed => "completed",
        ImportJobStatus::PartiallyCompleted => "partiallyCompleted",
        ImportJobStatus::Failed(_) => "failed",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobDto {
    pub id: Uuid,
    pub city_code: String,
    pub status: &'static str,
    pub error_message: Option<String>,
    pub total_records: Option<i64>,
    pub processed_records: i64,
    pub failed_records: i64,
    pub last_processed_batch: i64,
    pub progress_percent: Option<f64>,
    pub object_key: Option<String>,
    pub workflow_execution_ref: Option<String>,
    pub failed_record_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ImportJob> for ImportJobDto {
    fn from(job: ImportJob) -> Self {
        Self {
            status: api_status(&job.status),
            error_message: job.error_message().map(str::to_string),
            progress_percent: job.progress_percent(),
            id: job.id,
            city_code: job.city_code,
            total_records: job.total_records,
            processed_records: job.processed_records,
            failed_records: job.failed_records,
            last_processed_batch: job.last_processed_batch,
            object_key: job.object_key,
            workflow_execution_ref: job.workflow_execution_ref,
            failed_record_ids: job.failed_record_ids,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImportJobEnvelope {
    pub job: ImportJobDto,
}
