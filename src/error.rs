//! 边界错误：`kind` 决定 HTTP 状态，`code` 给客户端做判断，`source` 只进日志。

use crate::cluster::ClusterError;
use crate::ingest::IngestError;
use crate::storage::StorageError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde::Serialize;
use std::backtrace::Backtrace;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Conflict,
    Forbidden,
    Unauthorized,
    Internal,
    Timeout,
    /// 上游服务返回错误
    BadGateway,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::BadGateway => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn default_code(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::Conflict => "conflict",
            Self::Forbidden => "forbidden",
            Self::Unauthorized => "unauthorized",
            Self::Internal => "internal_error",
            Self::Timeout => "timeout",
            Self::BadGateway => "upstream_error",
        }
    }
}

pub struct AppError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    backtrace: Option<Backtrace>,
}

impl AppError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            source: None,
            backtrace: None,
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, code, message)
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::bad_request("invalid_parameter", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "not_found", message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, code, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, "timeout", message)
    }

    /// 500，对客户端只给通用信息
    pub fn internal<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(ErrorKind::Internal, "internal_error", "internal server error")
            .with_source(source)
    }

    /// 附带原因时才捕获调用栈
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self.backtrace = Some(Backtrace::capture());
        self
    }

    pub fn source_ref(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_ref()
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(source) = &self.source {
            write!(f, " ({})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// 所有响应共用的外层结构
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub data: Option<T>,
    pub errors: Option<Vec<ErrorBody>>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            errors: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        if status.is_server_error() {
            match &self.backtrace {
                Some(bt) => error!("{} [{}]\n{}", self, status, bt),
                None => error!("{} [{}]", self, status),
            }
        }
        let body: Envelope<()> = Envelope {
            data: None,
            errors: Some(vec![ErrorBody {
                code: self.code,
                message: self.message,
            }]),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { entity, ref id } => {
                let message = format!("{} {} not found", entity, id);
                AppError::not_found(message).with_source(e)
            }
            other => AppError::internal(other),
        }
    }
}

impl From<ClusterError> for AppError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::Storage(inner) => inner.into(),
            ClusterError::InvalidCell(ref cell) => {
                let message = format!("invalid h3 cell: {}", cell);
                AppError::invalid_parameter(message)
            }
            other => AppError::internal(other),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Storage(inner) => inner.into(),
            IngestError::JobNotFound(id) => AppError::not_found(format!("import job {} not found", id)),
            IngestError::Upstream(ref u) if u.is_timeout() => {
                AppError::timeout("upstream request timed out").with_source(e)
            }
            IngestError::Upstream(_) => AppError::new(
                ErrorKind::BadGateway,
                "upstream_error",
                "upstream feature service failed",
            )
            .with_source(e),
            other => AppError::internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamError;

    #[test]
    fn kinds_map_to_status() {
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ErrorKind::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn backtrace_only_with_source() {
        let plain = AppError::invalid_parameter("zoom");
        assert!(plain.backtrace().is_none());
        assert!(plain.source_ref().is_none());

        let wrapped = AppError::internal(StorageError::Corrupt("x".into()));
        assert!(wrapped.backtrace().is_some());
        assert_eq!(wrapped.message, "internal server error");
        assert!(wrapped.to_string().contains("corrupt row: x"));
    }

    #[test]
    fn storage_not_found_is_404() {
        let e: AppError = StorageError::not_found("import_job", "abc").into();
        assert_eq!(e.kind, ErrorKind::NotFound);
        assert_eq!(e.code, "not_found");
    }

    #[test]
    fn upstream_errors_map_to_gateway_statuses() {
        let timeout: AppError = IngestError::Upstream(UpstreamError::Timeout).into();
        assert_eq!(timeout.kind, ErrorKind::Timeout);
        let bad: AppError = IngestError::Upstream(UpstreamError::Status {
            status: 500,
            body: String::new(),
        })
        .into();
        assert_eq!(bad.kind.status(), StatusCode::BAD_GATEWAY);
    }
}
