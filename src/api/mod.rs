//! HTTP 接口。

pub mod dto;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;

use crate::error::AppError;
use std::future::Future;
use std::time::Duration;

/// 给读请求加截止时间，超时映射为 504
pub(crate) async fn with_deadline<T, E, F>(deadline: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<AppError>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(AppError::timeout(format!(
            "request exceeded its {}ms deadline",
            deadline.as_millis()
        ))),
    }
}
