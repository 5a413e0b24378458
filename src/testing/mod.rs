//! 内存实现的仓储、缓存、对象存储与上游替身，带故障注入。
//! 单元测试和 `tests/` 下的集成测试共用。

mod collaborators;
mod repositories;

pub use collaborators::{FlakyStore, InMemoryObjectStore, RecordingWorkflow, StaticFeatureSource};
pub use repositories::{
    InMemoryClusterJobRepository, InMemoryClusterRepository, InMemoryFieldRepository,
    InMemoryImportJobRepository,
};

use crate::geo::Polygon;
use crate::model::FieldInput;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// 以 `(lat, lng)` 为质心的小正方形地块
pub fn sample_field(lat: f64, lng: f64) -> FieldInput {
    sample_field_with_id(Uuid::new_v4(), lat, lng)
}

pub fn sample_field_with_id(id: Uuid, lat: f64, lng: f64) -> FieldInput {
    let d = 0.0001;
    let ring = [
        [lng - d, lat - d],
        [lng + d, lat - d],
        [lng + d, lat + d],
        [lng - d, lat + d],
    ];
    let polygon = match Polygon::from_open_ring(&ring) {
        Ok(p) => p,
        Err(e) => panic!("sample polygon at ({lat}, {lng}): {e}"),
    };
    match FieldInput::new(id, "13101", polygon, None, Vec::new()) {
        Ok(input) => input,
        Err(e) => panic!("sample field at ({lat}, {lng}): {e}"),
    }
}

/// 替身内部用，锁中毒时照常取值
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
