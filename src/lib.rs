//! 农田地块的 H3 聚合服务：要素导入、聚合重算队列与带缓存的读路径。

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod geo;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod object_store;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod upstream;
