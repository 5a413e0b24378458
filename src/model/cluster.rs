use crate::geo::ClusterResolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 某分辨率下一个 H3 单元内的地块聚合。
///
/// `center_lat/center_lng` 始终是单元自身的中心点，而不是单元内地块的质心。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i32>,
    pub resolution: ClusterResolution,
    pub h3_index: String,
    pub field_count: i32,
    pub center_lat: f64,
    pub center_lng: f64,
    pub calculated_at: DateTime<Utc>,
}

/// `GROUP BY h3_index_resN` 的结果行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H3Count {
    pub h3: String,
    pub count: i64,
}
