//! WGS-84 几何工具，以及存储边界上使用的 WKB 编解码。

pub mod bbox;
pub mod h3;
pub mod polygon;
pub mod wkb;

use serde::{Deserialize, Serialize};

pub use bbox::BoundingBox;
pub use h3::{
    aggregate_to_clusters, cell_parent, cell_resolution, cell_to_lat_lng, is_valid_cell,
    lat_lng_to_cell, zoom_to_resolution, ClusterResolution,
};
pub use polygon::Polygon;

/// WGS-84 坐标（度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeoError {
    #[error("invalid H3 index: {0}")]
    InvalidIndex(String),
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),
    #[error("polygon has {0} distinct vertices, at least 3 are required")]
    DegeneratePolygon(usize),
    #[error("malformed WKB: {0}")]
    Wkb(String),
}
