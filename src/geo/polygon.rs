use super::{Coordinate, GeoError};
use std::collections::HashSet;

/// 单环多边形，外环始终闭合
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    exterior: Vec<Coordinate>,
}

impl Polygon {
    /// 由上游 `[lng, lat]` 开环构造，未闭合时补上首点
    pub fn from_open_ring(ring: &[[f64; 2]]) -> Result<Self, GeoError> {
        let mut exterior: Vec<Coordinate> = ring
            .iter()
            .map(|[lng, lat]| Coordinate::new(*lat, *lng))
            .collect();
        for c in &exterior {
            if !c.lat.is_finite()
                || !c.lng.is_finite()
                || !(-90.0..=90.0).contains(&c.lat)
                || !(-180.0..=180.0).contains(&c.lng)
            {
                return Err(GeoError::InvalidCoordinate {
                    lat: c.lat,
                    lng: c.lng,
                });
            }
        }
        if let (Some(first), Some(last)) = (exterior.first().copied(), exterior.last().copied()) {
            if first != last {
                exterior.push(first);
            }
        }
        let polygon = Self { exterior };
        let distinct = polygon.distinct_vertices().len();
        if distinct < 3 {
            return Err(GeoError::DegeneratePolygon(distinct));
        }
        Ok(polygon)
    }

    /// 包装已闭合的环（从存储读回时使用）
    pub fn from_closed_ring(exterior: Vec<Coordinate>) -> Self {
        Self { exterior }
    }

    pub fn exterior(&self) -> &[Coordinate] {
        &self.exterior
    }

    /// 去掉完全重复的顶点（含闭合点），保持首次出现的顺序
    pub fn distinct_vertices(&self) -> Vec<Coordinate> {
        let mut seen = HashSet::with_capacity(self.exterior.len());
        self.exterior
            .iter()
            .filter(|c| seen.insert(vertex_key(c)))
            .copied()
            .collect()
    }

    /// 去重顶点的算术平均。不是面积质心，凹多边形时可能落在外部。
    pub fn centroid(&self) -> Result<Coordinate, GeoError> {
        let vertices = self.distinct_vertices();
        if vertices.len() < 3 {
            return Err(GeoError::DegeneratePolygon(vertices.len()));
        }
        let n = vertices.len() as f64;
        let (lat, lng) = vertices
            .iter()
            .fold((0.0, 0.0), |(lat, lng), c| (lat + c.lat, lng + c.lng));
        Ok(Coordinate::new(lat / n, lng / n))
    }
}

// -0.0 与 0.0 视为同一点
fn vertex_key(c: &Coordinate) -> (u64, u64) {
    ((c.lat + 0.0).to_bits(), (c.lng + 0.0).to_bits())
}
