use super::{Coordinate, GeoError};
use crate::model::{Cluster, H3Count};
use chrono::Utc;
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 聚合落库的 H3 分辨率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClusterResolution {
    Res3,
    Res5,
    Res7,
    Res9,
}

impl ClusterResolution {
    /// 重算顺序，由粗到细
    pub const ALL: [ClusterResolution; 4] = [Self::Res3, Self::Res5, Self::Res7, Self::Res9];

    pub fn value(self) -> u8 {
        match self {
            Self::Res3 => 3,
            Self::Res5 => 5,
            Self::Res7 => 7,
            Self::Res9 => 9,
        }
    }

    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Res3),
            5 => Some(Self::Res5),
            7 => Some(Self::Res7),
            9 => Some(Self::Res9),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Res3 => "res3",
            Self::Res5 => "res5",
            Self::Res7 => "res7",
            Self::Res9 => "res9",
        }
    }

    fn h3(self) -> Resolution {
        match self {
            Self::Res3 => Resolution::Three,
            Self::Res5 => Resolution::Five,
            Self::Res7 => Resolution::Seven,
            Self::Res9 => Resolution::Nine,
        }
    }
}

impl fmt::Display for ClusterResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 分辨率名称，{3, 5, 7, 9} 以外返回 `"unknown"`
pub fn resolution_name(value: i32) -> &'static str {
    ClusterResolution::from_value(value)
        .map(ClusterResolution::name)
        .unwrap_or("unknown")
}

/// 缩放级别 → 聚合分辨率
///
/// `zoom < 6 → 3`, `[6, 10) → 5`, `[10, 14) → 7`, `≥ 14 → 9`.
pub fn zoom_to_resolution(zoom: f64) -> ClusterResolution {
    if zoom < 6.0 {
        ClusterResolution::Res3
    } else if zoom < 10.0 {
        ClusterResolution::Res5
    } else if zoom < 14.0 {
        ClusterResolution::Res7
    } else {
        ClusterResolution::Res9
    }
}

fn parse_cell(h3: &str) -> Result<CellIndex, GeoError> {
    CellIndex::from_str(h3).map_err(|_| GeoError::InvalidIndex(h3.to_string()))
}

pub fn is_valid_cell(h3: &str) -> bool {
    parse_cell(h3).is_ok()
}

/// 合法单元的分辨率，非法时 `None`
pub fn cell_resolution(h3: &str) -> Option<u8> {
    parse_cell(h3).ok().map(|cell| u8::from(cell.resolution()))
}

/// `h3` 在 `resolution` 上的祖先，本身比 `resolution` 粗时为 `None`。
///
/// 只是层级意义上的祖先：地块各分辨率索引都由质心直接算出，
/// 与这里的结果不一定相同。
pub fn cell_parent(h3: &str, resolution: ClusterResolution) -> Result<Option<String>, GeoError> {
    let cell = parse_cell(h3)?;
    Ok(cell.parent(resolution.h3()).map(|p| p.to_string()))
}

/// 单元中心点
pub fn cell_to_lat_lng(h3: &str) -> Result<Coordinate, GeoError> {
    let center = LatLng::from(parse_cell(h3)?);
    Ok(Coordinate::new(center.lat(), center.lng()))
}

pub fn lat_lng_to_cell(lat: f64, lng: f64, resolution: ClusterResolution) -> Result<String, GeoError> {
    let ll = LatLng::new(lat, lng).map_err(|_| GeoError::InvalidCoordinate { lat, lng })?;
    Ok(ll.to_cell(resolution.h3()).to_string())
}

/// 由各单元计数构造聚合行，非法索引的行跳过，输出可能比输入短
pub fn aggregate_to_clusters(resolution: ClusterResolution, rows: &[H3Count]) -> Vec<Cluster> {
    let calculated_at = Utc::now();
    rows.iter()
        .filter_map(|row| {
            let center = cell_to_lat_lng(&row.h3).ok()?;
            Some(Cluster {
                id: None,
                resolution,
                h3_index: row.h3.clone(),
                field_count: i32::try_from(row.count).unwrap_or(i32::MAX),
                center_lat: center.lat,
                center_lng: center.lng,
                calculated_at,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_boundaries() {
        let cases = [
            (0.0, ClusterResolution::Res3),
            (5.99, ClusterResolution::Res3),
            (6.0, ClusterResolution::Res5),
            (9.99, ClusterResolution::Res5),
            (10.0, ClusterResolution::Res7),
            (13.99, ClusterResolution::Res7),
            (14.0, ClusterResolution::Res9),
            (22.0, ClusterResolution::Res9),
        ];
        for (zoom, expected) in cases {
            assert_eq!(zoom_to_resolution(zoom), expected, "zoom {zoom}");
        }
    }

    #[test]
    fn zoom_is_monotone() {
        let mut last = zoom_to_resolution(1.0);
        let mut zoom = 1.0;
        while zoom <= 22.0 {
            let res = zoom_to_resolution(zoom);
            assert!(res >= last);
            last = res;
            zoom += 0.25;
        }
    }

    #[test]
    fn names() {
        assert_eq!(resolution_name(3), "res3");
        assert_eq!(resolution_name(9), "res9");
        assert_eq!(resolution_name(4), "unknown");
        assert_eq!(ClusterResolution::Res7.to_string(), "res7");
    }

    #[test]
    fn cell_round_trip() {
        for res in ClusterResolution::ALL {
            let cell = lat_lng_to_cell(35.6812, 139.7671, res).unwrap();
            assert_eq!(cell_resolution(&cell), Some(res.value()));
            let center = cell_to_lat_lng(&cell).unwrap();
            assert_eq!(lat_lng_to_cell(center.lat, center.lng, res).unwrap(), cell);
        }
    }

    #[test]
    fn parents_follow_the_hierarchy() {
        let fine = lat_lng_to_cell(35.6812, 139.7671, ClusterResolution::Res9).unwrap();
        let parent = cell_parent(&fine, ClusterResolution::Res5).unwrap().unwrap();
        assert_eq!(cell_resolution(&parent), Some(5));
        assert_eq!(cell_parent(&fine, ClusterResolution::Res9).unwrap(), Some(fine.clone()));

        let coarse = lat_lng_to_cell(35.6812, 139.7671, ClusterResolution::Res5).unwrap();
        assert_eq!(cell_parent(&coarse, ClusterResolution::Res9).unwrap(), None);
        assert!(cell_parent("bogus", ClusterResolution::Res3).is_err());
    }

    #[test]
    fn invalid_cell() {
        assert!(matches!(
            cell_to_lat_lng("not-a-cell"),
            Err(GeoError::InvalidIndex(_))
        ));
        assert!(!is_valid_cell("ffffffffffffffff"));
        assert!(is_valid_cell("871f1a4adffffff"));
    }

    #[test]
    fn aggregation_skips_invalid_rows() {
        let good = lat_lng_to_cell(35.5, 139.5, ClusterResolution::Res7).unwrap();
        let rows = vec![
            H3Count { h3: good.clone(), count: 10 },
            H3Count { h3: "bogus".to_string(), count: 3 },
        ];
        let clusters = aggregate_to_clusters(ClusterResolution::Res7, &rows);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].h3_index, good);
        assert_eq!(clusters[0].field_count, 10);
        let center = cell_to_lat_lng(&good).unwrap();
        assert_eq!(clusters[0].center_lat, center.lat);
        assert_eq!(clusters[0].center_lng, center.lng);
    }
}
