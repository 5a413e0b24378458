use crate::geo::{self, ClusterResolution, Coordinate, GeoError, Polygon};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct H3Indexes {
    pub res3: String,
    pub res5: String,
    pub res7: String,
    pub res9: String,
}

impl H3Indexes {
    pub fn from_centroid(centroid: Coordinate) -> Result<Self, GeoError> {
        let at = |res| geo::lat_lng_to_cell(centroid.lat, centroid.lng, res);
        Ok(Self {
            res3: at(ClusterResolution::Res3)?,
            res5: at(ClusterResolution::Res5)?,
            res7: at(ClusterResolution::Res7)?,
            res9: at(ClusterResolution::Res9)?,
        })
    }

    pub fn get(&self, resolution: ClusterResolution) -> &str {
        match resolution {
            ClusterResolution::Res3 => &self.res3,
            ClusterResolution::Res5 => &self.res5,
            ClusterResolution::Res7 => &self.res7,
            ClusterResolution::Res9 => &self.res9,
        }
    }
}

/// 土壤类型主数据，按 `small_code` 去重。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoilTypeInput {
    pub large_code: Option<String>,
    pub middle_code: Option<String>,
    pub small_code: String,
    pub small_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeName {
    pub code: String,
    pub name: Option<String>,
}

/// `PinInfo` 的一项，对应一条 field_land_registries 子记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandRegistryInput {
    pub land_category: Option<CodeName>,
    pub idle_land_status: Option<CodeName>,
    pub area_sqm: Option<f64>,
    pub descriptive_study_date: Option<NaiveDate>,
    /// 原始描述字段，原样保存
    pub attributes: serde_json::Value,
}

/// 一次 upsert 的输入。派生字段（质心、H3）在构造时由同一几何体一次算出。
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInput {
    pub id: Uuid,
    pub city_code: String,
    pub geometry: Polygon,
    pub centroid: Coordinate,
    pub h3: H3Indexes,
    pub area_sqm: Option<f64>,
    pub soil_type: Option<SoilTypeInput>,
    pub registries: Vec<LandRegistryInput>,
}

impl FieldInput {
    pub fn new(
        id: Uuid,
        city_code: impl Into<String>,
        geometry: Polygon,
        soil_type: Option<SoilTypeInput>,
        registries: Vec<LandRegistryInput>,
    ) -> Result<Self, GeoError> {
        let centroid = geometry.centroid()?;
        let h3 = H3Indexes::from_centroid(centroid)?;
        let areas: Vec<f64> = registries.iter().filter_map(|r| r.area_sqm).collect();
        let area_sqm = if areas.is_empty() {
            None
        } else {
            Some(areas.iter().sum())
        };
        Ok(Self {
            id,
            city_code: city_code.into(),
            geometry,
            centroid,
            h3,
            area_sqm,
            soil_type,
            registries,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: Uuid,
    pub city_code: String,
    pub geometry: Option<Polygon>,
    pub centroid: Option<Coordinate>,
    pub area_sqm: Option<f64>,
    pub h3: H3Indexes,
    pub soil_type_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    pub city_code: Option<String>,
    pub limit: u64,
    pub offset: u64,
}

impl Default for FieldFilter {
    fn default() -> Self {
        Self {
            city_code: None,
            limit: 100,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPage {
    pub fields: Vec<Field>,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Polygon {
        Polygon::from_open_ring(&[
            [139.70, 35.60],
            [139.72, 35.60],
            [139.72, 35.62],
            [139.70, 35.62],
        ])
        .unwrap()
    }

    fn registry(area: Option<f64>) -> LandRegistryInput {
        LandRegistryInput {
            land_category: None,
            idle_land_status: None,
            area_sqm: area,
            descriptive_study_date: None,
            attributes: serde_json::json!({}),
        }
    }

    #[test]
    fn derived_fields_follow_geometry() {
        let input = FieldInput::new(Uuid::new_v4(), "13101", square(), None, vec![]).unwrap();
        assert!((input.centroid.lat - 35.61).abs() < 1e-9);
        for res in ClusterResolution::ALL {
            let cell = input.h3.get(res);
            assert_eq!(
                cell,
                geo::lat_lng_to_cell(input.centroid.lat, input.centroid.lng, res).unwrap()
            );
            // 质心应位于其单元附近：单元中心反查回同一单元
            let center = geo::cell_to_lat_lng(cell).unwrap();
            assert_eq!(geo::lat_lng_to_cell(center.lat, center.lng, res).unwrap(), cell);
        }
        assert_eq!(input.area_sqm, None);
    }

    #[test]
    fn area_is_sum_of_registries() {
        let input = FieldInput::new(
            Uuid::new_v4(),
            "13101",
            square(),
            None,
            vec![registry(Some(100.0)), registry(None), registry(Some(50.5))],
        )
        .unwrap();
        assert_eq!(input.area_sqm, Some(150.5));
    }
}
