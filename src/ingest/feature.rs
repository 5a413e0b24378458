//! 上游要素的线上格式（PascalCase 属性）及其到 [`FieldInput`] 的转换。

use crate::geo::{GeoError, Polygon};
use crate::model::{CodeName, FieldInput, LandRegistryInput, SoilTypeInput};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    #[error("invalid feature id: {0}")]
    InvalidId(String),
    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometry(String),
    #[error("geometry has no ring")]
    MissingRing,
    #[error("vertex needs at least 2 ordinates, got {0}")]
    ShortVertex(usize),
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error("cannot decode feature: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamFeature {
    pub geometry: UpstreamGeometry,
    pub properties: UpstreamProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpstreamProperties {
    #[serde(rename = "ID", deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub city_code: String,
    #[serde(default)]
    pub point_lat: Option<f64>,
    #[serde(default)]
    pub point_lng: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub soil_large_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub soil_middle_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub soil_small_code: Option<String>,
    #[serde(default)]
    pub soil_small_name: Option<String>,
    #[serde(default)]
    pub pin_info: Vec<Map<String, Value>>,
}

/// 代码类字段在上游有时是数字
fn value_to_string(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = Value::deserialize(d)?;
    value_to_string(v).ok_or_else(|| serde::de::Error::custom("expected string or number"))
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(value_to_string(Value::deserialize(d)?).filter(|s| !s.trim().is_empty()))
}

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .cloned()
        .and_then(value_to_string)
        .filter(|s| !s.trim().is_empty())
}

fn area_field(map: &Map<String, Value>) -> Option<f64> {
    match map.get("Area")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `YYYY-MM-DD`，非法值直接丢弃
fn study_date(map: &Map<String, Value>) -> Option<NaiveDate> {
    let raw = map.get("DescriptiveStudyData")?.as_str()?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn code_name(map: &Map<String, Value>, code_key: &str, name_key: &str) -> Option<CodeName> {
    str_field(map, code_key).map(|code| CodeName {
        code,
        name: str_field(map, name_key),
    })
}

impl UpstreamFeature {
    pub fn into_input(self) -> Result<FieldInput, FeatureError> {
        let props = self.properties;
        let id = Uuid::parse_str(props.id.trim())
            .map_err(|_| FeatureError::InvalidId(props.id.clone()))?;

        match self.geometry.kind.as_str() {
            "LinearPolygon" | "Polygon" => {}
            other => return Err(FeatureError::UnsupportedGeometry(other.to_string())),
        }
        let ring = self
            .geometry
            .coordinates
            .first()
            .ok_or(FeatureError::MissingRing)?;
        let ring = ring
            .iter()
            .map(|v| match v.as_slice() {
                [lng, lat, ..] => Ok([*lng, *lat]),
                short => Err(FeatureError::ShortVertex(short.len())),
            })
            .collect::<Result<Vec<[f64; 2]>, _>>()?;
        let polygon = Polygon::from_open_ring(&ring)?;

        let soil_type = props.soil_small_code.map(|small_code| SoilTypeInput {
            large_code: props.soil_large_code,
            middle_code: props.soil_middle_code,
            small_code,
            small_name: props.soil_small_name,
        });

        let registries = props
            .pin_info
            .into_iter()
            .map(|pin| LandRegistryInput {
                land_category: code_name(&pin, "LandCategoryCode", "LandCategory"),
                idle_land_status: code_name(&pin, "IdleLandStatusCode", "IdleLandStatus"),
                area_sqm: area_field(&pin),
                descriptive_study_date: study_date(&pin),
                attributes: Value::Object(pin),
            })
            .collect();

        Ok(FieldInput::new(
            id,
            props.city_code,
            polygon,
            soil_type,
            registries,
        )?)
    }
}

/// 尽量从原始 JSON 中取出要素 id，用于失败记录
pub fn extract_id(value: &Value) -> Option<String> {
    value
        .pointer("/properties/ID")
        .cloned()
        .and_then(value_to_string)
}

/// 解码单个要素；失败时带上能取到的 id
pub fn decode_feature(value: Value) -> Result<FieldInput, (Option<String>, FeatureError)> {
    let id = extract_id(&value);
    serde_json::from_value::<UpstreamFeature>(value)
        .map_err(FeatureError::from)
        .and_then(UpstreamFeature::into_input)
        .map_err(|e| (id, e))
}
