use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fields")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub city_code: String,
    pub geometry: Option<Vec<u8>>, // WKB Polygon
    pub centroid: Option<Vec<u8>>, // WKB Point
    pub area_sqm: Option<f64>,
    pub h3_index_res3: String,
    pub h3_index_res5: String,
    pub h3_index_res7: String,
    pub h3_index_res9: String,
    pub soil_type_id: Option<i32>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::field_land_registry::Entity")]
    FieldLandRegistry,
}

impl Related<super::field_land_registry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FieldLandRegistry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
