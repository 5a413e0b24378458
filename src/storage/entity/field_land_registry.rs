use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "field_land_registries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub field_id: Uuid,
    pub land_category_id: Option<i32>,
    pub idle_land_status_id: Option<i32>,
    pub area_sqm: Option<f64>,
    pub descriptive_study_date: Option<String>, // YYYY-MM-DD
    #[sea_orm(column_type = "Text")]
    pub attributes_json: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::field::Entity",
        from = "Column::FieldId",
        to = "super::field::Column::Id"
    )]
    Field,
}

impl Related<super::field::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Field.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
