use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "soil_types")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub large_code: Option<String>,
    pub middle_code: Option<String>,
    #[sea_orm(unique)]
    pub small_code: String,
    pub small_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
