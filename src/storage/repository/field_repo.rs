use crate::geo::wkb;
use crate::model::{
    self, CodeName, Field, FieldFilter, FieldInput, FieldPage, H3Indexes, LandRegistryInput,
    SoilTypeInput,
};
use crate::storage::entity::{field, field_land_registry, idle_land_status, land_category, soil_type};
use crate::storage::repository::FieldRepository;
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use uuid::Uuid;

pub struct SeaOrmFieldRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmFieldRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn to_domain(m: field::Model) -> Result<Field, StorageError> {
        let geometry = m
            .geometry
            .as_deref()
            .map(wkb::decode_polygon)
            .transpose()?;
        let centroid = m.centroid.as_deref().map(wkb::decode_point).transpose()?;
        Ok(Field {
            id: m.id,
            city_code: m.city_code,
            geometry,
            centroid,
            area_sqm: m.area_sqm,
            h3: H3Indexes {
                res3: m.h3_index_res3,
                res5: m.h3_index_res5,
                res7: m.h3_index_res7,
                res9: m.h3_index_res9,
            },
            soil_type_id: m.soil_type_id,
            created_at: model::from_millis(m.created_at),
            updated_at: model::from_millis(m.updated_at),
        })
    }
}

async fn upsert_soil_type<C: ConnectionTrait>(
    conn: &C,
    soil: &SoilTypeInput,
    now: i64,
) -> Result<i32, StorageError> {
    let am = soil_type::ActiveModel {
        large_code: Set(soil.large_code.clone()),
        middle_code: Set(soil.middle_code.clone()),
        small_code: Set(soil.small_code.clone()),
        small_name: Set(soil.small_name.clone()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    soil_type::Entity::insert(am)
        .on_conflict(
            OnConflict::column(soil_type::Column::SmallCode)
                .update_columns([
                    soil_type::Column::LargeCode,
                    soil_type::Column::MiddleCode,
                    soil_type::Column::SmallName,
                    soil_type::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    // 不依赖 RETURNING（SQLite 默认不支持），冲突后再查一次 id
    let row = soil_type::Entity::find()
        .filter(soil_type::Column::SmallCode.eq(soil.small_code.clone()))
        .one(conn)
        .await?
        .ok_or_else(|| StorageError::not_found("soil_type", &soil.small_code))?;
    Ok(row.id)
}

async fn upsert_land_category<C: ConnectionTrait>(
    conn: &C,
    entry: &CodeName,
) -> Result<i32, StorageError> {
    let am = land_category::ActiveModel {
        code: Set(entry.code.clone()),
        name: Set(entry.name.clone()),
        ..Default::default()
    };
    let mut on_conflict = OnConflict::column(land_category::Column::Code);
    if entry.name.is_some() {
        on_conflict.update_column(land_category::Column::Name);
    } else {
        on_conflict.do_nothing();
    }
    land_category::Entity::insert(am)
        .on_conflict(on_conflict)
        .exec_without_returning(conn)
        .await?;
    let row = land_category::Entity::find()
        .filter(land_category::Column::Code.eq(entry.code.clone()))
        .one(conn)
        .await?
        .ok_or_else(|| StorageError::not_found("land_category", &entry.code))?;
    Ok(row.id)
}

async fn upsert_idle_land_status<C: ConnectionTrait>(
    conn: &C,
    entry: &CodeName,
) -> Result<i32, StorageError> {
    let am = idle_land_status::ActiveModel {
        code: Set(entry.code.clone()),
        name: Set(entry.name.clone()),
        ..Default::default()
    };
    let mut on_conflict = OnConflict::column(idle_land_status::Column::Code);
    if entry.name.is_some() {
        on_conflict.update_column(idle_land_status::Column::Name);
    } else {
        on_conflict.do_nothing();
    }
    idle_land_status::Entity::insert(am)
        .on_conflict(on_conflict)
        .exec_without_returning(conn)
        .await?;
    let row = idle_land_status::Entity::find()
        .filter(idle_land_status::Column::Code.eq(entry.code.clone()))
        .one(conn)
        .await?
        .ok_or_else(|| StorageError::not_found("idle_land_status", &entry.code))?;
    Ok(row.id)
}

async fn replace_registries<C: ConnectionTrait>(
    conn: &C,
    field_id: Uuid,
    registries: &[LandRegistryInput],
    now: i64,
) -> Result<(), StorageError> {
    field_land_registry::Entity::delete_many()
        .filter(field_land_registry::Column::FieldId.eq(field_id))
        .exec(conn)
        .await?;

    for reg in registries {
        let land_category_id = match &reg.land_category {
            Some(c) => Some(upsert_land_category(conn, c).await?),
            None => None,
        };
        let idle_land_status_id = match &reg.idle_land_status {
            Some(s) => Some(upsert_idle_land_status(conn, s).await?),
            None => None,
        };
        let am = field_land_registry::ActiveModel {
            field_id: Set(field_id),
            land_category_id: Set(land_category_id),
            idle_land_status_id: Set(idle_land_status_id),
            area_sqm: Set(reg.area_sqm),
            descriptive_study_date: Set(reg
                .descriptive_study_date
                .map(|d| d.format("%Y-%m-%d").to_string())),
            attributes_json: Set(serde_json::to_string(&reg.attributes)?),
            created_at: Set(now),
            ..Default::default()
        };
        field_land_registry::Entity::insert(am)
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl FieldRepository for SeaOrmFieldRepository {
    async fn upsert_batch(&self, inputs: &[FieldInput]) -> Result<usize, StorageError> {
        if inputs.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().timestamp_millis();
        let txn = self.db.begin().await?;

        for input in inputs {
            let soil_type_id = match &input.soil_type {
                Some(soil) => Some(upsert_soil_type(&txn, soil, now).await?),
                None => None,
            };

            // 几何体与全部派生列一起写入，保证同一行内一致
            let am = field::ActiveModel {
                id: Set(input.id),
                city_code: Set(input.city_code.clone()),
                geometry: Set(Some(wkb::encode_polygon(&input.geometry))),
                centroid: Set(Some(wkb::encode_point(input.centroid))),
                area_sqm: Set(input.area_sqm),
                h3_index_res3: Set(input.h3.res3.clone()),
                h3_index_res5: Set(input.h3.res5.clone()),
                h3_index_res7: Set(input.h3.res7.clone()),
                h3_index_res9: Set(input.h3.res9.clone()),
                soil_type_id: Set(soil_type_id),
                created_at: Set(now),
                updated_at: Set(now),
            };
            field::Entity::insert(am)
                .on_conflict(
                    OnConflict::column(field::Column::Id)
                        .update_columns([
                            field::Column::CityCode,
                            field::Column::Geometry,
                            field::Column::Centroid,
                            field::Column::AreaSqm,
                            field::Column::H3IndexRes3,
                            field::Column::H3IndexRes5,
                            field::Column::H3IndexRes7,
                            field::Column::H3IndexRes9,
                            field::Column::SoilTypeId,
                            field::Column::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;

            replace_registries(&txn, input.id, &input.registries, now).await?;
        }

        txn.commit().await?;
        Ok(inputs.len())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Field>, StorageError> {
        field::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(Self::to_domain)
            .transpose()
    }

    async fn list(&self, filter: &FieldFilter) -> Result<FieldPage, StorageError> {
        let mut query = field::Entity::find();
        if let Some(city_code) = &filter.city_code {
            query = query.filter(field::Column::CityCode.eq(city_code.clone()));
        }
        let total = query.clone().count(self.db.as_ref()).await?;
        let rows = query
            .order_by_asc(field::Column::Id)
            .limit(filter.limit)
            .offset(filter.offset)
            .all(self.db.as_ref())
            .await?;
        let fields = rows
            .into_iter()
            .map(Self::to_domain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FieldPage { fields, total })
    }
}
