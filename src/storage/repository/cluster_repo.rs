use crate::geo::ClusterResolution;
use crate::model::{self, Cluster, H3Count};
use crate::storage::entity::{cluster, field};
use crate::storage::repository::ClusterRepository;
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, FromQueryResult, NotSet,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// IN 列表 / 批量插入的分块大小，避开 SQLite 的参数上限
const CHUNK: usize = 500;

#[derive(Debug, Clone, FromQueryResult)]
struct H3CountRow {
    h3: String,
    count: i64,
}

#[derive(Debug, Clone, FromQueryResult)]
struct MaxCalculatedAt {
    max_ts: Option<i64>,
}

pub struct SeaOrmClusterRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmClusterRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn to_domain(m: cluster::Model) -> Result<Cluster, StorageError> {
        let resolution = ClusterResolution::from_value(m.resolution).ok_or_else(|| {
            StorageError::Corrupt(format!("cluster {} has resolution {}", m.id, m.resolution))
        })?;
        Ok(Cluster {
            id: Some(m.id),
            resolution,
            h3_index: m.h3_index,
            field_count: m.field_count,
            center_lat: m.center_lat,
            center_lng: m.center_lng,
            calculated_at: model::from_millis(m.calculated_at),
        })
    }
}

fn h3_column(resolution: ClusterResolution) -> field::Column {
    match resolution {
        ClusterResolution::Res3 => field::Column::H3IndexRes3,
        ClusterResolution::Res5 => field::Column::H3IndexRes5,
        ClusterResolution::Res7 => field::Column::H3IndexRes7,
        ClusterResolution::Res9 => field::Column::H3IndexRes9,
    }
}

async fn upsert_clusters<C: ConnectionTrait>(
    conn: &C,
    clusters: &[Cluster],
    calculated_at: Option<i64>,
) -> Result<(), StorageError> {
    for chunk in clusters.chunks(CHUNK) {
        let models = chunk.iter().map(|c| cluster::ActiveModel {
            id: NotSet,
            resolution: Set(c.resolution.value() as i32),
            h3_index: Set(c.h3_index.clone()),
            field_count: Set(c.field_count),
            center_lat: Set(c.center_lat),
            center_lng: Set(c.center_lng),
            calculated_at: Set(calculated_at.unwrap_or_else(|| model::to_millis(c.calculated_at))),
        });
        cluster::Entity::insert_many(models)
            .on_conflict(
                OnConflict::columns([cluster::Column::Resolution, cluster::Column::H3Index])
                    .update_columns([
                        cluster::Column::FieldCount,
                        cluster::Column::CenterLat,
                        cluster::Column::CenterLng,
                        cluster::Column::CalculatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl ClusterRepository for SeaOrmClusterRepository {
    async fn get_clusters(
        &self,
        resolution: ClusterResolution,
    ) -> Result<Vec<Cluster>, StorageError> {
        cluster::Entity::find()
            .filter(cluster::Column::Resolution.eq(resolution.value() as i32))
            .order_by_asc(cluster::Column::Id)
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Self::to_domain)
            .collect()
    }

    async fn save_clusters(&self, clusters: &[Cluster]) -> Result<(), StorageError> {
        if clusters.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin().await?;
        upsert_clusters(&txn, clusters, None).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn replace_clusters(
        &self,
        resolution: ClusterResolution,
        clusters: &[Cluster],
    ) -> Result<(), StorageError> {
        let res = resolution.value() as i32;
        let txn = self.db.begin().await?;

        // 本轮时间戳必须严格大于已有行，才能用 calculated_at 区分本轮未触及的行
        let previous = cluster::Entity::find()
            .select_only()
            .column_as(Expr::col(cluster::Column::CalculatedAt).max(), "max_ts")
            .filter(cluster::Column::Resolution.eq(res))
            .into_model::<MaxCalculatedAt>()
            .one(&txn)
            .await?
            .and_then(|r| r.max_ts);
        let run_ts = match previous {
            Some(prev) => Utc::now().timestamp_millis().max(prev + 1),
            None => Utc::now().timestamp_millis(),
        };

        let own: Vec<Cluster> = clusters
            .iter()
            .filter(|c| c.resolution == resolution)
            .cloned()
            .collect();
        upsert_clusters(&txn, &own, Some(run_ts)).await?;

        cluster::Entity::delete_many()
            .filter(cluster::Column::Resolution.eq(res))
            .filter(cluster::Column::CalculatedAt.lt(run_ts))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    async fn delete_clusters_by_resolution(
        &self,
        resolution: ClusterResolution,
    ) -> Result<u64, StorageError> {
        let res = cluster::Entity::delete_many()
            .filter(cluster::Column::Resolution.eq(resolution.value() as i32))
            .exec(self.db.as_ref())
            .await?;
        Ok(res.rows_affected)
    }

    async fn delete_all_clusters(&self) -> Result<u64, StorageError> {
        let res = cluster::Entity::delete_many()
            .exec(self.db.as_ref())
            .await?;
        Ok(res.rows_affected)
    }

    async fn aggregate_by_h3(
        &self,
        resolution: ClusterResolution,
    ) -> Result<Vec<H3Count>, StorageError> {
        let col = h3_column(resolution);
        let rows = field::Entity::find()
            .select_only()
            .column_as(col, "h3")
            .column_as(Expr::cust("COUNT(*)"), "count")
            .group_by(col)
            .into_model::<H3CountRow>()
            .all(self.db.as_ref())
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| H3Count {
                h3: r.h3,
                count: r.count,
            })
            .collect())
    }

    async fn aggregate_by_h3_for_cells(
        &self,
        resolution: ClusterResolution,
        cells: &[String],
    ) -> Result<Vec<H3Count>, StorageError> {
        let col = h3_column(resolution);
        let mut out = Vec::new();
        for chunk in cells.chunks(CHUNK) {
            let rows = field::Entity::find()
                .select_only()
                .column_as(col, "h3")
                .column_as(Expr::cust("COUNT(*)"), "count")
                .filter(col.is_in(chunk.iter().cloned()))
                .group_by(col)
                .into_model::<H3CountRow>()
                .all(self.db.as_ref())
                .await?;
            out.extend(rows.into_iter().map(|r| H3Count {
                h3: r.h3,
                count: r.count,
            }));
        }
        Ok(out)
    }

    async fn cells_for_fields(
        &self,
        resolution: ClusterResolution,
        source: ClusterResolution,
        cells: &[String],
    ) -> Result<Vec<String>, StorageError> {
        let target = h3_column(resolution);
        let by = h3_column(source);
        let mut out = BTreeSet::new();
        for chunk in cells.chunks(CHUNK) {
            let rows: Vec<String> = field::Entity::find()
                .select_only()
                .column(target)
                .distinct()
                .filter(by.is_in(chunk.iter().cloned()))
                .into_tuple()
                .all(self.db.as_ref())
                .await?;
            out.extend(rows);
        }
        Ok(out.into_iter().collect())
    }

    async fn delete_clusters_by_h3_indexes(
        &self,
        resolution: ClusterResolution,
        cells: &[String],
    ) -> Result<u64, StorageError> {
        let mut deleted = 0;
        for chunk in cells.chunks(CHUNK) {
            let res = cluster::Entity::delete_many()
                .filter(cluster::Column::Resolution.eq(resolution.value() as i32))
                .filter(cluster::Column::H3Index.is_in(chunk.iter().cloned()))
                .exec(self.db.as_ref())
                .await?;
            deleted += res.rows_affected;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{self, Polygon};
    use crate::model::FieldInput;
    use crate::storage::establish_connection;
    use crate::storage::repository::{FieldRepository, SeaOrmFieldRepository};
    use uuid::Uuid;

    async fn setup() -> (tempfile::TempDir, Arc<DatabaseConnection>) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("clusters.db").display());
        let db = establish_connection(&url, 2).await.unwrap();
        (dir, Arc::new(db))
    }

    fn field_at(lat: f64, lng: f64) -> FieldInput {
        let d = 0.0005;
        let polygon = Polygon::from_open_ring(&[
            [lng - d, lat - d],
            [lng + d, lat - d],
            [lng + d, lat + d],
            [lng - d, lat + d],
        ])
        .unwrap();
        FieldInput::new(Uuid::new_v4(), "13101", polygon, None, vec![]).unwrap()
    }

    fn cluster(resolution: ClusterResolution, lat: f64, lng: f64, count: i32) -> Cluster {
        let h3 = geo::lat_lng_to_cell(lat, lng, resolution).unwrap();
        let center = geo::cell_to_lat_lng(&h3).unwrap();
        Cluster {
            id: None,
            resolution,
            h3_index: h3,
            field_count: count,
            center_lat: center.lat,
            center_lng: center.lng,
            calculated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn aggregate_counts_fields_per_cell() {
        let (_dir, db) = setup().await;
        let fields = SeaOrmFieldRepository::new(db.clone());
        let repo = SeaOrmClusterRepository::new(db);

        let batch = vec![
            field_at(35.6812, 139.7671),
            field_at(35.6812, 139.7671),
            field_at(34.6937, 135.5023),
        ];
        fields.upsert_batch(&batch).await.unwrap();

        let mut rows = repo.aggregate_by_h3(ClusterResolution::Res7).await.unwrap();
        rows.sort_by(|a, b| b.count.cmp(&a.count));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[0].h3, batch[0].h3.res7);

        let only = repo
            .aggregate_by_h3_for_cells(ClusterResolution::Res7, &[batch[2].h3.res7.clone()])
            .await
            .unwrap();
        assert_eq!(only, vec![H3Count { h3: batch[2].h3.res7.clone(), count: 1 }]);
    }

    #[tokio::test]
    async fn coarse_cells_come_from_the_stored_indexes() {
        let (_dir, db) = setup().await;
        let fields = SeaOrmFieldRepository::new(db.clone());
        let repo = SeaOrmClusterRepository::new(db);
        let tokyo = field_at(35.6812, 139.7671);
        let osaka = field_at(34.6937, 135.5023);
        fields
            .upsert_batch(&[tokyo.clone(), tokyo_twin(&tokyo), osaka.clone()])
            .await
            .unwrap();

        let res5 = repo
            .cells_for_fields(
                ClusterResolution::Res5,
                ClusterResolution::Res9,
                &[tokyo.h3.res9.clone()],
            )
            .await
            .unwrap();
        assert_eq!(res5, vec![tokyo.h3.res5.clone()]);

        // 细分辨率同样可以反查
        let res9 = repo
            .cells_for_fields(
                ClusterResolution::Res9,
                ClusterResolution::Res3,
                &[osaka.h3.res3.clone()],
            )
            .await
            .unwrap();
        assert!(res9.contains(&osaka.h3.res9));
        assert!(repo
            .cells_for_fields(ClusterResolution::Res7, ClusterResolution::Res9, &[])
            .await
            .unwrap()
            .is_empty());
    }

    fn tokyo_twin(base: &FieldInput) -> FieldInput {
        let mut twin = base.clone();
        twin.id = Uuid::new_v4();
        twin
    }

    #[tokio::test]
    async fn save_is_idempotent_on_resolution_and_cell() {
        let (_dir, db) = setup().await;
        let repo = SeaOrmClusterRepository::new(db);
        let c = cluster(ClusterResolution::Res5, 35.5, 139.5, 3);
        repo.save_clusters(&[c.clone()]).await.unwrap();
        let mut updated = c.clone();
        updated.field_count = 7;
        repo.save_clusters(&[updated]).await.unwrap();

        let stored = repo.get_clusters(ClusterResolution::Res5).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].field_count, 7);
        assert!(repo.get_clusters(ClusterResolution::Res7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_drops_cells_missing_from_the_new_set() {
        let (_dir, db) = setup().await;
        let repo = SeaOrmClusterRepository::new(db);
        let keep = cluster(ClusterResolution::Res7, 35.5, 139.5, 2);
        let gone = cluster(ClusterResolution::Res7, 40.0, 139.5, 4);
        let other = cluster(ClusterResolution::Res9, 40.0, 139.5, 4);
        repo.save_clusters(&[keep.clone(), gone, other]).await.unwrap();

        repo.replace_clusters(ClusterResolution::Res7, &[keep.clone()])
            .await
            .unwrap();

        let res7 = repo.get_clusters(ClusterResolution::Res7).await.unwrap();
        assert_eq!(res7.len(), 1);
        assert_eq!(res7[0].h3_index, keep.h3_index);
        assert_eq!(repo.get_clusters(ClusterResolution::Res9).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deletes_by_cell_resolution_and_all() {
        let (_dir, db) = setup().await;
        let repo = SeaOrmClusterRepository::new(db);
        let a = cluster(ClusterResolution::Res3, 35.5, 139.5, 1);
        let b = cluster(ClusterResolution::Res3, 40.0, 139.5, 1);
        let c = cluster(ClusterResolution::Res5, 40.0, 139.5, 1);
        repo.save_clusters(&[a.clone(), b, c]).await.unwrap();

        let n = repo
            .delete_clusters_by_h3_indexes(ClusterResolution::Res3, &[a.h3_index.clone()])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            repo.delete_clusters_by_resolution(ClusterResolution::Res3)
                .await
                .unwrap(),
            1
        );
        assert_eq!(repo.delete_all_clusters().await.unwrap(), 1);
    }
}
