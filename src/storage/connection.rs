use crate::storage::entity;
use log::info;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    EntityTrait, Schema, Statement,
};
use std::time::Duration;

pub async fn establish_connection(
    db_url: &str,
    max_connections: u32,
) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.max_connections(max_connections.max(1))
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;
    let backend = db.get_database_backend();

    if backend == DatabaseBackend::Sqlite {
        // 本地/测试用 SQLite：开启 WAL，避免 worker 与导入互相阻塞
        db.execute(Statement::from_string(
            backend,
            "PRAGMA journal_mode=WAL;".to_string(),
        ))
        .await?;
    }

    init_schema(&db).await?;
    info!("数据库连接已建立，表结构已初始化 ({:?})", backend);
    Ok(db)
}

/// 建表（如果不存在）+ 索引。可重复执行。
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    // 主数据表必须先于引用它们的表创建
    create_table(db, entity::SoilType).await?;
    create_table(db, entity::LandCategory).await?;
    create_table(db, entity::IdleLandStatus).await?;
    create_table(db, entity::Field).await?;
    create_table(db, entity::FieldLandRegistry).await?;
    create_table(db, entity::Cluster).await?;
    create_table(db, entity::ClusterJob).await?;
    create_table(db, entity::ImportJob).await?;

    let backend = db.get_database_backend();
    let indexes = [
        // 唯一索引：每个 (分辨率, 单元) 只有一行聚合
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_clusters_resolution_h3 ON clusters(resolution, h3_index);",
        "CREATE INDEX IF NOT EXISTS idx_fields_h3_res3 ON fields(h3_index_res3);",
        "CREATE INDEX IF NOT EXISTS idx_fields_h3_res5 ON fields(h3_index_res5);",
        "CREATE INDEX IF NOT EXISTS idx_fields_h3_res7 ON fields(h3_index_res7);",
        "CREATE INDEX IF NOT EXISTS idx_fields_h3_res9 ON fields(h3_index_res9);",
        "CREATE INDEX IF NOT EXISTS idx_fields_city_code ON fields(city_code);",
        "CREATE INDEX IF NOT EXISTS idx_field_land_registries_field ON field_land_registries(field_id);",
        "CREATE INDEX IF NOT EXISTS idx_cluster_jobs_queue ON cluster_jobs(status, priority, created_at);",
    ];
    for sql in indexes {
        db.execute(Statement::from_string(backend, sql.to_string()))
            .await?;
    }
    Ok(())
}

async fn create_table<E>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let stmt = backend.build(schema.create_table_from_entity(entity).if_not_exists());
    db.execute(stmt).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let db = establish_connection(&url, 2).await.unwrap();
        init_schema(&db).await.unwrap();
        let rows = db
            .query_all(Statement::from_string(
                DatabaseBackend::Sqlite,
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name;".to_string(),
            ))
            .await
            .unwrap();
        let names: Vec<String> = rows
            .iter()
            .filter_map(|r| r.try_get::<String>("", "name").ok())
            .collect();
        for t in ["clusters", "cluster_jobs", "fields", "import_jobs", "soil_types"] {
            assert!(names.iter().any(|n| n == t), "missing table {t}");
        }
    }
}
