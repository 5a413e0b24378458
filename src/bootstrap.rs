//! 两个二进制共用的装配代码。

use crate::config::{Config, ObjectStoreConfig};
use crate::object_store::{LocalObjectStore, ObjectStore};
use crate::storage::{
    establish_connection, ClusterJobRepository, ClusterRepository, FieldRepository,
    ImportJobRepository, SeaOrmClusterJobRepository, SeaOrmClusterRepository,
    SeaOrmFieldRepository, SeaOrmImportJobRepository,
};
use anyhow::Context;
use log::info;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

pub async fn connect(config: &Config) -> anyhow::Result<Arc<DatabaseConnection>> {
    let db = establish_connection(&config.database_url, config.db_max_connections)
        .await
        .context("连接数据库失败")?;
    Ok(Arc::new(db))
}

#[derive(Clone)]
pub struct Repositories {
    pub fields: Arc<dyn FieldRepository>,
    pub clusters: Arc<dyn ClusterRepository>,
    pub cluster_jobs: Arc<dyn ClusterJobRepository>,
    pub import_jobs: Arc<dyn ImportJobRepository>,
}

impl Repositories {
    pub fn sea_orm(db: Arc<DatabaseConnection>) -> Self {
        Self {
            fields: Arc::new(SeaOrmFieldRepository::new(db.clone())),
            clusters: Arc::new(SeaOrmClusterRepository::new(db.clone())),
            cluster_jobs: Arc::new(SeaOrmClusterJobRepository::new(db.clone())),
            import_jobs: Arc::new(SeaOrmImportJobRepository::new(db)),
        }
    }
}

pub async fn object_store(config: &ObjectStoreConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config {
        ObjectStoreConfig::Local { root } => {
            info!("本地对象存储: {}", root);
            Ok(Arc::new(LocalObjectStore::new(root.clone())))
        }
        #[cfg(feature = "s3")]
        ObjectStoreConfig::S3 {
            bucket,
            region,
            endpoint_url,
        } => {
            let store = crate::object_store::S3ObjectStore::new(crate::object_store::s3::S3Config {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint_url: endpoint_url.clone(),
            })
            .await;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        ObjectStoreConfig::S3 { .. } => {
            anyhow::bail!("OBJECT_STORE_BACKEND=s3 需要以 `--features s3` 编译")
        }
    }
}
