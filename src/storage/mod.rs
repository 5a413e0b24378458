pub mod connection;
pub mod entity;
pub mod repository;

pub use connection::establish_connection;
pub use repository::{
    ClusterJobRepository, ClusterJobTransaction, ClusterRepository, FieldRepository,
    ImportJobRepository, SeaOrmClusterJobRepository, SeaOrmClusterRepository,
    SeaOrmFieldRepository, SeaOrmImportJobRepository,
};

use crate::geo::GeoError;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("geometry column error: {0}")]
    Geometry(#[from] GeoError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} {id}: cannot move to {to} from {from}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
