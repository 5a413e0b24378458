pub mod cluster;
pub mod cluster_job;
pub mod field;
pub mod field_land_registry;
pub mod idle_land_status;
pub mod import_job;
pub mod land_category;
pub mod soil_type;

pub use cluster::Entity as Cluster;
pub use cluster_job::Entity as ClusterJob;
pub use field::Entity as Field;
pub use field_land_registry::Entity as FieldLandRegistry;
pub use idle_land_status::Entity as IdleLandStatus;
pub use import_job::Entity as ImportJob;
pub use land_category::Entity as LandCategory;
pub use soil_type::Entity as SoilType;
