pub mod app_config;
pub mod database;
pub mod engine;
pub mod observability;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use engine::{
    PersistenceConfig, PoolSettings, PoolsConfig, RecoveryConfig, RecurringConfig, ShutdownConfig,
};
pub use observability::ObservabilityConfig;
