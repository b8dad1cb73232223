pub mod config;
pub mod errors;
pub mod logging;

pub use config::models::{
    AppConfig, DatabaseConfig, ObservabilityConfig, PersistenceConfig, PoolSettings, PoolsConfig,
    RecoveryConfig, RecurringConfig, ShutdownConfig,
};
pub use errors::*;
pub use logging::{init_logging, LogFormat};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
