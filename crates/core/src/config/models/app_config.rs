use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    engine::{PersistenceConfig, PoolsConfig, RecoveryConfig, RecurringConfig, ShutdownConfig},
    observability::ObservabilityConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub pools: PoolsConfig,
    pub recurring: RecurringConfig,
    pub recovery: RecoveryConfig,
    pub persistence: PersistenceConfig,
    pub shutdown: ShutdownConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SCHEDULER_, nesting: __)
    ///
    /// # Arguments
    ///
    /// * `config_path` - Config file path, if None use default paths
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/scheduler.toml", "scheduler.toml"];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.pools.validate().context("工作池配置验证失败")?;
        self.recurring.validate().context("周期任务配置验证失败")?;
        self.persistence
            .validate()
            .context("存储重试配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pools.default.max_workers, 4);
        assert_eq!(config.recurring.tick_interval_seconds, 60);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [pools.background]
            max_workers = 3

            [recurring]
            tick_interval_seconds = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.pools.background.max_workers, 3);
        assert_eq!(config.pools.high_priority.max_workers, 2);
        assert_eq!(config.recurring.tick_interval_seconds, 5);
        assert!(config.recurring.enabled);
        assert_eq!(config.database.url, "sqlite://data/scheduler.db");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [pools.default]
            max_workers = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_non_sqlite_url_rejected() {
        let mut config = AppConfig::default();
        config.database.url = "postgresql://localhost/scheduler".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.shutdown.timeout_seconds = 5;
        let text = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.shutdown.timeout_seconds, 5);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [database]
            url = "sqlite::memory:"

            [persistence]
            max_attempts = 5
            "#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert!(config.database.is_in_memory());
        assert_eq!(config.persistence.max_attempts, 5);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/scheduler.toml")).is_err());
    }
}
