use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use scheduler_core::{init_logging, AppConfig, LogFormat};
use scheduler_dispatcher::SchedulerEngine;
use scheduler_infrastructure::DatabaseManager;
use scheduler_worker::{HttpExecutor, ShellExecutor};

mod shutdown;

use shutdown::wait_for_shutdown_signal;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("reel-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("影音库后台任务执行与调度引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找 config/scheduler.toml 和 scheduler.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let config = AppConfig::load(config_path.map(String::as_str)).context("加载配置失败")?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format: LogFormat = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format)
        .parse()?;
    init_logging(log_level, log_format)?;

    info!("启动影音库任务调度引擎");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    if config.observability.metrics_enabled {
        install_metrics_exporter(&config.observability.metrics_bind_address)?;
    }

    let database = DatabaseManager::new(&config.database)
        .await
        .context("打开任务数据库失败")?;

    let engine = SchedulerEngine::builder(config.clone())
        .task_repository(database.task_repository())
        .scheduled_task_repository(database.scheduled_task_repository())
        .build()?;

    engine.register_handler(Arc::new(ShellExecutor::new())).await;
    engine.register_handler(Arc::new(HttpExecutor::new())).await;
    for handler in engine.list_handlers().await {
        info!("内置处理器: {} ({})", handler.command_name, handler.name);
    }

    let report = engine.start().await.context("启动调度引擎失败")?;
    info!(
        "启动恢复完成: {} 个任务被中止, {} 个任务重新入队, 耗时 {}ms",
        report.aborted.len(),
        report.requeued.len(),
        report.recovery_duration_ms
    );

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    if !engine.shutdown().await {
        warn!(
            "部分处理器在 {} 秒内未退出",
            config.shutdown.timeout_seconds
        );
    }
    database.close().await;

    info!("影音库任务调度引擎已退出");
    Ok(())
}

fn install_metrics_exporter(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus指标导出器失败")?;
    info!("Prometheus指标导出器监听于 {addr}");
    Ok(())
}
