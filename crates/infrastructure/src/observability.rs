use std::net::SocketAddr;

use anyhow::{Context, Result};
use lastmile_config::ObservabilityConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志系统，`RUST_LOG` 优先于配置中的日志级别
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 启动 Prometheus 指标端点，需要在 tokio 运行时内调用
pub fn init_metrics(listen_address: &str) -> Result<()> {
    let address: SocketAddr = listen_address
        .parse()
        .with_context(|| format!("指标监听地址无效: {listen_address}"))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("安装Prometheus指标导出器失败")?;

    info!("Prometheus指标端点已启动: http://{}/metrics", address);
    Ok(())
}

/// 按配置初始化日志和（可选的）指标导出
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(&config.log_level, &config.log_format)?;
    if let Some(address) = &config.metrics_listen_address {
        init_metrics(address)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_log_format_is_rejected() {
        let err = init_logging("info", "xml").unwrap_err();
        assert!(err.to_string().contains("xml"));
    }

    #[test]
    fn test_invalid_metrics_address() {
        assert!(init_metrics("not-an-address").is_err());
    }
}
