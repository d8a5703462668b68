use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// pretty 或 json
    pub log_format: String,
    /// 设置后启动 Prometheus 指标端点
    pub metrics_listen_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_listen_address: None,
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_one_of(
            &self.log_level,
            &["trace", "debug", "info", "warn", "error"],
            "observability.log_level",
        )?;
        ValidationUtils::validate_one_of(
            &self.log_format,
            &["pretty", "json"],
            "observability.log_format",
        )?;

        if let Some(address) = &self.metrics_listen_address {
            address.parse::<SocketAddr>().map_err(|e| {
                crate::ConfigError::Validation(format!(
                    "observability.metrics_listen_address 无效: {address} ({e})"
                ))
            })?;
        }
        Ok(())
    }
}
