use serde::{Deserialize, Serialize};

use super::scoring::ScoringPolicy;
use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub auto_dispatch_enabled: bool,
    pub dispatch_interval_seconds: u64,
    /// 分配成功后把快递员标记为忙碌
    pub mark_courier_busy_on_assign: bool,
    pub scoring: ScoringPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            auto_dispatch_enabled: true,
            dispatch_interval_seconds: 30,
            mark_courier_busy_on_assign: true,
            scoring: ScoringPolicy::default(),
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(
            self.dispatch_interval_seconds,
            "dispatcher.dispatch_interval_seconds",
        )?;
        self.scoring.validate()
    }
}

pub const SUPPORTED_LANGUAGES: [&str; 3] = ["zh", "en", "my"];

/// 快递员设备端
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub session_check_interval_seconds: u64,
    pub flush_interval_seconds: u64,
    /// 设备存储中没有语言设置时使用
    pub language: String,
    pub device_store_url: String,
    pub device_name: String,
}

impl Default for CourierConfig {
    fn default() -> Self {
        let device_name = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "courier-device".to_string());

        Self {
            session_check_interval_seconds: 15,
            flush_interval_seconds: 30,
            language: "zh".to_string(),
            device_store_url: "sqlite://courier-device.db".to_string(),
            device_name,
        }
    }
}

impl ConfigValidator for CourierConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(
            self.session_check_interval_seconds,
            "courier.session_check_interval_seconds",
        )?;
        ValidationUtils::validate_seconds(
            self.flush_interval_seconds,
            "courier.flush_interval_seconds",
        )?;
        ValidationUtils::validate_one_of(&self.language, &SUPPORTED_LANGUAGES, "courier.language")?;
        ValidationUtils::validate_not_empty(&self.device_name, "courier.device_name")?;

        if !self.device_store_url.starts_with("sqlite:") {
            return Err(crate::ConfigError::Validation(format!(
                "courier.device_store_url 必须是 sqlite: 地址，当前值: {}",
                self.device_store_url
            )));
        }
        Ok(())
    }
}
