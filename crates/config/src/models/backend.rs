use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 远端后端（PostgREST 风格 REST 接口）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    /// 匿名访问密钥，同时作为 `apikey` 头和 Bearer 令牌发送
    pub api_key: String,
    /// 单次请求超时，离线回放时超时视为暂时性失败
    pub request_timeout_seconds: u64,
    /// 变更流轮询间隔
    pub change_poll_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321/rest/v1".to_string(),
            api_key: String::new(),
            request_timeout_seconds: 10,
            change_poll_interval_ms: 2000,
        }
    }
}

impl ConfigValidator for BackendConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_http_url(&self.url, "backend.url")?;
        ValidationUtils::validate_seconds(
            self.request_timeout_seconds,
            "backend.request_timeout_seconds",
        )?;
        if self.change_poll_interval_ms < 100 {
            return Err(crate::ConfigError::Validation(
                "backend.change_poll_interval_ms 不能小于100毫秒".to_string(),
            ));
        }
        Ok(())
    }
}
