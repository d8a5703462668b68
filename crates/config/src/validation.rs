use crate::{ConfigError, ConfigResult};

pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{field_name} 不能为空")));
        }
        Ok(())
    }

    /// 间隔与超时必须在 (0, 3600] 秒之间
    pub fn validate_seconds(seconds: u64, field_name: &str) -> ConfigResult<()> {
        if seconds == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} 必须大于0"
            )));
        }
        if seconds > 3600 {
            return Err(ConfigError::Validation(format!(
                "{field_name} 不能超过3600秒"
            )));
        }
        Ok(())
    }

    pub fn validate_non_negative(value: f64, field_name: &str) -> ConfigResult<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} 必须是非负数，当前值: {value}"
            )));
        }
        Ok(())
    }

    pub fn validate_http_url(value: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(value, field_name)?;
        let parsed = url::Url::parse(value)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "{field_name} 必须是 HTTP/HTTPS 地址"
            )));
        }
        Ok(())
    }

    pub fn validate_one_of(value: &str, allowed: &[&str], field_name: &str) -> ConfigResult<()> {
        if !allowed.contains(&value) {
            return Err(ConfigError::Validation(format!(
                "{field_name} 取值无效: {value}，可选值: {allowed:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_seconds() {
        assert!(ValidationUtils::validate_seconds(15, "interval").is_ok());
        assert!(ValidationUtils::validate_seconds(3600, "interval").is_ok());
        assert!(ValidationUtils::validate_seconds(0, "interval").is_err());
        assert!(ValidationUtils::validate_seconds(3601, "interval").is_err());
    }

    #[test]
    fn test_validate_non_negative() {
        assert!(ValidationUtils::validate_non_negative(0.0, "bonus").is_ok());
        assert!(ValidationUtils::validate_non_negative(-1.0, "bonus").is_err());
        assert!(ValidationUtils::validate_non_negative(f64::NAN, "bonus").is_err());
    }

    #[test]
    fn test_validate_http_url() {
        assert!(ValidationUtils::validate_http_url("https://api.example.com", "url").is_ok());
        assert!(ValidationUtils::validate_http_url("ftp://files.example.com", "url").is_err());
        assert!(ValidationUtils::validate_http_url("not a url", "url").is_err());
        assert!(ValidationUtils::validate_http_url("", "url").is_err());
    }
}
