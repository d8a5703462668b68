use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    backend::BackendConfig,
    dispatcher_courier::{CourierConfig, DispatcherConfig},
    observability::ObservabilityConfig,
};
use crate::validation::ConfigValidator;

pub const ENV_PREFIX: &str = "LASTMILE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub dispatcher: DispatcherConfig,
    pub courier: CourierConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 按 默认值 → TOML 文件 → `LASTMILE_` 环境变量 的顺序叠加配置
    ///
    /// 环境变量用双下划线分隔层级，例如 `LASTMILE_DISPATCHER__SCORING__BUSY_PENALTY=40`。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with_environment(config_path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_environment(config_path: Option<&str>, environment: Environment) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("生成默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/lastmile.toml",
                "lastmile.toml",
                "/etc/lastmile/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(environment);

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate().context("配置验证失败")?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate().context("配置验证失败")?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.backend.validate()?;
        self.dispatcher.validate()?;
        self.courier.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_environment() -> Environment {
        AppConfig::environment().source(Some(HashMap::new()))
    }

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.backend.request_timeout_seconds, 10);
        assert_eq!(config.courier.session_check_interval_seconds, 15);
        assert_eq!(config.courier.language, "zh");
        assert_eq!(config.dispatcher.scoring.busy_penalty, 50.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_toml() {
        let toml_str = r#"
[backend]
url = "https://project.supabase.co/rest/v1"
api_key = "anon-key"

[dispatcher]
dispatch_interval_seconds = 60

[dispatcher.scoring]
heavy_weight_threshold_kg = 10.0

[courier]
language = "my"
"#;

        let config = AppConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.backend.api_key, "anon-key");
        assert_eq!(config.dispatcher.dispatch_interval_seconds, 60);
        assert_eq!(config.dispatcher.scoring.heavy_weight_threshold_kg, 10.0);
        assert_eq!(config.dispatcher.scoring.heavy_car_bonus, 20.0);
        assert_eq!(config.courier.language, "my");
        assert_eq!(config.courier.flush_interval_seconds, 30);
    }

    #[test]
    fn test_invalid_language_rejected() {
        let result = AppConfig::from_toml("[courier]\nlanguage = \"fr\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.dispatcher.scoring, config.dispatcher.scoring);
        assert_eq!(parsed.backend.url, config.backend.url);
    }

    #[test]
    fn test_load_from_file_and_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[courier]\nsession_check_interval_seconds = 20").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = AppConfig::load_with_environment(Some(&path), no_environment()).unwrap();
        assert_eq!(config.courier.session_check_interval_seconds, 20);
        assert_eq!(config.backend.request_timeout_seconds, 10);

        let env = HashMap::from([
            (
                "LASTMILE_DISPATCHER__SCORING__BUSY_PENALTY".to_string(),
                "40".to_string(),
            ),
            (
                "LASTMILE_BACKEND__REQUEST_TIMEOUT_SECONDS".to_string(),
                "5".to_string(),
            ),
        ]);
        let config = AppConfig::load_with_environment(
            Some(&path),
            AppConfig::environment().source(Some(env)),
        )
        .unwrap();
        assert_eq!(config.dispatcher.scoring.busy_penalty, 40.0);
        assert_eq!(config.backend.request_timeout_seconds, 5);
        assert_eq!(config.courier.session_check_interval_seconds, 20);
    }

    #[test]
    fn test_missing_config_file() {
        let result = AppConfig::load_with_environment(Some("/nonexistent/lastmile.toml"), no_environment());
        assert!(result.is_err());
    }
}
