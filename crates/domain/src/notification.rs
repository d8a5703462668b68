use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 新订单提醒的震动节奏（毫秒）：等待、震动、间隔、震动
pub const ASSIGNMENT_VIBRATION_PATTERN_MS: [u64; 4] = [0, 500, 200, 500];

/// 设备上用户选择的界面语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
    My,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
            Language::My => "my",
        }
    }

    pub fn new_order_notice(&self) -> &'static str {
        match self {
            Language::Zh => "您有新的订单",
            Language::En => "You have a new order.",
            Language::My => "သင့်တွင် အော်ဒါအသစ်တစ်ခုရှိသည်။",
        }
    }

    pub fn speech_locale(&self) -> &'static str {
        match self {
            Language::Zh => "zh-CN",
            Language::En => "en-US",
            Language::My => "my-MM",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" => Ok(Language::Zh),
            "en" | "en-us" => Ok(Language::En),
            "my" | "my-mm" => Ok(Language::My),
            other => Err(format!("Unsupported language: {other}")),
        }
    }
}

/// 一次新分配提醒：震动 + 语音播报
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentAlert {
    pub delivery_id: String,
    pub vibration_pattern_ms: Vec<u64>,
    pub spoken_text: String,
    pub speech_locale: String,
}

impl AssignmentAlert {
    pub fn new_order(delivery_id: &str, language: Language) -> Self {
        Self {
            delivery_id: delivery_id.to_string(),
            vibration_pattern_ms: ASSIGNMENT_VIBRATION_PATTERN_MS.to_vec(),
            spoken_text: language.new_order_notice().to_string(),
            speech_locale: language.speech_locale().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_uses_selected_language() {
        let alert = AssignmentAlert::new_order("PKG01", Language::En);
        assert_eq!(alert.spoken_text, "You have a new order.");
        assert_eq!(alert.speech_locale, "en-US");
        assert_eq!(alert.vibration_pattern_ms, vec![0, 500, 200, 500]);
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("MY".parse::<Language>().unwrap(), Language::My);
        assert_eq!("zh-CN".parse::<Language>().unwrap(), Language::Zh);
        assert!("fr".parse::<Language>().is_err());
        assert_eq!(Language::default(), Language::Zh);
    }
}
