//! 面单/二维码扫码协议
//!
//! 按字面前缀路由：`STORE_{storeId}_{storeCode}` 为门店交接回执，`TC{字母数字}` 为中转码，
//! 其余内容一律视为包裹编号。

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

const STORE_PREFIX: &str = "STORE_";
const TRANSFER_CODE_PREFIX: &str = "TC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanCode {
    StoreHandoff { store_id: String, store_code: String },
    TransferCode(String),
    DeliveryId(String),
}

impl ScanCode {
    pub fn parse(raw: &str) -> Self {
        let code = raw.trim();

        if let Some(rest) = code.strip_prefix(STORE_PREFIX) {
            if let Some((store_id, store_code)) = rest.rsplit_once('_') {
                if !store_id.is_empty() && !store_code.is_empty() {
                    return ScanCode::StoreHandoff {
                        store_id: store_id.to_string(),
                        store_code: store_code.to_string(),
                    };
                }
            }
        }

        if let Some(rest) = code.strip_prefix(TRANSFER_CODE_PREFIX) {
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()) {
                return ScanCode::TransferCode(code.to_string());
            }
        }

        ScanCode::DeliveryId(code.to_string())
    }
}

/// 生成中转码：`TC` + 包裹编号末四位 + 四位随机字母数字
pub fn generate_transfer_code(delivery_id: &str) -> String {
    let tail: Vec<char> = delivery_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let tail: String = tail[tail.len().saturating_sub(4)..].iter().collect();

    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();

    format!("{TRANSFER_CODE_PREFIX}{tail}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_handoff() {
        assert_eq!(
            ScanCode::parse("STORE_S12_8841"),
            ScanCode::StoreHandoff {
                store_id: "S12".to_string(),
                store_code: "8841".to_string()
            }
        );
        // 门店编号本身带下划线时以最后一个下划线分隔
        assert_eq!(
            ScanCode::parse(" STORE_MDY_01_77 "),
            ScanCode::StoreHandoff {
                store_id: "MDY_01".to_string(),
                store_code: "77".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_store_code_is_delivery_id() {
        assert_eq!(
            ScanCode::parse("STORE_ONLY"),
            ScanCode::DeliveryId("STORE_ONLY".to_string())
        );
    }

    #[test]
    fn test_transfer_code() {
        assert_eq!(
            ScanCode::parse("TCPGT1234567"),
            ScanCode::TransferCode("TCPGT1234567".to_string())
        );
        assert_eq!(ScanCode::parse("TC"), ScanCode::DeliveryId("TC".to_string()));
        assert_eq!(
            ScanCode::parse("TC-12"),
            ScanCode::DeliveryId("TC-12".to_string())
        );
    }

    #[test]
    fn test_anything_else_is_delivery_id() {
        assert_eq!(
            ScanCode::parse("MDY20250101001"),
            ScanCode::DeliveryId("MDY20250101001".to_string())
        );
    }

    #[test]
    fn test_generated_transfer_code_parses_back() {
        let code = generate_transfer_code("MDY-2025-0042");
        assert!(code.starts_with("TC0042"));
        assert_eq!(code.len(), 10);
        assert_eq!(ScanCode::parse(&code), ScanCode::TransferCode(code.clone()));

        let short = generate_transfer_code("P1");
        assert!(short.starts_with("TCP1"));
        assert_eq!(short.len(), 8);
    }
}
