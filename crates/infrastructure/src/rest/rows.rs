//! 后端表结构与领域实体之间的映射
//!
//! `packages` 表沿用既有列名：重量以字符串保存，快递员列名为 `courier`，
//! 取件与送达时间分别为 `pickup_time` / `delivery_time`。

use std::str::FromStr;

use chrono::{DateTime, Utc};
use lastmile_domain::{
    Courier, CourierStatus, Delivery, DeliveryStatus, DeliveryUpdate, NewDelivery, VehicleType,
};
use lastmile_errors::{LastMileError, LastMileResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 旧数据中表示“未分配”的快递员取值
const UNASSIGNED_MARKERS: &[&str] = &["", "待分配"];

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum WeightField {
    Number(f64),
    Text(String),
}

impl WeightField {
    fn kilograms(&self) -> f64 {
        match self {
            WeightField::Number(kg) => *kg,
            WeightField::Text(text) => text
                .trim()
                .trim_end_matches(|c: char| c.is_alphabetic())
                .trim()
                .parse()
                .unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PackageRow {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub courier: Option<String>,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_phone: String,
    #[serde(default)]
    pub sender_address: String,
    #[serde(default)]
    pub receiver_name: String,
    #[serde(default)]
    pub receiver_phone: String,
    #[serde(default)]
    pub receiver_address: String,
    #[serde(default)]
    pub weight: Option<WeightField>,
    #[serde(default)]
    pub transfer_code: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pickup_time: Option<String>,
    #[serde(default)]
    pub delivery_time: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
}

fn normalize_courier(courier: Option<String>) -> Option<String> {
    courier.filter(|c| !UNASSIGNED_MARKERS.contains(&c.trim()))
}

impl TryFrom<PackageRow> for Delivery {
    type Error = LastMileError;

    fn try_from(row: PackageRow) -> LastMileResult<Self> {
        let status = DeliveryStatus::from_str(&row.status).map_err(|e| {
            LastMileError::Serialization(format!("包裹 {} 的状态无法识别: {e}", row.id))
        })?;
        let created_at = row.created_at.unwrap_or_else(Utc::now);

        Ok(Delivery {
            status,
            courier_id: normalize_courier(row.courier),
            weight_kg: row.weight.as_ref().map(WeightField::kilograms).unwrap_or(0.0),
            transfer_code: row.transfer_code.filter(|c| !c.is_empty()),
            picked_up_at: parse_timestamp(row.pickup_time.as_deref()),
            delivered_at: parse_timestamp(row.delivery_time.as_deref()),
            updated_at: row.updated_at.unwrap_or(created_at),
            created_at,
            id: row.id,
            sender_name: row.sender_name,
            sender_phone: row.sender_phone,
            sender_address: row.sender_address,
            receiver_name: row.receiver_name,
            receiver_phone: row.receiver_phone,
            receiver_address: row.receiver_address,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct NewPackageRow<'a> {
    pub id: &'a str,
    pub status: &'static str,
    pub sender_name: &'a str,
    pub sender_phone: &'a str,
    pub sender_address: &'a str,
    pub receiver_name: &'a str,
    pub receiver_phone: &'a str,
    pub receiver_address: &'a str,
    pub weight: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> NewPackageRow<'a> {
    pub fn new(delivery: &'a NewDelivery, now: DateTime<Utc>) -> Self {
        Self {
            id: &delivery.id,
            status: DeliveryStatus::PendingPickup.label(),
            sender_name: &delivery.sender_name,
            sender_phone: &delivery.sender_phone,
            sender_address: &delivery.sender_address,
            receiver_name: &delivery.receiver_name,
            receiver_phone: &delivery.receiver_phone,
            receiver_address: &delivery.receiver_address,
            weight: delivery.weight_kg.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 状态变更写入的列，`None` 显式写为 null
#[derive(Debug, Clone, Serialize)]
pub(crate) struct PackagePatch<'a> {
    pub status: &'static str,
    pub courier: Option<&'a str>,
    pub transfer_code: Option<&'a str>,
    pub pickup_time: Option<String>,
    pub delivery_time: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl<'a> PackagePatch<'a> {
    pub fn new(status: DeliveryStatus, update: &'a DeliveryUpdate) -> Self {
        Self {
            status: status.label(),
            courier: update.courier_id.as_deref(),
            transfer_code: update.transfer_code.as_deref(),
            pickup_time: update.picked_up_at.map(|ts| ts.to_rfc3339()),
            delivery_time: update.delivered_at.map(|ts| ts.to_rfc3339()),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CourierRow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub status: String,
    #[serde(default)]
    pub vehicle_type: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub total_deliveries: Option<i64>,
}

pub(crate) fn parse_courier_status(raw: &str) -> CourierStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "active" | "online" => CourierStatus::Active,
        "busy" => CourierStatus::Busy,
        "inactive" | "offline" => CourierStatus::Inactive,
        other => {
            warn!("未知的快递员状态 {}，按停用处理", other);
            CourierStatus::Inactive
        }
    }
}

impl From<CourierRow> for Courier {
    fn from(row: CourierRow) -> Self {
        let vehicle_type = row
            .vehicle_type
            .as_deref()
            .map(|v| {
                serde_json::from_value(serde_json::Value::String(v.trim().to_ascii_lowercase()))
                    .unwrap_or(VehicleType::Other)
            })
            .unwrap_or(VehicleType::Other);

        Courier {
            status: parse_courier_status(&row.status),
            vehicle_type,
            rating: row.rating,
            total_deliveries: row.total_deliveries.unwrap_or(0).max(0) as u32,
            phone: row.phone.unwrap_or_default(),
            name: row.name,
            id: row.id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CourierStatusPatch {
    pub status: &'static str,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SessionRow {
    pub courier_id: String,
    pub session_token: String,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}
