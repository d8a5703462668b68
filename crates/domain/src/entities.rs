use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::TransitionRequest;

/// 包裹（配送单）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: String,
    pub status: DeliveryStatus,
    /// 当前持有包裹的快递员，中转站保管期间为空
    pub courier_id: Option<String>,
    pub sender_name: String,
    pub sender_phone: String,
    pub sender_address: String,
    pub receiver_name: String,
    pub receiver_phone: String,
    pub receiver_address: String,
    pub weight_kg: f64,
    pub transfer_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_held_by(&self, courier_id: &str) -> bool {
        self.courier_id.as_deref() == Some(courier_id)
    }

    pub fn is_assignable(&self) -> bool {
        self.status == DeliveryStatus::PendingPickup && self.courier_id.is_none()
    }
}

/// 下单时提交的包裹字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDelivery {
    pub id: String,
    pub sender_name: String,
    pub sender_phone: String,
    pub sender_address: String,
    pub receiver_name: String,
    pub receiver_phone: String,
    pub receiver_address: String,
    pub weight_kg: f64,
}

impl NewDelivery {
    pub fn into_delivery(self, now: DateTime<Utc>) -> Delivery {
        Delivery {
            id: self.id,
            status: DeliveryStatus::PendingPickup,
            courier_id: None,
            sender_name: self.sender_name,
            sender_phone: self.sender_phone,
            sender_address: self.sender_address,
            receiver_name: self.receiver_name,
            receiver_phone: self.receiver_phone,
            receiver_address: self.receiver_address,
            weight_kg: self.weight_kg,
            transfer_code: None,
            created_at: now,
            picked_up_at: None,
            delivered_at: None,
            updated_at: now,
        }
    }
}

/// 包裹状态，序列化标签与后端 `packages.status` 列保持一致
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    #[serde(rename = "待取件")]
    PendingPickup,
    #[serde(rename = "已分配")]
    Assigned,
    #[serde(rename = "已取件")]
    PickedUp,
    #[serde(rename = "配送中")]
    InTransit,
    #[serde(rename = "待派送")]
    AtHub,
    #[serde(rename = "已送达")]
    Delivered,
    #[serde(rename = "已取消")]
    Cancelled,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 7] = [
        DeliveryStatus::PendingPickup,
        DeliveryStatus::Assigned,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
        DeliveryStatus::AtHub,
        DeliveryStatus::Delivered,
        DeliveryStatus::Cancelled,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryStatus::PendingPickup => "待取件",
            DeliveryStatus::Assigned => "已分配",
            DeliveryStatus::PickedUp => "已取件",
            DeliveryStatus::InTransit => "配送中",
            DeliveryStatus::AtHub => "待派送",
            DeliveryStatus::Delivered => "已送达",
            DeliveryStatus::Cancelled => "已取消",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// 仍需要快递员处理的状态，新分配提醒只针对这些状态
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::PendingPickup | DeliveryStatus::Assigned | DeliveryStatus::AtHub
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        DeliveryStatus::ALL
            .into_iter()
            .find(|status| {
                status.label() == trimmed
                    || format!("{status:?}").eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| format!("Invalid delivery status: {s}"))
    }
}

/// 快递员
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Courier {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    pub status: CourierStatus,
    pub vehicle_type: VehicleType,
    pub rating: Option<f64>,
    #[serde(default)]
    pub total_deliveries: u32,
}

impl Courier {
    pub fn is_active(&self) -> bool {
        self.status == CourierStatus::Active
    }

    pub fn is_dispatchable(&self) -> bool {
        self.status != CourierStatus::Inactive
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CourierStatus {
    Active,
    Busy,
    Inactive,
}

impl CourierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierStatus::Active => "active",
            CourierStatus::Busy => "busy",
            CourierStatus::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Bicycle,
    Truck,
    #[serde(other)]
    Other,
}

/// 变更流中的事件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// 实时变更流产生的分配事件，仅在内存中流转
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub delivery_id: String,
    pub kind: ChangeKind,
    pub previous_courier: Option<String>,
    pub new_courier: Option<String>,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
}

impl AssignmentEvent {
    pub fn insert(delivery: &Delivery) -> Self {
        Self {
            delivery_id: delivery.id.clone(),
            kind: ChangeKind::Insert,
            previous_courier: None,
            new_courier: delivery.courier_id.clone(),
            status: delivery.status,
            timestamp: Utc::now(),
        }
    }

    pub fn update(previous: &Delivery, current: &Delivery) -> Self {
        Self {
            delivery_id: current.id.clone(),
            kind: ChangeKind::Update,
            previous_courier: previous.courier_id.clone(),
            new_courier: current.courier_id.clone(),
            status: current.status,
            timestamp: Utc::now(),
        }
    }

    pub fn involves(&self, courier_id: &str) -> bool {
        self.new_courier.as_deref() == Some(courier_id)
            || self.previous_courier.as_deref() == Some(courier_id)
    }
}

/// 离线队列中一条变更所针对的包裹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum MutationTarget {
    Delivery(String),
    TransferCode(String),
}

impl fmt::Display for MutationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationTarget::Delivery(id) => write!(f, "包裹 {id}"),
            MutationTarget::TransferCode(code) => write!(f, "中转码 {code}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Applied,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Applied => "applied",
            SyncState::Failed => "failed",
        }
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncState::Pending),
            "applied" => Ok(SyncState::Applied),
            "failed" => Ok(SyncState::Failed),
            _ => Err(format!("Invalid sync state: {s}")),
        }
    }
}

/// 断网期间记录的状态变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub operation_id: Uuid,
    pub target: MutationTarget,
    pub request: TransitionRequest,
    pub courier_id: String,
    pub created_at: DateTime<Utc>,
    pub sync_state: SyncState,
    pub failure_reason: Option<String>,
}

impl QueuedMutation {
    pub fn new(target: MutationTarget, request: TransitionRequest, courier_id: &str) -> Self {
        let now = Utc::now();
        let request = TransitionRequest {
            occurred_at: request.occurred_at.or(Some(now)),
            ..request
        };
        Self {
            operation_id: Uuid::new_v4(),
            target,
            request,
            courier_id: courier_id.to_string(),
            created_at: now,
            sync_state: SyncState::Pending,
            failure_reason: None,
        }
    }
}

/// 查询包裹时的过滤条件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFilter {
    pub id: Option<String>,
    pub status: Option<DeliveryStatus>,
    pub courier_id: Option<String>,
    pub transfer_code: Option<String>,
    pub unassigned_only: bool,
}

impl DeliveryFilter {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn by_transfer_code(code: &str) -> Self {
        Self {
            transfer_code: Some(code.to_string()),
            ..Self::default()
        }
    }

    pub fn by_courier(courier_id: &str) -> Self {
        Self {
            courier_id: Some(courier_id.to_string()),
            ..Self::default()
        }
    }

    /// 可参与调度的包裹：待取件且尚未分配快递员
    pub fn assignable() -> Self {
        Self {
            status: Some(DeliveryStatus::PendingPickup),
            unassigned_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, delivery: &Delivery) -> bool {
        self.id.as_ref().is_none_or(|id| &delivery.id == id)
            && self.status.is_none_or(|status| delivery.status == status)
            && self
                .courier_id
                .as_ref()
                .is_none_or(|courier| delivery.courier_id.as_ref() == Some(courier))
            && self
                .transfer_code
                .as_ref()
                .is_none_or(|code| delivery.transfer_code.as_ref() == Some(code))
            && (!self.unassigned_only || delivery.courier_id.is_none())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourierFilter {
    pub status: Option<CourierStatus>,
}

impl CourierFilter {
    pub fn matches(&self, courier: &Courier) -> bool {
        self.status.is_none_or(|status| courier.status == status)
    }
}

/// 状态变更时随同写入后端的附加字段，按最后写入者为准覆盖
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryUpdate {
    pub courier_id: Option<String>,
    pub transfer_code: Option<String>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<&Delivery> for DeliveryUpdate {
    fn from(delivery: &Delivery) -> Self {
        Self {
            courier_id: delivery.courier_id.clone(),
            transfer_code: delivery.transfer_code.clone(),
            picked_up_at: delivery.picked_up_at,
            delivered_at: delivery.delivered_at,
        }
    }
}

impl DeliveryUpdate {
    pub fn apply_to(&self, delivery: &mut Delivery, status: DeliveryStatus) {
        delivery.status = status;
        delivery.courier_id = self.courier_id.clone();
        delivery.transfer_code = self.transfer_code.clone();
        delivery.picked_up_at = self.picked_up_at;
        delivery.delivered_at = self.delivered_at;
        delivery.updated_at = Utc::now();
    }
}
