//! 外部协作方抽象
//!
//! 远端后端是唯一可信数据源；设备本地存储保存登录身份、会话令牌和离线变更日志。

use std::fmt;

use async_trait::async_trait;
use lastmile_errors::LastMileResult;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::entities::{
    AssignmentEvent, Courier, CourierFilter, CourierStatus, Delivery, DeliveryFilter,
    DeliveryStatus, DeliveryUpdate, NewDelivery, QueuedMutation,
};
use crate::notification::AssignmentAlert;

/// 设备本地键值存储中使用的键
pub mod store_keys {
    pub const CURRENT_COURIER_ID: &str = "current_courier_id";
    pub const SESSION_TOKEN: &str = "session_token";
    pub const LANGUAGE: &str = "language";
}

/// 包裹变更流的订阅句柄
///
/// 句柄被丢弃或调用 [`ChangeSubscription::unsubscribe`] 时取消订阅。
pub struct ChangeSubscription {
    receiver: mpsc::UnboundedReceiver<AssignmentEvent>,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ChangeSubscription {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<AssignmentEvent>,
        cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// 等待下一条事件，流结束时返回 `None`
    pub async fn next(&mut self) -> Option<AssignmentEvent> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        self.receiver.close();
    }
}

impl fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

/// 远端后端（权威数据源），单条记录的更新是原子的，并发写入以最后写入者为准
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    async fn create_delivery(&self, delivery: &NewDelivery) -> LastMileResult<Delivery>;
    async fn list_deliveries(&self, filter: &DeliveryFilter) -> LastMileResult<Vec<Delivery>>;
    async fn get_delivery(&self, id: &str) -> LastMileResult<Option<Delivery>>;
    /// 返回后端是否确认写入
    async fn update_delivery_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        update: &DeliveryUpdate,
    ) -> LastMileResult<bool>;
    /// 订阅与该快递员相关的包裹变更
    async fn subscribe_to_delivery_changes(
        &self,
        courier_id: &str,
    ) -> LastMileResult<ChangeSubscription>;
    async fn list_couriers(&self, filter: &CourierFilter) -> LastMileResult<Vec<Courier>>;
    async fn get_courier_by_id(&self, id: &str) -> LastMileResult<Option<Courier>>;
    async fn update_courier_status(&self, id: &str, status: CourierStatus) -> LastMileResult<bool>;
}

/// 账号级别的单一活跃会话标记
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn active_session_token(&self, courier_id: &str) -> LastMileResult<Option<String>>;
    async fn claim_session(&self, courier_id: &str, token: &str) -> LastMileResult<()>;
}

/// 设备本地持久化键值存储
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> LastMileResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> LastMileResult<()>;
    async fn remove(&self, key: &str) -> LastMileResult<()>;
}

/// 设备本地只追加的离线变更日志
#[async_trait]
pub trait MutationLog: Send + Sync {
    async fn append(&self, mutation: &QueuedMutation) -> LastMileResult<()>;
    /// 待同步条目，按入队顺序排列
    async fn pending(&self) -> LastMileResult<Vec<QueuedMutation>>;
    async fn remove(&self, operation_id: Uuid) -> LastMileResult<()>;
    /// 标记为无法回放的死信，不再参与同步
    async fn mark_failed(&self, operation_id: Uuid, reason: &str) -> LastMileResult<()>;
    async fn dead_letters(&self) -> LastMileResult<Vec<QueuedMutation>>;
    async fn purge_dead_letters(&self) -> LastMileResult<u64>;
}

/// 提醒输出（震动与语音播报）
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &AssignmentAlert);
}
