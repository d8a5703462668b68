use std::sync::Arc;

use lastmile_domain::{
    generate_transfer_code, store_keys, DeliveryStatus, LocalStore, MutationTarget,
    QueuedMutation, ScanCode, TransitionRequest,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{CourierError, CourierResult};
use crate::offline_queue::OfflineMutationQueue;

/// 扫描包裹编号时快递员选择的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanIntent {
    Pickup,
    Depart,
    Deliver,
    HubDropOff,
}

impl ScanIntent {
    fn request_for(&self, delivery_id: &str) -> TransitionRequest {
        match self {
            ScanIntent::Pickup => TransitionRequest::to(DeliveryStatus::PickedUp),
            ScanIntent::Depart => TransitionRequest::to(DeliveryStatus::InTransit),
            ScanIntent::Deliver => TransitionRequest::to(DeliveryStatus::Delivered),
            ScanIntent::HubDropOff => {
                TransitionRequest::hub_drop_off_proposing(generate_transfer_code(delivery_id))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ScanOutcome {
    /// 门店交接回执，仅记录不改变包裹状态
    StoreAcknowledged { store_id: String, store_code: String },
    /// 变更已写入离线队列，稍后同步
    Queued {
        operation_id: Uuid,
        target: MutationTarget,
        request: TransitionRequest,
    },
}

/// 扫码入口：解析扫码内容，把状态变更写入离线队列后立即返回
pub struct ScanHandler {
    store: Arc<dyn LocalStore>,
    queue: Arc<OfflineMutationQueue>,
}

impl ScanHandler {
    pub fn new(store: Arc<dyn LocalStore>, queue: Arc<OfflineMutationQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn handle(&self, raw: &str, intent: ScanIntent) -> CourierResult<ScanOutcome> {
        if raw.trim().is_empty() {
            return Err(CourierError::EmptyScan);
        }
        let courier_id = self
            .store
            .get(store_keys::CURRENT_COURIER_ID)
            .await?
            .ok_or(CourierError::NotLoggedIn)?;

        let (target, request) = match ScanCode::parse(raw) {
            ScanCode::StoreHandoff {
                store_id,
                store_code,
            } => {
                info!(
                    courier_id = %courier_id,
                    "门店 {} 交接回执: {}",
                    store_id,
                    store_code
                );
                counter!("lastmile_store_handoffs_total").increment(1);
                return Ok(ScanOutcome::StoreAcknowledged {
                    store_id,
                    store_code,
                });
            }
            ScanCode::TransferCode(code) => (
                MutationTarget::TransferCode(code.clone()),
                TransitionRequest::hub_pickup(code),
            ),
            ScanCode::DeliveryId(id) => {
                let request = intent.request_for(&id);
                (MutationTarget::Delivery(id), request)
            }
        };

        let mutation = QueuedMutation::new(target.clone(), request, &courier_id);
        let request = mutation.request.clone();
        let operation_id = self.queue.enqueue(mutation).await?;
        self.queue.request_flush();

        info!(
            courier_id = %courier_id,
            operation_id = %operation_id,
            "{} 扫码已记录: {}",
            target,
            request.status
        );
        Ok(ScanOutcome::Queued {
            operation_id,
            target,
            request,
        })
    }
}
