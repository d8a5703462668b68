use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Delivery, DeliveryStatus};
use crate::errors::TransitionError;

/// 发起状态变更的一方
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    Courier { id: String },
    /// 自动调度周期
    Dispatcher,
    Admin { id: String },
}

impl Actor {
    pub fn courier(id: impl Into<String>) -> Self {
        Actor::Courier { id: id.into() }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Actor::Admin { id: id.into() }
    }

    fn courier_id(&self) -> Option<&str> {
        match self {
            Actor::Courier { id } => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Courier { id } => write!(f, "快递员 {id}"),
            Actor::Dispatcher => write!(f, "调度器"),
            Actor::Admin { id } => write!(f, "管理员 {id}"),
        }
    }
}

/// 请求的目标状态及随同变更的字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub status: DeliveryStatus,
    /// 分配时指定的快递员
    #[serde(default)]
    pub courier_id: Option<String>,
    /// 中转站交接时写入或出示的中转码
    #[serde(default)]
    pub transfer_code: Option<String>,
    /// 包裹已有中转码时沿用原码，只在没有中转码时写入 `transfer_code`
    #[serde(default)]
    pub keep_existing_code: bool,
    /// 扫码发生的时间，离线回放时用于取件/送达时间
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl TransitionRequest {
    pub fn to(status: DeliveryStatus) -> Self {
        Self {
            status,
            courier_id: None,
            transfer_code: None,
            keep_existing_code: false,
            occurred_at: None,
        }
    }

    pub fn assign(courier_id: impl Into<String>) -> Self {
        Self {
            courier_id: Some(courier_id.into()),
            ..Self::to(DeliveryStatus::Assigned)
        }
    }

    pub fn hub_drop_off(transfer_code: impl Into<String>) -> Self {
        Self {
            transfer_code: Some(transfer_code.into()),
            ..Self::to(DeliveryStatus::AtHub)
        }
    }

    /// 扫码入站：提议一个新中转码，包裹之前经过中转站时沿用原码
    pub fn hub_drop_off_proposing(transfer_code: impl Into<String>) -> Self {
        Self {
            keep_existing_code: true,
            ..Self::hub_drop_off(transfer_code)
        }
    }

    pub fn hub_pickup(transfer_code: impl Into<String>) -> Self {
        Self {
            transfer_code: Some(transfer_code.into()),
            ..Self::to(DeliveryStatus::InTransit)
        }
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }
}

impl From<DeliveryStatus> for TransitionRequest {
    fn from(status: DeliveryStatus) -> Self {
        Self::to(status)
    }
}

/// 每条边允许的执行方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeAuthority {
    /// 调度器或管理员
    Dispatch,
    /// 未分配包裹的任意快递员，或已分配的快递员本人
    UnassignedOrHolder,
    /// 当前持有包裹的快递员
    Holder,
    HolderOrAdmin,
    /// 出示包裹中转码的快递员
    TransferCodeBearer,
    Admin,
}

/// 包裹生命周期状态机
///
/// 校验顺序：相同状态视为幂等成功，其次是终态、边是否存在、执行方权限，最后是字段规则。
/// 校验失败时输入的包裹保持不变，成功时返回变更后的新副本。
pub struct PackageStateMachine;

impl PackageStateMachine {
    fn edge(from: DeliveryStatus, to: DeliveryStatus) -> Option<EdgeAuthority> {
        use DeliveryStatus::*;

        match (from, to) {
            (PendingPickup, Assigned) => Some(EdgeAuthority::Dispatch),
            (PendingPickup, PickedUp) => Some(EdgeAuthority::UnassignedOrHolder),
            (Assigned, PickedUp) => Some(EdgeAuthority::Holder),
            (PickedUp, InTransit) => Some(EdgeAuthority::Holder),
            (PickedUp, Delivered) => Some(EdgeAuthority::Holder),
            (InTransit, Delivered) => Some(EdgeAuthority::Holder),
            (InTransit, AtHub) => Some(EdgeAuthority::HolderOrAdmin),
            (AtHub, InTransit) => Some(EdgeAuthority::TransferCodeBearer),
            (from, Cancelled) if !from.is_terminal() => Some(EdgeAuthority::Admin),
            _ => None,
        }
    }

    pub fn is_adjacent(from: DeliveryStatus, to: DeliveryStatus) -> bool {
        Self::edge(from, to).is_some()
    }

    /// 从给定状态出发可到达的下一个状态
    pub fn next_statuses(from: DeliveryStatus) -> Vec<DeliveryStatus> {
        DeliveryStatus::ALL
            .into_iter()
            .filter(|to| Self::is_adjacent(from, *to))
            .collect()
    }

    pub fn attempt_transition(
        delivery: &Delivery,
        request: &TransitionRequest,
        actor: &Actor,
    ) -> Result<Delivery, TransitionError> {
        let from = delivery.status;
        let to = request.status;

        if from == to {
            return Ok(delivery.clone());
        }
        if from.is_terminal() {
            return Err(TransitionError::AlreadyTerminal { status: from });
        }

        let authority =
            Self::edge(from, to).ok_or(TransitionError::InvalidTransition { from, to })?;

        if !Self::is_authorized(authority, delivery, request, actor) {
            return Err(TransitionError::Unauthorized {
                actor: actor.clone(),
                from,
                to,
            });
        }

        let occurred_at = request.occurred_at.unwrap_or_else(Utc::now);
        let mut next = delivery.clone();

        match (from, to) {
            (DeliveryStatus::PendingPickup, DeliveryStatus::Assigned) => {
                let courier_id = request
                    .courier_id
                    .clone()
                    .ok_or(TransitionError::MissingCourier)?;
                next.courier_id = Some(courier_id);
            }
            (_, DeliveryStatus::PickedUp) => {
                if let Some(courier_id) = actor.courier_id() {
                    next.courier_id = Some(courier_id.to_string());
                }
                next.picked_up_at = Some(occurred_at);
            }
            (DeliveryStatus::InTransit, DeliveryStatus::AtHub) => {
                match (&delivery.transfer_code, &request.transfer_code) {
                    (Some(existing), Some(requested))
                        if existing != requested && !request.keep_existing_code =>
                    {
                        return Err(TransitionError::TransferCodeLocked);
                    }
                    (None, Some(requested)) => next.transfer_code = Some(requested.clone()),
                    _ => {}
                }
                // 中转站保管期间包裹不属于任何快递员
                next.courier_id = None;
            }
            (DeliveryStatus::AtHub, DeliveryStatus::InTransit) => {
                next.courier_id = actor.courier_id().map(str::to_string);
            }
            (_, DeliveryStatus::Delivered) => {
                next.delivered_at = Some(occurred_at);
            }
            _ => {}
        }

        next.status = to;
        next.updated_at = occurred_at;
        Ok(next)
    }

    fn is_authorized(
        authority: EdgeAuthority,
        delivery: &Delivery,
        request: &TransitionRequest,
        actor: &Actor,
    ) -> bool {
        let holds = |id: &str| delivery.is_held_by(id);

        match (authority, actor) {
            (EdgeAuthority::Dispatch, Actor::Dispatcher | Actor::Admin { .. }) => true,
            (EdgeAuthority::UnassignedOrHolder, Actor::Courier { id }) => {
                delivery.courier_id.is_none() || holds(id)
            }
            (EdgeAuthority::Holder, Actor::Courier { id }) => holds(id),
            (EdgeAuthority::HolderOrAdmin, Actor::Courier { id }) => holds(id),
            (EdgeAuthority::HolderOrAdmin, Actor::Admin { .. }) => true,
            (EdgeAuthority::TransferCodeBearer, Actor::Courier { .. }) => {
                delivery.transfer_code.is_some() && request.transfer_code == delivery.transfer_code
            }
            (EdgeAuthority::Admin, Actor::Admin { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod state_machine_tests {
    use super::*;
    use crate::entities::NewDelivery;

    fn delivery(status: DeliveryStatus, courier: Option<&str>) -> Delivery {
        let mut delivery = NewDelivery {
            id: "PKG01".to_string(),
            sender_name: "发件人".to_string(),
            sender_phone: "09111111111".to_string(),
            sender_address: "仰光市 Bahan 区".to_string(),
            receiver_name: "收件人".to_string(),
            receiver_phone: "09222222222".to_string(),
            receiver_address: "仰光市 Sanchaung 区".to_string(),
            weight_kg: 1.0,
        }
        .into_delivery(Utc::now());
        delivery.status = status;
        delivery.courier_id = courier.map(str::to_string);
        delivery
    }

    /// 对每条边给出一个有权限的执行方和请求
    fn authorized_for(from: DeliveryStatus, to: DeliveryStatus) -> (Delivery, TransitionRequest, Actor) {
        use DeliveryStatus::*;

        let alice = Actor::courier("alice");
        match (from, to) {
            (_, Cancelled) => (
                delivery(from, Some("alice")),
                TransitionRequest::to(to),
                Actor::admin("root"),
            ),
            (PendingPickup, Assigned) => (
                delivery(from, None),
                TransitionRequest::assign("alice"),
                Actor::Dispatcher,
            ),
            (AtHub, InTransit) => {
                let mut d = delivery(from, None);
                d.transfer_code = Some("TC0001ABCD".to_string());
                (d, TransitionRequest::hub_pickup("TC0001ABCD"), alice)
            }
            _ => (delivery(from, Some("alice")), TransitionRequest::to(to), alice),
        }
    }

    #[test]
    fn test_success_iff_adjacent_for_authorized_actor() {
        for from in DeliveryStatus::ALL {
            for to in DeliveryStatus::ALL {
                let (d, request, actor) = authorized_for(from, to);
                let before = d.clone();
                let result = PackageStateMachine::attempt_transition(&d, &request, &actor);

                if from == to || PackageStateMachine::is_adjacent(from, to) {
                    let next = result.unwrap_or_else(|e| panic!("{from:?} -> {to:?}: {e}"));
                    assert_eq!(next.status, to);
                } else if from.is_terminal() {
                    assert_eq!(result, Err(TransitionError::AlreadyTerminal { status: from }));
                } else {
                    assert_eq!(result, Err(TransitionError::InvalidTransition { from, to }));
                }
                assert_eq!(d, before, "输入包裹不应被修改");
            }
        }
    }

    #[test]
    fn test_same_status_is_noop_even_when_terminal() {
        let d = delivery(DeliveryStatus::Delivered, Some("alice"));
        let result = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::to(DeliveryStatus::Delivered),
            &Actor::courier("alice"),
        )
        .unwrap();
        assert_eq!(result, d);
    }

    #[test]
    fn test_only_assigned_courier_can_pick_up() {
        let d = delivery(DeliveryStatus::Assigned, Some("alice"));
        let err = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::to(DeliveryStatus::PickedUp),
            &Actor::courier("bob"),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::Unauthorized { .. }));
    }

    #[test]
    fn test_unassigned_pickup_claims_delivery() {
        let d = delivery(DeliveryStatus::PendingPickup, None);
        let next = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::to(DeliveryStatus::PickedUp),
            &Actor::courier("alice"),
        )
        .unwrap();
        assert_eq!(next.courier_id.as_deref(), Some("alice"));
        assert!(next.picked_up_at.is_some());
    }

    #[test]
    fn test_assignment_requires_courier() {
        let d = delivery(DeliveryStatus::PendingPickup, None);
        let err = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::to(DeliveryStatus::Assigned),
            &Actor::Dispatcher,
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::MissingCourier);
    }

    #[test]
    fn test_courier_cannot_cancel() {
        let d = delivery(DeliveryStatus::InTransit, Some("alice"));
        let err = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::to(DeliveryStatus::Cancelled),
            &Actor::courier("alice"),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::Unauthorized { .. }));
    }

    #[test]
    fn test_hub_round_trip_reassigns_custody() {
        let d = delivery(DeliveryStatus::InTransit, Some("alice"));
        let at_hub = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::hub_drop_off("TC0001WXYZ"),
            &Actor::courier("alice"),
        )
        .unwrap();
        assert_eq!(at_hub.courier_id, None);
        assert_eq!(at_hub.transfer_code.as_deref(), Some("TC0001WXYZ"));

        let wrong_code = PackageStateMachine::attempt_transition(
            &at_hub,
            &TransitionRequest::hub_pickup("TC9999AAAA"),
            &Actor::courier("bob"),
        );
        assert!(matches!(wrong_code, Err(TransitionError::Unauthorized { .. })));

        let picked = PackageStateMachine::attempt_transition(
            &at_hub,
            &TransitionRequest::hub_pickup("TC0001WXYZ"),
            &Actor::courier("bob"),
        )
        .unwrap();
        assert_eq!(picked.status, DeliveryStatus::InTransit);
        assert_eq!(picked.courier_id.as_deref(), Some("bob"));
        assert_eq!(picked.transfer_code.as_deref(), Some("TC0001WXYZ"));
    }

    #[test]
    fn test_transfer_code_cannot_be_replaced() {
        let mut d = delivery(DeliveryStatus::InTransit, Some("bob"));
        d.transfer_code = Some("TC0001WXYZ".to_string());

        let err = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::hub_drop_off("TC0001QQQQ"),
            &Actor::courier("bob"),
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::TransferCodeLocked);

        let kept = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::to(DeliveryStatus::AtHub),
            &Actor::courier("bob"),
        )
        .unwrap();
        assert_eq!(kept.transfer_code.as_deref(), Some("TC0001WXYZ"));
    }

    #[test]
    fn test_second_hub_visit_keeps_original_code() {
        let mut d = delivery(DeliveryStatus::InTransit, Some("bob"));
        d.transfer_code = Some("TC0001WXYZ".to_string());

        let at_hub = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::hub_drop_off_proposing("TC0001QQQQ"),
            &Actor::courier("bob"),
        )
        .unwrap();
        assert_eq!(at_hub.status, DeliveryStatus::AtHub);
        assert_eq!(at_hub.courier_id, None);
        assert_eq!(at_hub.transfer_code.as_deref(), Some("TC0001WXYZ"));

        let first_visit = PackageStateMachine::attempt_transition(
            &delivery(DeliveryStatus::InTransit, Some("bob")),
            &TransitionRequest::hub_drop_off_proposing("TC0001QQQQ"),
            &Actor::courier("bob"),
        )
        .unwrap();
        assert_eq!(first_visit.transfer_code.as_deref(), Some("TC0001QQQQ"));
    }

    #[test]
    fn test_hub_pickup_without_code_on_record_is_unauthorized() {
        let d = delivery(DeliveryStatus::AtHub, None);
        let err = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::to(DeliveryStatus::InTransit),
            &Actor::courier("alice"),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::Unauthorized { .. }));
    }

    #[test]
    fn test_occurred_at_is_used_for_timestamps() {
        let scanned_at = Utc::now() - chrono::Duration::minutes(30);
        let d = delivery(DeliveryStatus::PickedUp, Some("alice"));
        let next = PackageStateMachine::attempt_transition(
            &d,
            &TransitionRequest::to(DeliveryStatus::Delivered).at(scanned_at),
            &Actor::courier("alice"),
        )
        .unwrap();
        assert_eq!(next.delivered_at, Some(scanned_at));
    }

    #[test]
    fn test_next_statuses() {
        use DeliveryStatus::*;
        assert_eq!(
            PackageStateMachine::next_statuses(InTransit),
            vec![AtHub, Delivered, Cancelled]
        );
        assert!(PackageStateMachine::next_statuses(Cancelled).is_empty());
    }
}
