use thiserror::Error;

use crate::entities::DeliveryStatus;
use crate::state_machine::Actor;

/// 状态机拒绝一次状态变更的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("非法的状态变更: {from} -> {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
    #[error("{actor} 无权执行状态变更: {from} -> {to}")]
    Unauthorized {
        actor: Actor,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
    #[error("包裹已处于终态: {status}")]
    AlreadyTerminal { status: DeliveryStatus },
    #[error("中转码已锁定，不允许更换")]
    TransferCodeLocked,
    #[error("分配包裹时必须指定快递员")]
    MissingCourier,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssignmentError {
    #[error("没有可用的快递员: {0}")]
    NoEligibleCourier(String),
    #[error("包裹 {delivery_id} 已分配给快递员 {courier_id}")]
    AlreadyAssigned {
        delivery_id: String,
        courier_id: String,
    },
}

/// 离线变更回放失败的分类
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// 网络或后端暂时不可用，条目保留在队列中等待下次同步
    #[error("暂时性同步失败: {0}")]
    Transient(String),
    /// 后端状态与本地变更冲突，条目不会再被重试
    #[error("同步冲突: {0}")]
    Conflict(String),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}
