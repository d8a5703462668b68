use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lastmile_domain::{
    Actor, Delivery, DeliveryBackend, DeliveryFilter, DeliveryUpdate, MutationLog,
    MutationTarget, PackageStateMachine, QueuedMutation, SyncError,
};
use lastmile_errors::{LastMileError, LastMileResult};
use metrics::counter;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 一次同步的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlushReport {
    pub applied: usize,
    pub dead_lettered: usize,
    /// 因暂时性失败而中止同步的条目
    pub stopped_on: Option<Uuid>,
    /// 中止时仍留在队列中的条目数
    pub remaining: usize,
}

/// 离线变更队列
///
/// `enqueue` 只写本地日志，不等待网络；`flush` 严格按入队顺序回放，
/// 每条回放都经过状态机校验。暂时性失败中止本次同步并保留条目，
/// 冲突条目转为死信并记录错误日志，不再重试。
pub struct OfflineMutationQueue {
    log: Arc<dyn MutationLog>,
    backend: Arc<dyn DeliveryBackend>,
    request_timeout: Duration,
    flush_lock: Mutex<()>,
    flush_requested: Arc<Notify>,
}

impl OfflineMutationQueue {
    pub fn new(
        log: Arc<dyn MutationLog>,
        backend: Arc<dyn DeliveryBackend>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            log,
            backend,
            request_timeout,
            flush_lock: Mutex::new(()),
            flush_requested: Arc::new(Notify::new()),
        }
    }

    pub async fn enqueue(&self, mutation: QueuedMutation) -> LastMileResult<Uuid> {
        self.log.append(&mutation).await?;
        counter!("lastmile_offline_mutations_enqueued_total").increment(1);
        debug!(
            operation_id = %mutation.operation_id,
            target = %mutation.target,
            status = %mutation.request.status,
            "变更已写入离线队列"
        );
        Ok(mutation.operation_id)
    }

    /// 请求后台循环尽快同步（例如网络恢复时）
    pub fn request_flush(&self) {
        self.flush_requested.notify_one();
    }

    pub fn flush_trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.flush_requested)
    }

    pub async fn pending(&self) -> LastMileResult<Vec<QueuedMutation>> {
        self.log.pending().await
    }

    pub async fn dead_letters(&self) -> LastMileResult<Vec<QueuedMutation>> {
        self.log.dead_letters().await
    }

    pub async fn purge_dead_letters(&self) -> LastMileResult<u64> {
        let purged = self.log.purge_dead_letters().await?;
        if purged > 0 {
            info!("已清理 {} 条死信变更", purged);
        }
        Ok(purged)
    }

    pub async fn flush(&self) -> LastMileResult<FlushReport> {
        let _guard = self.flush_lock.lock().await;
        let pending = self.log.pending().await?;
        let mut report = FlushReport::default();

        if pending.is_empty() {
            return Ok(report);
        }
        debug!("开始同步 {} 条离线变更", pending.len());

        for (index, mutation) in pending.iter().enumerate() {
            match self.replay(mutation).await {
                Ok(()) => {
                    self.log.remove(mutation.operation_id).await?;
                    report.applied += 1;
                    counter!("lastmile_offline_mutations_applied_total").increment(1);
                }
                Err(SyncError::Transient(reason)) => {
                    warn!(
                        operation_id = %mutation.operation_id,
                        target = %mutation.target,
                        "同步暂时失败，等待下次重试: {}",
                        reason
                    );
                    report.stopped_on = Some(mutation.operation_id);
                    report.remaining = pending.len() - index;
                    break;
                }
                Err(SyncError::Conflict(reason)) => {
                    error!(
                        operation_id = %mutation.operation_id,
                        target = %mutation.target,
                        status = %mutation.request.status,
                        courier_id = %mutation.courier_id,
                        "离线变更与后端状态冲突，已转为死信: {}",
                        reason
                    );
                    self.log.mark_failed(mutation.operation_id, &reason).await?;
                    report.dead_lettered += 1;
                    counter!("lastmile_offline_mutations_dead_lettered_total").increment(1);
                }
            }
        }

        if report.applied > 0 || report.dead_lettered > 0 {
            info!(
                applied = report.applied,
                dead_lettered = report.dead_lettered,
                remaining = report.remaining,
                "离线变更同步完成"
            );
        }
        Ok(report)
    }

    async fn replay(&self, mutation: &QueuedMutation) -> Result<(), SyncError> {
        let current = self
            .bounded(self.resolve(&mutation.target))
            .await?
            .ok_or_else(|| SyncError::Conflict(format!("{} 在后端不存在", mutation.target)))?;

        let actor = Actor::courier(&mutation.courier_id);
        let next = PackageStateMachine::attempt_transition(&current, &mutation.request, &actor)
            .map_err(|e| SyncError::Conflict(e.to_string()))?;

        if next.status == current.status {
            debug!("包裹 {} 已处于 {}，跳过", current.id, current.status);
            return Ok(());
        }

        let applied = self
            .bounded(self.backend.update_delivery_status(
                &next.id,
                next.status,
                &DeliveryUpdate::from(&next),
            ))
            .await?;
        if !applied {
            return Err(SyncError::Transient(format!("后端未确认包裹 {} 的写入", next.id)));
        }
        Ok(())
    }

    async fn resolve(&self, target: &MutationTarget) -> LastMileResult<Option<Delivery>> {
        match target {
            MutationTarget::Delivery(id) => self.backend.get_delivery(id).await,
            MutationTarget::TransferCode(code) => Ok(self
                .backend
                .list_deliveries(&DeliveryFilter::by_transfer_code(code))
                .await?
                .into_iter()
                .next()),
        }
    }

    /// 后端请求超时视为暂时性失败
    async fn bounded<T>(
        &self,
        request: impl Future<Output = LastMileResult<T>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(SyncError::Transient(format!(
                "请求超时 ({} 秒)",
                self.request_timeout.as_secs_f64()
            ))),
        }
    }

    /// 启动时同步一次，此后在收到同步请求或定时器到期时同步
    pub async fn run(&self, flush_interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
        if let Err(e) = self.flush().await {
            error!("启动时同步离线变更失败: {}", e);
        }

        let mut ticker = interval(flush_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.flush_requested.notified() => {}
                _ = shutdown_rx.recv() => {
                    info!("离线同步循环收到停止信号");
                    break;
                }
            }
            if let Err(e) = self.flush().await {
                error!("同步离线变更失败: {}", e);
            }
        }
    }
}

/// 只有后端明确拒绝这条变更（目标不存在、状态冲突、数据不合法）才算冲突。
/// 鉴权失败、响应无法解析等问题与变更本身无关，条目保留到下次同步。
fn classify(error: LastMileError) -> SyncError {
    match &error {
        LastMileError::DeliveryNotFound { .. }
        | LastMileError::CourierNotFound { .. }
        | LastMileError::Validation(_)
        | LastMileError::Backend {
            status: 404 | 409 | 422,
            ..
        } => SyncError::Conflict(error.to_string()),
        _ => SyncError::Transient(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(status: u16) -> LastMileError {
        LastMileError::Backend {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_only_rejections_of_the_change_are_conflicts() {
        for status in [404, 409, 422] {
            assert!(!classify(backend(status)).is_transient(), "HTTP {status}");
        }
        for status in [401, 403, 429, 500, 503] {
            assert!(classify(backend(status)).is_transient(), "HTTP {status}");
        }
        assert!(classify(LastMileError::Serialization("<html>".to_string())).is_transient());
        assert!(classify(LastMileError::Network("reset".to_string())).is_transient());
        assert!(!classify(LastMileError::DeliveryNotFound {
            id: "PKG01".to_string()
        })
        .is_transient());
    }
}
