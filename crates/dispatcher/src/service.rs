use std::sync::Arc;
use std::time::Duration;

use lastmile_config::DispatcherConfig;
use lastmile_domain::{
    Actor, AssignmentError, CourierFilter, CourierStatus, Delivery, DeliveryBackend,
    DeliveryFilter, DeliveryStatus, DeliveryUpdate, NewDelivery, PackageStateMachine,
    TransitionRequest,
};
use lastmile_errors::LastMileError;
use metrics::counter;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::scorer::{Assignment, DispatchScorer};

/// 一次调度周期的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchCycleReport {
    /// (包裹, 快递员)
    pub assigned: Vec<(String, String)>,
    pub unassignable: Vec<String>,
    /// (包裹, 失败原因)
    pub failed: Vec<(String, String)>,
}

impl DispatchCycleReport {
    pub fn courier_for(&self, delivery_id: &str) -> Option<&str> {
        self.assigned
            .iter()
            .find(|(id, _)| id == delivery_id)
            .map(|(_, courier)| courier.as_str())
    }
}

/// 调度服务：自动/手动分配、取消、下单
pub struct DispatchService {
    backend: Arc<dyn DeliveryBackend>,
    scorer: DispatchScorer,
    config: DispatcherConfig,
}

impl DispatchService {
    pub fn new(backend: Arc<dyn DeliveryBackend>, config: DispatcherConfig) -> Self {
        Self {
            backend,
            scorer: DispatchScorer::new(config.scoring.clone()),
            config,
        }
    }

    pub fn scorer(&self) -> &DispatchScorer {
        &self.scorer
    }

    /// 扫描所有待分配包裹，按区域评分后逐个提交
    ///
    /// 单个包裹提交失败只记录日志，不影响其余包裹。
    pub async fn run_cycle(&self) -> DispatchResult<DispatchCycleReport> {
        let deliveries = self
            .backend
            .list_deliveries(&DeliveryFilter::assignable())
            .await?;
        counter!("lastmile_dispatch_cycles_total").increment(1);

        let mut report = DispatchCycleReport::default();
        if deliveries.is_empty() {
            debug!("没有待分配的包裹");
            return Ok(report);
        }

        let couriers = self.backend.list_couriers(&CourierFilter::default()).await?;
        let plan = self.scorer.plan(deliveries, &couriers);

        for (area_key, deliveries) in plan.unassignable() {
            warn!(
                area = area_key,
                count = deliveries.len(),
                "区域内没有可用的快递员，包裹保持待分配"
            );
            report
                .unassignable
                .extend(deliveries.iter().map(|d| d.id.clone()));
        }
        counter!("lastmile_dispatch_unassignable_total").increment(report.unassignable.len() as u64);

        for assignment in plan.ranked() {
            let committed = self.commit_group(assignment, &mut report).await;
            if committed > 0 {
                self.mark_busy(&assignment.courier.id).await;
            }
        }

        info!(
            assigned = report.assigned.len(),
            unassignable = report.unassignable.len(),
            failed = report.failed.len(),
            "本次调度完成"
        );
        Ok(report)
    }

    async fn commit_group(&self, assignment: &Assignment, report: &mut DispatchCycleReport) -> usize {
        let courier_id = &assignment.courier.id;
        let mut committed = 0;

        for delivery in &assignment.deliveries {
            match self.commit(delivery, courier_id, &Actor::Dispatcher).await {
                Ok(None) => {
                    debug!("包裹 {} 已分配给快递员 {}，跳过", delivery.id, courier_id);
                }
                Ok(Some(_)) => {
                    info!(
                        delivery_id = %delivery.id,
                        courier_id = %courier_id,
                        area = %assignment.area_key,
                        score = assignment.score,
                        "包裹已分配"
                    );
                    report.assigned.push((delivery.id.clone(), courier_id.clone()));
                    counter!("lastmile_dispatch_assignments_total").increment(1);
                    committed += 1;
                }
                Err(e) => {
                    error!(delivery_id = %delivery.id, "分配包裹失败: {}", e);
                    report.failed.push((delivery.id.clone(), e.to_string()));
                    counter!("lastmile_dispatch_failures_total").increment(1);
                }
            }
        }

        committed
    }

    /// 经过状态机校验后写入后端
    ///
    /// 包裹已分配给同一快递员时不写入，返回 `None`；已分配给其他快递员时拒绝。
    async fn commit(
        &self,
        delivery: &Delivery,
        courier_id: &str,
        actor: &Actor,
    ) -> DispatchResult<Option<Delivery>> {
        if delivery.status == DeliveryStatus::Assigned {
            return match delivery.courier_id.as_deref() {
                Some(current) if current == courier_id => Ok(None),
                current => Err(AssignmentError::AlreadyAssigned {
                    delivery_id: delivery.id.clone(),
                    courier_id: current.unwrap_or_default().to_string(),
                }
                .into()),
            };
        }

        let next = PackageStateMachine::attempt_transition(
            delivery,
            &TransitionRequest::assign(courier_id),
            actor,
        )?;
        self.persist(next).await.map(Some)
    }

    async fn persist(&self, next: Delivery) -> DispatchResult<Delivery> {
        let applied = self
            .backend
            .update_delivery_status(&next.id, next.status, &DeliveryUpdate::from(&next))
            .await?;
        if !applied {
            return Err(DispatchError::DeliveryNotFound(next.id));
        }
        Ok(next)
    }

    async fn mark_busy(&self, courier_id: &str) {
        if !self.config.mark_courier_busy_on_assign {
            return;
        }
        match self
            .backend
            .update_courier_status(courier_id, CourierStatus::Busy)
            .await
        {
            Ok(true) => debug!("快递员 {} 已标记为忙碌", courier_id),
            Ok(false) => warn!("标记快递员 {} 忙碌失败: 快递员不存在", courier_id),
            Err(e) => warn!("标记快递员 {} 忙碌失败: {}", courier_id, e),
        }
    }

    async fn load_delivery(&self, delivery_id: &str) -> DispatchResult<Delivery> {
        self.backend
            .get_delivery(delivery_id)
            .await?
            .ok_or_else(|| DispatchError::DeliveryNotFound(delivery_id.to_string()))
    }

    /// 手动为单个包裹挑选快递员并提交
    pub async fn dispatch_delivery(&self, delivery_id: &str) -> DispatchResult<Assignment> {
        let delivery = self.load_delivery(delivery_id).await?;
        let couriers = self.backend.list_couriers(&CourierFilter::default()).await?;

        let plan = self.scorer.plan(vec![delivery.clone()], &couriers);
        let assignment = plan
            .assignments()
            .next()
            .cloned()
            .ok_or_else(|| AssignmentError::NoEligibleCourier(delivery_id.to_string()))?;

        let committed = self
            .commit(&delivery, &assignment.courier.id, &Actor::Dispatcher)
            .await?;
        if committed.is_none() {
            debug!("包裹 {} 已分配给快递员 {}", delivery_id, assignment.courier.id);
            return Ok(assignment);
        }
        self.mark_busy(&assignment.courier.id).await;
        counter!("lastmile_dispatch_assignments_total").increment(1);

        info!(
            "包裹 {} 手动调度给快递员 {} (评分: {:.1})",
            delivery_id, assignment.courier.id, assignment.score
        );
        Ok(assignment)
    }

    /// 指定快递员分配，停用或不存在的快递员不可分配
    pub async fn assign_to(
        &self,
        delivery_id: &str,
        courier_id: &str,
        actor: &Actor,
    ) -> DispatchResult<Delivery> {
        let courier = self
            .backend
            .get_courier_by_id(courier_id)
            .await?
            .filter(|c| c.is_dispatchable())
            .ok_or_else(|| AssignmentError::NoEligibleCourier(format!("快递员 {courier_id} 不可用")))?;

        let delivery = self.load_delivery(delivery_id).await?;
        let Some(assigned) = self.commit(&delivery, &courier.id, actor).await? else {
            debug!("包裹 {} 已分配给快递员 {}", delivery_id, courier.id);
            return Ok(delivery);
        };
        self.mark_busy(&courier.id).await;

        info!("{} 将包裹 {} 分配给快递员 {}", actor, delivery_id, courier.id);
        Ok(assigned)
    }

    pub async fn cancel_delivery(&self, delivery_id: &str, actor: &Actor) -> DispatchResult<Delivery> {
        let delivery = self.load_delivery(delivery_id).await?;
        let cancelled = PackageStateMachine::attempt_transition(
            &delivery,
            &TransitionRequest::to(DeliveryStatus::Cancelled),
            actor,
        )?;
        let cancelled = self.persist(cancelled).await?;

        info!("{} 取消了包裹 {}", actor, delivery_id);
        Ok(cancelled)
    }

    /// 下单，新包裹状态为待取件
    pub async fn intake(&self, order: NewDelivery) -> DispatchResult<Delivery> {
        if order.id.trim().is_empty() {
            return Err(LastMileError::validation_error("包裹编号不能为空").into());
        }
        if !order.weight_kg.is_finite() || order.weight_kg < 0.0 {
            return Err(LastMileError::validation_error(format!(
                "包裹重量无效: {}",
                order.weight_kg
            ))
            .into());
        }

        let created = self.backend.create_delivery(&order).await?;
        info!("新包裹 {} 已创建，收件地址: {}", created.id, created.receiver_address);
        Ok(created)
    }

    /// 自动调度循环，直到收到停止信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.auto_dispatch_enabled {
            info!("自动调度未启用");
            return;
        }

        let mut dispatch_interval =
            interval(Duration::from_secs(self.config.dispatch_interval_seconds));
        info!(
            "自动调度已启动，间隔 {} 秒",
            self.config.dispatch_interval_seconds
        );

        loop {
            tokio::select! {
                _ = dispatch_interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("调度周期执行失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("调度循环收到停止信号");
                    break;
                }
            }
        }
    }
}
