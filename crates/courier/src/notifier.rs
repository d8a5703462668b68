use std::collections::HashSet;
use std::sync::Arc;

use lastmile_domain::{
    AlertSink, AssignmentAlert, AssignmentEvent, ChangeKind, ChangeSubscription, Language,
};
use metrics::counter;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// 新分配提醒
///
/// 一个实例对应一次登录会话，已提醒的包裹集合只增不减，
/// 同一包裹无论收到多少条重复或乱序事件都只提醒一次。
pub struct AssignmentNotifier {
    courier_id: String,
    language: Language,
    announced: HashSet<String>,
    sink: Arc<dyn AlertSink>,
}

impl AssignmentNotifier {
    pub fn new(courier_id: impl Into<String>, language: Language, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            courier_id: courier_id.into(),
            language,
            announced: HashSet::new(),
            sink,
        }
    }

    pub fn courier_id(&self) -> &str {
        &self.courier_id
    }

    pub fn has_announced(&self, delivery_id: &str) -> bool {
        self.announced.contains(delivery_id)
    }

    pub fn announced_count(&self) -> usize {
        self.announced.len()
    }

    /// 新建时指派给自己，或由别人转给自己，且包裹仍需要处理
    pub fn is_relevant(&self, event: &AssignmentEvent) -> bool {
        let mine = Some(self.courier_id.as_str());
        if event.new_courier.as_deref() != mine {
            return false;
        }

        let newly_mine = match event.kind {
            ChangeKind::Insert => true,
            ChangeKind::Update => event.previous_courier.as_deref() != mine,
        };
        newly_mine && event.status.is_actionable()
    }

    /// 返回是否触发了提醒
    pub fn handle_event(&mut self, event: &AssignmentEvent) -> bool {
        if !self.is_relevant(event) {
            return false;
        }
        if !self.announced.insert(event.delivery_id.clone()) {
            debug!("包裹 {} 已提醒过，忽略重复事件", event.delivery_id);
            return false;
        }

        self.sink
            .alert(&AssignmentAlert::new_order(&event.delivery_id, self.language));
        counter!("lastmile_assignment_alerts_total").increment(1);
        info!(
            courier_id = %self.courier_id,
            delivery_id = %event.delivery_id,
            "收到新分配的包裹"
        );
        true
    }

    /// 消费变更流直到停止信号或流结束，退出时取消订阅
    pub async fn run(
        mut self,
        mut subscription: ChangeSubscription,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        loop {
            tokio::select! {
                event = subscription.next() => match event {
                    Some(event) => {
                        self.handle_event(&event);
                    }
                    None => {
                        warn!("快递员 {} 的变更流已关闭", self.courier_id);
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    debug!("提醒任务收到停止信号");
                    break;
                }
            }
        }

        subscription.unsubscribe();
        self
    }
}

#[cfg(test)]
mod notifier_tests {
    use super::*;
    use chrono::Utc;
    use lastmile_domain::DeliveryStatus;
    use lastmile_testing_utils::RecordingAlertSink;

    fn event(kind: ChangeKind, previous: Option<&str>, new: Option<&str>) -> AssignmentEvent {
        AssignmentEvent {
            delivery_id: "PKG02".to_string(),
            kind,
            previous_courier: previous.map(str::to_string),
            new_courier: new.map(str::to_string),
            status: DeliveryStatus::Assigned,
            timestamp: Utc::now(),
        }
    }

    fn notifier(sink: &RecordingAlertSink) -> AssignmentNotifier {
        AssignmentNotifier::new("alice", Language::Zh, Arc::new(sink.clone()))
    }

    #[test]
    fn test_relevance_rules() {
        let sink = RecordingAlertSink::new();
        let n = notifier(&sink);

        assert!(n.is_relevant(&event(ChangeKind::Insert, None, Some("alice"))));
        assert!(n.is_relevant(&event(ChangeKind::Update, None, Some("alice"))));
        assert!(n.is_relevant(&event(ChangeKind::Update, Some("bob"), Some("alice"))));

        assert!(!n.is_relevant(&event(ChangeKind::Update, Some("alice"), Some("alice"))));
        assert!(!n.is_relevant(&event(ChangeKind::Insert, None, Some("bob"))));
        assert!(!n.is_relevant(&event(ChangeKind::Update, Some("alice"), Some("bob"))));

        let mut delivered = event(ChangeKind::Update, None, Some("alice"));
        delivered.status = DeliveryStatus::Delivered;
        assert!(!n.is_relevant(&delivered));
    }

    #[test]
    fn test_duplicate_insert_alerts_once() {
        let sink = RecordingAlertSink::new();
        let mut n = notifier(&sink);
        let insert = event(ChangeKind::Insert, None, Some("alice"));

        assert!(n.handle_event(&insert));
        assert!(!n.handle_event(&insert));
        assert_eq!(sink.count_for("PKG02"), 1);
        assert_eq!(sink.alerts()[0].spoken_text, "您有新的订单");
    }

    #[test]
    fn test_insert_after_update_does_not_refire() {
        let sink = RecordingAlertSink::new();
        let mut n = notifier(&sink);

        assert!(n.handle_event(&event(ChangeKind::Update, Some("bob"), Some("alice"))));
        assert!(!n.handle_event(&event(ChangeKind::Insert, None, Some("alice"))));
        assert_eq!(sink.count(), 1);
        assert!(n.has_announced("PKG02"));
    }
}
