use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lastmile_domain::{AssignmentEvent, ChangeKind, Delivery, DeliveryStatus};

/// 轮询快照比对：把两次查询结果之间的差异转换成分配事件
///
/// 快照只覆盖当前由该快递员持有的包裹。第一次轮询仅建立基线，不产生事件。
pub(crate) struct ChangeFeedState {
    courier_id: String,
    subscribed_at: DateTime<Utc>,
    snapshot: HashMap<String, (Option<String>, DeliveryStatus)>,
}

impl ChangeFeedState {
    pub fn new(courier_id: &str, subscribed_at: DateTime<Utc>, baseline: &[Delivery]) -> Self {
        Self {
            courier_id: courier_id.to_string(),
            subscribed_at,
            snapshot: Self::index(baseline),
        }
    }

    fn index(deliveries: &[Delivery]) -> HashMap<String, (Option<String>, DeliveryStatus)> {
        deliveries
            .iter()
            .map(|d| (d.id.clone(), (d.courier_id.clone(), d.status)))
            .collect()
    }

    pub fn diff(&mut self, current: &[Delivery]) -> Vec<AssignmentEvent> {
        let now = Utc::now();
        let mut events = Vec::new();

        for delivery in current {
            match self.snapshot.get(&delivery.id) {
                None => {
                    // 订阅之后新建的包裹视为插入，其余是从别人（或无人）手里转过来的
                    let kind = if delivery.created_at >= self.subscribed_at {
                        ChangeKind::Insert
                    } else {
                        ChangeKind::Update
                    };
                    events.push(AssignmentEvent {
                        delivery_id: delivery.id.clone(),
                        kind,
                        previous_courier: None,
                        new_courier: delivery.courier_id.clone(),
                        status: delivery.status,
                        timestamp: now,
                    });
                }
                Some((courier, status))
                    if *courier != delivery.courier_id || *status != delivery.status =>
                {
                    events.push(AssignmentEvent {
                        delivery_id: delivery.id.clone(),
                        kind: ChangeKind::Update,
                        previous_courier: courier.clone(),
                        new_courier: delivery.courier_id.clone(),
                        status: delivery.status,
                        timestamp: now,
                    });
                }
                Some(_) => {}
            }
        }

        let next = Self::index(current);
        for (id, (courier, status)) in &self.snapshot {
            if !next.contains_key(id) {
                events.push(AssignmentEvent {
                    delivery_id: id.clone(),
                    kind: ChangeKind::Update,
                    previous_courier: courier.clone(),
                    new_courier: None,
                    status: *status,
                    timestamp: now,
                });
            }
        }

        self.snapshot = next;
        events
    }

    pub fn courier_id(&self) -> &str {
        &self.courier_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lastmile_domain::NewDelivery;

    fn delivery(id: &str, courier: Option<&str>, status: DeliveryStatus, created_at: DateTime<Utc>) -> Delivery {
        let mut d = NewDelivery {
            id: id.to_string(),
            sender_name: String::new(),
            sender_phone: String::new(),
            sender_address: String::new(),
            receiver_name: String::new(),
            receiver_phone: String::new(),
            receiver_address: "Yangon".to_string(),
            weight_kg: 1.0,
        }
        .into_delivery(created_at);
        d.courier_id = courier.map(str::to_string);
        d.status = status;
        d
    }

    #[test]
    fn test_baseline_is_silent_and_new_rows_are_reported() {
        let start = Utc::now();
        let old = delivery("PKG01", Some("alice"), DeliveryStatus::Assigned, start - Duration::hours(1));
        let mut feed = ChangeFeedState::new("alice", start, &[old.clone()]);

        assert!(feed.diff(&[old.clone()]).is_empty());

        let fresh = delivery("PKG02", Some("alice"), DeliveryStatus::Assigned, start + Duration::seconds(1));
        let reassigned = delivery("PKG03", Some("alice"), DeliveryStatus::Assigned, start - Duration::hours(2));
        let events = feed.diff(&[old, fresh, reassigned]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].delivery_id, "PKG02");
        assert_eq!(events[0].kind, ChangeKind::Insert);
        assert_eq!(events[1].delivery_id, "PKG03");
        assert_eq!(events[1].kind, ChangeKind::Update);
        assert_eq!(events[1].previous_courier, None);
    }

    #[test]
    fn test_status_change_and_removal() {
        let start = Utc::now();
        let a = delivery("PKG01", Some("alice"), DeliveryStatus::Assigned, start);
        let b = delivery("PKG02", Some("alice"), DeliveryStatus::Assigned, start);
        let mut feed = ChangeFeedState::new("alice", start, &[a.clone(), b]);

        let mut picked = a;
        picked.status = DeliveryStatus::PickedUp;
        let events = feed.diff(&[picked]);

        assert_eq!(events.len(), 2);
        let moved_away = events.iter().find(|e| e.delivery_id == "PKG02").unwrap();
        assert_eq!(moved_away.previous_courier.as_deref(), Some("alice"));
        assert_eq!(moved_away.new_courier, None);
        let progressed = events.iter().find(|e| e.delivery_id == "PKG01").unwrap();
        assert_eq!(progressed.status, DeliveryStatus::PickedUp);
        assert_eq!(progressed.previous_courier.as_deref(), Some("alice"));
        assert_eq!(feed.courier_id(), "alice");
    }
}
