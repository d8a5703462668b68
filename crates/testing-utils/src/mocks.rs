//! In-memory fakes for the backend and device-local collaborators

use async_trait::async_trait;
use chrono::Utc;
use lastmile_domain::{
    AlertSink, AssignmentAlert, AssignmentEvent, ChangeSubscription, Courier, CourierFilter,
    CourierStatus, Delivery, DeliveryBackend, DeliveryFilter, DeliveryStatus, DeliveryUpdate,
    LocalStore, MutationLog, NewDelivery, QueuedMutation, SessionDirectory, SyncState,
};
use lastmile_errors::{LastMileError, LastMileResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

struct Subscriber {
    id: u64,
    courier_id: String,
    sender: mpsc::UnboundedSender<AssignmentEvent>,
}

/// In-memory backend: deliveries, couriers, session markers and a change stream
///
/// Every successful write is pushed to subscribers whose courier is the
/// previous or new holder of the delivery.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    couriers: Arc<Mutex<Vec<Courier>>>,
    sessions: Arc<Mutex<HashMap<String, String>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_subscriber_id: Arc<AtomicU64>,
    offline: Arc<AtomicBool>,
    reject_status: Arc<Mutex<Option<u16>>>,
    status_updates: Arc<Mutex<Vec<(String, DeliveryStatus)>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_couriers(couriers: Vec<Courier>) -> Self {
        let backend = Self::new();
        *backend.couriers.lock().unwrap() = couriers;
        backend
    }

    pub fn add_courier(&self, courier: Courier) {
        self.couriers.lock().unwrap().push(courier);
    }

    /// Seed a delivery without emitting a change event
    pub fn insert_delivery(&self, delivery: Delivery) {
        self.deliveries.lock().unwrap().push(delivery);
    }

    /// Simulate lost connectivity: every call fails with a network error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make status updates fail with the given HTTP status (None restores normal behavior)
    pub fn reject_updates_with(&self, status: Option<u16>) {
        *self.reject_status.lock().unwrap() = status;
    }

    pub fn delivery(&self, id: &str) -> Option<Delivery> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub fn status_of(&self, id: &str) -> Option<DeliveryStatus> {
        self.delivery(id).map(|d| d.status)
    }

    pub fn courier(&self, id: &str) -> Option<Courier> {
        self.couriers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// Status writes in the order the backend accepted them
    pub fn status_updates(&self) -> Vec<(String, DeliveryStatus)> {
        self.status_updates.lock().unwrap().clone()
    }

    /// Inject a raw change event, e.g. a duplicate or out-of-order delivery
    pub fn emit(&self, event: AssignmentEvent) {
        let subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.iter() {
            if event.involves(&subscriber.courier_id) {
                let _ = subscriber.sender.send(event.clone());
            }
        }
    }

    pub fn set_session_marker(&self, courier_id: &str, token: Option<&str>) {
        let mut sessions = self.sessions.lock().unwrap();
        match token {
            Some(token) => {
                sessions.insert(courier_id.to_string(), token.to_string());
            }
            None => {
                sessions.remove(courier_id);
            }
        }
    }

    pub fn session_marker(&self, courier_id: &str) -> Option<String> {
        self.sessions.lock().unwrap().get(courier_id).cloned()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn active_subscriptions_for(&self, courier_id: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.courier_id == courier_id)
            .count()
    }

    fn ensure_online(&self) -> LastMileResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LastMileError::Network("backend unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryBackend for InMemoryBackend {
    async fn create_delivery(&self, delivery: &NewDelivery) -> LastMileResult<Delivery> {
        self.ensure_online()?;
        if self.delivery(&delivery.id).is_some() {
            return Err(LastMileError::Backend {
                status: 409,
                message: format!("duplicate key: {}", delivery.id),
            });
        }

        let created = delivery.clone().into_delivery(Utc::now());
        self.deliveries.lock().unwrap().push(created.clone());
        self.emit(AssignmentEvent::insert(&created));
        Ok(created)
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter) -> LastMileResult<Vec<Delivery>> {
        self.ensure_online()?;
        Ok(self
            .deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn get_delivery(&self, id: &str) -> LastMileResult<Option<Delivery>> {
        self.ensure_online()?;
        Ok(self.delivery(id))
    }

    async fn update_delivery_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        update: &DeliveryUpdate,
    ) -> LastMileResult<bool> {
        self.ensure_online()?;
        if let Some(code) = *self.reject_status.lock().unwrap() {
            return Err(LastMileError::Backend {
                status: code,
                message: "update rejected".to_string(),
            });
        }

        let event = {
            let mut deliveries = self.deliveries.lock().unwrap();
            let Some(delivery) = deliveries.iter_mut().find(|d| d.id == id) else {
                return Ok(false);
            };
            let previous = delivery.clone();
            update.apply_to(delivery, status);
            AssignmentEvent::update(&previous, delivery)
        };

        self.status_updates
            .lock()
            .unwrap()
            .push((id.to_string(), status));
        self.emit(event);
        Ok(true)
    }

    async fn subscribe_to_delivery_changes(
        &self,
        courier_id: &str,
    ) -> LastMileResult<ChangeSubscription> {
        self.ensure_online()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().push(Subscriber {
            id,
            courier_id: courier_id.to_string(),
            sender,
        });

        let subscribers = Arc::clone(&self.subscribers);
        Ok(ChangeSubscription::new(receiver, move || {
            subscribers.lock().unwrap().retain(|s| s.id != id);
        }))
    }

    async fn list_couriers(&self, filter: &CourierFilter) -> LastMileResult<Vec<Courier>> {
        self.ensure_online()?;
        Ok(self
            .couriers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn get_courier_by_id(&self, id: &str) -> LastMileResult<Option<Courier>> {
        self.ensure_online()?;
        Ok(self.courier(id))
    }

    async fn update_courier_status(&self, id: &str, status: CourierStatus) -> LastMileResult<bool> {
        self.ensure_online()?;
        let mut couriers = self.couriers.lock().unwrap();
        match couriers.iter_mut().find(|c| c.id == id) {
            Some(courier) => {
                courier.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl SessionDirectory for InMemoryBackend {
    async fn active_session_token(&self, courier_id: &str) -> LastMileResult<Option<String>> {
        self.ensure_online()?;
        Ok(self.session_marker(courier_id))
    }

    async fn claim_session(&self, courier_id: &str, token: &str) -> LastMileResult<()> {
        self.ensure_online()?;
        self.set_session_marker(courier_id, Some(token));
        Ok(())
    }
}

/// In-memory device store for tests
#[derive(Clone, Default)]
pub struct MockDeviceStore {
    values: Arc<Mutex<HashMap<String, String>>>,
    log: Arc<Mutex<Vec<QueuedMutation>>>,
}

impl MockDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn all_mutations(&self) -> Vec<QueuedMutation> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalStore for MockDeviceStore {
    async fn get(&self, key: &str) -> LastMileResult<Option<String>> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> LastMileResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> LastMileResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

#[async_trait]
impl MutationLog for MockDeviceStore {
    async fn append(&self, mutation: &QueuedMutation) -> LastMileResult<()> {
        self.log.lock().unwrap().push(mutation.clone());
        Ok(())
    }

    async fn pending(&self) -> LastMileResult<Vec<QueuedMutation>> {
        Ok(self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.sync_state == SyncState::Pending)
            .cloned()
            .collect())
    }

    async fn remove(&self, operation_id: Uuid) -> LastMileResult<()> {
        self.log
            .lock()
            .unwrap()
            .retain(|m| m.operation_id != operation_id);
        Ok(())
    }

    async fn mark_failed(&self, operation_id: Uuid, reason: &str) -> LastMileResult<()> {
        let mut log = self.log.lock().unwrap();
        if let Some(entry) = log.iter_mut().find(|m| m.operation_id == operation_id) {
            entry.sync_state = SyncState::Failed;
            entry.failure_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn dead_letters(&self) -> LastMileResult<Vec<QueuedMutation>> {
        Ok(self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.sync_state == SyncState::Failed)
            .cloned()
            .collect())
    }

    async fn purge_dead_letters(&self) -> LastMileResult<u64> {
        let mut log = self.log.lock().unwrap();
        let before = log.len();
        log.retain(|m| m.sync_state != SyncState::Failed);
        Ok((before - log.len()) as u64)
    }
}

/// Captures alerts instead of vibrating and speaking
#[derive(Clone, Default)]
pub struct RecordingAlertSink {
    alerts: Arc<Mutex<Vec<AssignmentAlert>>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<AssignmentAlert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    pub fn count_for(&self, delivery_id: &str) -> usize {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.delivery_id == delivery_id)
            .count()
    }
}

impl AlertSink for RecordingAlertSink {
    fn alert(&self, alert: &AssignmentAlert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}
