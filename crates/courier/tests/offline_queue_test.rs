#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use lastmile_courier::OfflineMutationQueue;
    use lastmile_domain::{
        ChangeSubscription, Courier, CourierFilter, CourierStatus, Delivery, DeliveryBackend,
        DeliveryFilter, DeliveryStatus, DeliveryUpdate, MutationTarget, NewDelivery,
        QueuedMutation, SyncState, TransitionRequest,
    };
    use lastmile_errors::{LastMileError, LastMileResult};
    use lastmile_testing_utils::{DeliveryBuilder, InMemoryBackend, MockDeviceStore, TestEnv};
    use tokio::sync::broadcast;

    /// 对指定包裹的读取表现为网络故障或慢响应，其余请求转发给内存后端
    struct FlakyBackend {
        inner: InMemoryBackend,
        unreachable_id: Option<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl DeliveryBackend for FlakyBackend {
        async fn create_delivery(&self, delivery: &NewDelivery) -> LastMileResult<Delivery> {
            self.inner.create_delivery(delivery).await
        }
        async fn list_deliveries(&self, filter: &DeliveryFilter) -> LastMileResult<Vec<Delivery>> {
            self.inner.list_deliveries(filter).await
        }
        async fn get_delivery(&self, id: &str) -> LastMileResult<Option<Delivery>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.unreachable_id.as_deref() == Some(id) {
                return Err(LastMileError::Network("connection reset".to_string()));
            }
            self.inner.get_delivery(id).await
        }
        async fn update_delivery_status(
            &self,
            id: &str,
            status: DeliveryStatus,
            update: &DeliveryUpdate,
        ) -> LastMileResult<bool> {
            self.inner.update_delivery_status(id, status, update).await
        }
        async fn subscribe_to_delivery_changes(
            &self,
            courier_id: &str,
        ) -> LastMileResult<ChangeSubscription> {
            self.inner.subscribe_to_delivery_changes(courier_id).await
        }
        async fn list_couriers(&self, filter: &CourierFilter) -> LastMileResult<Vec<Courier>> {
            self.inner.list_couriers(filter).await
        }
        async fn get_courier_by_id(&self, id: &str) -> LastMileResult<Option<Courier>> {
            self.inner.get_courier_by_id(id).await
        }
        async fn update_courier_status(
            &self,
            id: &str,
            status: CourierStatus,
        ) -> LastMileResult<bool> {
            self.inner.update_courier_status(id, status).await
        }
    }

    fn queue_for(
        backend: Arc<dyn DeliveryBackend>,
        store: &MockDeviceStore,
    ) -> OfflineMutationQueue {
        OfflineMutationQueue::new(Arc::new(store.clone()), backend, Duration::from_secs(10))
    }

    fn scan(id: &str, status: DeliveryStatus, courier: &str) -> QueuedMutation {
        QueuedMutation::new(
            MutationTarget::Delivery(id.to_string()),
            TransitionRequest::to(status),
            courier,
        )
    }

    #[tokio::test]
    async fn test_offline_pickup_then_delivery_replays_in_order() {
        let backend = InMemoryBackend::new();
        backend.insert_delivery(DeliveryBuilder::new().with_id("PKG03").build());
        backend.set_offline(true);
        let store = MockDeviceStore::new();
        let queue = queue_for(Arc::new(backend.clone()), &store);

        queue
            .enqueue(scan("PKG03", DeliveryStatus::PickedUp, "alice"))
            .await
            .unwrap();
        queue
            .enqueue(scan("PKG03", DeliveryStatus::Delivered, "alice"))
            .await
            .unwrap();

        let report = queue.flush().await.unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(queue.pending().await.unwrap().len(), 2);

        backend.set_offline(false);
        let report = queue.flush().await.unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(report.stopped_on, None);
        assert!(queue.pending().await.unwrap().is_empty());

        let pkg = backend.delivery("PKG03").unwrap();
        assert_eq!(pkg.status, DeliveryStatus::Delivered);
        assert_eq!(pkg.courier_id.as_deref(), Some("alice"));
        assert!(pkg.picked_up_at.is_some());
        assert!(pkg.delivered_at.is_some());
        assert_eq!(
            backend.status_updates(),
            vec![
                ("PKG03".to_string(), DeliveryStatus::PickedUp),
                ("PKG03".to_string(), DeliveryStatus::Delivered),
            ]
        );
    }

    #[tokio::test]
    async fn test_conflict_is_dead_lettered_and_transient_stops_replay() {
        let memory = InMemoryBackend::new();
        memory.insert_delivery(
            DeliveryBuilder::new()
                .with_id("GONE")
                .with_status(DeliveryStatus::Cancelled)
                .build(),
        );
        memory.insert_delivery(DeliveryBuilder::new().with_id("OK").build());
        memory.insert_delivery(DeliveryBuilder::new().with_id("FLAKY").build());
        memory.insert_delivery(DeliveryBuilder::new().with_id("LATER").build());
        let backend = FlakyBackend {
            inner: memory.clone(),
            unreachable_id: Some("FLAKY".to_string()),
            delay: None,
        };
        let store = MockDeviceStore::new();
        let queue = queue_for(Arc::new(backend), &store);

        let gone = scan("GONE", DeliveryStatus::PickedUp, "alice");
        let ok = scan("OK", DeliveryStatus::PickedUp, "alice");
        let flaky = scan("FLAKY", DeliveryStatus::PickedUp, "alice");
        let later = scan("LATER", DeliveryStatus::PickedUp, "alice");
        for m in [&gone, &ok, &flaky, &later] {
            queue.enqueue(m.clone()).await.unwrap();
        }

        let report = queue.flush().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(report.stopped_on, Some(flaky.operation_id));
        assert_eq!(report.remaining, 2);

        let pending: Vec<_> = queue
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.operation_id)
            .collect();
        assert_eq!(pending, vec![flaky.operation_id, later.operation_id]);

        assert_eq!(memory.status_of("OK"), Some(DeliveryStatus::PickedUp));
        assert_eq!(memory.status_of("LATER"), Some(DeliveryStatus::PendingPickup));

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].operation_id, gone.operation_id);
        assert_eq!(dead[0].sync_state, SyncState::Failed);
        assert!(dead[0].failure_reason.as_deref().unwrap().contains("终态"));

        assert_eq!(queue.purge_dead_letters().await.unwrap(), 1);
        assert!(queue.dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_backend_counts_as_transient() {
        let memory = InMemoryBackend::new();
        memory.insert_delivery(DeliveryBuilder::new().with_id("SLOW").build());
        let backend = FlakyBackend {
            inner: memory.clone(),
            unreachable_id: None,
            delay: Some(Duration::from_millis(300)),
        };
        let store = MockDeviceStore::new();
        let queue =
            OfflineMutationQueue::new(Arc::new(store.clone()), Arc::new(backend), Duration::from_millis(50));

        queue
            .enqueue(scan("SLOW", DeliveryStatus::PickedUp, "alice"))
            .await
            .unwrap();
        let report = queue.flush().await.unwrap();

        assert_eq!(report.remaining, 1);
        assert!(queue.dead_letters().await.unwrap().is_empty());
        assert_eq!(memory.status_of("SLOW"), Some(DeliveryStatus::PendingPickup));
    }

    #[tokio::test]
    async fn test_backend_rejections_are_classified_by_status() {
        let backend = InMemoryBackend::new();
        backend.insert_delivery(DeliveryBuilder::new().with_id("PKG20").build());
        let store = MockDeviceStore::new();
        let queue = queue_for(Arc::new(backend.clone()), &store);
        queue
            .enqueue(scan("PKG20", DeliveryStatus::PickedUp, "alice"))
            .await
            .unwrap();

        backend.reject_updates_with(Some(503));
        let report = queue.flush().await.unwrap();
        assert_eq!(report.remaining, 1);

        backend.reject_updates_with(Some(409));
        let report = queue.flush().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_credentials_keep_the_queue() {
        let backend = InMemoryBackend::new();
        for id in ["A1", "A2", "A3"] {
            backend.insert_delivery(DeliveryBuilder::new().with_id(id).build());
        }
        let store = MockDeviceStore::new();
        let queue = queue_for(Arc::new(backend.clone()), &store);
        for id in ["A1", "A2", "A3"] {
            queue
                .enqueue(scan(id, DeliveryStatus::PickedUp, "alice"))
                .await
                .unwrap();
        }

        backend.reject_updates_with(Some(401));
        let report = queue.flush().await.unwrap();
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(report.remaining, 3);
        assert!(queue.dead_letters().await.unwrap().is_empty());

        backend.reject_updates_with(None);
        let report = queue.flush().await.unwrap();
        assert_eq!(report.applied, 3);
        for id in ["A1", "A2", "A3"] {
            assert_eq!(backend.status_of(id), Some(DeliveryStatus::PickedUp));
        }
    }

    #[tokio::test]
    async fn test_unauthorized_replay_is_not_retried() {
        let backend = InMemoryBackend::new();
        backend.insert_delivery(
            DeliveryBuilder::new()
                .with_id("PKG21")
                .with_status(DeliveryStatus::Assigned)
                .with_courier("bob")
                .build(),
        );
        let store = MockDeviceStore::new();
        let queue = queue_for(Arc::new(backend.clone()), &store);

        queue
            .enqueue(scan("PKG21", DeliveryStatus::PickedUp, "alice"))
            .await
            .unwrap();
        let report = queue.flush().await.unwrap();

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(backend.delivery("PKG21").unwrap().courier_id.as_deref(), Some("bob"));
        let second = queue.flush().await.unwrap();
        assert_eq!(second, Default::default());
    }

    #[tokio::test]
    async fn test_repeated_scan_is_idempotent() {
        let backend = InMemoryBackend::new();
        backend.insert_delivery(DeliveryBuilder::new().with_id("PKG22").build());
        let store = MockDeviceStore::new();
        let queue = queue_for(Arc::new(backend.clone()), &store);

        queue
            .enqueue(scan("PKG22", DeliveryStatus::PickedUp, "alice"))
            .await
            .unwrap();
        queue
            .enqueue(scan("PKG22", DeliveryStatus::PickedUp, "alice"))
            .await
            .unwrap();

        let report = queue.flush().await.unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(backend.status_updates().len(), 1);
    }

    #[tokio::test]
    async fn test_hub_transfer_by_code() {
        let backend = InMemoryBackend::new();
        backend.insert_delivery(
            DeliveryBuilder::new()
                .with_id("PKG23")
                .with_status(DeliveryStatus::AtHub)
                .with_transfer_code("TC0023K9PQ")
                .build(),
        );
        let store = MockDeviceStore::new();
        let queue = queue_for(Arc::new(backend.clone()), &store);

        queue
            .enqueue(QueuedMutation::new(
                MutationTarget::TransferCode("TC0023K9PQ".to_string()),
                TransitionRequest::hub_pickup("TC0023K9PQ"),
                "carol",
            ))
            .await
            .unwrap();
        queue
            .enqueue(QueuedMutation::new(
                MutationTarget::TransferCode("TCUNKNOWN1".to_string()),
                TransitionRequest::hub_pickup("TCUNKNOWN1"),
                "carol",
            ))
            .await
            .unwrap();

        let report = queue.flush().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.dead_lettered, 1);

        let pkg = backend.delivery("PKG23").unwrap();
        assert_eq!(pkg.status, DeliveryStatus::InTransit);
        assert_eq!(pkg.courier_id.as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn test_run_loop_flushes_on_request() {
        let backend = InMemoryBackend::new();
        backend.insert_delivery(DeliveryBuilder::new().with_id("PKG24").build());
        backend.set_offline(true);
        let store = MockDeviceStore::new();
        let queue = Arc::new(queue_for(Arc::new(backend.clone()), &store));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.run(Duration::from_secs(3600), shutdown_rx).await })
        };

        queue
            .enqueue(scan("PKG24", DeliveryStatus::PickedUp, "alice"))
            .await
            .unwrap();
        backend.set_offline(false);
        queue.request_flush();

        let observed = backend.clone();
        let applied = TestEnv::wait_for(
            || {
                let observed = observed.clone();
                async move { observed.status_of("PKG24") == Some(DeliveryStatus::PickedUp) }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(applied);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("flush loop should stop")
            .unwrap();
    }
}
