use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lastmile_config::AppConfig;
use lastmile_courier::{
    OfflineMutationQueue, ScanHandler, ScanIntent, SessionEvent, SessionManager,
    TracingAlertSink,
};
use lastmile_dispatcher::DispatchService;
use lastmile_domain::{DeliveryBackend, LocalStore, MutationLog, SessionDirectory};
use lastmile_infrastructure::{RestBackend, SqliteDeviceStore};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 持续运行自动调度
    Dispatcher,
    /// 执行一次调度并输出结果
    DispatchOnce,
    /// 快递员设备：会话、提醒与离线同步
    Courier { courier_id: String },
    /// 处理一次扫码
    Scan { code: String, intent: ScanIntent },
    /// 查看离线队列，可选清理死信
    Queue { purge_dead_letters: bool },
}

impl AppMode {
    /// 常驻模式需要等待关闭信号
    pub fn is_long_running(&self) -> bool {
        matches!(self, AppMode::Dispatcher | AppMode::Courier { .. })
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    backend: Arc<RestBackend>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);
        let backend = Arc::new(RestBackend::new(&config.backend).context("创建后端客户端失败")?);
        Ok(Self {
            config,
            mode,
            backend,
        })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match &self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown_rx).await,
            AppMode::DispatchOnce => self.dispatch_once().await,
            AppMode::Courier { courier_id } => self.run_courier(courier_id, shutdown_rx).await,
            AppMode::Scan { code, intent } => self.scan(code, *intent).await,
            AppMode::Queue { purge_dead_letters } => self.inspect_queue(*purge_dead_letters).await,
        }
    }

    fn dispatch_service(&self) -> DispatchService {
        DispatchService::new(
            Arc::clone(&self.backend) as Arc<dyn DeliveryBackend>,
            self.config.dispatcher.clone(),
        )
    }

    async fn run_dispatcher(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.dispatch_service().run(shutdown_rx).await;
        Ok(())
    }

    async fn dispatch_once(&self) -> Result<()> {
        let report = self
            .dispatch_service()
            .run_cycle()
            .await
            .context("执行调度失败")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }

    async fn open_device_store(&self) -> Result<Arc<SqliteDeviceStore>> {
        let url = &self.config.courier.device_store_url;
        let store = SqliteDeviceStore::connect(url)
            .await
            .with_context(|| format!("打开设备本地存储失败: {url}"))?;
        Ok(Arc::new(store))
    }

    fn offline_queue(&self, store: &Arc<SqliteDeviceStore>) -> Arc<OfflineMutationQueue> {
        Arc::new(OfflineMutationQueue::new(
            Arc::clone(store) as Arc<dyn MutationLog>,
            Arc::clone(&self.backend) as Arc<dyn DeliveryBackend>,
            Duration::from_secs(self.config.backend.request_timeout_seconds),
        ))
    }

    async fn run_courier(
        &self,
        courier_id: &str,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let store = self.open_device_store().await?;
        let queue = self.offline_queue(&store);

        let session = SessionManager::builder(
            Arc::clone(&self.backend) as Arc<dyn DeliveryBackend>,
            Arc::clone(&self.backend) as Arc<dyn SessionDirectory>,
            Arc::clone(&store) as Arc<dyn LocalStore>,
            Arc::new(TracingAlertSink),
        )
        .config(&self.config.courier)
        .reconnect_trigger(queue.flush_trigger())
        .build();
        let mut events = session.subscribe_events();

        match session.resume().await? {
            Some(resumed) if resumed == courier_id => {}
            _ => {
                session
                    .login(courier_id)
                    .await
                    .with_context(|| format!("快递员 {courier_id} 登录失败"))?;
            }
        }
        info!(
            device = %self.config.courier.device_name,
            "快递员 {} 已上线", courier_id
        );

        let flush_interval = Duration::from_secs(self.config.courier.flush_interval_seconds);
        let flush_task = {
            let queue = Arc::clone(&queue);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { queue.run(flush_interval, shutdown_rx).await })
        };

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(SessionEvent::ForcedLogout { courier_id }) => {
                        warn!("快递员 {} 已在其他设备登录，本机停止运行", courier_id);
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("会话事件积压，跳过 {} 条", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown_rx.recv() => {
                    info!("快递员设备收到关闭信号");
                    break;
                }
            }
        }

        session.shutdown().await;
        flush_task.abort();
        if let Err(e) = queue.flush().await {
            error!("退出前同步离线变更失败: {}", e);
        }
        Ok(())
    }

    async fn scan(&self, code: &str, intent: ScanIntent) -> Result<()> {
        let store = self.open_device_store().await?;
        let queue = self.offline_queue(&store);
        let handler = ScanHandler::new(Arc::clone(&store) as _, Arc::clone(&queue));

        let outcome = handler.handle(code, intent).await.context("处理扫码失败")?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);

        match queue.flush().await {
            Ok(report) if report.remaining > 0 => {
                info!("网络暂不可用，{} 条变更将在恢复后同步", report.remaining)
            }
            Ok(_) => {}
            Err(e) => warn!("同步离线变更失败: {}", e),
        }
        Ok(())
    }

    async fn inspect_queue(&self, purge_dead_letters: bool) -> Result<()> {
        let store = self.open_device_store().await?;
        let queue = self.offline_queue(&store);

        let pending = queue.pending().await?;
        let dead_letters = queue.dead_letters().await?;
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "pending": pending,
                "dead_letters": dead_letters,
            }))?
        );

        if purge_dead_letters {
            let purged = queue.purge_dead_letters().await?;
            info!("已清理 {} 条死信", purged);
        }
        Ok(())
    }
}
