use std::sync::Arc;
use std::time::Duration;

use lastmile_config::CourierConfig;
use lastmile_domain::{
    store_keys, AlertSink, DeliveryBackend, Language, LocalStore, SessionDirectory,
};
use metrics::counter;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::CourierResult;
use crate::notifier::AssignmentNotifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { courier_id: String },
    LoggedOut { courier_id: String },
    /// 账号在其他设备登录，本机被强制下线
    ForcedLogout { courier_id: String },
}

struct ActiveSession {
    courier_id: String,
    token: String,
    shutdown_tx: broadcast::Sender<()>,
    notifier_task: JoinHandle<AssignmentNotifier>,
    check_task: JoinHandle<()>,
}

struct SessionInner {
    backend: Arc<dyn DeliveryBackend>,
    directory: Arc<dyn SessionDirectory>,
    store: Arc<dyn LocalStore>,
    sink: Arc<dyn AlertSink>,
    default_language: Language,
    check_interval: Duration,
    /// 网络恢复时通知离线队列同步
    reconnect: Arc<Notify>,
    active: Mutex<Option<ActiveSession>>,
    /// 串行化登录与退出
    lifecycle: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

/// 会话管理器构建器
pub struct SessionManagerBuilder {
    backend: Arc<dyn DeliveryBackend>,
    directory: Arc<dyn SessionDirectory>,
    store: Arc<dyn LocalStore>,
    sink: Arc<dyn AlertSink>,
    default_language: Language,
    check_interval: Duration,
    reconnect: Arc<Notify>,
}

impl SessionManagerBuilder {
    pub fn new(
        backend: Arc<dyn DeliveryBackend>,
        directory: Arc<dyn SessionDirectory>,
        store: Arc<dyn LocalStore>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            backend,
            directory,
            store,
            sink,
            default_language: Language::default(),
            check_interval: Duration::from_secs(15),
            reconnect: Arc::new(Notify::new()),
        }
    }

    /// 从设备端配置读取会话检查间隔与默认语言
    pub fn config(mut self, config: &CourierConfig) -> Self {
        self.check_interval = Duration::from_secs(config.session_check_interval_seconds);
        self.default_language = config.language.parse().unwrap_or_default();
        self
    }

    /// 设置会话检查间隔
    pub fn check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// 设置网络恢复时触发的同步通知
    pub fn reconnect_trigger(mut self, reconnect: Arc<Notify>) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn build(self) -> SessionManager {
        let (events, _) = broadcast::channel(16);
        SessionManager {
            inner: Arc::new(SessionInner {
                backend: self.backend,
                directory: self.directory,
                store: self.store,
                sink: self.sink,
                default_language: self.default_language,
                check_interval: self.check_interval,
                reconnect: self.reconnect,
                active: Mutex::new(None),
                lifecycle: Mutex::new(()),
                events,
            }),
        }
    }
}

/// 登录会话：身份切换时重建变更流订阅和提醒实例，
/// 并定期检查账号的活跃会话标记，发现被其他设备顶替时强制下线。
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn builder(
        backend: Arc<dyn DeliveryBackend>,
        directory: Arc<dyn SessionDirectory>,
        store: Arc<dyn LocalStore>,
        sink: Arc<dyn AlertSink>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder::new(backend, directory, store, sink)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub async fn current_courier(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|s| s.courier_id.clone())
    }

    pub async fn is_logged_in(&self) -> bool {
        self.inner.active.lock().await.is_some()
    }

    /// 登录并占用账号的活跃会话标记，返回新的会话令牌
    pub async fn login(&self, courier_id: &str) -> CourierResult<String> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.end_active_session().await?;

        let token = Uuid::new_v4().to_string();
        self.inner.directory.claim_session(courier_id, &token).await?;
        self.inner.start_session(courier_id, &token).await?;

        info!("快递员 {} 已登录", courier_id);
        Ok(token)
    }

    /// 使用设备上保存的身份和令牌恢复会话，没有保存的会话时返回 `None`
    ///
    /// 令牌不再是账号的活跃会话时，第一次会话检查就会强制下线。
    pub async fn resume(&self) -> CourierResult<Option<String>> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.active.lock().await.is_some() {
            return Ok(self.current_courier().await);
        }

        let store = &self.inner.store;
        let (Some(courier_id), Some(token)) = (
            store.get(store_keys::CURRENT_COURIER_ID).await?,
            store.get(store_keys::SESSION_TOKEN).await?,
        ) else {
            return Ok(None);
        };

        self.inner.start_session(&courier_id, &token).await?;
        info!("已恢复快递员 {} 的会话", courier_id);
        Ok(Some(courier_id))
    }

    /// 退出登录，离线变更日志保留在设备上
    pub async fn logout(&self) -> CourierResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.end_active_session().await
    }

    /// 应用退出时停止变更流订阅和会话检查，保留本地身份以便下次 `resume`
    pub async fn shutdown(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let session = self.inner.active.lock().await.take();
        if let Some(session) = session {
            let courier_id = session.courier_id.clone();
            session.stop().await;
            info!("快递员 {} 的会话已停止，本地身份保留", courier_id);
        }
    }
}

impl ActiveSession {
    /// 通知后台任务退出并等待结束，提醒任务结束时释放变更流订阅
    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.notifier_task.await {
            error!("提醒任务异常退出: {}", e);
        }
        if let Err(e) = self.check_task.await {
            error!("会话检查任务异常退出: {}", e);
        }
    }
}

impl SessionInner {
    async fn start_session(self: &Arc<Self>, courier_id: &str, token: &str) -> CourierResult<()> {
        // 持有 active 锁写入本地身份，与强制下线的清理互斥
        let mut active = self.active.lock().await;
        let subscription = self.backend.subscribe_to_delivery_changes(courier_id).await?;

        self.store
            .set(store_keys::CURRENT_COURIER_ID, courier_id)
            .await?;
        self.store.set(store_keys::SESSION_TOKEN, token).await?;

        let language = match self.store.get(store_keys::LANGUAGE).await? {
            Some(stored) => stored.parse().unwrap_or(self.default_language),
            None => self.default_language,
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        let notifier = AssignmentNotifier::new(courier_id, language, Arc::clone(&self.sink));
        let notifier_task = tokio::spawn(notifier.run(subscription, shutdown_tx.subscribe()));
        let check_task = tokio::spawn(Arc::clone(self).session_check_loop(
            courier_id.to_string(),
            token.to_string(),
            shutdown_tx.subscribe(),
        ));

        *active = Some(ActiveSession {
            courier_id: courier_id.to_string(),
            token: token.to_string(),
            shutdown_tx,
            notifier_task,
            check_task,
        });
        drop(active);

        let _ = self.events.send(SessionEvent::LoggedIn {
            courier_id: courier_id.to_string(),
        });
        Ok(())
    }

    async fn end_active_session(&self) -> CourierResult<()> {
        let session = self.active.lock().await.take();
        let Some(session) = session else {
            return Ok(());
        };

        let courier_id = session.courier_id.clone();
        session.stop().await;

        self.clear_local_session().await?;
        info!("快递员 {} 已退出登录", courier_id);
        let _ = self.events.send(SessionEvent::LoggedOut { courier_id });
        Ok(())
    }

    /// 只在令牌仍是当前会话时生效，避免旧检查任务误伤新会话
    ///
    /// 由会话检查任务自身调用，因此只等待提醒任务结束。清理期间持有 active 锁，
    /// 新会话要等清理完成后才能写入本地身份。
    async fn force_logout(&self, token: &str) {
        let mut active = self.active.lock().await;
        if !active.as_ref().is_some_and(|current| current.token == token) {
            return;
        }
        let Some(session) = active.take() else {
            return;
        };

        let _ = session.shutdown_tx.send(());
        if let Err(e) = session.notifier_task.await {
            error!("提醒任务异常退出: {}", e);
        }
        if let Err(e) = self.clear_local_session_for(token).await {
            error!("清除本地会话失败: {}", e);
        }
        drop(active);

        counter!("lastmile_forced_logouts_total").increment(1);
        warn!("快递员 {} 的账号已在其他设备登录，本机强制下线", session.courier_id);
        let _ = self.events.send(SessionEvent::ForcedLogout {
            courier_id: session.courier_id,
        });
    }

    async fn clear_local_session(&self) -> CourierResult<()> {
        self.store.remove(store_keys::CURRENT_COURIER_ID).await?;
        self.store.remove(store_keys::SESSION_TOKEN).await?;
        Ok(())
    }

    /// 本地保存的令牌已属于新会话时不清理
    async fn clear_local_session_for(&self, token: &str) -> CourierResult<()> {
        match self.store.get(store_keys::SESSION_TOKEN).await? {
            Some(stored) if stored == token => self.clear_local_session().await,
            Some(_) => {
                debug!("本地已保存新的会话令牌，跳过清理");
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn session_check_loop(
        self: Arc<Self>,
        courier_id: String,
        token: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = interval(self.check_interval);
        ticker.tick().await;
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.directory.active_session_token(&courier_id).await {
                        Ok(Some(marker)) if marker == token => {
                            if consecutive_failures > 0 {
                                info!("会话检查恢复正常，触发离线变更同步");
                                self.reconnect.notify_one();
                            }
                            consecutive_failures = 0;
                        }
                        Ok(_) => {
                            self.force_logout(&token).await;
                            break;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            warn!(
                                failures = consecutive_failures,
                                "会话检查失败，保持当前会话: {}",
                                e
                            );
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("会话检查任务收到停止信号");
                    break;
                }
            }
        }
    }
}
