use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use lastmile_domain::{LocalStore, MutationLog, QueuedMutation, SyncState};
use lastmile_errors::{LastMileError, LastMileResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS device_kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mutation_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        operation_id TEXT NOT NULL UNIQUE,
        payload TEXT NOT NULL,
        sync_state TEXT NOT NULL DEFAULT 'pending',
        failure_reason TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_mutation_log_state ON mutation_log (sync_state, seq)",
];

/// 设备本地存储：登录身份、会话令牌、界面语言以及离线变更日志
///
/// 变更日志按写入顺序 (`seq`) 回放，进程重启或设备断电后仍然保留。
#[derive(Clone)]
pub struct SqliteDeviceStore {
    pool: SqlitePool,
}

impl SqliteDeviceStore {
    /// 打开（必要时创建）设备数据库，`sqlite::memory:` 用于不需要持久化的场景
    pub async fn connect(url: &str) -> LastMileResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // 单连接，保证内存库在整个进程内可见
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        debug!("设备本地存储已就绪: {}", url);
        Ok(store)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> LastMileResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_mutation(row: &SqliteRow) -> LastMileResult<QueuedMutation> {
        let payload: String = row.try_get("payload")?;
        let mut mutation: QueuedMutation = serde_json::from_str(&payload)
            .map_err(|e| LastMileError::Serialization(format!("解析离线变更失败: {e}")))?;

        let sync_state: String = row.try_get("sync_state")?;
        mutation.sync_state = SyncState::from_str(&sync_state).map_err(LastMileError::Storage)?;
        mutation.failure_reason = row.try_get("failure_reason")?;
        Ok(mutation)
    }

    async fn mutations_in_state(&self, state: SyncState) -> LastMileResult<Vec<QueuedMutation>> {
        let rows = sqlx::query(
            "SELECT payload, sync_state, failure_reason FROM mutation_log WHERE sync_state = $1 ORDER BY seq ASC",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_mutation).collect()
    }
}

#[async_trait]
impl LocalStore for SqliteDeviceStore {
    async fn get(&self, key: &str) -> LastMileResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM device_kv WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> LastMileResult<()> {
        sqlx::query(
            r#"
            INSERT INTO device_kv (key, value, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> LastMileResult<()> {
        sqlx::query("DELETE FROM device_kv WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MutationLog for SqliteDeviceStore {
    async fn append(&self, mutation: &QueuedMutation) -> LastMileResult<()> {
        let payload = serde_json::to_string(mutation)
            .map_err(|e| LastMileError::Serialization(format!("序列化离线变更失败: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO mutation_log (operation_id, payload, sync_state, failure_reason, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(mutation.operation_id.to_string())
        .bind(payload)
        .bind(mutation.sync_state.as_str())
        .bind(mutation.failure_reason.as_deref())
        .bind(mutation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending(&self) -> LastMileResult<Vec<QueuedMutation>> {
        self.mutations_in_state(SyncState::Pending).await
    }

    async fn remove(&self, operation_id: Uuid) -> LastMileResult<()> {
        sqlx::query("DELETE FROM mutation_log WHERE operation_id = $1")
            .bind(operation_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, operation_id: Uuid, reason: &str) -> LastMileResult<()> {
        let result = sqlx::query(
            "UPDATE mutation_log SET sync_state = $2, failure_reason = $3 WHERE operation_id = $1",
        )
        .bind(operation_id.to_string())
        .bind(SyncState::Failed.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LastMileError::storage(format!(
                "离线变更不存在: {operation_id}"
            )));
        }
        Ok(())
    }

    async fn dead_letters(&self) -> LastMileResult<Vec<QueuedMutation>> {
        self.mutations_in_state(SyncState::Failed).await
    }

    async fn purge_dead_letters(&self) -> LastMileResult<u64> {
        let result = sqlx::query("DELETE FROM mutation_log WHERE sync_state = $1")
            .bind(SyncState::Failed.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
