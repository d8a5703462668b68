use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lastmile_config::BackendConfig;
use lastmile_domain::{
    ChangeSubscription, Courier, CourierFilter, CourierStatus, Delivery, DeliveryBackend,
    DeliveryFilter, DeliveryStatus, DeliveryUpdate, NewDelivery, SessionDirectory,
};
use lastmile_errors::{LastMileError, LastMileResult};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use url::Url;

use super::change_feed::ChangeFeedState;
use super::rows::{
    CourierRow, CourierStatusPatch, NewPackageRow, PackagePatch, PackageRow, SessionRow,
};

const PACKAGES: &str = "packages";
const COURIERS: &str = "couriers";
const COURIER_SESSIONS: &str = "courier_sessions";
/// 兼容旧数据中空字符串和“待分配”两种未分配写法
const UNASSIGNED_FILTER: &str = "(courier.is.null,courier.eq.,courier.eq.待分配)";

/// reqwest 错误映射：超时与连接失败属于暂时性失败
pub(crate) fn map_request_error(error: reqwest::Error) -> LastMileError {
    if error.is_timeout() {
        LastMileError::Timeout(error.to_string())
    } else if error.is_decode() {
        LastMileError::Serialization(error.to_string())
    } else if let Some(status) = error.status() {
        LastMileError::Backend {
            status: status.as_u16(),
            message: error.to_string(),
        }
    } else {
        LastMileError::Network(error.to_string())
    }
}

/// PostgREST 风格的后端客户端，同时提供轮询式的包裹变更流
#[derive(Clone)]
pub struct RestBackend {
    base_url: String,
    http_client: reqwest::Client,
    poll_interval: Duration,
}

impl RestBackend {
    pub fn new(config: &BackendConfig) -> LastMileResult<Self> {
        let parsed = Url::parse(&config.url)
            .map_err(|e| LastMileError::config_error(format!("后端地址无效 {}: {e}", config.url)))?;

        let mut headers = HeaderMap::new();
        if !config.api_key.is_empty() {
            let key = HeaderValue::from_str(&config.api_key)
                .map_err(|e| LastMileError::config_error(format!("后端密钥格式错误: {e}")))?;
            let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|e| LastMileError::config_error(format!("后端密钥格式错误: {e}")))?;
            headers.insert("apikey", key);
            headers.insert(AUTHORIZATION, bearer);
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| LastMileError::config_error(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            http_client,
            poll_interval: Duration::from_millis(config.change_poll_interval_ms),
        })
    }

    fn table(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    async fn send(request: RequestBuilder) -> LastMileResult<Response> {
        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        warn!("后端请求失败: HTTP {} - {}", status, message);
        Err(LastMileError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> LastMileResult<Vec<T>> {
        Self::send(request)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(map_request_error)
    }

    fn delivery_query(filter: &DeliveryFilter) -> Vec<(&'static str, String)> {
        let mut query = vec![("select", "*".to_string())];
        if let Some(id) = &filter.id {
            query.push(("id", format!("eq.{id}")));
        }
        if let Some(status) = filter.status {
            query.push(("status", format!("eq.{}", status.label())));
        }
        if let Some(courier_id) = &filter.courier_id {
            query.push(("courier", format!("eq.{courier_id}")));
        }
        if let Some(code) = &filter.transfer_code {
            query.push(("transfer_code", format!("eq.{code}")));
        }
        if filter.unassigned_only {
            query.push(("or", UNASSIGNED_FILTER.to_string()));
        }
        query.push(("order", "created_at.asc".to_string()));
        query
    }

    async fn query_deliveries(
        client: &reqwest::Client,
        url: &str,
        filter: &DeliveryFilter,
    ) -> LastMileResult<Vec<Delivery>> {
        let rows: Vec<PackageRow> =
            Self::fetch(client.get(url).query(&Self::delivery_query(filter))).await?;
        rows.into_iter().map(Delivery::try_from).collect()
    }
}

#[async_trait]
impl DeliveryBackend for RestBackend {
    async fn create_delivery(&self, delivery: &NewDelivery) -> LastMileResult<Delivery> {
        let row = NewPackageRow::new(delivery, Utc::now());
        let created: Vec<PackageRow> = Self::fetch(
            self.http_client
                .post(self.table(PACKAGES))
                .header("Prefer", "return=representation")
                .json(&row),
        )
        .await?;

        let created = created
            .into_iter()
            .next()
            .ok_or_else(|| LastMileError::Internal(format!("后端未返回新建的包裹 {}", delivery.id)))?;
        info!("已创建包裹: {}", delivery.id);
        Delivery::try_from(created)
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter) -> LastMileResult<Vec<Delivery>> {
        Self::query_deliveries(&self.http_client, &self.table(PACKAGES), filter).await
    }

    async fn get_delivery(&self, id: &str) -> LastMileResult<Option<Delivery>> {
        Ok(self
            .list_deliveries(&DeliveryFilter::by_id(id))
            .await?
            .into_iter()
            .next())
    }

    async fn update_delivery_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        update: &DeliveryUpdate,
    ) -> LastMileResult<bool> {
        let updated: Vec<PackageRow> = Self::fetch(
            self.http_client
                .patch(self.table(PACKAGES))
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", "return=representation")
                .json(&PackagePatch::new(status, update)),
        )
        .await?;

        debug!("包裹 {} 状态写入 {}: {} 行", id, status, updated.len());
        Ok(!updated.is_empty())
    }

    async fn subscribe_to_delivery_changes(
        &self,
        courier_id: &str,
    ) -> LastMileResult<ChangeSubscription> {
        let client = self.http_client.clone();
        let url = self.table(PACKAGES);
        let filter = DeliveryFilter::by_courier(courier_id);
        let subscribed_at = Utc::now();

        let baseline = Self::query_deliveries(&client, &url, &filter).await?;
        let mut feed = ChangeFeedState::new(courier_id, subscribed_at, &baseline);
        let poll_interval = self.poll_interval;
        let (sender, receiver) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }
                let current = match Self::query_deliveries(&client, &url, &filter).await {
                    Ok(current) => current,
                    Err(e) => {
                        debug!("快递员 {} 的变更轮询失败: {}", feed.courier_id(), e);
                        continue;
                    }
                };
                for event in feed.diff(&current) {
                    if sender.send(event).is_err() {
                        return;
                    }
                }
            }
        });

        debug!("已订阅快递员 {} 的包裹变更", courier_id);
        Ok(ChangeSubscription::new(receiver, move || task.abort()))
    }

    async fn list_couriers(&self, filter: &CourierFilter) -> LastMileResult<Vec<Courier>> {
        let mut query = vec![("select", "*".to_string())];
        if let Some(status) = filter.status {
            query.push(("status", format!("eq.{}", status.as_str())));
        }
        let rows: Vec<CourierRow> =
            Self::fetch(self.http_client.get(self.table(COURIERS)).query(&query)).await?;
        Ok(rows.into_iter().map(Courier::from).collect())
    }

    async fn get_courier_by_id(&self, id: &str) -> LastMileResult<Option<Courier>> {
        let rows: Vec<CourierRow> = Self::fetch(
            self.http_client
                .get(self.table(COURIERS))
                .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]),
        )
        .await?;
        Ok(rows.into_iter().next().map(Courier::from))
    }

    async fn update_courier_status(&self, id: &str, status: CourierStatus) -> LastMileResult<bool> {
        let updated: Vec<CourierRow> = Self::fetch(
            self.http_client
                .patch(self.table(COURIERS))
                .query(&[("id", format!("eq.{id}"))])
                .header("Prefer", "return=representation")
                .json(&CourierStatusPatch {
                    status: status.as_str(),
                    last_active: Utc::now(),
                }),
        )
        .await?;
        Ok(!updated.is_empty())
    }
}

#[async_trait]
impl SessionDirectory for RestBackend {
    async fn active_session_token(&self, courier_id: &str) -> LastMileResult<Option<String>> {
        let rows: Vec<SessionRow> = Self::fetch(
            self.http_client
                .get(self.table(COURIER_SESSIONS))
                .query(&[
                    ("select", "*".to_string()),
                    ("courier_id", format!("eq.{courier_id}")),
                ]),
        )
        .await?;
        Ok(rows.into_iter().next().map(|row| row.session_token))
    }

    async fn claim_session(&self, courier_id: &str, token: &str) -> LastMileResult<()> {
        Self::send(
            self.http_client
                .post(self.table(COURIER_SESSIONS))
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&SessionRow {
                    courier_id: courier_id.to_string(),
                    session_token: token.to_string(),
                    updated_at: Utc::now(),
                }),
        )
        .await?;
        info!("快递员 {} 的活跃会话已更新", courier_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> BackendConfig {
        BackendConfig {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_table_urls_drop_trailing_slash() {
        let backend = RestBackend::new(&config("http://localhost:54321/rest/v1/")).unwrap();
        assert_eq!(backend.table(PACKAGES), "http://localhost:54321/rest/v1/packages");
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        assert!(matches!(
            RestBackend::new(&config("not a url")),
            Err(LastMileError::Configuration(_))
        ));
    }

    #[test]
    fn test_assignable_filter_query() {
        let query = RestBackend::delivery_query(&DeliveryFilter::assignable());
        assert!(query.contains(&("status", "eq.待取件".to_string())));
        assert!(query.contains(&("or", UNASSIGNED_FILTER.to_string())));
        assert_eq!(query.last(), Some(&("order", "created_at.asc".to_string())));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_retryable() {
        let backend = RestBackend::new(&BackendConfig {
            url: "http://127.0.0.1:9/rest/v1".to_string(),
            request_timeout_seconds: 2,
            ..Default::default()
        })
        .unwrap();

        let err = backend.get_delivery("PKG01").await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");
    }
}
