use thiserror::Error;

#[derive(Debug, Error)]
pub enum LastMileError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("本地存储错误: {0}")]
    Storage(String),
    #[error("包裹未找到: {id}")]
    DeliveryNotFound { id: String },
    #[error("快递员未找到: {id}")]
    CourierNotFound { id: String },
    #[error("后端返回错误: 状态码 {status} - {message}")]
    Backend { status: u16, message: String },
    #[error("网络错误: {0}")]
    Network(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type LastMileResult<T> = Result<T, LastMileError>;

impl LastMileError {
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }
    pub fn delivery_not_found<S: Into<String>>(id: S) -> Self {
        Self::DeliveryNotFound { id: id.into() }
    }
    pub fn courier_not_found<S: Into<String>>(id: S) -> Self {
        Self::CourierNotFound { id: id.into() }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LastMileError::Internal(_) | LastMileError::Configuration(_)
        )
    }
    /// 网络不可达、超时、后端5xx/429 视为暂时性失败，可在下次同步时重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LastMileError::Network(_) | LastMileError::Timeout(_) => true,
            LastMileError::Backend { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
    pub fn user_message(&self) -> &str {
        match self {
            LastMileError::DeliveryNotFound { .. } => "请求的包裹不存在",
            LastMileError::CourierNotFound { .. } => "请求的快递员不存在",
            LastMileError::Validation(_) => "输入数据验证失败",
            LastMileError::Network(_) => "网络不可用，操作已保存，将在恢复连接后同步",
            LastMileError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for LastMileError {
    fn from(err: serde_json::Error) -> Self {
        LastMileError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for LastMileError {
    fn from(err: anyhow::Error) -> Self {
        LastMileError::Internal(err.to_string())
    }
}
