use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 申报流程错误
///
/// 每个步骤的错误都会被分类、写入进度日志，再决定是本地重试还是交给状态机
#[derive(Debug, Error)]
pub enum FilingError {
    /// 输入无效（预检阶段发现，不重试，不触碰页面）
    #[error("输入无效: {0}")]
    InvalidInput(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 公司查询失败
    #[error("公司查询失败: {0}")]
    LookupFailed(String),

    /// 所有候选选择器与启发式匹配都没有找到元素
    #[error("未找到页面元素: {intent}")]
    ElementNotFound { intent: String },

    /// 页面拒绝了操作（元素失效、被禁用、跳转未发生等）
    #[error("页面拒绝了操作 ({action}): {reason}")]
    ActionRejected { action: String, reason: String },

    /// 验证码提交后仍然显示
    #[error("验证码未被接受 (第 {attempt} 次尝试)")]
    ChallengeRejected { attempt: u32 },

    /// 页面操作超时
    #[error("操作超时: {operation} ({timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    /// 外部服务超时；`retryable` 决定是否允许步骤内重试（支付不允许）
    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String, retryable: bool },

    /// 外部服务错误
    #[error("外部服务错误 ({service}): {message}")]
    ExternalService { service: String, message: String },

    /// 支付被拒绝
    #[error("支付被拒绝: {0}")]
    PaymentDeclined(String),

    /// 重试耗尽后页面仍无法推进
    #[error("页面状态无法恢复 ({step}): {cause}")]
    UnrecoverableUiState { step: String, cause: String },

    /// 浏览器通信错误
    #[error("浏览器错误: {0}")]
    Browser(String),

    /// 浏览器会话无法建立
    #[error("浏览器会话错误: {0}")]
    Session(String),

    /// 收到取消信号
    #[error("流程已取消")]
    Cancelled,
}

/// 错误分类，写入进度日志和申报结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Configuration,
    LookupFailed,
    ElementNotFound,
    ActionRejected,
    ChallengeRejected,
    Timeout,
    ExternalServiceTimeout,
    ExternalServiceError,
    PaymentDeclined,
    UnrecoverableUiState,
    Browser,
    Session,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Configuration => "configuration",
            ErrorKind::LookupFailed => "lookup_failed",
            ErrorKind::ElementNotFound => "element_not_found",
            ErrorKind::ActionRejected => "action_rejected",
            ErrorKind::ChallengeRejected => "challenge_rejected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ExternalServiceTimeout => "external_service_timeout",
            ErrorKind::ExternalServiceError => "external_service_error",
            ErrorKind::PaymentDeclined => "payment_declined",
            ErrorKind::UnrecoverableUiState => "unrecoverable_ui_state",
            ErrorKind::Browser => "browser",
            ErrorKind::Session => "session",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// 页面交互类错误：重试耗尽后升级为 UnrecoverableUiState
    pub fn is_ui_class(&self) -> bool {
        matches!(
            self,
            ErrorKind::ElementNotFound
                | ErrorKind::ActionRejected
                | ErrorKind::ChallengeRejected
                | ErrorKind::Timeout
                | ErrorKind::Browser
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FilingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FilingError::InvalidInput(_) => ErrorKind::InvalidInput,
            FilingError::Configuration(_) => ErrorKind::Configuration,
            FilingError::LookupFailed(_) => ErrorKind::LookupFailed,
            FilingError::ElementNotFound { .. } => ErrorKind::ElementNotFound,
            FilingError::ActionRejected { .. } => ErrorKind::ActionRejected,
            FilingError::ChallengeRejected { .. } => ErrorKind::ChallengeRejected,
            FilingError::Timeout { .. } => ErrorKind::Timeout,
            FilingError::ExternalServiceTimeout { .. } => ErrorKind::ExternalServiceTimeout,
            FilingError::ExternalService { .. } => ErrorKind::ExternalServiceError,
            FilingError::PaymentDeclined(_) => ErrorKind::PaymentDeclined,
            FilingError::UnrecoverableUiState { .. } => ErrorKind::UnrecoverableUiState,
            FilingError::Browser(_) => ErrorKind::Browser,
            FilingError::Session(_) => ErrorKind::Session,
            FilingError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// 是否允许在步骤内重试
    pub fn is_retryable(&self) -> bool {
        match self {
            FilingError::ExternalServiceTimeout { retryable, .. } => *retryable,
            other => other.kind().is_ui_class(),
        }
    }

    // ========== 便捷构造函数 ==========

    pub fn element_not_found(intent: impl Into<String>) -> Self {
        FilingError::ElementNotFound { intent: intent.into() }
    }

    pub fn action_rejected(action: impl Into<String>, reason: impl Into<String>) -> Self {
        FilingError::ActionRejected {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        FilingError::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn service(service: impl Into<String>, message: impl std::fmt::Display) -> Self {
        FilingError::ExternalService {
            service: service.into(),
            message: message.to_string(),
        }
    }
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for FilingError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        FilingError::Browser(err.to_string())
    }
}

impl From<serde_json::Error> for FilingError {
    fn from(err: serde_json::Error) -> Self {
        FilingError::Browser(format!("页面返回数据解析失败: {}", err))
    }
}

impl From<reqwest::Error> for FilingError {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());
        if err.is_timeout() {
            FilingError::ExternalServiceTimeout {
                service,
                retryable: true,
            }
        } else {
            FilingError::ExternalService {
                service,
                message: err.to_string(),
            }
        }
    }
}

impl From<std::io::Error> for FilingError {
    fn from(err: std::io::Error) -> Self {
        FilingError::service("filesystem", err)
    }
}
