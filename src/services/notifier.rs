//! 结果通知服务 - 业务能力层

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::FilingError;
use crate::models::result::FilingResult;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, run_id: &str, result: &FilingResult) -> Result<(), FilingError>;
}

/// 把结果 POST 到配置的 webhook
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, run_id: &str, result: &FilingResult) -> Result<(), FilingError> {
        debug!("发送申报通知: {}", self.url);
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "run_id": run_id, "result": result }))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(FilingError::service(
                "notifier",
                format!("HTTP {}", response.status()),
            ))
        }
    }
}
