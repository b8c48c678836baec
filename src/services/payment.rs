//! 支付网关服务 - 业务能力层

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::FilingError;
use crate::utils::url::endpoint;

/// 支付结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Completed,
    TimedOut,
    Declined(String),
}

/// 支付网关
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// 等待付款完成，超过 `timeout` 返回 `TimedOut`
    async fn await_completion(&self, reference: &str, timeout: Duration) -> Result<PaymentStatus, FilingError>;
}

#[derive(Debug, Deserialize)]
struct PaymentStatusReply {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// 轮询支付后台 `GET {base}/payments/{id}/status`
pub struct HttpPaymentGateway {
    base_url: String,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn status_url(&self, reference: &str) -> Result<reqwest::Url, FilingError> {
        endpoint(&self.base_url, &["payments", reference, "status"])
    }

    async fn poll_once(&self, reference: &str) -> Result<Option<PaymentStatus>, FilingError> {
        let url = self.status_url(reference)?;
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("付款 {} 尚未登记", reference);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FilingError::service(
                "payment",
                format!("HTTP {}", response.status()),
            ));
        }

        let reply: PaymentStatusReply = response.json().await?;
        Ok(classify(&reply))
    }
}

fn classify(reply: &PaymentStatusReply) -> Option<PaymentStatus> {
    match reply.status.to_lowercase().as_str() {
        "completed" | "paid" | "success" => Some(PaymentStatus::Completed),
        "declined" | "failed" | "cancelled" => Some(PaymentStatus::Declined(
            reply.message.clone().unwrap_or_else(|| reply.status.clone()),
        )),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn await_completion(&self, reference: &str, timeout: Duration) -> Result<PaymentStatus, FilingError> {
        info!("💳 等待付款完成: {}", reference);
        let deadline = Instant::now() + timeout;

        loop {
            match self.poll_once(reference).await {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                // 单次轮询失败不影响整体等待
                Err(e) => warn!("查询付款状态失败: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(PaymentStatus::TimedOut);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
