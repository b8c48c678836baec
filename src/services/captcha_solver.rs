//! 验证码识别服务 - 业务能力层
//!
//! 只负责"图片 → 答案"，不接触页面

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::FilingError;

const SERVICE: &str = "captcha";

/// 验证码题面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePayload {
    /// 图片的 `src`：`data:` 内联图片或可下载的地址
    pub image_src: String,
}

impl ChallengePayload {
    pub fn from_src(src: impl Into<String>) -> Self {
        Self { image_src: src.into() }
    }

    /// `data:image/...;base64,` 内联图片的数据部分
    pub fn inline_base64(&self) -> Option<&str> {
        let rest = self.image_src.strip_prefix("data:")?;
        let (meta, data) = rest.split_once(',')?;
        meta.ends_with(";base64").then_some(data)
    }
}

/// 验证码识别
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// 超时返回可重试的 `ExternalServiceTimeout`
    async fn solve(&self, payload: &ChallengePayload, timeout: Duration) -> Result<String, FilingError>;
}

#[derive(Debug, Deserialize)]
struct TwoCaptchaReply {
    status: i64,
    request: String,
}

/// 2Captcha 识别服务（`in.php` 提交，`res.php` 轮询）
pub struct TwoCaptchaSolver {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl TwoCaptchaSolver {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            poll_interval: Duration::from_secs(5),
        }
    }

    async fn image_base64(&self, payload: &ChallengePayload) -> Result<String, FilingError> {
        if let Some(data) = payload.inline_base64() {
            return Ok(data.to_string());
        }
        debug!("下载验证码图片: {}", payload.image_src);
        let bytes = self
            .client
            .get(&payload.image_src)
            .send()
            .await
            .map_err(|e| FilingError::service(SERVICE, format!("下载验证码图片失败: {}", e)))?
            .bytes()
            .await
            .map_err(|e| FilingError::service(SERVICE, format!("读取验证码图片失败: {}", e)))?;
        Ok(general_purpose::STANDARD.encode(&bytes))
    }

    async fn submit(&self, image: &str) -> Result<String, FilingError> {
        let reply: TwoCaptchaReply = self
            .client
            .post(format!("{}/in.php", self.base_url))
            .form(&[
                ("key", self.api_key.as_str()),
                ("method", "base64"),
                ("body", image),
                ("json", "1"),
            ])
            .send()
            .await
            .map_err(|e| FilingError::service(SERVICE, e))?
            .json()
            .await
            .map_err(|e| FilingError::service(SERVICE, e))?;

        if reply.status == 1 {
            Ok(reply.request)
        } else {
            Err(FilingError::service(SERVICE, reply.request))
        }
    }

    async fn poll(&self, task_id: &str) -> Result<String, FilingError> {
        loop {
            sleep(self.poll_interval).await;

            let reply: TwoCaptchaReply = self
                .client
                .get(format!("{}/res.php", self.base_url))
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", task_id),
                    ("json", "1"),
                ])
                .send()
                .await
                .map_err(|e| FilingError::service(SERVICE, e))?
                .json()
                .await
                .map_err(|e| FilingError::service(SERVICE, e))?;

            match (reply.status, reply.request.as_str()) {
                (1, _) => return Ok(reply.request),
                (_, "CAPCHA_NOT_READY") => debug!("验证码任务 {} 尚未完成", task_id),
                (_, other) => return Err(FilingError::service(SERVICE, other)),
            }
        }
    }
}

#[async_trait]
impl CaptchaSolver for TwoCaptchaSolver {
    async fn solve(&self, payload: &ChallengePayload, timeout: Duration) -> Result<String, FilingError> {
        let work = async {
            let image = self.image_base64(payload).await?;
            let task_id = self.submit(&image).await?;
            info!("🧩 验证码已提交识别，任务 {}", task_id);
            self.poll(&task_id).await
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(answer) => answer,
            Err(_) => Err(FilingError::ExternalServiceTimeout {
                service: SERVICE.to_string(),
                retryable: true,
            }),
        }
    }
}
