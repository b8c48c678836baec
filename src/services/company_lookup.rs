//! 公司查询服务 - 业务能力层

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::FilingError;
use crate::models::company::CompanyInfo;
use crate::utils::url::endpoint;

/// 公司信息权威来源
#[async_trait]
pub trait CompanyLookup: Send + Sync {
    /// 查不到返回 `Ok(None)`
    async fn lookup(&self, registration_number: &str) -> Result<Option<CompanyInfo>, FilingError>;
}

/// HTTP 公司查询
///
/// `GET {base}/companies/{number}`，注册号中的 `/` 编码为 `%2F`
pub struct HttpCompanyLookup {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCompanyLookup {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FilingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FilingError::Configuration(format!("无法创建 HTTP 客户端: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn company_url(&self, registration_number: &str) -> Result<String, FilingError> {
        Ok(endpoint(&self.base_url, &["companies", registration_number.trim()])?.into())
    }
}

#[async_trait]
impl CompanyLookup for HttpCompanyLookup {
    async fn lookup(&self, registration_number: &str) -> Result<Option<CompanyInfo>, FilingError> {
        let url = self.company_url(registration_number)?;
        debug!("查询公司: {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| lookup_error(&e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let info: CompanyInfo = response.json().await.map_err(|e| lookup_error(&e))?;
                Ok(Some(info))
            }
            status => Err(FilingError::service(
                "company-lookup",
                format!("HTTP {}", status),
            )),
        }
    }
}

fn lookup_error(err: &reqwest::Error) -> FilingError {
    if err.is_timeout() {
        FilingError::ExternalServiceTimeout {
            service: "company-lookup".to_string(),
            retryable: true,
        }
    } else {
        FilingError::service("company-lookup", err)
    }
}
