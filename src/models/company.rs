use serde::{Deserialize, Serialize};

/// 权威来源返回的公司信息
///
/// 验证之后的步骤使用这里的数据，而不是请求里的原始输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub registration_number: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incorporation_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_year_end: Option<String>,
}
