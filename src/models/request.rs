use serde::{Deserialize, Serialize};

/// 董事信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Director {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// 股东信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shareholder {
    pub name: String,
    #[serde(default)]
    pub shares: u64,
}

/// 年度申报请求
///
/// 一次运行开始后不再修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingRequest {
    /// 公司注册号，格式 NNNN/NNNNNN/NN
    pub company_registration_number: String,
    pub company_name: String,
    /// 财年截止日（ISO 日期，预检阶段解析）
    pub financial_year_end: String,
    pub contact_email: String,
    pub contact_phone: String,
    #[serde(default)]
    pub directors: Vec<Director>,
    #[serde(default)]
    pub shareholders: Vec<Shareholder>,
    #[serde(default)]
    pub business_address: String,
    #[serde(default)]
    pub business_activity: String,
    /// 支付网关上的付款编号，缺省时由注册号推导
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    /// 来源文件路径（批量处理时设置）
    #[serde(skip_serializing, skip_deserializing)]
    pub source_path: Option<String>,
}

impl FilingRequest {
    /// 注册号中的数字部分
    pub fn company_digits(&self) -> String {
        self.company_registration_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect()
    }

    pub fn payment_reference(&self) -> String {
        match &self.payment_reference {
            Some(reference) if !reference.trim().is_empty() => reference.trim().to_string(),
            _ => format!("PAY-{}", self.company_digits()),
        }
    }
}
