use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::request::{Director, Shareholder};

/// 年度申报表单类型（私营公司，CoR 30.1）
pub const ANNUAL_RETURN_FORM_TYPE: &str = "AR01";

/// 申报材料包
///
/// 准备阶段生成一次，之后的步骤只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingPackage {
    pub company_number: String,
    pub company_name: String,
    pub financial_year_end: NaiveDate,
    pub filing_date: NaiveDate,
    pub form_type: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub business_address: String,
    pub business_activity: String,
    pub directors: Vec<Director>,
    pub shareholders: Vec<Shareholder>,
    /// 生成的文档标识
    pub documents: Vec<String>,
}

impl FilingPackage {
    /// 财年年份（门户的文本输入框只接受年份）
    pub fn financial_year(&self) -> String {
        self.financial_year_end.format("%Y").to_string()
    }
}
