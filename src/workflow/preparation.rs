//! 准备阶段：由公司信息和请求推导申报材料包

use chrono::NaiveDate;

use crate::error::FilingError;
use crate::models::company::CompanyInfo;
use crate::models::package::{FilingPackage, ANNUAL_RETURN_FORM_TYPE};
use crate::models::request::FilingRequest;

pub const ANNUAL_RETURN_FORM: &str = "CoR_30.1_Form.pdf";
pub const DIRECTOR_SCHEDULE: &str = "Director_Schedules.pdf";
pub const SHAREHOLDER_SCHEDULE: &str = "Shareholder_Register.pdf";

/// 推导申报材料包
///
/// 公司编号和名称以权威来源为准；只在必填项缺失时失败
pub fn derive_package(
    company: &CompanyInfo,
    request: &FilingRequest,
    financial_year_end: NaiveDate,
    today: NaiveDate,
) -> Result<FilingPackage, FilingError> {
    let company_name = first_non_empty(&company.name, &request.company_name);
    let mut missing = Vec::new();
    if company_name.is_empty() {
        missing.push("公司名称");
    }
    if request.contact_email.trim().is_empty() {
        missing.push("联系邮箱");
    }
    if request.contact_phone.trim().is_empty() {
        missing.push("联系电话");
    }
    if !missing.is_empty() {
        return Err(FilingError::InvalidInput(format!(
            "缺少必填项: {}",
            missing.join("、")
        )));
    }

    let mut documents = vec![ANNUAL_RETURN_FORM.to_string()];
    if !request.directors.is_empty() {
        documents.push(DIRECTOR_SCHEDULE.to_string());
    }
    if !request.shareholders.is_empty() {
        documents.push(SHAREHOLDER_SCHEDULE.to_string());
    }

    Ok(FilingPackage {
        company_number: first_non_empty(&company.registration_number, &request.company_registration_number),
        company_name,
        financial_year_end,
        filing_date: today,
        form_type: ANNUAL_RETURN_FORM_TYPE.to_string(),
        contact_email: request.contact_email.trim().to_string(),
        contact_phone: request.contact_phone.trim().to_string(),
        business_address: request.business_address.trim().to_string(),
        business_activity: request.business_activity.trim().to_string(),
        directors: request.directors.clone(),
        shareholders: request.shareholders.clone(),
        documents,
    })
}

fn first_non_empty(preferred: &str, fallback: &str) -> String {
    let preferred = preferred.trim();
    if preferred.is_empty() {
        fallback.trim().to_string()
    } else {
        preferred.to_string()
    }
}
