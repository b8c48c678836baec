//! 预检：纯函数，不触碰页面和网络

use chrono::{DateTime, Duration, NaiveDate};
use regex::Regex;

use crate::error::FilingError;
use crate::models::request::FilingRequest;

/// 财年结束后多少天内必须完成申报
pub const FILING_WINDOW_DAYS: i64 = 275;

/// 公司注册号格式 NNNN/NNNNNN/NN，只接受 ASCII 数字
const COMPANY_NUMBER_PATTERN: &str = r"^[0-9]{4}/[0-9]{6}/[0-9]{2}$";

/// 预检结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub financial_year_end: NaiveDate,
    pub deadline: NaiveDate,
    /// 距离截止日的天数，已过期时为负数
    pub days_remaining: i64,
    pub deadline_passed: bool,
}

/// 校验注册号格式与财年截止日
///
/// 同样的输入总是得到同样的结论；`today` 只影响截止日提示
pub fn validate(request: &FilingRequest, today: NaiveDate) -> Result<PreflightReport, FilingError> {
    let pattern = Regex::new(COMPANY_NUMBER_PATTERN)
        .map_err(|e| FilingError::Configuration(format!("注册号正则无效: {}", e)))?;
    let number = request.company_registration_number.trim();
    if !pattern.is_match(number) {
        return Err(FilingError::InvalidInput(format!(
            "公司注册号格式错误: '{}'，应为 NNNN/NNNNNN/NN",
            request.company_registration_number
        )));
    }

    let financial_year_end = parse_year_end(&request.financial_year_end)?;
    let deadline = financial_year_end + Duration::days(FILING_WINDOW_DAYS);
    let days_remaining = (deadline - today).num_days();

    Ok(PreflightReport {
        financial_year_end,
        deadline,
        days_remaining,
        deadline_passed: days_remaining < 0,
    })
}

/// 接受 `YYYY-MM-DD` 或 RFC 3339 时间
pub fn parse_year_end(raw: &str) -> Result<NaiveDate, FilingError> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Ok(datetime.date_naive());
    }
    Err(FilingError::InvalidInput(format!(
        "财年截止日格式错误: '{}'，应为 YYYY-MM-DD",
        raw
    )))
}
