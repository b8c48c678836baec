use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::models::state::WorkflowState;

/// 申报最终结果
///
/// 每次运行只产生一次，在 COMPLETED 或 FAILED 时生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingResult {
    pub success: bool,
    pub filing_reference: Option<String>,
    pub confirmation_number: Option<String>,
    pub submission_date: Option<DateTime<Utc>>,
    /// 编号是本地合成的，而不是门户返回的
    #[serde(default)]
    pub reference_synthetic: bool,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// COMPLETED 或 FAILED
    pub final_state: WorkflowState,
    /// 失败时所处的状态
    pub failed_state: Option<WorkflowState>,
    pub company_number: String,
    pub company_name: String,
    #[serde(default)]
    pub screenshots: Vec<String>,
}

/// 提交阶段的产出
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub filing_reference: String,
    pub confirmation_number: String,
    pub reference_synthetic: bool,
    pub submitted_at: DateTime<Utc>,
}

impl FilingResult {
    pub fn completed(
        company_number: &str,
        company_name: &str,
        submission: &Submission,
        screenshots: Vec<String>,
    ) -> Self {
        Self {
            success: true,
            filing_reference: Some(submission.filing_reference.clone()),
            confirmation_number: Some(submission.confirmation_number.clone()),
            submission_date: Some(submission.submitted_at),
            reference_synthetic: submission.reference_synthetic,
            error_message: None,
            error_kind: None,
            final_state: WorkflowState::Completed,
            failed_state: None,
            company_number: company_number.to_string(),
            company_name: company_name.to_string(),
            screenshots,
        }
    }

    pub fn failed(
        company_number: &str,
        company_name: &str,
        failed_state: WorkflowState,
        kind: ErrorKind,
        message: String,
        screenshots: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            filing_reference: None,
            confirmation_number: None,
            submission_date: None,
            reference_synthetic: false,
            error_message: Some(message),
            error_kind: Some(kind),
            final_state: WorkflowState::Failed,
            failed_state: Some(failed_state),
            company_number: company_number.to_string(),
            company_name: company_name.to_string(),
            screenshots,
        }
    }
}
