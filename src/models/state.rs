use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// 申报流程状态
///
/// 只能向前推进；FAILED 可以从任意非终止状态进入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Pending,
    Verification,
    Preparation,
    Filing,
    Payment,
    Submission,
    Confirmation,
    Completed,
    Failed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Pending => "pending",
            WorkflowState::Verification => "verification",
            WorkflowState::Preparation => "preparation",
            WorkflowState::Filing => "filing",
            WorkflowState::Payment => "payment",
            WorkflowState::Submission => "submission",
            WorkflowState::Confirmation => "confirmation",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }

    /// 正常流程中的下一个状态
    pub fn next(&self) -> Option<WorkflowState> {
        match self {
            WorkflowState::Pending => Some(WorkflowState::Verification),
            WorkflowState::Verification => Some(WorkflowState::Preparation),
            WorkflowState::Preparation => Some(WorkflowState::Filing),
            WorkflowState::Filing => Some(WorkflowState::Payment),
            WorkflowState::Payment => Some(WorkflowState::Submission),
            WorkflowState::Submission => Some(WorkflowState::Confirmation),
            WorkflowState::Confirmation => Some(WorkflowState::Completed),
            WorkflowState::Completed | WorkflowState::Failed => None,
        }
    }

    pub fn can_transition_to(&self, target: WorkflowState) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == WorkflowState::Failed || self.next() == Some(target)
    }
}

impl Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
