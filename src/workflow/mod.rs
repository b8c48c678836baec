pub mod captcha;
pub mod filing_flow;
pub mod portal_steps;
pub mod preflight;
pub mod preparation;
pub mod run_ctx;
pub mod step_executor;

pub use captcha::{CaptchaProtocol, ChallengeState};
pub use filing_flow::{Collaborators, FilingFlow};
pub use preflight::PreflightReport;
pub use run_ctx::RunCtx;
pub use step_executor::{Done, RetryPolicy, StepExecutor, StepFailure, StepSpec};
