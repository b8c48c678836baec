//! 验证码处理子流程
//!
//! 一次调用对应一次完整尝试：检测 → 识别 → 填写 → 提交 → 确认消失。
//! 验证码通常一次性有效，重试时整个流程重新来过，由步骤执行器控制次数

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::FilingError;
use crate::infrastructure::driver::{UiDriver, WaitCondition};
use crate::services::captcha_solver::{CaptchaSolver, ChallengePayload};
use crate::services::intents::Intent;
use crate::services::selector_resolver::SelectorResolver;

/// 验证码子流程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    NoChallenge,
    Detected,
    Submitted,
    Verified,
    Rejected,
}

impl ChallengeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeState::NoChallenge => "no_challenge",
            ChallengeState::Detected => "detected",
            ChallengeState::Submitted => "submitted",
            ChallengeState::Verified => "verified",
            ChallengeState::Rejected => "rejected",
        }
    }
}

pub struct CaptchaProtocol<'a> {
    resolver: &'a SelectorResolver,
    solver: Option<&'a dyn CaptchaSolver>,
    probe_timeout: Duration,
    solve_timeout: Duration,
    verify_timeout: Duration,
}

impl<'a> CaptchaProtocol<'a> {
    pub fn new(resolver: &'a SelectorResolver, solver: Option<&'a dyn CaptchaSolver>, config: &Config) -> Self {
        Self {
            resolver,
            solver,
            probe_timeout: config.captcha_probe_timeout(),
            solve_timeout: config.captcha_solve_timeout(),
            verify_timeout: config.captcha_verify_timeout(),
        }
    }

    /// 执行一次尝试
    ///
    /// 返回 `NoChallenge` 或 `Verified`；验证码仍在页面上时返回 `ChallengeRejected`
    pub async fn attempt(&self, driver: &dyn UiDriver, attempt: u32) -> Result<ChallengeState, FilingError> {
        let detected = self
            .resolver
            .is_present(driver, Intent::CaptchaImage, self.probe_timeout)
            .await?;
        if !detected {
            debug!("未检测到验证码");
            return Ok(ChallengeState::NoChallenge);
        }
        info!("🧩 检测到验证码 (第 {} 次尝试)", attempt);
        let mut state = ChallengeState::Detected;

        let Some(solver) = self.solver else {
            return Err(FilingError::service("captcha", "检测到验证码但未配置识别服务"));
        };

        let image = self.resolver.resolve(driver, Intent::CaptchaImage).await?;
        let src = image
            .element
            .attr("src")
            .map(str::to_string)
            .ok_or_else(|| FilingError::action_rejected("读取验证码", "验证码图片没有 src"))?;
        let answer = solver
            .solve(&ChallengePayload::from_src(src), self.solve_timeout)
            .await?;

        let input = self.resolver.resolve(driver, Intent::CaptchaInput).await?;
        driver.fill(&input.element, answer.trim()).await?;
        let submit = self.resolver.resolve(driver, Intent::SubmitButton).await?;
        driver.click(&submit.element).await?;
        state = advance(state, ChallengeState::Submitted);

        let gone = driver
            .wait_for(
                &WaitCondition::AllAbsent(self.resolver.candidates(Intent::CaptchaImage)),
                self.verify_timeout,
            )
            .await?;

        if gone {
            state = advance(state, ChallengeState::Verified);
            info!("✓ 验证码已通过");
            Ok(state)
        } else {
            state = advance(state, ChallengeState::Rejected);
            warn!("⚠️ 验证码未通过 ({})", state.as_str());
            Err(FilingError::ChallengeRejected { attempt })
        }
    }
}

fn advance(from: ChallengeState, to: ChallengeState) -> ChallengeState {
    debug!("验证码状态: {} -> {}", from.as_str(), to.as_str());
    to
}
