//! 门户操作步骤 - 流程层
//!
//! 登录、发起申报、提交与编号提取。每个操作都是一次步骤执行，
//! 元素一律通过选择器解析服务定位

use std::sync::atomic::{AtomicU32, Ordering};

use regex::Regex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ErrorKind, FilingError};
use crate::infrastructure::driver::{UiDriver, WaitCondition};
use crate::models::package::FilingPackage;
use crate::models::progress::ProgressLog;
use crate::models::result::Submission;
use crate::models::state::WorkflowState;
use crate::services::captcha_solver::CaptchaSolver;
use crate::services::intents::Intent;
use crate::services::selector_resolver::SelectorResolver;
use crate::utils::logging::truncate_text;
use crate::workflow::captcha::CaptchaProtocol;
use crate::workflow::step_executor::{Done, RetryPolicy, StepExecutor, StepFailure, StepSpec};

/// 元素文本中的编号
const REFERENCE_TOKEN_PATTERN: &str = r"[A-Z0-9]+(?:[-/][A-Z0-9]+)+|[0-9]{6,}";
/// 整页文本中的编号
const PAGE_REFERENCE_PATTERN: &str = r"REF-[0-9]+|CONF-[0-9]+|[0-9]{8,}";

/// 下拉框中年度申报对应的值
const ANNUAL_RETURNS_OPTION: &str = "annual_returns";

/// 门户操作
///
/// 持有一次运行的页面会话引用，步骤之间不共享其他状态
pub struct PortalSteps<'a> {
    config: &'a Config,
    resolver: &'a SelectorResolver,
    driver: &'a dyn UiDriver,
    exec: &'a StepExecutor<'a>,
}

impl<'a> PortalSteps<'a> {
    pub fn new(
        config: &'a Config,
        resolver: &'a SelectorResolver,
        driver: &'a dyn UiDriver,
        exec: &'a StepExecutor<'a>,
    ) -> Self {
        Self {
            config,
            resolver,
            driver,
            exec,
        }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(self.config)
    }

    // ========== 登录 ==========

    pub async fn authenticate(&self, log: &mut ProgressLog) -> Result<(), StepFailure> {
        let spec = StepSpec::new("authenticate", "登录门户", WorkflowState::Filing, self.policy());
        let config = self.config;
        let driver = self.driver;
        let resolver = self.resolver;

        self.exec
            .execute(log, &spec, move || async move {
                let credentials = config.credentials();
                if credentials.is_none() && config.environment.is_production() {
                    return Err(FilingError::Configuration(
                        "生产环境必须配置门户账号，不能跳过登录".to_string(),
                    ));
                }

                driver.navigate(&config.login_url, config.page_timeout()).await?;

                let Some((username, password)) = credentials else {
                    warn!("⚠️ 未配置门户账号，非生产环境跳过登录");
                    return Ok(Done::new(())
                        .note("✓ 非生产环境跳过登录")
                        .meta("login_mode", "bypass"));
                };

                let user_field = resolver.resolve(driver, Intent::UsernameField).await?;
                driver.fill(&user_field.element, username).await?;
                let password_field = resolver.resolve(driver, Intent::PasswordField).await?;
                driver.fill(&password_field.element, password).await?;
                let login = resolver.resolve(driver, Intent::LoginButton).await?;
                driver.click(&login.element).await?;

                let arrived = driver
                    .wait_for(
                        &WaitCondition::UrlContains("dashboard".to_string()),
                        config.page_timeout(),
                    )
                    .await?;
                if !arrived {
                    return Err(FilingError::action_rejected("登录", "登录后没有进入 dashboard"));
                }

                Ok(Done::new(())
                    .note("✓ 已登录门户")
                    .meta("login_mode", "credentials")
                    .extend(login.metadata()))
            })
            .await
    }

    // ========== 发起申报 ==========

    pub async fn initiate(&self, log: &mut ProgressLog, package: &FilingPackage) -> Result<(), StepFailure> {
        self.open_annual_returns(log).await?;
        self.choose_filing_type(log).await?;

        self.fill(
            log,
            StepSpec::new("fill-company-number", "填写公司注册号", WorkflowState::Filing, self.policy()),
            Intent::CompanyNumberField,
            &package.company_number,
        )
        .await?;

        // 以下字段门户不一定提供，失败只留警告
        let optional_fills = [
            ("fill-company-name", "填写公司名称", Intent::CompanyNameField, package.company_name.as_str()),
            ("fill-email", "填写联系邮箱", Intent::EmailField, package.contact_email.as_str()),
            ("fill-phone", "填写联系电话", Intent::PhoneField, package.contact_phone.as_str()),
        ];
        for (key, title, intent, value) in optional_fills {
            let spec = StepSpec::new(key, title, WorkflowState::Filing, self.policy()).optional();
            tolerate(self.fill(log, spec, intent, value).await)?;
        }

        tolerate(self.fill_financial_year(log, package).await)
    }

    async fn open_annual_returns(&self, log: &mut ProgressLog) -> Result<(), StepFailure> {
        let spec = StepSpec::new("open-annual-returns", "打开年度申报页面", WorkflowState::Filing, self.policy());
        let config = self.config;
        let driver = self.driver;

        self.exec
            .execute(log, &spec, move || async move {
                driver
                    .navigate(&config.annual_returns_url, config.page_timeout())
                    .await?;
                Ok(Done::new(()).meta("url", &config.annual_returns_url))
            })
            .await
    }

    async fn choose_filing_type(&self, log: &mut ProgressLog) -> Result<(), StepFailure> {
        let spec = StepSpec::new("select-filing-type", "选择申报类型", WorkflowState::Filing, self.policy());
        let driver = self.driver;
        let resolver = self.resolver;

        self.exec
            .execute(log, &spec, move || async move {
                match resolver.resolve(driver, Intent::FilingTypeSelect).await {
                    Ok(select) => {
                        driver.fill(&select.element, ANNUAL_RETURNS_OPTION).await?;
                        Ok(Done::new(()).extend(select.metadata()))
                    }
                    Err(FilingError::ElementNotFound { .. }) => {
                        debug!("没有申报类型下拉框，改为点击年度申报入口");
                        let option = resolver.resolve(driver, Intent::AnnualReturnsOption).await?;
                        driver.click(&option.element).await?;
                        Ok(Done::new(()).extend(option.metadata()))
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// 年份输入框只填年份，日期输入框填完整日期
    async fn fill_financial_year(&self, log: &mut ProgressLog, package: &FilingPackage) -> Result<(), StepFailure> {
        let spec = StepSpec::new("fill-financial-year", "填写财年", WorkflowState::Filing, self.policy()).optional();
        let driver = self.driver;
        let resolver = self.resolver;
        let year = package.financial_year();
        let full_date = package.financial_year_end.format("%Y-%m-%d").to_string();
        let (year, full_date) = (year.as_str(), full_date.as_str());

        self.exec
            .execute(log, &spec, move || async move {
                let field = resolver.resolve(driver, Intent::FinancialYearField).await?;
                let value = if field.element.attr("type") == Some("date") {
                    full_date
                } else {
                    year
                };
                driver.fill(&field.element, value).await?;
                Ok(Done::new(()).meta("value", value).extend(field.metadata()))
            })
            .await
    }

    async fn fill(&self, log: &mut ProgressLog, spec: StepSpec, intent: Intent, value: &str) -> Result<(), StepFailure> {
        let driver = self.driver;
        let resolver = self.resolver;

        self.exec
            .execute(log, &spec, move || async move {
                let field = resolver.resolve(driver, intent).await?;
                driver.fill(&field.element, value).await?;
                Ok(Done::new(()).extend(field.metadata()))
            })
            .await
    }

    // ========== 提交 ==========

    pub async fn submit(
        &self,
        log: &mut ProgressLog,
        company_digits: &str,
        solver: Option<&dyn CaptchaSolver>,
    ) -> Result<Submission, StepFailure> {
        self.click_submit(log).await?;
        self.solve_challenge(log, solver).await?;
        self.await_confirmation(log).await?;
        self.extract_submission(log, company_digits).await
    }

    async fn click_submit(&self, log: &mut ProgressLog) -> Result<(), StepFailure> {
        let spec = StepSpec::new("click-submit", "提交申报表单", WorkflowState::Submission, self.policy());
        let driver = self.driver;
        let resolver = self.resolver;

        self.exec
            .execute(log, &spec, move || async move {
                let submit = resolver.resolve(driver, Intent::SubmitButton).await?;
                driver.click(&submit.element).await?;
                Ok(Done::new(()).extend(submit.metadata()))
            })
            .await
    }

    /// 验证码尝试次数单独封顶，不占用通用重试预算
    async fn solve_challenge(&self, log: &mut ProgressLog, solver: Option<&dyn CaptchaSolver>) -> Result<(), StepFailure> {
        let config = self.config;
        let budget = config.captcha_probe_timeout()
            + config.captcha_solve_timeout()
            + config.captcha_verify_timeout()
            + config.step_timeout();
        let policy = RetryPolicy::new(
            config.captcha_max_attempts.saturating_sub(1),
            config.retry_delay(),
            budget,
        );
        let spec = StepSpec::new("captcha", "处理验证码", WorkflowState::Submission, policy);

        let protocol = CaptchaProtocol::new(self.resolver, solver, config);
        let protocol = &protocol;
        let driver = self.driver;
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        self.exec
            .execute(log, &spec, move || async move {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let state = protocol.attempt(driver, attempt).await?;
                Ok(Done::new(())
                    .note(format!("✓ 验证码处理完成 ({})", state.as_str()))
                    .meta("challenge", state.as_str()))
            })
            .await
    }

    async fn await_confirmation(&self, log: &mut ProgressLog) -> Result<(), StepFailure> {
        let config = self.config;
        let policy = self
            .policy()
            .with_timeout(config.confirmation_timeout() + config.page_timeout());
        let spec = StepSpec::new("await-confirmation", "等待确认页面", WorkflowState::Submission, policy);
        let driver = self.driver;
        let indicators = self.resolver.candidates(Intent::ConfirmationIndicator);
        let indicators = &indicators;

        self.exec
            .execute(log, &spec, move || async move {
                let shown = driver
                    .wait_for(
                        &WaitCondition::AnyPresent(indicators.clone()),
                        config.confirmation_timeout(),
                    )
                    .await?;
                if shown {
                    Ok(Done::new(()))
                } else {
                    Err(FilingError::timeout("等待确认页面", config.confirmation_timeout()))
                }
            })
            .await
    }

    async fn extract_submission(&self, log: &mut ProgressLog, company_digits: &str) -> Result<Submission, StepFailure> {
        let spec = StepSpec::new(
            "extract-reference",
            "提取申报编号",
            WorkflowState::Submission,
            RetryPolicy::once(self.config.step_timeout()),
        );
        let clock = self.exec.clock();
        let this = self;

        self.exec
            .execute(log, &spec, move || async move {
                let submitted_at = clock.now();
                let extracted = this.extract_reference().await;

                let submission = match extracted {
                    Some((reference, confirmation, source)) => {
                        info!("✓ 申报编号: {} (来源 {})", reference, source);
                        Submission {
                            confirmation_number: confirmation.unwrap_or_else(|| reference.clone()),
                            filing_reference: reference,
                            reference_synthetic: false,
                            submitted_at,
                        }
                    }
                    None => {
                        let reference = synthetic_reference(company_digits, submitted_at.timestamp());
                        warn!("⚠️ 页面上没有可提取的申报编号，使用合成编号 {}", reference);
                        Submission {
                            confirmation_number: reference.clone(),
                            filing_reference: reference,
                            reference_synthetic: true,
                            submitted_at,
                        }
                    }
                };

                let note = if submission.reference_synthetic {
                    format!("⚠️ 未提取到申报编号，已合成 {}", submission.filing_reference)
                } else {
                    format!("✓ 申报编号 {}", submission.filing_reference)
                };
                Ok(Done::new(submission.clone())
                    .note(note)
                    .meta("filing_reference", &submission.filing_reference)
                    .meta("confirmation_number", &submission.confirmation_number)
                    .meta("reference_synthetic", submission.reference_synthetic))
            })
            .await
    }

    /// 依次尝试编号元素、确认号元素、整页文本
    ///
    /// 总耗时不超过步骤时限的一半，用完即视为没有可提取的编号。
    /// 返回 (编号, 确认号, 来源)
    async fn extract_reference(&self) -> Option<(String, Option<String>, &'static str)> {
        let deadline = Instant::now() + self.config.step_timeout() / 2;

        let reference = timeout_at(deadline, self.token_from(Intent::FilingReference))
            .await
            .unwrap_or_else(|_| {
                warn!("⚠️ 提取申报编号超时");
                None
            });
        let confirmation = timeout_at(deadline, self.token_from(Intent::ConfirmationNumber))
            .await
            .unwrap_or(None);

        if let Some(reference) = reference {
            return Some((reference, confirmation, "filing-reference"));
        }
        if let Some(confirmation) = confirmation {
            return Some((confirmation.clone(), Some(confirmation), "confirmation-number"));
        }

        let page_text = match timeout_at(deadline, self.driver.page_text()).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                debug!("读取页面文本失败: {}", e);
                return None;
            }
            Err(_) => {
                debug!("读取页面文本超时");
                return None;
            }
        };
        find_token(PAGE_REFERENCE_PATTERN, &page_text).map(|reference| (reference, None, "page-text"))
    }

    async fn token_from(&self, intent: Intent) -> Option<String> {
        let resolution = match self.resolver.resolve(self.driver, intent).await {
            Ok(resolution) => resolution,
            Err(e) => {
                debug!("[{}] 未找到: {}", intent, e);
                return None;
            }
        };
        match self.driver.read_text(&resolution.element).await {
            Ok(text) => {
                debug!("[{}] 文本: {}", intent, truncate_text(&text, 80));
                find_token(REFERENCE_TOKEN_PATTERN, &text)
            }
            Err(e) => {
                debug!("[{}] 读取文本失败: {}", intent, e);
                None
            }
        }
    }
}

/// 可选步骤失败时继续，只有取消信号向上传递
fn tolerate(outcome: Result<(), StepFailure>) -> Result<(), StepFailure> {
    match outcome {
        Err(failure) if failure.cause == ErrorKind::Cancelled => Err(failure),
        _ => Ok(()),
    }
}

/// 第一个匹配的编号
pub fn find_token(pattern: &str, text: &str) -> Option<String> {
    let regex = Regex::new(pattern).ok()?;
    regex.find(text).map(|m| m.as_str().to_string())
}

/// 合成编号：同一公司、同一时刻总是得到同样的结果
pub fn synthetic_reference(company_digits: &str, unix_seconds: i64) -> String {
    format!("REF-{}-{}", company_digits, unix_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_token_in_element_text() {
        assert_eq!(
            find_token(REFERENCE_TOKEN_PATTERN, "Filing reference: AR-2024-000123"),
            Some("AR-2024-000123".to_string())
        );
        assert_eq!(
            find_token(REFERENCE_TOKEN_PATTERN, "Reference 20241234567"),
            Some("20241234567".to_string())
        );
        assert_eq!(find_token(REFERENCE_TOKEN_PATTERN, "Thank you"), None);
    }

    #[test]
    fn test_reference_token_in_page_text() {
        assert_eq!(
            find_token(PAGE_REFERENCE_PATTERN, "Done. Your number is CONF-778812."),
            Some("CONF-778812".to_string())
        );
        assert_eq!(find_token(PAGE_REFERENCE_PATTERN, "Call 0861 123"), None);
    }

    #[test]
    fn test_synthetic_reference_is_deterministic() {
        assert_eq!(synthetic_reference("202112345607", 1717236000), "REF-202112345607-1717236000");
        assert_eq!(
            synthetic_reference("202112345607", 1717236000),
            synthetic_reference("202112345607", 1717236000)
        );
    }
}
