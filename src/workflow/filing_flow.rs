//! 年度申报流程 - 流程层
//!
//! 核心职责：把一个申报请求从 PENDING 推进到 COMPLETED 或 FAILED
//!
//! 流程顺序：
//! 1. 预检 (PENDING)
//! 2. 公司查询 (VERIFICATION)
//! 3. 生成材料包 (PREPARATION)
//! 4. 打开会话 → 登录 → 发起申报 (FILING)
//! 5. 等待付款 (PAYMENT)
//! 6. 提交 → 验证码 → 等待确认 → 提取编号 (SUBMISSION)
//! 7. 通知 (CONFIRMATION，尽力而为)

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{ErrorKind, FilingError};
use crate::infrastructure::driver::UiDriver;
use crate::infrastructure::session::{CdpSessionFactory, SessionFactory};
use crate::models::company::CompanyInfo;
use crate::models::package::FilingPackage;
use crate::models::progress::{Metadata, ProgressEntry, ProgressLog};
use crate::models::request::FilingRequest;
use crate::models::result::{FilingResult, Submission};
use crate::models::state::WorkflowState;
use crate::services::captcha_solver::{CaptchaSolver, TwoCaptchaSolver};
use crate::services::company_lookup::{CompanyLookup, HttpCompanyLookup};
use crate::services::notifier::{Notifier, WebhookNotifier};
use crate::services::payment::{HttpPaymentGateway, PaymentGateway, PaymentStatus};
use crate::services::selector_resolver::SelectorResolver;
use crate::services::intents::SelectorRegistry;
use crate::services::snapshot_store::{DiscardSnapshots, FsSnapshotStore, SnapshotSink};
use crate::services::status_sink::{JsonlStatusSink, StatusSink};
use crate::utils::clock::{Clock, SystemClock};
use crate::workflow::portal_steps::PortalSteps;
use crate::workflow::preflight::{self, PreflightReport};
use crate::workflow::preparation::derive_package;
use crate::workflow::run_ctx::RunCtx;
use crate::workflow::step_executor::{Done, RetryPolicy, StepExecutor, StepFailure, StepSpec};

/// 流程依赖的外部协作方
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionFactory>,
    pub lookup: Arc<dyn CompanyLookup>,
    pub payments: Arc<dyn PaymentGateway>,
    pub solver: Option<Arc<dyn CaptchaSolver>>,
    pub status: Arc<dyn StatusSink>,
    pub snapshots: Arc<dyn SnapshotSink>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// 按配置创建真实的适配器
    pub fn from_config(config: &Arc<Config>) -> Result<Self, FilingError> {
        let snapshots: Arc<dyn SnapshotSink> = if config.screenshots_enabled {
            Arc::new(FsSnapshotStore::new(&config.screenshots_dir))
        } else {
            Arc::new(DiscardSnapshots)
        };

        Ok(Self {
            sessions: Arc::new(CdpSessionFactory::new(config.clone())),
            lookup: Arc::new(HttpCompanyLookup::new(
                &config.company_lookup_api_url,
                config.lookup_timeout(),
            )?),
            payments: Arc::new(HttpPaymentGateway::new(&config.payment_api_url)),
            solver: config.captcha_api_key.as_ref().map(|key| {
                Arc::new(TwoCaptchaSolver::new(key, &config.captcha_api_base_url)) as Arc<dyn CaptchaSolver>
            }),
            status: Arc::new(JsonlStatusSink::new(&config.status_log_file)),
            snapshots,
            notifier: config
                .notification_webhook_url
                .as_ref()
                .map(|url| Arc::new(WebhookNotifier::new(url)) as Arc<dyn Notifier>),
            clock: Arc::new(SystemClock),
        })
    }
}

/// 年度申报流程
///
/// - 编排完整的申报状态机
/// - 每次运行独占一个页面会话，会话在门户阶段结束后一定关闭
/// - 不向调用方抛出错误，总是返回结果和完整的进度日志
pub struct FilingFlow {
    config: Arc<Config>,
    deps: Collaborators,
    resolver: SelectorResolver,
}

impl FilingFlow {
    pub fn new(config: Arc<Config>, deps: Collaborators, registry: SelectorRegistry) -> Self {
        let resolver = SelectorResolver::from_config(registry, &config);
        Self {
            config,
            deps,
            resolver,
        }
    }

    pub async fn run_filing(&self, request: &FilingRequest) -> (FilingResult, Vec<ProgressEntry>) {
        self.run_filing_with_cancel(request, CancellationToken::new()).await
    }

    /// 取消信号在步骤边界和重试等待中生效，不会打断付款
    pub async fn run_filing_with_cancel(
        &self,
        request: &FilingRequest,
        cancel: CancellationToken,
    ) -> (FilingResult, Vec<ProgressEntry>) {
        let ctx = RunCtx::generate(request.company_registration_number.trim());
        let mut log = ProgressLog::new();
        let mut current = WorkflowState::Pending;

        info!("{} 🚀 开始年度申报: {}", ctx, request.company_name);
        self.report(&ctx, current, None, None).await;

        let outcome = self.drive(&ctx, &cancel, request, &mut log, &mut current).await;

        let result = match outcome {
            Ok(submission) => self.complete(&ctx, &cancel, request, &submission, &mut log).await,
            Err(failure) => {
                let message = format!("申报在 {} 阶段失败: {}", failure.state, failure.error);
                error!("{} ❌ {}", ctx, message);
                let result = FilingResult::failed(
                    &request.company_registration_number,
                    &request.company_name,
                    failure.state,
                    failure.error.kind(),
                    message.clone(),
                    log.snapshot_paths(),
                );
                self.report(&ctx, WorkflowState::Failed, Some(&result), Some(&message))
                    .await;
                result
            }
        };

        (result, log.into_entries())
    }

    async fn drive(
        &self,
        ctx: &RunCtx,
        cancel: &CancellationToken,
        request: &FilingRequest,
        log: &mut ProgressLog,
        current: &mut WorkflowState,
    ) -> Result<Submission, StepFailure> {
        let exec = StepExecutor::new(
            self.deps.snapshots.as_ref(),
            self.deps.clock.as_ref(),
            ctx,
            cancel,
        );

        let report = self.preflight(&exec, log, request).await?;

        self.advance(ctx, current, WorkflowState::Verification).await;
        let company = self.verify_company(&exec, log, request).await?;

        self.advance(ctx, current, WorkflowState::Preparation).await;
        let package = self.prepare(&exec, log, &company, request, &report).await?;

        self.advance(ctx, current, WorkflowState::Filing).await;
        let driver = self.open_session(&exec, log).await?;

        let portal = AssertUnwindSafe(self.portal_phase(
            ctx,
            cancel,
            driver.as_ref(),
            log,
            current,
            request,
            &package,
        ))
        .catch_unwind()
        .await;

        if let Err(e) = driver.close().await {
            warn!("{} 关闭浏览器会话失败: {}", ctx, e);
        } else {
            info!("{} 浏览器会话已关闭", ctx);
        }

        match portal {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = FilingError::Browser("页面步骤异常中止".to_string());
                let mut metadata = Metadata::new();
                metadata.insert("error".into(), json!(error.to_string()));
                metadata.insert("error_kind".into(), json!(error.kind()));
                log.record(
                    self.deps.clock.as_ref(),
                    *current,
                    format!("✗ 页面步骤异常中止: {}", error),
                    metadata,
                );
                Err(StepFailure {
                    step: "portal",
                    state: *current,
                    cause: ErrorKind::Browser,
                    error,
                    attempts: 0,
                })
            }
        }
    }

    // ========== PENDING / VERIFICATION / PREPARATION ==========

    async fn preflight(
        &self,
        exec: &StepExecutor<'_>,
        log: &mut ProgressLog,
        request: &FilingRequest,
    ) -> Result<PreflightReport, StepFailure> {
        let spec = StepSpec::new(
            "preflight",
            "预检申报请求",
            WorkflowState::Pending,
            RetryPolicy::once(self.config.step_timeout()),
        );
        let today = self.deps.clock.now().date_naive();

        exec.execute(log, &spec, || async move {
            let report = preflight::validate(request, today)?;
            let done = Done::new(report.clone())
                .meta("deadline", report.deadline.to_string())
                .meta("days_remaining", report.days_remaining)
                .meta("deadline_passed", report.deadline_passed);
            if report.deadline_passed {
                warn!("⚠️ 已超过申报截止日 {}", report.deadline);
                Ok(done.note(format!("⚠️ 预检通过，但已超过申报截止日 {}", report.deadline)))
            } else {
                Ok(done.note(format!("✓ 预检通过，截止日 {}", report.deadline)))
            }
        })
        .await
    }

    async fn verify_company(
        &self,
        exec: &StepExecutor<'_>,
        log: &mut ProgressLog,
        request: &FilingRequest,
    ) -> Result<CompanyInfo, StepFailure> {
        let policy = RetryPolicy::from_config(&self.config).with_timeout(self.config.lookup_timeout());
        let spec = StepSpec::new("verify-company", "查询公司信息", WorkflowState::Verification, policy)
            .service("company-lookup");
        let lookup = self.deps.lookup.as_ref();
        let number = request.company_registration_number.trim();

        exec.execute(log, &spec, move || async move {
            match lookup.lookup(number).await? {
                Some(company) => Ok(Done::new(company.clone())
                    .note(format!("✓ 已找到公司: {}", company.name))
                    .meta("company_name", &company.name)
                    .meta("company_status", &company.status)),
                None => Err(FilingError::LookupFailed(format!(
                    "未找到注册号为 {} 的公司",
                    number
                ))),
            }
        })
        .await
    }

    async fn prepare(
        &self,
        exec: &StepExecutor<'_>,
        log: &mut ProgressLog,
        company: &CompanyInfo,
        request: &FilingRequest,
        report: &PreflightReport,
    ) -> Result<FilingPackage, StepFailure> {
        let spec = StepSpec::new(
            "prepare-package",
            "生成申报材料",
            WorkflowState::Preparation,
            RetryPolicy::once(self.config.step_timeout()),
        );
        let today = self.deps.clock.now().date_naive();
        let year_end = report.financial_year_end;

        exec.execute(log, &spec, move || async move {
            let package = derive_package(company, request, year_end, today)?;
            Ok(Done::new(package.clone())
                .meta("form_type", &package.form_type)
                .meta("documents", &package.documents))
        })
        .await
    }

    // ========== FILING / PAYMENT / SUBMISSION ==========

    async fn open_session(
        &self,
        exec: &StepExecutor<'_>,
        log: &mut ProgressLog,
    ) -> Result<Box<dyn UiDriver>, StepFailure> {
        let spec = StepSpec::new(
            "open-session",
            "启动浏览器会话",
            WorkflowState::Filing,
            RetryPolicy::once(self.config.page_timeout()),
        );
        let sessions = self.deps.sessions.as_ref();

        exec.execute(log, &spec, move || async move { Ok(Done::new(sessions.open().await?)) })
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn portal_phase(
        &self,
        ctx: &RunCtx,
        cancel: &CancellationToken,
        driver: &dyn UiDriver,
        log: &mut ProgressLog,
        current: &mut WorkflowState,
        request: &FilingRequest,
        package: &FilingPackage,
    ) -> Result<Submission, StepFailure> {
        let exec = StepExecutor::new(
            self.deps.snapshots.as_ref(),
            self.deps.clock.as_ref(),
            ctx,
            cancel,
        )
        .with_driver(driver);
        let portal = PortalSteps::new(&self.config, &self.resolver, driver, &exec);

        portal.authenticate(log).await?;
        portal.initiate(log, package).await?;

        self.advance(ctx, current, WorkflowState::Payment).await;
        self.await_payment(&exec, log, request).await?;

        self.advance(ctx, current, WorkflowState::Submission).await;
        portal
            .submit(log, &request.company_digits(), self.deps.solver.as_deref())
            .await
    }

    /// 付款只尝试一次；超时不重试，避免重复扣款
    async fn await_payment(
        &self,
        exec: &StepExecutor<'_>,
        log: &mut ProgressLog,
        request: &FilingRequest,
    ) -> Result<(), StepFailure> {
        let wait = self.config.payment_timeout();
        let policy = RetryPolicy::once(wait + self.config.page_timeout());
        let spec = StepSpec::new("await-payment", "等待付款完成", WorkflowState::Payment, policy)
            .service("payment");
        let payments = self.deps.payments.as_ref();
        let reference = request.payment_reference();
        let reference = reference.as_str();

        exec.execute(log, &spec, move || async move {
            match payments.await_completion(reference, wait).await? {
                PaymentStatus::Completed => Ok(Done::new(())
                    .note(format!("✓ 付款已完成: {}", reference))
                    .meta("payment_reference", reference)),
                PaymentStatus::TimedOut => Err(FilingError::ExternalServiceTimeout {
                    service: "payment".to_string(),
                    retryable: false,
                }),
                PaymentStatus::Declined(reason) => Err(FilingError::PaymentDeclined(reason)),
            }
        })
        .await
    }

    // ========== CONFIRMATION / COMPLETED ==========

    async fn complete(
        &self,
        ctx: &RunCtx,
        cancel: &CancellationToken,
        request: &FilingRequest,
        submission: &Submission,
        log: &mut ProgressLog,
    ) -> FilingResult {
        let mut current = WorkflowState::Submission;
        self.advance(ctx, &mut current, WorkflowState::Confirmation).await;

        let exec = StepExecutor::new(
            self.deps.snapshots.as_ref(),
            self.deps.clock.as_ref(),
            ctx,
            cancel,
        );
        let pending = FilingResult::completed(
            &request.company_registration_number,
            &request.company_name,
            submission,
            log.snapshot_paths(),
        );
        self.notify(&exec, log, &pending).await;

        let mut metadata = Metadata::new();
        metadata.insert("filing_reference".into(), json!(submission.filing_reference));
        metadata.insert("confirmation_number".into(), json!(submission.confirmation_number));
        metadata.insert("reference_synthetic".into(), json!(submission.reference_synthetic));
        log.record(
            self.deps.clock.as_ref(),
            WorkflowState::Completed,
            format!("🎉 年度申报完成，编号 {}", submission.filing_reference),
            metadata,
        );

        let result = FilingResult {
            screenshots: log.snapshot_paths(),
            ..pending
        };
        self.advance_to_completed(ctx, &mut current, &result).await;
        result
    }

    /// 通知失败只留警告，不影响申报结果
    async fn notify(&self, exec: &StepExecutor<'_>, log: &mut ProgressLog, result: &FilingResult) {
        let spec = StepSpec::new(
            "notify",
            "发送申报通知",
            WorkflowState::Confirmation,
            RetryPolicy::from_config(&self.config),
        )
        .optional()
        .service("notifier");
        let notifier = self.deps.notifier.as_deref();
        let run_id = exec.ctx().run_id.as_str();

        let outcome = exec
            .execute(log, &spec, move || async move {
                match notifier {
                    Some(notifier) => {
                        notifier.notify(run_id, result).await?;
                        Ok(Done::new(()).note("✓ 已发送申报通知"))
                    }
                    None => Ok(Done::new(()).note("✓ 未配置通知，跳过")),
                }
            })
            .await;

        if let Err(failure) = outcome {
            warn!("{} ⚠️ 申报通知未送达: {}", exec.ctx(), failure.error);
        }
    }

    // ========== 状态推进 ==========

    async fn advance(&self, ctx: &RunCtx, current: &mut WorkflowState, next: WorkflowState) {
        debug_assert!(current.can_transition_to(next), "{} -> {}", current, next);
        info!("{} 📍 {} → {}", ctx, current, next);
        *current = next;
        self.report(ctx, next, None, None).await;
    }

    async fn advance_to_completed(&self, ctx: &RunCtx, current: &mut WorkflowState, result: &FilingResult) {
        info!("{} 📍 {} → {}", ctx, current, WorkflowState::Completed);
        *current = WorkflowState::Completed;
        self.report(ctx, WorkflowState::Completed, Some(result), None).await;
    }

    /// 状态记录尽力而为
    async fn report(
        &self,
        ctx: &RunCtx,
        state: WorkflowState,
        result: Option<&FilingResult>,
        error: Option<&str>,
    ) {
        if let Err(e) = self
            .deps
            .status
            .record_status(&ctx.run_id, state, result, error)
            .await
        {
            warn!("{} ⚠️ 记录状态失败 ({}): {}", ctx, state, e);
        }
    }
}
