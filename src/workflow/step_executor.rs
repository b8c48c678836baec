//! 步骤执行器 - 流程层
//!
//! 每个步骤统一经过这里：超时、重试、前后截图、写一条进度记录

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ErrorKind, FilingError};
use crate::infrastructure::driver::UiDriver;
use crate::models::progress::{Metadata, ProgressLog};
use crate::models::state::WorkflowState;
use crate::services::snapshot_store::SnapshotSink;
use crate::utils::clock::Clock;
use crate::workflow::run_ctx::RunCtx;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// 首次之外最多再尝试几次
    pub max_retries: u32,
    /// 两次尝试之间的等待
    pub backoff: Duration,
    /// 单次尝试的超时
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            timeout,
        }
    }

    /// 通用重试预算
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_retries, config.retry_delay(), config.step_timeout())
    }

    /// 只尝试一次
    pub fn once(timeout: Duration) -> Self {
        Self::new(0, Duration::ZERO, timeout)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// 步骤描述
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// 稳定的步骤标识，用于截图文件名和错误信息
    pub key: &'static str,
    /// 写入进度日志的标题
    pub title: String,
    pub state: WorkflowState,
    pub policy: RetryPolicy,
    /// 可选步骤失败只留下警告
    pub optional: bool,
    /// 调用外部服务的步骤填服务名，超时归类为外部服务超时
    pub service: Option<&'static str>,
}

impl StepSpec {
    pub fn new(key: &'static str, title: impl Into<String>, state: WorkflowState, policy: RetryPolicy) -> Self {
        Self {
            key,
            title: title.into(),
            state,
            policy,
            optional: false,
            service: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn service(mut self, name: &'static str) -> Self {
        self.service = Some(name);
        self
    }
}

/// 步骤成功的产出
#[derive(Debug, Clone)]
pub struct Done<T> {
    pub value: T,
    pub note: Option<String>,
    pub metadata: Metadata,
}

impl<T> Done<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            note: None,
            metadata: Metadata::new(),
        }
    }

    /// 替换默认的成功描述
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(JsonValue::Null);
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn extend(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }
}

/// 步骤最终失败
#[derive(Debug)]
pub struct StepFailure {
    pub step: &'static str,
    pub state: WorkflowState,
    /// 最后一次错误的分类
    pub cause: ErrorKind,
    /// 交给状态机的错误（页面类错误已升级）
    pub error: FilingError,
    pub attempts: u32,
}

impl From<StepFailure> for FilingError {
    fn from(failure: StepFailure) -> Self {
        failure.error
    }
}

/// 步骤执行器
///
/// 职责：
/// - 按策略执行、超时、重试
/// - 会话存在时在步骤前后截图，截图失败只记日志
/// - 每次执行只写一条进度记录
/// - 不关心步骤内容
pub struct StepExecutor<'a> {
    driver: Option<&'a dyn UiDriver>,
    snapshots: &'a dyn SnapshotSink,
    clock: &'a dyn Clock,
    ctx: &'a RunCtx,
    cancel: &'a CancellationToken,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        snapshots: &'a dyn SnapshotSink,
        clock: &'a dyn Clock,
        ctx: &'a RunCtx,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            driver: None,
            snapshots,
            clock,
            ctx,
            cancel,
        }
    }

    /// 绑定页面会话，之后的步骤会截图
    pub fn with_driver(mut self, driver: &'a dyn UiDriver) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    pub fn ctx(&self) -> &'a RunCtx {
        self.ctx
    }

    pub async fn execute<T, F, Fut>(
        &self,
        log: &mut ProgressLog,
        spec: &StepSpec,
        mut action: F,
    ) -> Result<T, StepFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Done<T>, FilingError>>,
    {
        if self.cancel.is_cancelled() {
            let error = FilingError::Cancelled;
            let mut metadata = Metadata::new();
            metadata.insert("attempts".into(), json!(0));
            metadata.insert("error".into(), json!(error.to_string()));
            metadata.insert("error_kind".into(), json!(error.kind()));
            log.record(
                self.clock,
                spec.state,
                format!("✗ {}: {}", spec.title, error),
                metadata,
            );
            return Err(StepFailure {
                step: spec.key,
                state: spec.state,
                cause: ErrorKind::Cancelled,
                error,
                attempts: 0,
            });
        }

        let mut snapshots = Vec::new();
        self.capture(spec.key, "before", &mut snapshots).await;

        let max_attempts = spec.policy.max_retries + 1;
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            debug!("{} {} 第 {}/{} 次尝试", self.ctx, spec.title, attempts, max_attempts);

            let error = match tokio::time::timeout(spec.policy.timeout, action()).await {
                Ok(Ok(done)) => break Ok(done),
                Ok(Err(e)) => e,
                Err(_) => match spec.service {
                    Some(service) => FilingError::ExternalServiceTimeout {
                        service: service.to_string(),
                        retryable: spec.policy.max_retries > 0,
                    },
                    None => FilingError::timeout(spec.title.clone(), spec.policy.timeout),
                },
            };

            if !error.is_retryable() || attempts >= max_attempts {
                break Err(error);
            }

            warn!(
                "{} ⚠️ {} 失败，{:?} 后重试 ({}/{}): {}",
                self.ctx, spec.title, spec.policy.backoff, attempts, max_attempts, error
            );
            // 退避期间收到取消信号则不再重试
            tokio::select! {
                _ = self.cancel.cancelled() => break Err(FilingError::Cancelled),
                _ = tokio::time::sleep(spec.policy.backoff) => {}
            }
        };

        self.capture(spec.key, "after", &mut snapshots).await;

        let mut metadata = Metadata::new();
        metadata.insert("step".into(), json!(spec.key));
        metadata.insert("attempts".into(), json!(attempts));
        if !snapshots.is_empty() {
            metadata.insert("snapshots".into(), json!(snapshots));
        }

        match outcome {
            Ok(done) => {
                metadata.extend(done.metadata);
                let description = done.note.unwrap_or_else(|| format!("✓ {}", spec.title));
                log.record(self.clock, spec.state, description, metadata);
                Ok(done.value)
            }
            Err(error) => {
                let cause = error.kind();
                metadata.insert("error".into(), json!(error.to_string()));
                metadata.insert("error_kind".into(), json!(cause));
                let description = if spec.optional {
                    metadata.insert("optional".into(), json!(true));
                    format!("⚠️ {} 未完成，继续: {}", spec.title, error)
                } else {
                    format!("✗ {}: {}", spec.title, error)
                };
                log.record(self.clock, spec.state, description, metadata);

                let error = if cause.is_ui_class() {
                    FilingError::UnrecoverableUiState {
                        step: spec.key.to_string(),
                        cause: error.to_string(),
                    }
                } else {
                    error
                };

                Err(StepFailure {
                    step: spec.key,
                    state: spec.state,
                    cause,
                    error,
                    attempts,
                })
            }
        }
    }

    /// 截图并保存；任何失败都只记日志
    async fn capture(&self, key: &str, phase: &str, paths: &mut Vec<String>) {
        let Some(driver) = self.driver else {
            return;
        };

        let label = format!("{}-{}", key, phase);
        let png = match driver.snapshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!("{} 截图失败 ({}): {}", self.ctx, label, e);
                return;
            }
        };

        match self.snapshots.store(&self.ctx.run_id, &label, png).await {
            Ok(Some(path)) => paths.push(path),
            Ok(None) => {}
            Err(e) => warn!("{} 保存截图失败 ({}): {}", self.ctx, label, e),
        }
    }
}
