//! 批量申报处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量申报的调度和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建外部服务适配器、加载选择器覆盖、构造 FilingFlow
//! 2. **批量加载**：扫描并加载所有待处理的申报请求
//! 3. **并发控制**：使用 Semaphore 限制同时运行的申报数量
//! 4. **分批处理**：每批完成后再开始下一批
//! 5. **取消信号**：Ctrl-C 触发 CancellationToken，流程在步骤边界停下
//! 6. **全局统计**：汇总所有申报的结果
//!
//! 每个申报在流程内部独占一个浏览器会话，编排层不持有浏览器

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::loaders::{load_all_filing_requests, load_selector_overrides};
use crate::models::request::FilingRequest;
use crate::orchestrator::filing_processor;
use crate::services::intents::SelectorRegistry;
use crate::utils::logging::{
    log_batch_complete, log_batch_start, log_requests_loaded, log_startup, print_final_stats,
};
use crate::workflow::{Collaborators, FilingFlow};

/// 应用主结构
pub struct App {
    config: Arc<Config>,
    flow: Arc<FilingFlow>,
    cancel: CancellationToken,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(config.max_concurrent_filings, &config.environment.to_string());

        let config = Arc::new(config);
        let registry = match &config.selector_overrides_file {
            Some(path) => {
                let overrides = load_selector_overrides(Path::new(path)).await?;
                info!("✓ 已加载选择器覆盖: {}", path);
                SelectorRegistry::with_overrides(overrides)
            }
            None => SelectorRegistry::new(),
        };

        let deps = Collaborators::from_config(&config).context("无法创建外部服务客户端")?;
        if deps.solver.is_none() {
            warn!("⚠️ 未配置验证码识别服务，遇到验证码的申报会失败");
        }
        let flow = Arc::new(FilingFlow::new(config.clone(), deps, registry));

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⚠️ 收到中断信号，正在运行的申报将在当前步骤结束后停止");
                on_signal.cancel();
            }
        });

        Ok(Self {
            config,
            flow,
            cancel,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        info!("\n📁 正在扫描待处理的申报请求...");
        let requests = load_all_filing_requests(&self.config.requests_folder).await?;

        if requests.is_empty() {
            warn!("⚠️ 没有找到待处理的TOML文件，程序结束");
            return Ok(());
        }

        log_requests_loaded(requests.len(), self.config.max_concurrent_filings);

        let stats = self.process_all(requests).await?;
        print_final_stats(stats.success, stats.failed, stats.total, &self.config.status_log_file);

        Ok(())
    }

    async fn process_all(&self, requests: Vec<FilingRequest>) -> Result<ProcessingStats> {
        let batch_size = self.config.max_concurrent_filings.max(1);
        let semaphore = Arc::new(Semaphore::new(batch_size));
        let total = requests.len();
        let total_batches = total.div_ceil(batch_size);
        let mut stats = ProcessingStats {
            total,
            ..Default::default()
        };

        for (batch_idx, batch) in requests.chunks(batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                warn!("⚠️ 已取消，剩余 {} 个申报不再处理", total - stats.success - stats.failed);
                stats.failed += total - stats.success - stats.failed;
                break;
            }

            let batch_start = batch_idx * batch_size;
            log_batch_start(batch_idx + 1, total_batches, batch_start + 1, batch_start + batch.len(), total);

            let result = self.process_batch(batch, batch_start, semaphore.clone()).await?;
            stats.success += result.success;
            stats.failed += result.failed;

            log_batch_complete(batch_idx + 1, result.success, result.success + result.failed);
        }

        Ok(stats)
    }

    async fn process_batch(
        &self,
        batch: &[FilingRequest],
        batch_start: usize,
        semaphore: Arc<Semaphore>,
    ) -> Result<BatchResult> {
        let mut handles = Vec::new();

        for (idx, request) in batch.iter().enumerate() {
            let index = batch_start + idx + 1;
            let permit = semaphore.clone().acquire_owned().await?;
            let flow = self.flow.clone();
            let request = request.clone();
            let results_folder = self.config.results_folder.clone();
            let cancel = self.cancel.child_token();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                filing_processor::process_filing(&flow, request, index, &results_folder, cancel).await
            });
            handles.push((index, handle));
        }

        let mut result = BatchResult::default();
        for (index, handle) in handles {
            match handle.await {
                Ok(Ok(true)) => result.success += 1,
                Ok(Ok(false)) => result.failed += 1,
                Ok(Err(e)) => {
                    error!("[申报 {}] ❌ 处理过程中发生错误: {:#}", index, e);
                    result.failed += 1;
                }
                Err(e) => {
                    error!("[申报 {}] 任务执行失败: {}", index, e);
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }
}

/// 处理统计
#[derive(Debug, Default)]
struct ProcessingStats {
    success: usize,
    failed: usize,
    total: usize,
}

/// 批次处理结果
#[derive(Debug, Default)]
struct BatchResult {
    success: usize,
    failed: usize,
}
