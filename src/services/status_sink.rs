//! 状态记录服务 - 业务能力层
//!
//! 只负责"记录状态变化"能力，不关心流程

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::error::FilingError;
use crate::models::result::FilingResult;
use crate::models::state::WorkflowState;

/// 状态记录
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn record_status(
        &self,
        run_id: &str,
        state: WorkflowState,
        result: Option<&FilingResult>,
        error: Option<&str>,
    ) -> Result<(), FilingError>;
}

/// 追加写入 JSON Lines 文件
///
/// 职责：
/// - 每次状态变化写一行
/// - 多个申报并发写入同一文件时整行写入，互不穿插
pub struct JsonlStatusSink {
    path: String,
    write_lock: Mutex<()>,
}

impl JsonlStatusSink {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl StatusSink for JsonlStatusSink {
    async fn record_status(
        &self,
        run_id: &str,
        state: WorkflowState,
        result: Option<&FilingResult>,
        error: Option<&str>,
    ) -> Result<(), FilingError> {
        debug!("记录状态: {} -> {}", run_id, state);

        let mut line = serde_json::to_string(&json!({
            "run_id": run_id,
            "state": state,
            "recorded_at": Utc::now(),
            "result": result,
            "error": error,
        }))?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| FilingError::service("status-log", "写入锁已损坏"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;

        Ok(())
    }
}
