//! 进度/审计日志
//!
//! 只追加，条目按写入顺序排列，写入后不再修改

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::info;

use crate::models::state::WorkflowState;
use crate::utils::clock::Clock;

/// 进度条目的附加信息
pub type Metadata = Map<String, JsonValue>;

/// 单条进度记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub state: WorkflowState,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ProgressEntry {
    /// 读取 metadata 中的布尔标记
    pub fn flag(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }
}

/// 一次申报运行的进度日志
pub struct ProgressLog {
    entries: Vec<ProgressEntry>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// 追加一条记录
    ///
    /// 时钟回拨时沿用上一条的时间戳，保证时间戳不递减
    pub fn record(
        &mut self,
        clock: &dyn Clock,
        state: WorkflowState,
        description: impl Into<String>,
        metadata: Metadata,
    ) -> &ProgressEntry {
        let description = description.into();
        let mut timestamp = clock.now();
        if let Some(last) = self.entries.last() {
            if timestamp < last.timestamp {
                timestamp = last.timestamp;
            }
        }

        info!("[{}] {}", state, description);

        self.entries.push(ProgressEntry {
            state,
            description,
            timestamp,
            metadata,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ProgressEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有条目中记录的截图路径
    pub fn snapshot_paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|entry| entry.metadata.get("snapshots"))
            .filter_map(|value| value.as_array())
            .flatten()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect()
    }

    pub fn into_entries(self) -> Vec<ProgressEntry> {
        self.entries
    }
}

impl Default for ProgressLog {
    fn default() -> Self {
        Self::new()
    }
}
