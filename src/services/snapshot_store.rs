//! 截图存储服务 - 业务能力层

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::fs;

use crate::error::FilingError;

/// 截图存储（只写）
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// 返回保存位置；不保存时返回 `None`
    async fn store(&self, run_id: &str, label: &str, png: Vec<u8>) -> Result<Option<String>, FilingError>;
}

/// 写入本地目录：`{dir}/{run_id}/{seq}_{label}.png`，旁边附带同名 `.json` 元数据
pub struct FsSnapshotStore {
    dir: PathBuf,
    seq: AtomicU64,
}

impl FsSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SnapshotSink for FsSnapshotStore {
    async fn store(&self, run_id: &str, label: &str, png: Vec<u8>) -> Result<Option<String>, FilingError> {
        let run_dir = self.dir.join(run_id);
        fs::create_dir_all(&run_dir).await?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let stem = format!("{:04}_{}", seq, sanitize(label));
        let png_path = run_dir.join(format!("{}.png", stem));
        let meta_path = run_dir.join(format!("{}.json", stem));

        let metadata = json!({
            "run_id": run_id,
            "label": label,
            "captured_at": Utc::now(),
            "size_bytes": png.len(),
        });

        fs::write(&png_path, &png).await?;
        fs::write(&meta_path, serde_json::to_vec_pretty(&metadata)?).await?;

        Ok(Some(png_path.to_string_lossy().to_string()))
    }
}

/// 不保存截图
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSnapshots;

#[async_trait]
impl SnapshotSink for DiscardSnapshots {
    async fn store(&self, _run_id: &str, _label: &str, _png: Vec<u8>) -> Result<Option<String>, FilingError> {
        Ok(None)
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
