//! 单个申报处理器 - 编排层
//!
//! 运行一次 FilingFlow，把结果和进度日志写成 JSON，成功后删除请求文件

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::request::FilingRequest;
use crate::workflow::FilingFlow;

/// 处理单个申报请求
///
/// # 返回
/// 返回申报是否成功
pub async fn process_filing(
    flow: &FilingFlow,
    request: FilingRequest,
    index: usize,
    results_folder: &str,
    cancel: CancellationToken,
) -> Result<bool> {
    info!(
        "[申报 {}] 📄 {} ({})",
        index, request.company_name, request.company_registration_number
    );

    let (result, entries) = flow.run_filing_with_cancel(&request, cancel).await;

    let output = result_path(results_folder, &request, index, Utc::now());
    fs::create_dir_all(results_folder)
        .await
        .with_context(|| format!("无法创建结果目录: {}", results_folder))?;
    let body = serde_json::to_vec_pretty(&json!({
        "request": &request,
        "result": &result,
        "progress": &entries,
    }))?;
    fs::write(&output, body)
        .await
        .with_context(|| format!("无法写入结果文件: {}", output.display()))?;
    info!("[申报 {}] 结果已保存至: {}", index, output.display());

    if result.success {
        info!(
            "[申报 {}] ✅ 成功，编号 {}{}",
            index,
            result.filing_reference.as_deref().unwrap_or("-"),
            if result.reference_synthetic { " (合成)" } else { "" }
        );
        remove_request_file(&request).await;
    } else {
        warn!(
            "[申报 {}] ❌ 失败: {}",
            index,
            result.error_message.as_deref().unwrap_or("未知原因")
        );
    }

    Ok(result.success)
}

/// 优先使用请求文件名，没有文件时用 `{注册号}_{时间}_{序号}`
fn result_path(results_folder: &str, request: &FilingRequest, index: usize, now: DateTime<Utc>) -> PathBuf {
    let stem = request
        .source_path
        .as_deref()
        .and_then(|path| Path::new(path).file_stem())
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| {
            format!(
                "{}_{}_{}",
                request.company_digits(),
                now.format("%Y%m%d%H%M%S"),
                index
            )
        });
    Path::new(results_folder).join(format!("{}.json", stem))
}

/// 删除已处理的请求文件，失败只记警告
async fn remove_request_file(request: &FilingRequest) {
    let Some(path) = request.source_path.as_deref() else {
        return;
    };
    match fs::remove_file(path).await {
        Ok(_) => info!("🗑️ 已删除处理完成的文件: {}", path),
        Err(e) => warn!("删除文件失败 {}: {}", path, e),
    }
}
