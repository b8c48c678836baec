use crate::models::request::FilingRequest;
use crate::services::intents::SelectorOverrides;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从 TOML 文件加载申报请求
pub async fn load_filing_request(toml_file_path: &Path) -> Result<FilingRequest> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut request: FilingRequest = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    // 设置文件路径
    request.source_path = Some(toml_file_path.to_string_lossy().to_string());

    Ok(request)
}

/// 从文件夹中加载所有申报请求
///
/// 单个文件解析失败只记录警告，不影响其他文件
pub async fn load_all_filing_requests(folder_path: &str) -> Result<Vec<FilingRequest>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    // 按文件名排序，保证处理顺序稳定
    paths.sort();

    let mut requests = Vec::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_filing_request(&path).await {
            Ok(request) => {
                tracing::info!(
                    "成功加载申报请求: {} ({})",
                    request.company_name,
                    request.company_registration_number
                );
                requests.push(request);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(requests)
}

/// 加载选择器覆盖配置
pub async fn load_selector_overrides(path: &Path) -> Result<SelectorOverrides> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取选择器配置: {}", path.display()))?;

    toml::from_str(&content).with_context(|| format!("无法解析选择器配置: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_load_all_skips_broken_files() {
        let dir = scratch_dir("filing-requests");
        std::fs::write(
            dir.join("01_acme.toml"),
            r#"
            company_registration_number = "2021/123456/07"
            company_name = "Acme Pty Ltd"
            financial_year_end = "2024-02-28"
            contact_email = "finance@acme.co.za"
            contact_phone = "+27821234567"
            "#,
        )
        .unwrap();
        std::fs::write(dir.join("02_broken.toml"), "company_name = ").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let requests = load_all_filing_requests(dir.to_str().unwrap()).await.unwrap();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].company_name, "Acme Pty Ltd");
        assert!(requests[0]
            .source_path
            .as_deref()
            .unwrap()
            .ends_with("01_acme.toml"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_missing_folder_is_an_error() {
        let result = load_all_filing_requests("/definitely/not/here").await;
        assert!(result.is_err());
    }
}
