use std::path::Path;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::FilingError;

/// 为一次申报单独启动浏览器，返回空白页面
///
/// 返回的事件处理任务需要和浏览器一起释放
pub async fn launch_browser(config: &Config) -> Result<(Browser, JoinHandle<()>, Page), FilingError> {
    info!("🚀 启动浏览器 (headless={})...", config.headless);

    let mut builder = BrowserConfig::builder();
    builder = if config.headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };
    if let Some(executable) = &config.chrome_executable {
        debug!("浏览器可执行文件: {}", executable);
        builder = builder.chrome_executable(Path::new(executable));
    }

    let browser_config = builder
        .args(vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--window-size=1920,1080",
        ])
        .build()
        .map_err(|e| {
            error!("配置浏览器失败: {}", e);
            FilingError::Session(format!("配置浏览器失败: {}", e))
        })?;

    let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        FilingError::Session(format!("启动浏览器失败: {}", e))
    })?;
    debug!("浏览器启动成功");

    // 在后台处理浏览器事件
    let handler_task = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let page = match browser.new_page("about:blank").await {
        Ok(page) => page,
        Err(e) => {
            handler_task.abort();
            error!("创建页面失败: {}", e);
            return Err(FilingError::Session(format!("创建页面失败: {}", e)));
        }
    };

    info!("✅ 浏览器已就绪");
    Ok((browser, handler_task, page))
}
