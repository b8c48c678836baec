use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::FilingError;

/// 连接到已开启调试端口的浏览器，并新建一个独占页面
///
/// 不复用已有标签页，避免多个申报共享同一页面
pub async fn connect_new_page(port: u16) -> Result<(Browser, JoinHandle<()>, Page), FilingError> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        FilingError::Session(format!("连接浏览器 {} 失败: {}", browser_url, e))
    })?;
    debug!("浏览器连接成功");

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
    debug!("已创建独占页面");

    Ok((browser, handler_task, page))
}
