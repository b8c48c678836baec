//! 浏览器会话工厂
//!
//! 每次申报运行获得一个独占的 `UiDriver`，运行结束时由流程负责关闭

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::browser::{connect_new_page, launch_browser};
use crate::config::Config;
use crate::error::FilingError;
use crate::infrastructure::driver::UiDriver;
use crate::infrastructure::page_driver::PageDriver;

/// 会话工厂
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// 打开一个新的独占会话
    async fn open(&self) -> Result<Box<dyn UiDriver>, FilingError>;
}

/// 基于 CDP 的会话工厂
///
/// 配置了调试端口时连接已有浏览器，否则每次运行单独启动一个
pub struct CdpSessionFactory {
    config: Arc<Config>,
}

impl CdpSessionFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for CdpSessionFactory {
    async fn open(&self) -> Result<Box<dyn UiDriver>, FilingError> {
        let driver = match self.config.browser_debug_port {
            Some(port) => {
                let (browser, handler, page) = connect_new_page(port).await?;
                info!("✓ 已连接浏览器 (端口 {})", port);
                PageDriver::attached(browser, handler, page)
            }
            None => {
                let (browser, handler, page) = launch_browser(&self.config).await?;
                PageDriver::launched(browser, handler, page)
            }
        };
        Ok(Box::new(driver))
    }
}
