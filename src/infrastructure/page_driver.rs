//! CDP 页面驱动 - 基础设施层
//!
//! 持有一次申报独占的 Page，把 `UiDriver` 的每个操作翻译成页面内执行的 JS

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::FilingError;
use crate::infrastructure::driver::{Descriptor, ElementHandle, UiDriver, WaitCondition};

/// 按描述查询元素，返回 Element 数组；选择器非法时返回空数组
const QUERY_FN: &str = r#"(descriptor) => {
    try {
        if (descriptor.kind === 'css') {
            return Array.from(document.querySelectorAll(descriptor.value));
        }
        const needle = descriptor.value.text.toLowerCase();
        return Array.from(document.querySelectorAll(descriptor.value.tag))
            .filter(el => (el.innerText || el.value || '').toLowerCase().includes(needle));
    } catch (e) {
        return [];
    }
}"#;

/// 给元素打上句柄并读取属性快照
const DESCRIBE_FN: &str = r#"(query, descriptor) => {
    window.__filerSeq = window.__filerSeq || 0;
    return query(descriptor).map(el => {
        if (!el.dataset.filerId) {
            window.__filerSeq += 1;
            el.dataset.filerId = 'h' + window.__filerSeq;
        }
        const attributes = {};
        for (const attr of Array.from(el.attributes)) {
            attributes[attr.name] = attr.value;
        }
        if (el.src) {
            attributes.src = el.src;
        }
        const rect = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        return {
            id: el.dataset.filerId,
            tag: el.tagName.toLowerCase(),
            attributes,
            text: (el.innerText || el.value || '').trim().slice(0, 500),
            visible: rect.width > 0 && rect.height > 0
                && style.visibility !== 'hidden' && style.display !== 'none',
            enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
        };
    });
}"#;

/// 写值后派发 input/change 事件，兼容受控组件
const FILL_FN: &str = r#"(id, value) => {
    const el = document.querySelector(`[data-filer-id="${id}"]`);
    if (!el) {
        return { ok: false, reason: '元素已从页面移除' };
    }
    if (el.disabled) {
        return { ok: false, reason: '元素不可用' };
    }
    el.focus();
    if (el.tagName === 'SELECT') {
        const option = Array.from(el.options)
            .find(o => o.value === value || o.text.trim().toLowerCase() === value.toLowerCase());
        if (!option) {
            return { ok: false, reason: '下拉框中没有匹配的选项' };
        }
        el.value = option.value;
    } else {
        const proto = el.tagName === 'TEXTAREA'
            ? HTMLTextAreaElement.prototype
            : HTMLInputElement.prototype;
        const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
        setter.call(el, value);
    }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return { ok: true };
}"#;

const CLICK_FN: &str = r#"(id) => {
    const el = document.querySelector(`[data-filer-id="${id}"]`);
    if (!el) {
        return { ok: false, reason: '元素已从页面移除' };
    }
    if (el.disabled) {
        return { ok: false, reason: '元素不可用' };
    }
    el.scrollIntoView({ block: 'center' });
    el.click();
    return { ok: true };
}"#;

const READ_TEXT_FN: &str = r#"(id) => {
    const el = document.querySelector(`[data-filer-id="${id}"]`);
    return el ? (el.innerText || el.value || '').trim() : null;
}"#;

#[derive(Debug, Deserialize)]
struct ActionReply {
    ok: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// CDP 页面驱动
///
/// 职责：
/// - 持有一次运行独占的 Page 以及对应的 Browser 连接
/// - 自己启动的浏览器在关闭时整体退出，连接的浏览器只关闭本页面
/// - 不认识申报流程
pub struct PageDriver {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    owns_process: bool,
    poll_interval: Duration,
}

impl PageDriver {
    /// 为本次运行单独启动的浏览器
    pub fn launched(browser: Browser, handler: JoinHandle<()>, page: Page) -> Self {
        Self::build(browser, handler, page, true)
    }

    /// 连接到外部浏览器后新建的页面
    pub fn attached(browser: Browser, handler: JoinHandle<()>, page: Page) -> Self {
        Self::build(browser, handler, page, false)
    }

    fn build(browser: Browser, handler: JoinHandle<()>, page: Page, owns_process: bool) -> Self {
        Self {
            page,
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler)),
            owns_process,
            poll_interval: Duration::from_millis(250),
        }
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue, FilingError> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T, FilingError> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    async fn check(&self, condition: &WaitCondition) -> Result<bool, FilingError> {
        match condition {
            WaitCondition::UrlContains(needle) => {
                let url = self.page.url().await?.unwrap_or_default();
                Ok(url.contains(needle.as_str()))
            }
            WaitCondition::AnyPresent(descriptors) => {
                let script = format!(
                    "((query, descriptors) => descriptors.some(d => query(d).length > 0))({}, {})",
                    QUERY_FN,
                    serde_json::to_string(descriptors)?
                );
                self.eval_as(script).await
            }
            WaitCondition::AllAbsent(descriptors) => {
                let script = format!(
                    "((query, descriptors) => descriptors.every(d => query(d).length === 0))({}, {})",
                    QUERY_FN,
                    serde_json::to_string(descriptors)?
                );
                self.eval_as(script).await
            }
        }
    }

    async fn act(&self, action: &str, script: String) -> Result<(), FilingError> {
        let reply: ActionReply = self.eval_as(script).await?;
        if reply.ok {
            Ok(())
        } else {
            Err(FilingError::action_rejected(
                action,
                reply.reason.unwrap_or_else(|| "未知原因".to_string()),
            ))
        }
    }
}

#[async_trait]
impl UiDriver for PageDriver {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), FilingError> {
        debug!("导航到: {}", url);
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(FilingError::Browser(format!("导航到 {} 失败: {}", url, e))),
            Err(_) => Err(FilingError::timeout(format!("打开页面 {}", url), timeout)),
        }
    }

    async fn find_all(&self, descriptor: &Descriptor) -> Result<Vec<ElementHandle>, FilingError> {
        let script = format!(
            "({})({}, {})",
            DESCRIBE_FN,
            QUERY_FN,
            serde_json::to_string(descriptor)?
        );
        self.eval_as(script).await
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), FilingError> {
        let script = format!(
            "({})({}, {})",
            FILL_FN,
            serde_json::to_string(&element.id)?,
            serde_json::to_string(value)?
        );
        self.act("填写", script).await
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), FilingError> {
        let script = format!("({})({})", CLICK_FN, serde_json::to_string(&element.id)?);
        self.act("点击", script).await
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String, FilingError> {
        let script = format!("({})({})", READ_TEXT_FN, serde_json::to_string(&element.id)?);
        let text: Option<String> = self.eval_as(script).await?;
        text.ok_or_else(|| FilingError::action_rejected("读取文本", "元素已从页面移除"))
    }

    async fn wait_for(&self, condition: &WaitCondition, timeout: Duration) -> Result<bool, FilingError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.check(condition).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                // 页面跳转期间执行上下文会短暂失效，继续轮询
                Err(e) => debug!("等待条件检查失败，继续轮询: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn page_text(&self) -> Result<String, FilingError> {
        self.eval_as("document.body ? document.body.innerText : ''").await
    }

    async fn snapshot(&self) -> Result<Vec<u8>, FilingError> {
        let params = ScreenshotParams::builder().full_page(true).build();
        Ok(self.page.screenshot(params).await?)
    }

    async fn close(&self) -> Result<(), FilingError> {
        let browser = self
            .browser
            .lock()
            .map_err(|_| FilingError::Session("浏览器句柄锁已损坏".to_string()))?
            .take();
        let handler = self
            .handler
            .lock()
            .map_err(|_| FilingError::Session("浏览器句柄锁已损坏".to_string()))?
            .take();

        match browser {
            Some(mut browser) if self.owns_process => {
                debug!("关闭浏览器进程");
                if let Err(e) = browser.close().await {
                    warn!("关闭浏览器失败: {}", e);
                }
                if let Err(e) = browser.wait().await {
                    warn!("等待浏览器退出失败: {}", e);
                }
            }
            Some(_) => {
                debug!("关闭页面，保留外部浏览器");
                if let Err(e) = self.page.clone().close().await {
                    warn!("关闭页面失败: {}", e);
                }
            }
            // 已经关闭过
            None => return Ok(()),
        }

        if let Some(handler) = handler {
            handler.abort();
        }
        Ok(())
    }
}
