//! 页面驱动能力 - 基础设施层
//!
//! 流程只通过这个 trait 接触页面：导航、查找、填写、点击、等待、截图

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FilingError;

/// 元素定位描述
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Descriptor {
    /// CSS 选择器
    Css(String),
    /// 指定标签且可见文本包含给定内容（不区分大小写）
    TagWithText { tag: String, text: String },
}

impl Descriptor {
    pub fn css(selector: impl Into<String>) -> Self {
        Descriptor::Css(selector.into())
    }

    pub fn tag_with_text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Descriptor::TagWithText {
            tag: tag.into(),
            text: text.into(),
        }
    }
}

impl Display for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Descriptor::Css(css) => f.write_str(css),
            Descriptor::TagWithText { tag, text } => write!(f, "{}:has-text(\"{}\")", tag, text),
        }
    }
}

/// 页面元素句柄
///
/// 查找时一并读取的属性快照；`id` 在同一页面内有效
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: String,
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
}

impl ElementHandle {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// 可见且可用
    pub fn is_live(&self) -> bool {
        self.visible && self.enabled
    }
}

/// 等待条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WaitCondition {
    /// 任一描述匹配到元素
    AnyPresent(Vec<Descriptor>),
    /// 所有描述都匹配不到元素
    AllAbsent(Vec<Descriptor>),
    /// 当前地址包含给定文本
    UrlContains(String),
}

/// 页面驱动
///
/// 所有调用都可能挂起；实现需要可以跨任务共享
#[async_trait]
pub trait UiDriver: Send + Sync {
    /// 打开页面
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), FilingError>;

    /// 查找所有匹配的元素（按文档顺序）
    async fn find_all(&self, descriptor: &Descriptor) -> Result<Vec<ElementHandle>, FilingError>;

    /// 写入输入框/下拉框的值
    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), FilingError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), FilingError>;

    /// 读取元素当前文本
    async fn read_text(&self, element: &ElementHandle) -> Result<String, FilingError>;

    /// 等待条件成立；超时返回 `Ok(false)`
    async fn wait_for(&self, condition: &WaitCondition, timeout: Duration) -> Result<bool, FilingError>;

    /// 页面可见文本
    async fn page_text(&self) -> Result<String, FilingError>;

    /// 整页截图（PNG）
    async fn snapshot(&self) -> Result<Vec<u8>, FilingError>;

    /// 释放会话
    async fn close(&self) -> Result<(), FilingError>;
}
