//! 基础设施层
//!
//! 页面驱动能力与浏览器会话，不包含申报业务

pub mod driver;
pub mod page_driver;
pub mod session;

pub use driver::{Descriptor, ElementHandle, UiDriver, WaitCondition};
pub use page_driver::PageDriver;
pub use session::{CdpSessionFactory, SessionFactory};
