//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量申报处理器
//! - 管理应用生命周期（初始化、运行）
//! - 批量加载申报请求
//! - 控制并发数量（Semaphore）
//! - 把 Ctrl-C 转成取消信号
//! - 输出全局统计信息
//!
//! ### `filing_processor` - 单个申报处理器
//! - 运行一次 FilingFlow
//! - 保存结果与进度日志
//! - 清理已完成的请求文件
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<FilingRequest>)
//!     ↓
//! filing_processor (处理单个 FilingRequest)
//!     ↓
//! workflow::FilingFlow (状态机)
//!     ↓
//! services (能力层：resolver / lookup / payment / captcha / sinks)
//!     ↓
//! infrastructure (基础设施：UiDriver / PageDriver)
//! ```

pub mod batch_processor;
pub mod filing_processor;

pub use batch_processor::App;
pub use filing_processor::process_filing;
