//! # Annual Returns Filer
//!
//! CIPC 年度申报自动化工具：预检 → 公司核验 → 材料准备 → 门户填报 → 支付 → 提交 → 确认
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（浏览器会话），只暴露能力
//! - `UiDriver` - 页面能力的抽象接口（导航、查找、填写、点击、等待、截图）
//! - `PageDriver` - 基于 CDP 的唯一 page owner
//! - `SessionFactory` - 每次申报打开一个独立会话
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `SelectorResolver` - 按意图定位元素：结构化选择器优先，启发式打分兜底
//! - `CompanyLookup` / `PaymentGateway` / `CaptchaSolver` - 外部服务
//! - `StatusSink` / `SnapshotSink` / `Notifier` - 状态、截图、通知的输出
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一次申报"的完整状态机
//! - `StepExecutor` - 超时、重试、截图与进度记录
//! - `CaptchaProtocol` - 验证码子流程
//! - `FilingFlow` - PENDING → ... → COMPLETED / FAILED
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量申报，管理并发与取消
//! - `orchestrator/filing_processor` - 单个申报，保存结果
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, Environment};
pub use error::{ErrorKind, FilingError};
pub use infrastructure::{CdpSessionFactory, PageDriver, SessionFactory, UiDriver};
pub use models::{FilingRequest, FilingResult, ProgressEntry, WorkflowState};
pub use orchestrator::{process_filing, App};
pub use services::{SelectorRegistry, SelectorResolver};
pub use workflow::{Collaborators, FilingFlow, RunCtx};
