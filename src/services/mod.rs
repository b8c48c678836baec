//! 业务能力层
//!
//! 每个服务只描述一种能力，不关心申报流程的顺序

pub mod captcha_solver;
pub mod company_lookup;
pub mod intents;
pub mod notifier;
pub mod payment;
pub mod selector_resolver;
pub mod snapshot_store;
pub mod status_sink;

pub use captcha_solver::{CaptchaSolver, ChallengePayload, TwoCaptchaSolver};
pub use company_lookup::{CompanyLookup, HttpCompanyLookup};
pub use intents::{Intent, SelectorOverrides, SelectorRegistry};
pub use notifier::{Notifier, WebhookNotifier};
pub use payment::{HttpPaymentGateway, PaymentGateway, PaymentStatus};
pub use selector_resolver::{MatchMethod, Resolution, SelectorResolver};
pub use snapshot_store::{DiscardSnapshots, FsSnapshotStore, SnapshotSink};
pub use status_sink::{JsonlStatusSink, StatusSink};
