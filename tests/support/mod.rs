//! 集成测试用的假门户与假外部服务
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use annual_returns_filer::config::{Config, Environment};
use annual_returns_filer::error::FilingError;
use annual_returns_filer::infrastructure::{
    Descriptor, ElementHandle, SessionFactory, UiDriver, WaitCondition,
};
use annual_returns_filer::models::{CompanyInfo, FilingRequest, FilingResult, WorkflowState};
use annual_returns_filer::services::{
    CaptchaSolver, ChallengePayload, CompanyLookup, Notifier, PaymentGateway, PaymentStatus,
    SelectorRegistry, SnapshotSink, StatusSink,
};
use annual_returns_filer::utils::clock::FixedClock;
use annual_returns_filer::workflow::{Collaborators, FilingFlow};

pub const LOGIN_URL: &str = "https://portal.test/login";
pub const ANNUAL_RETURNS_URL: &str = "https://portal.test/filing/annual-returns/";
pub const CAPTCHA_ANSWER: &str = "X7K2";

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

/// 所有等待立即返回，重试不退避
pub fn test_config() -> Config {
    Config {
        environment: Environment::Test,
        portal_url: "https://portal.test".to_string(),
        login_url: LOGIN_URL.to_string(),
        annual_returns_url: ANNUAL_RETURNS_URL.to_string(),
        screenshots_enabled: false,
        page_timeout_ms: 1_000,
        step_timeout_ms: 2_000,
        candidate_timeout_ms: 0,
        confirmation_timeout_ms: 0,
        payment_timeout_ms: 1_000,
        lookup_timeout_ms: 1_000,
        captcha_probe_timeout_ms: 0,
        captcha_solve_timeout_ms: 1_000,
        captcha_verify_timeout_ms: 0,
        max_retries: 2,
        retry_delay_ms: 0,
        captcha_max_attempts: 3,
        ..Config::default()
    }
}

pub fn acme_request() -> FilingRequest {
    FilingRequest {
        company_registration_number: "2021/123456/07".to_string(),
        company_name: "Acme Pty Ltd".to_string(),
        financial_year_end: "2024-02-28".to_string(),
        contact_email: "finance@acme.co.za".to_string(),
        contact_phone: "+27821234567".to_string(),
        directors: Vec::new(),
        shareholders: Vec::new(),
        business_address: "1 Main Road, Cape Town".to_string(),
        business_activity: "Software".to_string(),
        payment_reference: None,
        source_path: None,
    }
}

pub fn acme_company() -> CompanyInfo {
    CompanyInfo {
        registration_number: "2021/123456/07".to_string(),
        name: "Acme Pty Ltd".to_string(),
        status: "active".to_string(),
        incorporation_date: None,
        financial_year_end: None,
    }
}

// ========== 假门户 ==========

/// 假页面元素：`selectors` 列出它能被哪些 CSS 候选命中
#[derive(Debug, Clone)]
pub struct FakeElement {
    handle: ElementHandle,
    selectors: Vec<String>,
}

impl FakeElement {
    pub fn new(id: &str, tag: &str) -> Self {
        Self {
            handle: ElementHandle {
                id: id.to_string(),
                tag: tag.to_string(),
                attributes: BTreeMap::new(),
                text: String::new(),
                visible: true,
                enabled: true,
            },
            selectors: Vec::new(),
        }
    }

    pub fn matching(mut self, selector: &str) -> Self {
        self.selectors.push(selector.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.handle.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.handle.text = text.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.handle.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.handle.enabled = false;
        self
    }

    fn matches(&self, descriptor: &Descriptor) -> bool {
        match descriptor {
            Descriptor::Css(css) => self.selectors.iter().any(|s| s == css) || self.handle.tag == *css,
            Descriptor::TagWithText { tag, text } => {
                self.handle.tag == *tag
                    && self.handle.text.to_lowercase().contains(&text.to_lowercase())
            }
        }
    }
}

/// 点击后对页面的影响
#[derive(Debug, Clone)]
pub enum Effect {
    Show(FakeElement),
    Hide(String),
    Navigate(String),
    /// 输入框的值等于 `expected` 时才生效
    WhenFilled {
        input: String,
        expected: String,
        then: Vec<Effect>,
    },
}

#[derive(Default)]
struct PortalState {
    url: String,
    elements: Vec<FakeElement>,
    on_click: HashMap<String, Vec<Effect>>,
    page_text: String,
    calls: Vec<String>,
    fail_snapshots: bool,
    panic_on_click: Option<String>,
    read_delay: Duration,
}

/// 可脚本化的假门户
#[derive(Clone, Default)]
pub struct FakePortal {
    state: Arc<Mutex<PortalState>>,
    closed: Arc<AtomicBool>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 没有验证码、提交后显示编号的年度申报页面
    pub fn annual_returns() -> Self {
        Self::new()
            .element(
                FakeElement::new("annual-returns-link", "a")
                    .matching("a[href*=\"annual-returns\"]")
                    .attr("href", "/filing/annual-returns/")
                    .text("File Annual Returns"),
            )
            .element(
                FakeElement::new("filing-type", "select")
                    .matching("select[name=\"filing_type\"]")
                    .attr("name", "filing_type"),
            )
            .element(
                FakeElement::new("company-number", "input")
                    .matching("input[name=\"company_registration\"]")
                    .attr("name", "company_registration"),
            )
            .element(
                FakeElement::new("company-name", "input")
                    .matching("input[name=\"company_name\"]")
                    .attr("name", "company_name"),
            )
            .element(
                FakeElement::new("year-end", "input")
                    .matching("input[name=\"financial_year_end\"]")
                    .attr("name", "financial_year_end")
                    .attr("type", "date"),
            )
            .element(
                FakeElement::new("email", "input")
                    .matching("input[type=\"email\"]")
                    .attr("type", "email"),
            )
            .element(
                FakeElement::new("phone", "input")
                    .matching("input[type=\"tel\"]")
                    .attr("type", "tel"),
            )
            .element(submit_button())
            .on_click(
                "submit",
                vec![
                    Effect::Show(confirmation_banner()),
                    Effect::Show(reference_label("Filing reference: AR-2024-000123")),
                ],
            )
    }

    /// 提交后出现验证码，答对才显示确认页
    pub fn with_captcha() -> Self {
        Self::annual_returns()
            .element(
                FakeElement::new("captcha-image", "img")
                    .matching(".captcha-image")
                    .attr("src", "data:image/png;base64,iVBORw0KGgo="),
            )
            .element(
                FakeElement::new("captcha-input", "input")
                    .matching("input[name*=\"captcha\"]")
                    .attr("name", "captcha_code"),
            )
            .on_click(
                "submit",
                vec![Effect::WhenFilled {
                    input: "captcha-input".to_string(),
                    expected: CAPTCHA_ANSWER.to_string(),
                    then: vec![
                        Effect::Hide("captcha-image".to_string()),
                        Effect::Hide("captcha-input".to_string()),
                        Effect::Show(confirmation_banner()),
                        Effect::Show(reference_label("Filing reference: AR-2024-000123")),
                    ],
                }],
            )
    }

    pub fn element(self, element: FakeElement) -> Self {
        self.lock().elements.push(element);
        self
    }

    /// 替换元素的点击效果
    pub fn on_click(self, id: &str, effects: Vec<Effect>) -> Self {
        self.lock().on_click.insert(id.to_string(), effects);
        self
    }

    pub fn page_text(self, text: &str) -> Self {
        self.lock().page_text = text.to_string();
        self
    }

    pub fn failing_snapshots(self) -> Self {
        self.lock().fail_snapshots = true;
        self
    }

    /// 读取元素文本前先等待 `delay`
    pub fn slow_reads(self, delay: Duration) -> Self {
        self.lock().read_delay = delay;
        self
    }

    pub fn panic_on_click(self, id: &str) -> Self {
        self.lock().panic_on_click = Some(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn value_of(&self, id: &str) -> Option<String> {
        self.lock()
            .elements
            .iter()
            .find(|e| e.handle.id == id)
            .and_then(|e| e.handle.attr("value").map(str::to_string))
    }

    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PortalState> {
        self.state.lock().unwrap()
    }
}

pub fn submit_button() -> FakeElement {
    FakeElement::new("submit", "button")
        .matching("button[type=\"submit\"]")
        .attr("type", "submit")
        .text("Submit Filing")
}

pub fn confirmation_banner() -> FakeElement {
    FakeElement::new("confirmation", "div")
        .matching(".confirmation")
        .text("Your annual return has been received")
}

pub fn reference_label(text: &str) -> FakeElement {
    FakeElement::new("reference", "span")
        .matching(".filing-reference")
        .text(text)
}

fn apply(state: &mut PortalState, effects: Vec<Effect>) {
    for effect in effects {
        match effect {
            Effect::Show(element) => {
                if !state.elements.iter().any(|e| e.handle.id == element.handle.id) {
                    state.elements.push(element);
                }
            }
            Effect::Hide(id) => state.elements.retain(|e| e.handle.id != id),
            Effect::Navigate(url) => state.url = url,
            Effect::WhenFilled {
                input,
                expected,
                then,
            } => {
                let filled = state
                    .elements
                    .iter()
                    .find(|e| e.handle.id == input)
                    .and_then(|e| e.handle.attr("value"))
                    == Some(expected.as_str());
                if filled {
                    apply(state, then);
                }
            }
        }
    }
}

#[async_trait]
impl UiDriver for FakePortal {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), FilingError> {
        let mut state = self.lock();
        state.calls.push(format!("navigate {}", url));
        state.url = url.to_string();
        Ok(())
    }

    async fn find_all(&self, descriptor: &Descriptor) -> Result<Vec<ElementHandle>, FilingError> {
        Ok(self
            .lock()
            .elements
            .iter()
            .filter(|e| e.matches(descriptor))
            .map(|e| e.handle.clone())
            .collect())
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), FilingError> {
        let mut state = self.lock();
        state.calls.push(format!("fill {}={}", element.id, value));
        let target = state
            .elements
            .iter_mut()
            .find(|e| e.handle.id == element.id)
            .ok_or_else(|| FilingError::action_rejected("fill", "元素已失效"))?;
        target
            .handle
            .attributes
            .insert("value".to_string(), value.to_string());
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), FilingError> {
        let mut state = self.lock();
        if state.panic_on_click.as_deref() == Some(element.id.as_str()) {
            drop(state);
            panic!("页面脚本崩溃: {}", element.id);
        }
        state.calls.push(format!("click {}", element.id));
        if !state.elements.iter().any(|e| e.handle.id == element.id) {
            return Err(FilingError::action_rejected("click", "元素已失效"));
        }
        let effects = state.on_click.get(&element.id).cloned().unwrap_or_default();
        apply(&mut state, effects);
        Ok(())
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String, FilingError> {
        let delay = self.lock().read_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.lock()
            .elements
            .iter()
            .find(|e| e.handle.id == element.id)
            .map(|e| e.handle.text.clone())
            .ok_or_else(|| FilingError::action_rejected("read", "元素已失效"))
    }

    async fn wait_for(&self, condition: &WaitCondition, _timeout: Duration) -> Result<bool, FilingError> {
        let state = self.lock();
        let present = |descriptors: &[Descriptor]| {
            descriptors
                .iter()
                .any(|d| state.elements.iter().any(|e| e.matches(d)))
        };
        Ok(match condition {
            WaitCondition::AnyPresent(descriptors) => present(descriptors),
            WaitCondition::AllAbsent(descriptors) => !present(descriptors),
            WaitCondition::UrlContains(fragment) => state.url.contains(fragment.as_str()),
        })
    }

    async fn page_text(&self) -> Result<String, FilingError> {
        Ok(self.lock().page_text.clone())
    }

    async fn snapshot(&self) -> Result<Vec<u8>, FilingError> {
        if self.lock().fail_snapshots {
            return Err(FilingError::Browser("截图失败".to_string()));
        }
        Ok(b"\x89PNG\r\n".to_vec())
    }

    async fn close(&self) -> Result<(), FilingError> {
        self.lock().calls.push("close".to_string());
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ========== 假外部服务 ==========

pub struct FakeSessions {
    portal: FakePortal,
    pub opened: AtomicUsize,
}

impl FakeSessions {
    pub fn new(portal: FakePortal) -> Self {
        Self {
            portal,
            opened: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionFactory for FakeSessions {
    async fn open(&self) -> Result<Box<dyn UiDriver>, FilingError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.portal.clone()))
    }
}

pub struct FakeLookup {
    company: Option<CompanyInfo>,
    pub calls: AtomicUsize,
}

impl FakeLookup {
    pub fn found(company: CompanyInfo) -> Self {
        Self {
            company: Some(company),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn missing() -> Self {
        Self {
            company: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompanyLookup for FakeLookup {
    async fn lookup(&self, _registration_number: &str) -> Result<Option<CompanyInfo>, FilingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.company.clone())
    }
}

pub struct FakePayments {
    status: PaymentStatus,
    /// 付款进行中触发取消
    cancel_during: Option<CancellationToken>,
    pub calls: AtomicUsize,
}

impl FakePayments {
    pub fn new(status: PaymentStatus) -> Self {
        Self {
            status,
            cancel_during: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn cancelling(token: CancellationToken) -> Self {
        Self {
            status: PaymentStatus::Completed,
            cancel_during: Some(token),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PaymentGateway for FakePayments {
    async fn await_completion(&self, _reference: &str, _timeout: Duration) -> Result<PaymentStatus, FilingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_during {
            token.cancel();
            tokio::task::yield_now().await;
        }
        Ok(self.status.clone())
    }
}

/// 依次返回预设答案，用完后重复最后一个
pub struct FakeSolver {
    answers: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    pub calls: AtomicUsize,
}

impl FakeSolver {
    pub fn answering(answers: &[&str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
            last: Mutex::new(String::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CaptchaSolver for FakeSolver {
    async fn solve(&self, payload: &ChallengePayload, _timeout: Duration) -> Result<String, FilingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(payload.inline_base64().is_some(), "验证码图片应为内联图片");
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.answers.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }
}

#[derive(Default)]
pub struct RecordingStatus {
    records: Mutex<Vec<(WorkflowState, Option<FilingResult>)>>,
}

impl RecordingStatus {
    pub fn states(&self) -> Vec<WorkflowState> {
        self.records.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub fn final_result(&self) -> Option<FilingResult> {
        self.records.lock().unwrap().iter().rev().find_map(|(_, r)| r.clone())
    }
}

#[async_trait]
impl StatusSink for RecordingStatus {
    async fn record_status(
        &self,
        _run_id: &str,
        state: WorkflowState,
        result: Option<&FilingResult>,
        _error: Option<&str>,
    ) -> Result<(), FilingError> {
        self.records.lock().unwrap().push((state, result.cloned()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySnapshots {
    labels: Mutex<Vec<String>>,
}

impl MemorySnapshots {
    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotSink for MemorySnapshots {
    async fn store(&self, run_id: &str, label: &str, _png: Vec<u8>) -> Result<Option<String>, FilingError> {
        self.labels.lock().unwrap().push(label.to_string());
        Ok(Some(format!("mem/{}/{}.png", run_id, label)))
    }
}

pub struct FakeNotifier {
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeNotifier {
    pub fn working() -> Self {
        Self {
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, _run_id: &str, _result: &FilingResult) -> Result<(), FilingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FilingError::service("webhook", "503 Service Unavailable"));
        }
        Ok(())
    }
}

// ========== 组装 ==========

pub struct Harness {
    pub config: Config,
    pub portal: FakePortal,
    pub sessions: Arc<FakeSessions>,
    pub lookup: Arc<FakeLookup>,
    pub payments: Arc<FakePayments>,
    pub solver: Option<Arc<FakeSolver>>,
    pub status: Arc<RecordingStatus>,
    pub snapshots: Arc<MemorySnapshots>,
    pub notifier: Option<Arc<FakeNotifier>>,
}

impl Harness {
    pub fn new(portal: FakePortal) -> Self {
        Self {
            config: test_config(),
            sessions: Arc::new(FakeSessions::new(portal.clone())),
            portal,
            lookup: Arc::new(FakeLookup::found(acme_company())),
            payments: Arc::new(FakePayments::new(PaymentStatus::Completed)),
            solver: None,
            status: Arc::new(RecordingStatus::default()),
            snapshots: Arc::new(MemorySnapshots::default()),
            notifier: None,
        }
    }

    pub fn flow(&self) -> FilingFlow {
        let deps = Collaborators {
            sessions: self.sessions.clone(),
            lookup: self.lookup.clone(),
            payments: self.payments.clone(),
            solver: self
                .solver
                .clone()
                .map(|solver| solver as Arc<dyn CaptchaSolver>),
            status: self.status.clone(),
            snapshots: self.snapshots.clone(),
            notifier: self
                .notifier
                .clone()
                .map(|notifier| notifier as Arc<dyn Notifier>),
            clock: Arc::new(FixedClock(fixed_now())),
        };
        FilingFlow::new(Arc::new(self.config.clone()), deps, SelectorRegistry::new())
    }
}
