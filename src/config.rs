use std::str::FromStr;
use std::time::Duration;

/// 运行环境
///
/// 生产环境下不允许跳过门户登录
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Development,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
            Environment::Test => "test",
        };
        f.write_str(name)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => Err(format!("未知的运行环境: {}", other)),
        }
    }
}

/// 程序配置
///
/// 在构造流程时显式传入，不存在进程级的可变全局配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 运行环境
    pub environment: Environment,

    // --- 门户 ---
    pub portal_url: String,
    pub login_url: String,
    pub annual_returns_url: String,
    pub portal_username: Option<String>,
    pub portal_password: Option<String>,

    // --- 浏览器 ---
    /// 是否使用无头模式
    pub headless: bool,
    /// 浏览器可执行文件路径（为空时由 chromiumoxide 自动探测）
    pub chrome_executable: Option<String>,
    /// 设置后连接已有浏览器的调试端口，而不是为每次申报启动新浏览器
    pub browser_debug_port: Option<u16>,
    pub screenshots_enabled: bool,
    pub screenshots_dir: String,

    // --- 超时（毫秒） ---
    pub page_timeout_ms: u64,
    pub step_timeout_ms: u64,
    pub candidate_timeout_ms: u64,
    pub confirmation_timeout_ms: u64,
    pub payment_timeout_ms: u64,
    pub lookup_timeout_ms: u64,
    pub captcha_probe_timeout_ms: u64,
    pub captcha_solve_timeout_ms: u64,
    pub captcha_verify_timeout_ms: u64,

    // --- 重试 ---
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// 验证码识别的总尝试上限，独立于通用重试次数
    pub captcha_max_attempts: u32,
    /// 启发式匹配的最低相似度
    pub similarity_floor: f64,

    // --- 外部服务 ---
    pub company_lookup_api_url: String,
    pub payment_api_url: String,
    pub captcha_api_key: Option<String>,
    pub captcha_api_base_url: String,
    pub notification_webhook_url: Option<String>,

    // --- 批量处理 ---
    pub max_concurrent_filings: usize,
    pub requests_folder: String,
    pub results_folder: String,
    pub status_log_file: String,
    /// 额外的选择器定义（TOML）
    pub selector_overrides_file: Option<String>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        let portal_url = "https://www.cipc.co.za".to_string();
        Self {
            environment: Environment::Development,
            login_url: format!("{}/login", portal_url),
            annual_returns_url: format!("{}/filing/annual-returns/", portal_url),
            portal_url,
            portal_username: None,
            portal_password: None,
            headless: true,
            chrome_executable: None,
            browser_debug_port: None,
            screenshots_enabled: true,
            screenshots_dir: "screenshots".to_string(),
            page_timeout_ms: 60_000,
            step_timeout_ms: 90_000,
            candidate_timeout_ms: 3_000,
            confirmation_timeout_ms: 60_000,
            payment_timeout_ms: 3_600_000,
            lookup_timeout_ms: 30_000,
            captcha_probe_timeout_ms: 3_000,
            captcha_solve_timeout_ms: 120_000,
            captcha_verify_timeout_ms: 10_000,
            max_retries: 3,
            retry_delay_ms: 2_000,
            captcha_max_attempts: 3,
            similarity_floor: 0.3,
            company_lookup_api_url: "http://localhost:8080/api/v1".to_string(),
            payment_api_url: "http://localhost:8080/api/v1".to_string(),
            captcha_api_key: None,
            captcha_api_base_url: "https://2captcha.com".to_string(),
            notification_webhook_url: None,
            max_concurrent_filings: 4,
            requests_folder: "filing_requests".to_string(),
            results_folder: "filing_results".to_string(),
            status_log_file: "filing_status.jsonl".to_string(),
            selector_overrides_file: None,
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        let portal_url = env_string("CIPC_PORTAL_URL").unwrap_or(default.portal_url);
        Self {
            environment: env_parse("FILER_ENV", default.environment),
            login_url: env_string("CIPC_LOGIN_URL").unwrap_or_else(|| format!("{}/login", portal_url)),
            annual_returns_url: env_string("CIPC_ANNUAL_RETURNS_URL")
                .unwrap_or_else(|| format!("{}/filing/annual-returns/", portal_url)),
            portal_url,
            portal_username: env_string("CIPC_USERNAME"),
            portal_password: env_string("CIPC_PASSWORD"),
            headless: env_parse("HEADLESS", default.headless),
            chrome_executable: env_string("CHROME_EXECUTABLE"),
            browser_debug_port: env_string("BROWSER_DEBUG_PORT").and_then(|v| v.parse().ok()),
            screenshots_enabled: env_parse("SCREENSHOTS_ENABLED", default.screenshots_enabled),
            screenshots_dir: env_string("SCREENSHOTS_DIR").unwrap_or(default.screenshots_dir),
            page_timeout_ms: env_parse("PAGE_TIMEOUT_MS", default.page_timeout_ms),
            step_timeout_ms: env_parse("STEP_TIMEOUT_MS", default.step_timeout_ms),
            candidate_timeout_ms: env_parse("CANDIDATE_TIMEOUT_MS", default.candidate_timeout_ms),
            confirmation_timeout_ms: env_parse("CONFIRMATION_TIMEOUT_MS", default.confirmation_timeout_ms),
            payment_timeout_ms: env_parse("PAYMENT_TIMEOUT_MS", default.payment_timeout_ms),
            lookup_timeout_ms: env_parse("LOOKUP_TIMEOUT_MS", default.lookup_timeout_ms),
            captcha_probe_timeout_ms: env_parse("CAPTCHA_PROBE_TIMEOUT_MS", default.captcha_probe_timeout_ms),
            captcha_solve_timeout_ms: env_parse("CAPTCHA_SOLVE_TIMEOUT_MS", default.captcha_solve_timeout_ms),
            captcha_verify_timeout_ms: env_parse("CAPTCHA_VERIFY_TIMEOUT_MS", default.captcha_verify_timeout_ms),
            max_retries: env_parse("MAX_RETRIES", default.max_retries),
            retry_delay_ms: env_parse("RETRY_DELAY_MS", default.retry_delay_ms),
            captcha_max_attempts: env_parse("CAPTCHA_MAX_ATTEMPTS", default.captcha_max_attempts),
            similarity_floor: env_parse("SIMILARITY_FLOOR", default.similarity_floor),
            company_lookup_api_url: env_string("COMPANY_LOOKUP_API_URL").unwrap_or(default.company_lookup_api_url),
            payment_api_url: env_string("PAYMENT_API_URL").unwrap_or(default.payment_api_url),
            captcha_api_key: env_string("TWOCAPTCHA_API_KEY"),
            captcha_api_base_url: env_string("TWOCAPTCHA_API_URL").unwrap_or(default.captcha_api_base_url),
            notification_webhook_url: env_string("NOTIFICATION_WEBHOOK_URL"),
            max_concurrent_filings: env_parse("MAX_CONCURRENT_FILINGS", default.max_concurrent_filings),
            requests_folder: env_string("REQUESTS_FOLDER").unwrap_or(default.requests_folder),
            results_folder: env_string("RESULTS_FOLDER").unwrap_or(default.results_folder),
            status_log_file: env_string("STATUS_LOG_FILE").unwrap_or(default.status_log_file),
            selector_overrides_file: env_string("SELECTOR_OVERRIDES_FILE"),
            verbose_logging: env_parse("VERBOSE_LOGGING", default.verbose_logging),
        }
    }

    /// 是否配置了门户登录凭据
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.portal_username, &self.portal_password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.candidate_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_millis(self.payment_timeout_ms)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn captcha_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.captcha_probe_timeout_ms)
    }

    pub fn captcha_solve_timeout(&self) -> Duration {
        Duration::from_millis(self.captcha_solve_timeout_ms)
    }

    pub fn captcha_verify_timeout(&self) -> Duration {
        Duration::from_millis(self.captcha_verify_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
