//! 元素意图与候选选择器 - 业务能力层
//!
//! 流程只按"意图"说话，具体选择器集中在这里维护

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FilingError;
use crate::infrastructure::driver::Descriptor;

/// 页面元素意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    AnnualReturnsOption,
    FilingTypeSelect,
    CompanyNumberField,
    CompanyNameField,
    FinancialYearField,
    EmailField,
    PhoneField,
    UsernameField,
    PasswordField,
    LoginButton,
    SubmitButton,
    CaptchaImage,
    CaptchaInput,
    ConfirmationIndicator,
    FilingReference,
    ConfirmationNumber,
}

/// 启发式扫描参数
#[derive(Debug, Clone, PartialEq)]
pub struct Heuristic {
    /// 参与扫描的标签
    pub tags: &'static [&'static str],
    /// 小写关键词
    pub keywords: &'static [&'static str],
}

impl Heuristic {
    /// 至少命中的关键词数：多关键词意图要求命中两个
    pub fn min_hits(&self) -> usize {
        self.keywords.len().clamp(1, 2)
    }
}

impl Intent {
    pub const ALL: [Intent; 16] = [
        Intent::AnnualReturnsOption,
        Intent::FilingTypeSelect,
        Intent::CompanyNumberField,
        Intent::CompanyNameField,
        Intent::FinancialYearField,
        Intent::EmailField,
        Intent::PhoneField,
        Intent::UsernameField,
        Intent::PasswordField,
        Intent::LoginButton,
        Intent::SubmitButton,
        Intent::CaptchaImage,
        Intent::CaptchaInput,
        Intent::ConfirmationIndicator,
        Intent::FilingReference,
        Intent::ConfirmationNumber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::AnnualReturnsOption => "annual-returns-option",
            Intent::FilingTypeSelect => "filing-type-select",
            Intent::CompanyNumberField => "company-number-field",
            Intent::CompanyNameField => "company-name-field",
            Intent::FinancialYearField => "financial-year-field",
            Intent::EmailField => "email-field",
            Intent::PhoneField => "phone-field",
            Intent::UsernameField => "username-field",
            Intent::PasswordField => "password-field",
            Intent::LoginButton => "login-button",
            Intent::SubmitButton => "submit-button",
            Intent::CaptchaImage => "captcha-image",
            Intent::CaptchaInput => "captcha-input",
            Intent::ConfirmationIndicator => "confirmation-indicator",
            Intent::FilingReference => "filing-reference",
            Intent::ConfirmationNumber => "confirmation-number",
        }
    }

    /// 默认候选选择器，按优先级排列
    pub fn candidates(&self) -> Vec<Descriptor> {
        let css = |list: &[&str]| list.iter().map(|s| Descriptor::css(*s)).collect::<Vec<_>>();

        match self {
            Intent::AnnualReturnsOption => vec![
                Descriptor::css("a[href*=\"annual-returns\"]"),
                Descriptor::css("a[href*=\"annual_returns\"]"),
                Descriptor::tag_with_text("button", "File Annual Returns"),
                Descriptor::tag_with_text("a", "Annual Returns"),
                Descriptor::css("[data-testid*=\"annual-returns\"]"),
            ],
            Intent::FilingTypeSelect => css(&[
                "select[name=\"filing_type\"]",
                "select[name*=\"filing\"]",
                "#filing-type",
            ]),
            Intent::CompanyNumberField => css(&[
                "input[name=\"company_registration\"]",
                "input[name*=\"registration\"]",
                "input[name*=\"company_number\"]",
                "input[placeholder*=\"registration\" i]",
                "#company-registration-number",
                "#registration-number",
            ]),
            Intent::CompanyNameField => css(&[
                "input[name=\"company_name\"]",
                "input[name*=\"company_name\"]",
                "input[placeholder*=\"company name\" i]",
                "#company-name",
            ]),
            Intent::FinancialYearField => css(&[
                "input[name=\"financial_year_end\"]",
                "input[name*=\"financial_year\"]",
                "select[name*=\"year\"]",
                "input[name*=\"year_end\"]",
                "#financial-year-end",
                "#year-end",
            ]),
            Intent::EmailField => css(&[
                "input[type=\"email\"]",
                "input[name*=\"email\"]",
                "input[id*=\"email\"]",
                "#contact-email",
            ]),
            Intent::PhoneField => css(&[
                "input[type=\"tel\"]",
                "input[name*=\"phone\"]",
                "input[name*=\"mobile\"]",
                "input[id*=\"phone\"]",
                "#contact-phone",
            ]),
            Intent::UsernameField => css(&[
                "input[name=\"username\"]",
                "input[name*=\"user\"]",
                "input[id*=\"username\"]",
                "#username",
            ]),
            Intent::PasswordField => css(&[
                "input[name=\"password\"]",
                "input[type=\"password\"]",
                "#password",
            ]),
            Intent::LoginButton => vec![
                Descriptor::css("button[type=\"submit\"]"),
                Descriptor::css("input[type=\"submit\"]"),
                Descriptor::tag_with_text("button", "Login"),
                Descriptor::tag_with_text("button", "Sign in"),
                Descriptor::css("#login-button"),
            ],
            Intent::SubmitButton => vec![
                Descriptor::css("button[type=\"submit\"]"),
                Descriptor::css("input[type=\"submit\"]"),
                Descriptor::tag_with_text("button", "Submit"),
                Descriptor::tag_with_text("button", "File"),
                Descriptor::tag_with_text("button", "Continue"),
                Descriptor::css(".submit-btn"),
            ],
            Intent::CaptchaImage => css(&[
                ".captcha-image",
                "img[src*=\"captcha\"]",
                "img[alt*=\"captcha\" i]",
                "#captcha",
                "[class*=\"captcha\"] img",
            ]),
            Intent::CaptchaInput => css(&[
                "input[name*=\"captcha\"]",
                "input[id*=\"captcha\"]",
                "#captcha-input",
                "input[placeholder*=\"captcha\" i]",
            ]),
            Intent::ConfirmationIndicator => css(&[
                ".confirmation",
                ".confirmation-number",
                ".filing-reference",
                "[class*=\"confirm\"]",
                "[class*=\"success\"]",
            ]),
            Intent::FilingReference => css(&[
                ".filing-reference",
                ".reference-number",
                "[class*=\"reference\"]",
                "[data-testid*=\"reference\"]",
            ]),
            Intent::ConfirmationNumber => css(&[
                ".confirmation-number",
                "[class*=\"confirmation-number\"]",
                "[data-testid*=\"confirmation\"]",
            ]),
        }
    }

    /// 结构化候选全部落空时的启发式扫描参数
    ///
    /// 结果类意图没有启发式，避免把任意文本当作编号
    pub fn heuristic(&self) -> Option<Heuristic> {
        let h = |tags, keywords| Some(Heuristic { tags, keywords });
        match self {
            Intent::AnnualReturnsOption => h(&["a", "button"], &["annual", "return"]),
            Intent::FilingTypeSelect => h(&["select"], &["filing", "type"]),
            Intent::CompanyNumberField => h(&["input"], &["company", "registration", "number"]),
            Intent::CompanyNameField => h(&["input"], &["company", "name"]),
            Intent::FinancialYearField => h(&["input", "select"], &["financial", "year", "end"]),
            Intent::EmailField => h(&["input"], &["email", "mail"]),
            Intent::PhoneField => h(&["input"], &["phone", "tel", "mobile"]),
            Intent::UsernameField => h(&["input"], &["user", "login", "name"]),
            Intent::PasswordField => h(&["input"], &["password"]),
            Intent::LoginButton => h(&["button", "input"], &["login", "sign"]),
            Intent::SubmitButton => h(&["button", "input"], &["submit", "file", "continue"]),
            Intent::CaptchaImage => h(&["img"], &["captcha"]),
            Intent::CaptchaInput => h(&["input"], &["captcha", "code"]),
            Intent::ConfirmationIndicator
            | Intent::FilingReference
            | Intent::ConfirmationNumber => None,
        }
    }

    /// 启发式扫描标签与自身重叠的其他意图
    pub fn rivals(&self) -> Vec<Intent> {
        let Some(own) = self.heuristic() else {
            return Vec::new();
        };
        Intent::ALL
            .iter()
            .copied()
            .filter(|other| other != self)
            .filter(|other| {
                other
                    .heuristic()
                    .is_some_and(|h| h.tags.iter().any(|tag| own.tags.contains(tag)))
            })
            .collect()
    }
}

impl Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = FilingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intent::ALL
            .iter()
            .copied()
            .find(|intent| intent.as_str() == s)
            .ok_or_else(|| FilingError::Configuration(format!("未知的元素意图: {}", s)))
    }
}

/// 选择器覆盖配置
///
/// TOML 格式：`company-number-field = ["#regNo", "input[name=reg]"]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorOverrides {
    pub selectors: BTreeMap<Intent, Vec<String>>,
}

/// 选择器注册表
///
/// 覆盖配置排在默认候选之前
#[derive(Debug, Clone, Default)]
pub struct SelectorRegistry {
    overrides: SelectorOverrides,
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: SelectorOverrides) -> Self {
        Self { overrides }
    }

    /// 某意图的全部候选，按优先级排列且去重
    pub fn candidates(&self, intent: Intent) -> Vec<Descriptor> {
        let mut list: Vec<Descriptor> = self
            .overrides
            .selectors
            .get(&intent)
            .map(|extra| extra.iter().map(Descriptor::css).collect())
            .unwrap_or_default();

        for descriptor in intent.candidates() {
            if !list.contains(&descriptor) {
                list.push(descriptor);
            }
        }
        list
    }
}
