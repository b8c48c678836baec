//! 申报运行上下文
//!
//! 封装"我正在为哪家公司跑哪一次申报"这一信息

use std::fmt::Display;

/// 申报运行上下文
#[derive(Debug, Clone)]
pub struct RunCtx {
    /// 运行ID（状态记录、截图目录都用它区分）
    pub run_id: String,

    /// 公司注册号
    pub company_number: String,
}

impl RunCtx {
    pub fn new(run_id: impl Into<String>, company_number: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            company_number: company_number.into(),
        }
    }

    /// 生成新的运行ID
    pub fn generate(company_number: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), company_number)
    }
}

impl Display for RunCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = self.run_id.get(..8).unwrap_or(&self.run_id);
        write!(f, "[申报 {} 公司#{}]", short, self.company_number)
    }
}
