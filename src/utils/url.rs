//! 外部服务地址拼接

use reqwest::Url;

use crate::error::FilingError;

/// 在 `base` 后追加路径段
///
/// 每段单独做百分号编码，段内的 `/` 编为 `%2F`
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, FilingError> {
    let mut url = Url::parse(base)
        .map_err(|e| FilingError::Configuration(format!("服务地址无效 '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| FilingError::Configuration(format!("服务地址不能追加路径: {}", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
