//! 选择器解析服务 - 业务能力层
//!
//! 把"意图"解析成页面上唯一的元素：先按候选选择器逐个尝试，
//! 全部落空再用关键词启发式扫描

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::error::FilingError;
use crate::infrastructure::driver::{Descriptor, ElementHandle, UiDriver, WaitCondition};
use crate::models::progress::Metadata;
use crate::services::intents::{Heuristic, Intent, SelectorRegistry};

/// 参与相似度计算的属性
const SCORED_ATTRIBUTES: [&str; 10] = [
    "name",
    "id",
    "placeholder",
    "aria-label",
    "title",
    "href",
    "class",
    "alt",
    "src",
    "type",
];

/// 匹配方式
#[derive(Debug, Clone, PartialEq)]
pub enum MatchMethod {
    Structural { descriptor: Descriptor },
    Heuristic { score: f64 },
}

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub intent: Intent,
    pub element: ElementHandle,
    pub method: MatchMethod,
}

impl Resolution {
    pub fn is_heuristic(&self) -> bool {
        matches!(self.method, MatchMethod::Heuristic { .. })
    }

    /// 写入进度日志的匹配信息
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("intent".into(), json!(self.intent.as_str()));
        match &self.method {
            MatchMethod::Structural { descriptor } => {
                metadata.insert("match".into(), json!("structural"));
                metadata.insert("selector".into(), json!(descriptor.to_string()));
            }
            MatchMethod::Heuristic { score } => {
                metadata.insert("match".into(), json!("heuristic"));
                metadata.insert("score".into(), json!(score));
            }
        }
        metadata
    }
}

/// 选择器解析服务
///
/// 职责：
/// - 只读页面，不做任何写操作
/// - 每个候选的等待时间有上限
/// - 不关心流程顺序
pub struct SelectorResolver {
    registry: SelectorRegistry,
    candidate_timeout: Duration,
    similarity_floor: f64,
}

impl SelectorResolver {
    pub fn new(registry: SelectorRegistry, candidate_timeout: Duration, similarity_floor: f64) -> Self {
        Self {
            registry,
            candidate_timeout,
            similarity_floor,
        }
    }

    pub fn from_config(registry: SelectorRegistry, config: &Config) -> Self {
        Self::new(registry, config.candidate_timeout(), config.similarity_floor)
    }

    pub fn candidates(&self, intent: Intent) -> Vec<Descriptor> {
        self.registry.candidates(intent)
    }

    /// 解析意图对应的唯一元素
    pub async fn resolve(&self, driver: &dyn UiDriver, intent: Intent) -> Result<Resolution, FilingError> {
        for descriptor in self.registry.candidates(intent) {
            let appeared = driver
                .wait_for(
                    &WaitCondition::AnyPresent(vec![descriptor.clone()]),
                    self.candidate_timeout,
                )
                .await?;
            if !appeared {
                debug!("[{}] 候选未出现: {}", intent, descriptor);
                continue;
            }

            let live: Vec<ElementHandle> = driver
                .find_all(&descriptor)
                .await?
                .into_iter()
                .filter(ElementHandle::is_live)
                .collect();

            match live.as_slice() {
                [element] => {
                    debug!("[{}] ✓ 结构匹配: {}", intent, descriptor);
                    return Ok(Resolution {
                        intent,
                        element: element.clone(),
                        method: MatchMethod::Structural { descriptor },
                    });
                }
                [] => debug!("[{}] 候选没有可用元素: {}", intent, descriptor),
                many => debug!(
                    "[{}] 候选匹配到 {} 个元素，不唯一: {}",
                    intent,
                    many.len(),
                    descriptor
                ),
            }
        }

        if let Some(heuristic) = intent.heuristic() {
            if let Some((element, score)) = self.scan(driver, intent, &heuristic).await? {
                debug!("[{}] ✓ 启发式匹配 (相似度 {:.2})", intent, score);
                return Ok(Resolution {
                    intent,
                    element,
                    method: MatchMethod::Heuristic { score },
                });
            }
        }

        Err(FilingError::element_not_found(intent.as_str()))
    }

    /// 任一候选是否出现在页面上
    pub async fn is_present(
        &self,
        driver: &dyn UiDriver,
        intent: Intent,
        timeout: Duration,
    ) -> Result<bool, FilingError> {
        driver
            .wait_for(&WaitCondition::AnyPresent(self.registry.candidates(intent)), timeout)
            .await
    }

    /// 扫描候选标签，返回相似度最高且不低于阈值的元素；同分取先出现的
    ///
    /// 多关键词意图至少命中两个关键词；结构上属于其他意图的元素不参与
    async fn scan(
        &self,
        driver: &dyn UiDriver,
        intent: Intent,
        heuristic: &Heuristic,
    ) -> Result<Option<(ElementHandle, f64)>, FilingError> {
        let mut scored: Vec<(ElementHandle, usize)> = Vec::new();
        for tag in heuristic.tags {
            for element in driver.find_all(&Descriptor::css(*tag)).await? {
                if !element.is_live() {
                    continue;
                }
                let hits = keyword_hits(&element, heuristic.keywords);
                if hits >= heuristic.min_hits() {
                    scored.push((element, hits));
                }
            }
        }
        if scored.is_empty() {
            return Ok(None);
        }

        let claimed = self.claimed_by_rivals(driver, intent).await?;
        let mut best: Option<(ElementHandle, f64)> = None;
        for (element, hits) in scored {
            if claimed.contains(&element.id) {
                debug!("[{}] 跳过属于其他意图的元素: {}", intent, element.id);
                continue;
            }
            let score = hits as f64 / heuristic.keywords.len() as f64;
            if score < self.similarity_floor {
                continue;
            }
            if best.as_ref().map_or(true, |(_, best_score)| score > *best_score) {
                best = Some((element, score));
            }
        }

        Ok(best)
    }

    /// 被其他意图的结构候选命中的元素 id；与自身共用的候选不算
    async fn claimed_by_rivals(
        &self,
        driver: &dyn UiDriver,
        intent: Intent,
    ) -> Result<HashSet<String>, FilingError> {
        let own = self.registry.candidates(intent);
        let mut claimed = HashSet::new();
        for rival in intent.rivals() {
            for descriptor in self.registry.candidates(rival) {
                if own.contains(&descriptor) {
                    continue;
                }
                for element in driver.find_all(&descriptor).await? {
                    claimed.insert(element.id);
                }
            }
        }
        Ok(claimed)
    }
}

/// 关键词命中比例
pub fn similarity(element: &ElementHandle, keywords: &[&str]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    keyword_hits(element, keywords) as f64 / keywords.len() as f64
}

/// 命中的关键词个数
pub fn keyword_hits(element: &ElementHandle, keywords: &[&str]) -> usize {
    let mut haystack = String::new();
    for attr in SCORED_ATTRIBUTES {
        if let Some(value) = element.attr(attr) {
            haystack.push_str(value);
            haystack.push(' ');
        }
    }
    haystack.push_str(&element.text);
    let haystack = haystack.to_lowercase();

    keywords
        .iter()
        .filter(|keyword| haystack.contains(&keyword.to_lowercase()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn element(tag: &str, attributes: &[(&str, &str)], text: &str) -> ElementHandle {
        ElementHandle {
            id: "h1".to_string(),
            tag: tag.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            text: text.to_string(),
            visible: true,
            enabled: true,
        }
    }

    #[test]
    fn test_similarity_counts_keyword_fraction() {
        let input = element("input", &[("name", "regNumber"), ("placeholder", "Company")], "");
        let score = similarity(&input, &["company", "registration", "number"]);
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_hits_counts_distinct_keywords() {
        let input = element("input", &[("name", "company_name_txt")], "");
        assert_eq!(keyword_hits(&input, &["company", "registration", "number"]), 1);
        assert_eq!(keyword_hits(&input, &["company", "name"]), 2);
    }

    #[test]
    fn test_similarity_ignores_unscored_attributes() {
        let input = element("input", &[("data-role", "company registration number")], "");
        assert_eq!(similarity(&input, &["company", "registration", "number"]), 0.0);
    }

    #[test]
    fn test_similarity_uses_visible_text() {
        let link = element("a", &[("href", "/filings")], "File Annual Returns");
        assert_eq!(similarity(&link, &["annual", "return"]), 1.0);
    }

    #[test]
    fn test_metadata_records_method() {
        let resolution = Resolution {
            intent: Intent::SubmitButton,
            element: element("button", &[], "Submit"),
            method: MatchMethod::Heuristic { score: 0.5 },
        };
        let metadata = resolution.metadata();
        assert_eq!(metadata["match"], "heuristic");
        assert_eq!(metadata["intent"], "submit-button");
        assert!(resolution.is_heuristic());
    }
}
