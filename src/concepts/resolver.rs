//! 概念名解析：界面语言显示名 <-> 英文规范名
//!
//! 规范语言（en）下两个方向都是恒等。其他语言的对照表在拉取并翻译概念列表时建立，
//! 以 `{displayed: original}` JSON 存在 `concepts_store` 命名空间。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agent::SessionClient;
use crate::concepts::translate::TextTranslator;
use crate::storage::kv::{KvStore, KvStoreExt};

pub const CONCEPTS_NAMESPACE: &str = "concepts_store";
pub const CANONICAL_LANGUAGE: &str = "en";
const KEY_CANONICAL: &str = "concepts_en";
const KEY_TRANSLATION_MAP: &str = "concept_translation_map";

fn is_canonical(language: &str) -> bool {
    language.eq_ignore_ascii_case(CANONICAL_LANGUAGE)
}

#[derive(Clone)]
pub struct ConceptResolver {
    kv: Arc<dyn KvStore>,
    translator: Arc<TextTranslator>,
}

impl ConceptResolver {
    pub fn new(kv: Arc<dyn KvStore>, translator: Arc<TextTranslator>) -> Self {
        Self { kv, translator }
    }

    fn table_key(language: &str) -> String {
        format!("{}_{}", KEY_TRANSLATION_MAP, language.to_ascii_lowercase())
    }

    fn table(&self, language: &str) -> BTreeMap<String, String> {
        match self.kv.get_json(CONCEPTS_NAMESPACE, &Self::table_key(language)) {
            Ok(table) => table.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Concept translation table for {} unreadable: {}", language, e);
                BTreeMap::new()
            }
        }
    }

    /// 显示名 -> 规范名；查不到时原样返回
    pub fn original_of(&self, displayed: &str, language: &str) -> String {
        if is_canonical(language) {
            return displayed.to_string();
        }
        self.table(language)
            .remove(displayed)
            .unwrap_or_else(|| displayed.to_string())
    }

    /// 规范名 -> 显示名（反向线性扫描）；查不到时原样返回
    pub fn displayed_of(&self, original: &str, language: &str) -> String {
        if is_canonical(language) {
            return original.to_string();
        }
        self.table(language)
            .into_iter()
            .find(|(_, o)| o == original)
            .map(|(displayed, _)| displayed)
            .unwrap_or_else(|| original.to_string())
    }

    /// 写入一组 (规范名, 显示名) 对照；按位置配对
    pub fn record_translations(&self, language: &str, originals: &[String], displayed: &[String]) {
        let table: BTreeMap<&str, &str> = displayed
            .iter()
            .map(String::as_str)
            .zip(originals.iter().map(String::as_str))
            .collect();
        match self.kv.put_json(CONCEPTS_NAMESPACE, &Self::table_key(language), &table) {
            Ok(()) => tracing::debug!(
                "Saved concept translation table for {} with {} entries",
                language,
                table.len()
            ),
            Err(e) => tracing::error!("Failed to save concept translation table: {}", e),
        }
    }

    fn cached_canonical(&self) -> Vec<String> {
        match self.kv.get_json::<Vec<String>>(CONCEPTS_NAMESPACE, KEY_CANONICAL) {
            Ok(list) => list
                .unwrap_or_default()
                .into_iter()
                .filter(|c| !c.trim().is_empty())
                .collect(),
            Err(e) => {
                tracing::warn!("Cached concept list unreadable: {}", e);
                Vec::new()
            }
        }
    }

    /// 规范概念列表：优先远端，失败时退回上次缓存
    pub async fn canonical_concepts(&self, client: &SessionClient) -> Vec<String> {
        match client.get_available_concepts().await {
            Ok(resp) => {
                let mut list = resp.concepts;
                list.sort();
                if let Err(e) = self.kv.put_json(CONCEPTS_NAMESPACE, KEY_CANONICAL, &list) {
                    tracing::warn!("Failed to cache concept list: {}", e);
                }
                tracing::debug!("Fetched {} canonical concepts", list.len());
                list
            }
            Err(e) => {
                tracing::warn!("Concept fetch failed, using cached list: {}", e);
                self.cached_canonical()
            }
        }
    }

    /// 按界面语言列出概念；翻译失败时退回规范列表
    pub async fn list_concepts(&self, client: &SessionClient, language: &str) -> Vec<String> {
        let canonical = self.canonical_concepts(client).await;
        if is_canonical(language) || canonical.is_empty() {
            return canonical;
        }

        match self
            .translator
            .translate_list(&canonical, CANONICAL_LANGUAGE, language)
            .await
        {
            Ok(translated) => {
                self.record_translations(language, &canonical, &translated);
                let mut sorted = translated;
                sorted.sort();
                sorted
            }
            Err(e) => {
                tracing::warn!("Concept list translation to {} failed: {}", language, e);
                canonical
            }
        }
    }

    /// 持久化某语言下展示过的列表（`concepts_{lang}`）
    pub fn save_displayed_list(&self, language: &str, list: &[String]) {
        let key = format!("concepts_{}", language.to_ascii_lowercase());
        if let Err(e) = self.kv.put_json(CONCEPTS_NAMESPACE, &key, list) {
            tracing::warn!("Failed to save displayed concept list: {}", e);
        }
    }

    pub fn displayed_list(&self, language: &str) -> Option<Vec<String>> {
        let key = format!("concepts_{}", language.to_ascii_lowercase());
        self.kv.get_json(CONCEPTS_NAMESPACE, &key).ok().flatten()
    }

    /// 清空概念列表与全部对照表
    pub fn clear(&self) {
        if let Err(e) = self.kv.clear_namespace(CONCEPTS_NAMESPACE) {
            tracing::warn!("Failed to clear concept store: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::api::ConceptsListResponse;
    use crate::agent::{RetryPolicy, ScriptedAgentApi};
    use crate::concepts::translate::PassthroughTranslator;
    use crate::core::AgentError;
    use crate::storage::kv::MemoryKv;

    fn resolver(kv: Arc<MemoryKv>) -> ConceptResolver {
        let translator = Arc::new(TextTranslator::new(Arc::new(PassthroughTranslator), kv.clone()));
        ConceptResolver::new(kv, translator)
    }

    fn concepts(list: &[&str]) -> ConceptsListResponse {
        ConceptsListResponse {
            success: true,
            concepts: list.iter().map(|s| s.to_string()).collect(),
            total: list.len(),
            message: None,
        }
    }

    #[test]
    fn test_canonical_language_is_identity() {
        let r = resolver(Arc::new(MemoryKv::new()));
        assert_eq!(r.original_of("Gravity", "en"), "Gravity");
        assert_eq!(r.displayed_of("Gravity", "EN"), "Gravity");
    }

    #[test]
    fn test_round_trip_after_table_populated() {
        let r = resolver(Arc::new(MemoryKv::new()));
        r.record_translations(
            "kn",
            &["Gravity".into(), "Friction".into()],
            &["ಗುರುತ್ವ".into(), "ಘರ್ಷಣೆ".into()],
        );
        let displayed = r.displayed_of("Gravity", "kn");
        assert_eq!(displayed, "ಗುರುತ್ವ");
        assert_eq!(r.original_of(&displayed, "kn"), "Gravity");
    }

    #[test]
    fn test_misses_return_input() {
        let r = resolver(Arc::new(MemoryKv::new()));
        assert_eq!(r.original_of("Unknown", "kn"), "Unknown");
        assert_eq!(r.displayed_of("Unknown", "kn"), "Unknown");
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_falls_back_to_cached_canonical() {
        let kv = Arc::new(MemoryKv::new());
        let r = resolver(kv);
        let api = Arc::new(ScriptedAgentApi::new());
        api.concepts.push_ok(concepts(&["Light", "Gravity"]));
        api.concepts.always(Err(AgentError::Transport("offline".into())));
        let client = SessionClient::new(api, RetryPolicy::default());

        assert_eq!(r.list_concepts(&client, "en").await, vec!["Gravity", "Light"]);
        assert_eq!(r.list_concepts(&client, "en").await, vec!["Gravity", "Light"]);
    }

    #[tokio::test]
    async fn test_list_translates_and_records_table() {
        let kv = Arc::new(MemoryKv::new());
        let r = resolver(kv);
        let api = Arc::new(ScriptedAgentApi::new());
        api.concepts.push_ok(concepts(&["Gravity"]));
        let client = SessionClient::new(api, RetryPolicy::default());

        let list = r.list_concepts(&client, "kn").await;
        assert_eq!(list, vec!["Gravity"]);
        assert_eq!(r.original_of("Gravity", "kn"), "Gravity");
    }

    #[test]
    fn test_displayed_list_persisted_per_language() {
        let r = resolver(Arc::new(MemoryKv::new()));
        r.save_displayed_list("kn", &["ಗುರುತ್ವ".to_string()]);
        assert_eq!(r.displayed_list("kn"), Some(vec!["ಗುರುತ್ವ".to_string()]));
        r.clear();
        assert_eq!(r.displayed_list("kn"), None);
    }
}
