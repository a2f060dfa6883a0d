//! 翻译协作方
//!
//! [`Translator`] 是外部翻译引擎的接缝；[`TextTranslator`] 在其上加两层缓存：
//! 回复文本按 (目标语言, 原文) 记忆在内存里，概念列表按语言对持久化到 `translation_cache`。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::TranslateError;
use crate::llm::{CompletionRequest, LlmBackend};
use crate::storage::kv::{KvStore, KvStoreExt};

pub const TRANSLATION_CACHE_NAMESPACE: &str = "translation_cache";

/// 外部翻译引擎：一次翻译一组字符串，输出与输入等长、同序
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        texts: &[String],
        source: &str,
        target: &str,
    ) -> Result<Vec<String>, TranslateError>;
}

/// 原样返回（测试与无翻译后端时使用）
#[derive(Debug, Default, Clone)]
pub struct PassthroughTranslator;

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(
        &self,
        texts: &[String],
        _source: &str,
        _target: &str,
    ) -> Result<Vec<String>, TranslateError> {
        Ok(texts.to_vec())
    }
}

/// 语言代码 -> 英文名称（提示词里使用）
pub fn language_name(code: &str) -> &'static str {
    match code.to_ascii_lowercase().as_str() {
        "kn" => "Kannada",
        "hi" => "Hindi",
        "ta" => "Tamil",
        "te" => "Telugu",
        _ => "English",
    }
}

/// 按文字判断源语言：含卡纳达文字符即为 kn，否则 en
pub fn detect_source_language(text: &str) -> &'static str {
    if text.chars().any(|c| ('\u{0C80}'..='\u{0CFF}').contains(&c)) {
        "kn"
    } else {
        "en"
    }
}

/// 借辅助 LLM 完成翻译：要求模型只回一个等长 JSON 字符串数组
pub struct LlmTranslator {
    backend: Arc<dyn LlmBackend>,
    model: String,
}

impl LlmTranslator {
    pub fn new(backend: Arc<dyn LlmBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate(
        &self,
        texts: &[String],
        source: &str,
        target: &str,
    ) -> Result<Vec<String>, TranslateError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let system = format!(
            "You translate text from {} to {}. You receive a JSON array of strings. \
             Reply with a JSON array of the translated strings, same length and order, and nothing else.",
            language_name(source),
            language_name(target)
        );
        let user = serde_json::to_string(texts).map_err(|e| TranslateError::Backend(e.to_string()))?;
        let request = CompletionRequest {
            model: self.model.clone(),
            system,
            user,
            temperature: 0.0,
            max_tokens: 4096,
        };

        let reply = self.backend.complete(&request).await?;
        let translated = parse_string_array(&reply)
            .ok_or_else(|| TranslateError::Backend("Reply is not a JSON string array".to_string()))?;
        if translated.len() != texts.len() {
            return Err(TranslateError::Backend(format!(
                "Expected {} translations, got {}",
                texts.len(),
                translated.len()
            )));
        }
        Ok(translated)
    }
}

/// 取回复中第一个 '[' 到最后一个 ']' 之间的内容按字符串数组解析
fn parse_string_array(reply: &str) -> Option<Vec<String>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

/// 带缓存的翻译入口；所有失败都回退到原文
pub struct TextTranslator {
    inner: Arc<dyn Translator>,
    kv: Arc<dyn KvStore>,
    memo: Mutex<HashMap<(String, String), String>>,
}

impl TextTranslator {
    pub fn new(inner: Arc<dyn Translator>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            kv,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// 翻译一条回复到 target；源语言按文字检测，与目标相同时直接返回
    pub async fn translate_text(&self, text: &str, target: &str) -> String {
        if text.trim().is_empty() || target.trim().is_empty() {
            return text.to_string();
        }
        let memo_key = (target.to_string(), text.to_string());
        if let Some(hit) = self.memo.lock().ok().and_then(|m| m.get(&memo_key).cloned()) {
            return hit;
        }

        let source = detect_source_language(text);
        let result = if source.eq_ignore_ascii_case(target) {
            text.to_string()
        } else {
            tracing::debug!("Translating {} -> {} ({} chars)", source, target, text.len());
            match self.inner.translate(&[text.to_string()], source, target).await {
                Ok(mut out) => out
                    .pop()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| text.to_string()),
                Err(e) => {
                    tracing::warn!("Translation failed, keeping original text: {}", e);
                    text.to_string()
                }
            }
        };

        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(memo_key, result.clone());
        }
        result
    }

    /// 翻译概念列表；缓存中有等长结果时直接复用
    pub async fn translate_list(
        &self,
        list: &[String],
        source: &str,
        target: &str,
    ) -> Result<Vec<String>, TranslateError> {
        if target.trim().is_empty() || source.eq_ignore_ascii_case(target) {
            return Ok(list.to_vec());
        }
        let key = list_cache_key(source, target);
        match self.kv.get_json::<Vec<String>>(TRANSLATION_CACHE_NAMESPACE, &key) {
            Ok(Some(cached)) if cached.len() == list.len() => return Ok(cached),
            Ok(_) => {}
            Err(e) => tracing::warn!("Translation cache unreadable: {}", e),
        }

        let translated = self.inner.translate(list, source, target).await?;
        if translated.len() != list.len() {
            return Err(TranslateError::Backend(format!(
                "Expected {} translations, got {}",
                list.len(),
                translated.len()
            )));
        }
        if let Err(e) = self.kv.put_json(TRANSLATION_CACHE_NAMESPACE, &key, &translated) {
            tracing::warn!("Failed to cache translated list: {}", e);
        }
        Ok(translated)
    }

    /// 清空内存记忆与持久化的列表缓存
    pub fn clear(&self) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.clear();
        }
        if let Err(e) = self.kv.clear_namespace(TRANSLATION_CACHE_NAMESPACE) {
            tracing::warn!("Failed to clear translation cache: {}", e);
        }
    }
}

pub fn list_cache_key(source: &str, target: &str) -> String {
    format!(
        "concepts_{}_{}",
        source.to_ascii_lowercase(),
        target.to_ascii_lowercase()
    )
}
