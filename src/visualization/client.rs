//! 概念图客户端：按所选模型挑后端，发一次提示，提取图
//!
//! 模型在 Groq 白名单内走 Groq，否则走 Gemini。`generate` 从不返回错误。

use std::sync::Arc;

use crate::concepts::language_name;
use crate::llm::{CompletionRequest, LlmBackend};
use crate::visualization::extract::extract_graph;
use crate::visualization::graph::VisualizationGraph;
use crate::visualization::prompt::{system_prompt, user_prompt};

/// 提示词参数与后端选择
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationSettings {
    pub groq_models: Vec<String>,
    pub reading_level: String,
    pub node_budget: u32,
    pub max_words: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for VisualizationSettings {
    fn default() -> Self {
        Self {
            groq_models: vec!["meta-llama/llama-4-scout-17b-16e-instruct".to_string()],
            reading_level: "6".to_string(),
            node_budget: 8,
            max_words: 250,
            temperature: 0.7,
            max_tokens: 8192,
        }
    }
}

pub struct VisualizationClient {
    groq: Arc<dyn LlmBackend>,
    gemini: Arc<dyn LlmBackend>,
    settings: VisualizationSettings,
}

impl VisualizationClient {
    pub fn new(
        groq: Arc<dyn LlmBackend>,
        gemini: Arc<dyn LlmBackend>,
        settings: VisualizationSettings,
    ) -> Self {
        Self {
            groq,
            gemini,
            settings,
        }
    }

    pub fn is_groq_model(&self, model: &str) -> bool {
        self.settings
            .groq_models
            .iter()
            .any(|m| m.eq_ignore_ascii_case(model))
    }

    pub fn groq_models(&self) -> &[String] {
        &self.settings.groq_models
    }

    fn backend_for(&self, model: &str) -> &Arc<dyn LlmBackend> {
        if self.is_groq_model(model) {
            &self.groq
        } else {
            &self.gemini
        }
    }

    /// 发送提示并返回原始文本；失败时返回以 "Error:" 开头的说明
    pub async fn query(&self, agent_response: &str, language: &str, model: &str) -> String {
        let backend = self.backend_for(model);
        let request = CompletionRequest {
            model: model.to_string(),
            system: system_prompt(
                language_name(language),
                &self.settings.reading_level,
                self.settings.node_budget,
                self.settings.max_words,
            ),
            user: user_prompt(agent_response),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        tracing::debug!(
            "Visualizing reply of {} chars via {} ({})",
            agent_response.len(),
            backend.name(),
            model
        );
        match backend.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Visualization query failed: {}", e);
                format!("Error: {e}")
            }
        }
    }

    /// query + extract；永远得到一张图（可能是占位图）
    pub async fn generate(&self, agent_response: &str, language: &str, model: &str) -> VisualizationGraph {
        let raw = self.query(agent_response, language, model).await;
        extract_graph(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LlmError;
    use crate::llm::MockLlmBackend;

    const MAP: &str = r#"[ANSWER] Gravity pulls.
[CONCEPT_MAP_JSON] {"visualization_type":"Concept Map","main_concept":"Gravity","nodes":[{"id":"A","label":"Gravity"}],"edges":[]}"#;

    #[tokio::test]
    async fn test_routes_by_model_allow_list() {
        let groq = Arc::new(MockLlmBackend::with_reply(MAP));
        let gemini = Arc::new(MockLlmBackend::with_reply(MAP));
        let client = VisualizationClient::new(groq.clone(), gemini.clone(), VisualizationSettings::default());

        client
            .generate("Gravity pulls objects", "kn", "META-LLAMA/llama-4-scout-17b-16e-instruct")
            .await;
        assert_eq!(groq.calls(), 1);
        assert_eq!(gemini.calls(), 0);

        let graph = client.generate("Gravity pulls objects", "en", "gemma-3-27b-it").await;
        assert_eq!(gemini.calls(), 1);
        assert_eq!(graph.main_concept, "Gravity");

        let req = &groq.requests()[0];
        assert!(req.system.contains("Kannada"));
        assert!(req.user.ends_with("Gravity pulls objects"));
    }

    #[tokio::test]
    async fn test_backend_failure_yields_placeholder() {
        let failing = Arc::new(MockLlmBackend::failing(LlmError::Status {
            status: 429,
            body: "slow down".into(),
        }));
        let client = VisualizationClient::new(failing.clone(), failing, VisualizationSettings::default());

        let raw = client.query("text", "en", "x").await;
        assert!(raw.starts_with("Error:"));
        assert!(client.generate("text", "en", "x").await.is_placeholder());
    }
}
