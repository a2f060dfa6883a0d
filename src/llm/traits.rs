//! 辅助 LLM 后端抽象
//!
//! 只用于窄任务（概念图提取、翻译）：一次 system + user 提示，返回模型文本。

use async_trait::async_trait;

use crate::core::LlmError;

/// 一次补全请求
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// 所有后端（Groq / Gemini / Mock）实现 LlmBackend
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// 后端名称（日志用）
    fn name(&self) -> &str;

    /// 非流式补全，返回首个候选的文本
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}
