//! OpenAI 兼容端点（Groq）
//!
//! 通过 async_openai 调用，base_url 指向 Groq 的 OpenAI 兼容 API。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::core::LlmError;
use crate::llm::{CompletionRequest, LlmBackend};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

pub struct GroqBackend {
    client: Client<OpenAIConfig>,
}

impl GroqBackend {
    /// api_key 为空时读取 GROQ_API_KEY
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("GROQ_API_KEY").ok())
            .unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!("GROQ_API_KEY not set, Groq requests will be rejected");
        }

        let config = OpenAIConfig::new()
            .with_api_base(base_url.unwrap_or(GROQ_BASE_URL))
            .with_api_key(api_key);

        Self {
            client: Client::with_config(config),
        }
    }

    fn to_messages(request: &CompletionRequest) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system.clone())
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(request.user.clone())
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;
        Ok(vec![
            ChatCompletionRequestMessage::System(system),
            ChatCompletionRequestMessage::User(user),
        ])
    }
}

#[async_trait]
impl LlmBackend for GroqBackend {
    fn name(&self) -> &str {
        "groq"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .messages(Self::to_messages(request)?)
            .temperature(request.temperature)
            .max_completion_tokens(request.max_tokens)
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        tracing::debug!("Sending completion to Groq ({})", request.model);
        let response = self
            .client
            .chat()
            .create(body)
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}
