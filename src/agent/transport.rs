//! 远端智能体传输层
//!
//! [`AgentApi`] 是单次 HTTP 调用的接缝：每个方法只发一次请求，返回状态码与解析后的响应体；
//! 重试与成功判定由上层的重试信封负责。[`HttpAgentApi`] 基于 reqwest 实现。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::agent::api::*;
use crate::agent::retry::HttpReply;
use crate::core::AgentError;

pub type ApiResult<T> = Result<HttpReply<T>, AgentError>;

/// 远端智能体的全部端点（单次调用，不含重试）
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn start_session(&self, req: &StartSessionRequest) -> ApiResult<StartSessionResponse>;

    async fn continue_session(
        &self,
        req: &ContinueSessionRequest,
    ) -> ApiResult<ContinueSessionResponse>;

    async fn session_status(&self, thread_id: &str) -> ApiResult<SessionStatusResponse>;

    async fn session_history(&self, thread_id: &str) -> ApiResult<SessionHistoryResponse>;

    async fn session_summary(&self, thread_id: &str) -> ApiResult<SessionSummaryResponse>;

    async fn concepts(&self) -> ApiResult<ConceptsListResponse>;

    async fn available_models(&self) -> ApiResult<AvailableModelsResponse>;

    async fn personas(&self) -> ApiResult<PersonasListResponse>;

    async fn health(&self) -> ApiResult<HealthResponse>;
}

/// reqwest 实现：base_url + 固定路径，单次请求超时由 http_timeout 决定
pub struct HttpAgentApi {
    client: Client,
    base_url: String,
}

impl HttpAgentApi {
    pub fn new(base_url: &str, http_timeout: Duration) -> Result<Self, AgentError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AgentError::Transport("API base URL required".to_string()));
        }
        let client = Client::builder()
            .connect_timeout(http_timeout)
            .timeout(http_timeout)
            .build()
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        tracing::debug!("Agent API base url: {}", base_url);
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        Self::read(resp).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        Self::read(resp).await
    }

    async fn read<T: DeserializeOwned>(resp: Response) -> ApiResult<T> {
        let status = resp.status();
        tracing::debug!("{} {}", status.as_u16(), resp.url());

        let text = if status.is_success() {
            resp.text()
                .await
                .map_err(|e| AgentError::Transport(format!("Read body: {e}")))?
        } else {
            resp.text().await.unwrap_or_default()
        };
        decode_reply(status.as_u16(), status.canonical_reason(), &text)
    }
}

/// 状态码 + 响应文本 -> HttpReply
///
/// 非 2xx 返回 `HttpReply::error`（错误文本为空时用状态说明）；2xx 空体返回 `HttpReply::empty`；
/// 2xx 但 JSON 不合法返回 `AgentError::Decode`。
pub fn decode_reply<T: DeserializeOwned>(status: u16, reason: Option<&str>, text: &str) -> ApiResult<T> {
    if !(200..300).contains(&status) {
        let message = if text.trim().is_empty() {
            reason.unwrap_or("Request failed").to_string()
        } else {
            text.to_string()
        };
        return Ok(HttpReply::error(status, message));
    }
    if text.trim().is_empty() {
        return Ok(HttpReply::empty(status));
    }
    let body = serde_json::from_str(text).map_err(|e| AgentError::Decode(e.to_string()))?;
    Ok(HttpReply {
        status,
        body: Some(body),
        error_text: None,
    })
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn start_session(&self, req: &StartSessionRequest) -> ApiResult<StartSessionResponse> {
        self.post("/session/start", req).await
    }

    async fn continue_session(
        &self,
        req: &ContinueSessionRequest,
    ) -> ApiResult<ContinueSessionResponse> {
        self.post("/session/continue", req).await
    }

    async fn session_status(&self, thread_id: &str) -> ApiResult<SessionStatusResponse> {
        self.get(&format!("/session/status/{thread_id}")).await
    }

    async fn session_history(&self, thread_id: &str) -> ApiResult<SessionHistoryResponse> {
        self.get(&format!("/session/history/{thread_id}")).await
    }

    async fn session_summary(&self, thread_id: &str) -> ApiResult<SessionSummaryResponse> {
        self.get(&format!("/session/summary/{thread_id}")).await
    }

    async fn concepts(&self) -> ApiResult<ConceptsListResponse> {
        self.get("/concepts").await
    }

    async fn available_models(&self) -> ApiResult<AvailableModelsResponse> {
        self.get("/available-models").await
    }

    async fn personas(&self) -> ApiResult<PersonasListResponse> {
        self.get("/personas").await
    }

    async fn health(&self) -> ApiResult<HealthResponse> {
        self.get("/health").await
    }
}
