//! Mock LLM 后端（用于测试，无需 API）
//!
//! 按顺序返回预置回复，用完后重复最后的 fallback；记录收到的请求。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::LlmError;
use crate::llm::{CompletionRequest, LlmBackend};

pub struct MockLlmBackend {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Result<String, LlmError>,
    delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmBackend {
    /// 总是返回同一段文本
    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Ok(reply.into()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 总是失败
    pub fn failing(error: LlmError) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Err(error),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: Result<String, LlmError>) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for MockLlmBackend {
    fn default() -> Self {
        Self::failing(LlmError::Config("mock backend has no reply".to_string()))
    }
}

#[async_trait]
impl LlmBackend for MockLlmBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        queued.unwrap_or_else(|| self.fallback.clone())
    }
}
