//! 脚本化的 AgentApi（用于测试，无需服务端）
//!
//! 每个端点一个 [`Script`]：先按顺序弹出预置回复，用完后返回 fallback；同时记录调用次数与请求体。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::api::*;
use crate::agent::retry::HttpReply;
use crate::agent::transport::{AgentApi, ApiResult};
use crate::core::AgentError;

/// 单个端点的回复脚本
pub struct Script<T> {
    queue: Mutex<VecDeque<ApiResult<T>>>,
    fallback: Mutex<Option<ApiResult<T>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> Script<T> {
    /// 追加一条一次性回复
    pub fn push(&self, reply: ApiResult<T>) -> &Self {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(reply);
        }
        self
    }

    pub fn push_ok(&self, body: T) -> &Self {
        self.push(Ok(HttpReply::ok(body)))
    }

    /// 队列耗尽后一直返回的回复
    pub fn always(&self, reply: ApiResult<T>) -> &Self {
        if let Ok(mut f) = self.fallback.lock() {
            *f = Some(reply);
        }
        self
    }

    pub fn always_ok(&self, body: T) -> &Self {
        self.always(Ok(HttpReply::ok(body)))
    }

    /// 每次回复前等待（模拟慢网络）
    pub fn with_delay(&self, delay: Duration) -> &Self {
        if let Ok(mut d) = self.delay.lock() {
            *d = Some(delay);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next(&self) -> ApiResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match queued {
            Some(reply) => reply,
            None => self
                .fallback
                .lock()
                .ok()
                .and_then(|f| f.clone())
                .unwrap_or_else(|| Err(AgentError::Transport("no scripted reply".to_string()))),
        }
    }
}

/// 全端点脚本化的假服务端
#[derive(Default)]
pub struct ScriptedAgentApi {
    pub start: Script<StartSessionResponse>,
    pub continue_: Script<ContinueSessionResponse>,
    pub status: Script<SessionStatusResponse>,
    pub history: Script<SessionHistoryResponse>,
    pub summary: Script<SessionSummaryResponse>,
    pub concepts: Script<ConceptsListResponse>,
    pub models: Script<AvailableModelsResponse>,
    pub personas: Script<PersonasListResponse>,
    pub health: Script<HealthResponse>,
    start_requests: Mutex<Vec<StartSessionRequest>>,
    continue_requests: Mutex<Vec<ContinueSessionRequest>>,
}

impl ScriptedAgentApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_requests(&self) -> Vec<StartSessionRequest> {
        self.start_requests.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn continue_requests(&self) -> Vec<ContinueSessionRequest> {
        self.continue_requests.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// 所有端点的调用总数
    pub fn total_calls(&self) -> usize {
        self.start.calls()
            + self.continue_.calls()
            + self.status.calls()
            + self.history.calls()
            + self.summary.calls()
            + self.concepts.calls()
            + self.models.calls()
            + self.personas.calls()
            + self.health.calls()
    }
}

#[async_trait]
impl AgentApi for ScriptedAgentApi {
    async fn start_session(&self, req: &StartSessionRequest) -> ApiResult<StartSessionResponse> {
        if let Ok(mut v) = self.start_requests.lock() {
            v.push(req.clone());
        }
        self.start.next().await
    }

    async fn continue_session(
        &self,
        req: &ContinueSessionRequest,
    ) -> ApiResult<ContinueSessionResponse> {
        if let Ok(mut v) = self.continue_requests.lock() {
            v.push(req.clone());
        }
        self.continue_.next().await
    }

    async fn session_status(&self, _thread_id: &str) -> ApiResult<SessionStatusResponse> {
        self.status.next().await
    }

    async fn session_history(&self, _thread_id: &str) -> ApiResult<SessionHistoryResponse> {
        self.history.next().await
    }

    async fn session_summary(&self, _thread_id: &str) -> ApiResult<SessionSummaryResponse> {
        self.summary.next().await
    }

    async fn concepts(&self) -> ApiResult<ConceptsListResponse> {
        self.concepts.next().await
    }

    async fn available_models(&self) -> ApiResult<AvailableModelsResponse> {
        self.models.next().await
    }

    async fn personas(&self) -> ApiResult<PersonasListResponse> {
        self.personas.next().await
    }

    async fn health(&self) -> ApiResult<HealthResponse> {
        self.health.next().await
    }
}
