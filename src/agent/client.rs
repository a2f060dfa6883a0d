//! 会话客户端：持有当前 thread / session 身份，提供会话生命周期操作
//!
//! 每个操作都经过重试信封；身份只在 start 成功、continue 返回新 thread、或显式
//! `set_current_thread_and_session` 时改变。身份用 watch 通道保存，外部可订阅变化。

use std::sync::{Arc, RwLock};

use tokio::sync::watch;

use crate::agent::api::*;
use crate::agent::retry::{call_with_retry, RetryPolicy};
use crate::agent::transport::AgentApi;
use crate::core::AgentError;

/// 当前会话身份；thread_id 为 None 表示没有活动会话
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    pub thread_id: Option<String>,
    pub session_id: Option<String>,
}

/// start 的调用参数
#[derive(Debug, Clone, PartialEq)]
pub struct StartParams {
    pub concept_title: String,
    pub student_id: String,
    pub persona_name: Option<String>,
    pub session_label: Option<String>,
    pub locale_flag: bool,
}

impl StartParams {
    pub fn new(concept_title: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            concept_title: concept_title.into(),
            student_id: student_id.into(),
            persona_name: None,
            session_label: None,
            locale_flag: false,
        }
    }
}

pub struct SessionClient {
    api: Arc<dyn AgentApi>,
    retry: RetryPolicy,
    identity: watch::Sender<SessionIdentity>,
    /// 随 start / continue 发送的模型名
    model: RwLock<Option<String>>,
    student_level: String,
}

impl SessionClient {
    pub fn new(api: Arc<dyn AgentApi>, retry: RetryPolicy) -> Self {
        let (identity, _) = watch::channel(SessionIdentity::default());
        Self {
            api,
            retry,
            identity,
            model: RwLock::new(None),
            student_level: "medium".to_string(),
        }
    }

    pub fn with_model(self, model: Option<String>) -> Self {
        if let Ok(mut m) = self.model.write() {
            *m = model;
        }
        self
    }

    pub fn with_student_level(mut self, level: impl Into<String>) -> Self {
        self.student_level = level.into();
        self
    }

    pub fn identity(&self) -> SessionIdentity {
        self.identity.borrow().clone()
    }

    pub fn current_thread_id(&self) -> Option<String> {
        self.identity.borrow().thread_id.clone()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.identity.borrow().session_id.clone()
    }

    /// 订阅身份变化
    pub fn subscribe_identity(&self) -> watch::Receiver<SessionIdentity> {
        self.identity.subscribe()
    }

    /// 显式设置身份；没有 thread 时 session 一并清空
    pub fn set_current_thread_and_session(&self, thread_id: Option<String>, session_id: Option<String>) {
        let session_id = if thread_id.is_some() {
            session_id
        } else {
            if session_id.is_some() {
                tracing::warn!("Ignoring session id without a thread id");
            }
            None
        };
        self.identity.send_replace(SessionIdentity {
            thread_id,
            session_id,
        });
    }

    fn model(&self) -> Option<String> {
        self.model.read().ok().and_then(|m| m.clone())
    }

    pub fn set_model(&self, model: Option<String>) {
        if let Ok(mut m) = self.model.write() {
            *m = model;
        }
    }

    /// 开始新会话；成功时原子地采用返回的 thread / session
    pub async fn start_session(&self, params: StartParams) -> Result<StartSessionResponse, AgentError> {
        let req = StartSessionRequest {
            concept_title: params.concept_title,
            student_id: params.student_id,
            persona_name: params.persona_name,
            session_label: params.session_label,
            locale_flag: params.locale_flag,
            model: self.model(),
            student_level: self.student_level.clone(),
        };

        let resp = call_with_retry(&self.retry, || self.api.start_session(&req)).await?;

        match resp.thread_id.clone() {
            Some(thread_id) => {
                let session_id = resp.session_id.clone();
                tracing::info!(
                    "Session started: thread_id={}, session_id={:?}",
                    thread_id,
                    session_id
                );
                self.identity.send_replace(SessionIdentity {
                    thread_id: Some(thread_id),
                    session_id,
                });
            }
            None => tracing::warn!("Session start succeeded without a thread id"),
        }
        Ok(resp)
    }

    /// 在当前 thread 上继续对话
    pub async fn continue_session(&self, user_message: &str) -> Result<ContinueSessionResponse, AgentError> {
        self.continue_session_with(user_message, false).await
    }

    /// clicked_autosuggestion 为真表示消息来自点击的推荐问题
    pub async fn continue_session_with(
        &self,
        user_message: &str,
        clicked_autosuggestion: bool,
    ) -> Result<ContinueSessionResponse, AgentError> {
        let thread_id = self.current_thread_id().ok_or(AgentError::NoActiveThread)?;

        let req = ContinueSessionRequest {
            thread_id: thread_id.clone(),
            user_message: user_message.to_string(),
            model: self.model(),
            clicked_autosuggestion: Some(clicked_autosuggestion),
            student_level: Some(self.student_level.clone()),
        };

        let resp = call_with_retry(&self.retry, || self.api.continue_session(&req)).await?;

        // 服务端迁移了 thread：采用新 id，保留 session
        if let Some(new_thread) = resp.thread_id.as_deref() {
            if new_thread != thread_id {
                tracing::info!("Thread id updated: {} -> {}", thread_id, new_thread);
                self.identity.send_modify(|id| id.thread_id = Some(new_thread.to_string()));
            }
        }
        Ok(resp)
    }

    pub async fn get_session_status(&self, thread_id: &str) -> Result<SessionStatusResponse, AgentError> {
        call_with_retry(&self.retry, || self.api.session_status(thread_id)).await
    }

    pub async fn get_session_history(&self, thread_id: &str) -> Result<SessionHistoryResponse, AgentError> {
        call_with_retry(&self.retry, || self.api.session_history(thread_id)).await
    }

    pub async fn get_session_summary(&self, thread_id: &str) -> Result<SessionSummaryResponse, AgentError> {
        call_with_retry(&self.retry, || self.api.session_summary(thread_id)).await
    }

    pub async fn get_available_concepts(&self) -> Result<ConceptsListResponse, AgentError> {
        call_with_retry(&self.retry, || self.api.concepts()).await
    }

    pub async fn get_available_models(&self) -> Result<AvailableModelsResponse, AgentError> {
        call_with_retry(&self.retry, || self.api.available_models()).await
    }

    pub async fn get_personas(&self) -> Result<PersonasListResponse, AgentError> {
        call_with_retry(&self.retry, || self.api.personas()).await
    }

    /// 存活探测：只尝试一次
    pub async fn health_check(&self) -> Result<HealthResponse, AgentError> {
        call_with_retry(&RetryPolicy::single_attempt(), || self.api.health()).await
    }
}
