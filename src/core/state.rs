//! 状态定义：ChatState 投影、会话阶段、聊天消息、一次性事件
//!
//! 编排器独占可变状态，每次变化后把完整的 ChatState 推到 watch 通道；外部只读。
//! 不适合放进快照的一次性信号（朗读提示、慢网络）走 broadcast 的 ChatEvent。

use serde::Serialize;

use crate::agent::api::SessionMetadata;
use crate::storage::prefs::DEFAULT_LANGUAGE;
use crate::visualization::VisualizationGraph;

/// 外部看到的「投影」状态
#[derive(Clone, Debug, Serialize)]
pub struct ChatState {
    pub phase: ConversationPhase,
    /// 永久聊天记录，只追加；整表重置发生在登出、新会话、切换概念时
    pub messages: Vec<ChatMessage>,
    pub is_loading: bool,
    pub is_typing: bool,
    /// 逐词展示中的文本
    pub typing_text: String,
    /// 本轮翻译后的完整文本（展示目标，也是朗读文本）
    pub translated_output: String,
    /// 本轮智能体原文
    pub original_response: String,
    pub agent_state: String,
    pub metadata: Option<SessionMetadata>,
    pub autosuggestions: Vec<String>,
    pub graph: VisualizationGraph,
    /// 界面语言下的概念名
    pub selected_concept: Option<String>,
    pub session_started: bool,
    pub language: String,
    pub is_connected: bool,
    pub available_concepts: Vec<String>,
    pub available_models: Vec<String>,
    pub selected_model: Option<String>,
    pub last_user_message: String,
    /// 用作 student_id 的用户名，未登记时为空
    pub user_name: String,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            phase: ConversationPhase::NoConcept,
            messages: Vec::new(),
            is_loading: false,
            is_typing: false,
            typing_text: String::new(),
            translated_output: String::new(),
            original_response: String::new(),
            agent_state: String::new(),
            metadata: None,
            autosuggestions: Vec::new(),
            graph: VisualizationGraph::idle(),
            selected_concept: None,
            session_started: false,
            language: DEFAULT_LANGUAGE.to_string(),
            is_connected: true,
            available_concepts: Vec::new(),
            available_models: Vec::new(),
            selected_model: None,
            last_user_message: String::new(),
            user_name: String::new(),
        }
    }
}

impl ChatState {
    pub fn ai_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.sender == Sender::Ai)
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

/// 会话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConversationPhase {
    NoConcept,
    Loading,
    Resuming,
    Starting,
    Ready,
    AwaitingReply,
    /// 已追加错误消息，会话仍可继续发送
    ErrorRecovered,
    /// start 失败，会话未开始；重新选择概念会再次 start
    StartFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Sender {
    User,
    Ai,
}

/// 一条永久聊天消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub content: String,
    pub sender: Sender,
    pub is_error: bool,
    /// 界面可据此提供「重试」入口
    pub can_retry: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::User,
            is_error: false,
            can_retry: false,
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender: Sender::Ai,
            is_error: false,
            can_retry: false,
        }
    }

    /// 错误消息以 "Error: " 开头，由 AI 一侧发出
    pub fn error(reason: &str) -> Self {
        Self {
            content: format!("Error: {reason}"),
            sender: Sender::Ai,
            is_error: true,
            can_retry: true,
        }
    }
}

/// 一次性事件
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    /// 翻译完成、逐词展示开始前发出，每轮恰好一次
    SpeechCue(String),
    /// 某次发送超过慢网络阈值仍未返回
    SlowNetwork,
}
