//! 远端教学智能体 HTTP API 的请求 / 响应结构
//!
//! 所有响应都显式实现 [`HasOutcome`]：有 success 字段的返回它与 message，
//! 没有的（health）走默认实现，即传输成功即成功。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 响应体的应用层结果能力（静态分派，取代运行时类型判断）
pub trait HasOutcome {
    /// 响应体自身声明的 success；没有该字段的类型默认 true
    fn succeeded(&self) -> bool {
        true
    }

    /// 失败时服务端给出的说明
    fn failure_message(&self) -> Option<&str> {
        None
    }
}

macro_rules! impl_outcome {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl HasOutcome for $ty {
                fn succeeded(&self) -> bool {
                    self.success
                }

                fn failure_message(&self) -> Option<&str> {
                    self.message.as_deref()
                }
            }
        )+
    };
}

fn default_true() -> bool {
    true
}

fn default_student_level() -> String {
    "medium".to_string()
}

// ---------------------------------------------------------------------------
// 请求
// ---------------------------------------------------------------------------

/// POST /session/start
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StartSessionRequest {
    pub concept_title: String,
    pub student_id: String,
    pub persona_name: Option<String>,
    pub session_label: Option<String>,
    /// 界面语言标记（服务端字段名沿用 is_kannada）
    #[serde(rename = "is_kannada")]
    pub locale_flag: bool,
    pub model: Option<String>,
    pub student_level: String,
}

impl StartSessionRequest {
    pub fn new(concept_title: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            concept_title: concept_title.into(),
            student_id: student_id.into(),
            persona_name: None,
            session_label: None,
            locale_flag: false,
            model: None,
            student_level: default_student_level(),
        }
    }
}

/// POST /session/continue
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContinueSessionRequest {
    pub thread_id: String,
    pub user_message: String,
    pub model: Option<String>,
    pub clicked_autosuggestion: Option<bool>,
    pub student_level: Option<String>,
}

// ---------------------------------------------------------------------------
// 响应
// ---------------------------------------------------------------------------

/// 每轮回复附带的元数据（模拟、图片、视频、测验分数等）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionMetadata {
    pub show_simulation: Option<bool>,
    pub simulation_config: Option<Value>,
    pub image_url: Option<String>,
    pub image_description: Option<String>,
    pub image_node: Option<String>,
    pub video_url: Option<String>,
    pub video_node: Option<String>,
    pub quiz_score: Option<f32>,
    pub retrieval_score: Option<f32>,
    pub sim_concepts: Option<Vec<String>>,
    pub sim_current_idx: Option<i32>,
    pub sim_total_concepts: Option<i32>,
    pub misconception_detected: Option<bool>,
    pub last_correction: Option<String>,
    pub node_transitions: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StartSessionResponse {
    pub success: bool,
    pub session_id: Option<String>,
    pub thread_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_response: Option<String>,
    pub current_state: Option<String>,
    pub concept_title: Option<String>,
    pub message: Option<String>,
    pub metadata: SessionMetadata,
    pub autosuggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContinueSessionResponse {
    pub success: bool,
    pub thread_id: Option<String>,
    pub agent_response: Option<String>,
    pub current_state: Option<String>,
    pub metadata: SessionMetadata,
    pub message: Option<String>,
    pub autosuggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionStatusResponse {
    pub success: bool,
    pub thread_id: Option<String>,
    pub exists: bool,
    pub current_state: Option<String>,
    pub progress: Option<Value>,
    pub concept_title: Option<String>,
    pub message: Option<String>,
}

/// 历史中的单条消息；role / content 类型由服务端决定，按 JSON 值保留
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryMessage {
    pub role: Value,
    pub content: Value,
}

impl HistoryMessage {
    pub fn role(&self) -> Option<&str> {
        self.role.as_str()
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_str()
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionHistoryResponse {
    pub success: bool,
    pub thread_id: Option<String>,
    pub exists: bool,
    pub messages: Vec<HistoryMessage>,
    pub node_transitions: Vec<Value>,
    pub concept_title: Option<String>,
    pub message: Option<String>,
}

/// 视为「助手」发言的角色名（大小写不敏感）
pub const ASSISTANT_ROLES: &[&str] = &["assistant", "ai"];

impl SessionHistoryResponse {
    /// 最近一条助手消息（跳过空白内容）
    pub fn last_assistant_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| {
                m.role()
                    .map(|r| ASSISTANT_ROLES.iter().any(|a| r.eq_ignore_ascii_case(a)))
                    .unwrap_or(false)
            })
            .find_map(|m| m.content().filter(|c| !c.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSummaryResponse {
    pub success: bool,
    pub thread_id: Option<String>,
    pub exists: bool,
    pub summary: Option<Value>,
    pub quiz_score: Option<f32>,
    pub transfer_success: Option<bool>,
    pub misconception_detected: Option<bool>,
    pub definition_echoed: Option<bool>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConceptsListResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    pub concepts: Vec<String>,
    pub total: usize,
    pub message: Option<String>,
}

impl Default for ConceptsListResponse {
    fn default() -> Self {
        Self {
            success: true,
            concepts: Vec::new(),
            total: 0,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AvailableModelsResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    pub models: Vec<String>,
    pub total: usize,
    pub default_model: Option<String>,
    pub message: Option<String>,
}

impl Default for AvailableModelsResponse {
    fn default() -> Self {
        Self {
            success: true,
            models: Vec::new(),
            total: 0,
            default_model: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersonaInfo {
    pub name: String,
    pub description: String,
    pub sample_phrases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersonasListResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    pub personas: Vec<PersonaInfo>,
    pub total: usize,
    pub message: Option<String>,
}

impl Default for PersonasListResponse {
    fn default() -> Self {
        Self {
            success: true,
            personas: Vec::new(),
            total: 0,
            message: None,
        }
    }
}

/// GET /health；没有 success 字段
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub persistence: Option<String>,
    pub agent_type: String,
    pub available_endpoints: Vec<String>,
}

impl_outcome!(
    StartSessionResponse,
    ContinueSessionResponse,
    SessionStatusResponse,
    SessionHistoryResponse,
    SessionSummaryResponse,
    ConceptsListResponse,
    AvailableModelsResponse,
    PersonasListResponse,
);

impl HasOutcome for HealthResponse {}
