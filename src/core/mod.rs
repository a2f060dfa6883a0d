//! 核心编排层：错误类型、状态投影、可取消任务、展示流水线、主控循环

pub mod error;
pub mod orchestrator;
pub mod reveal;
pub mod state;
pub mod task;

pub use error::{AgentError, LlmError, StoreError, TranslateError};
pub use orchestrator::{create_tutor, spawn_orchestrator, Command, TutorHandle, TutorParts, TutorSettings};
pub use reveal::{RevealTiming, RevealUpdate};
pub use state::{ChatEvent, ChatMessage, ChatState, ConversationPhase, Sender};
pub use task::{TaskHandle, TaskId, TaskKind, TaskSlot};
