//! 辅助 LLM 层：后端抽象与实现（Groq / Gemini / Mock）

pub mod gemini;
pub mod mock;
pub mod openai;
pub mod traits;

pub use gemini::{GeminiBackend, GEMINI_BASE_URL};
pub use mock::MockLlmBackend;
pub use openai::{GroqBackend, GROQ_BASE_URL};
pub use traits::{CompletionRequest, LlmBackend};
