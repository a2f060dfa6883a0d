//! 远端教学智能体：HTTP 协议结构、重试信封、传输层与会话客户端

pub mod api;
pub mod client;
pub mod mock;
pub mod retry;
pub mod transport;

pub use api::HasOutcome;
pub use client::{SessionClient, SessionIdentity, StartParams};
pub use mock::{Script, ScriptedAgentApi};
pub use retry::{call_with_retry, HttpReply, RetryPolicy};
pub use transport::{AgentApi, ApiResult, HttpAgentApi};
