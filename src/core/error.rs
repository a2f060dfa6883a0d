//! 错误类型：远端智能体、本地存储、辅助 LLM
//!
//! 重试信封只重试 `AgentError::is_retryable()` 为真的错误；编排器把终态错误转成带重试入口的聊天消息。

use thiserror::Error;

/// 与远端教学智能体交互时可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 连接失败、读超时等传输层错误
    #[error("Network error: {0}")]
    Transport(String),

    /// 非 2xx 状态码
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// 2xx 但 success=false 或响应体为空
    #[error("Server error: {0}")]
    Application(String),

    #[error("Invalid response body: {0}")]
    Decode(String),

    /// 尚未开始会话就调用 continue；不消耗重试次数
    #[error("No active thread")]
    NoActiveThread,

    /// 编排器层面的整体超时（与单次请求超时无关）
    #[error("Request timed out")]
    Timeout,
}

impl AgentError {
    /// 传输 / 状态码 / 应用层失败都视为可能是暂时的
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Transport(_)
                | AgentError::Http { .. }
                | AgentError::Application(_)
                | AgentError::Decode(_)
        )
    }

    /// 聊天区展示的错误文案
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Transport(_) => "No internet connection".to_string(),
            AgentError::Timeout => "Request timed out".to_string(),
            AgentError::Application(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// 本地键值存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// 辅助 LLM（概念图 / 翻译）调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM returned empty response")]
    EmptyResponse,

    #[error("LLM config error: {0}")]
    Config(String),
}

/// 翻译协作方错误；调用方一律回退到原文
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslateError {
    #[error("Translation backend failed: {0}")]
    Backend(String),
}

impl From<LlmError> for TranslateError {
    fn from(e: LlmError) -> Self {
        TranslateError::Backend(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(AgentError::Transport("reset".into()).is_retryable());
        assert!(AgentError::Http { status: 503, message: "busy".into() }.is_retryable());
        assert!(AgentError::Application("x".into()).is_retryable());
        assert!(AgentError::Decode("eof".into()).is_retryable());
        assert!(!AgentError::NoActiveThread.is_retryable());
        assert!(!AgentError::Timeout.is_retryable());
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            AgentError::Transport("dns".into()).user_message(),
            "No internet connection"
        );
        assert_eq!(AgentError::Timeout.user_message(), "Request timed out");
        assert_eq!(
            AgentError::Application("Concept not found".into()).user_message(),
            "Concept not found"
        );
        assert_eq!(
            AgentError::Http { status: 500, message: "boom".into() }.user_message(),
            "HTTP 500: boom"
        );
    }

    #[test]
    fn test_store_error_from_json() {
        let err: StoreError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(err.to_string().starts_with("JSON error"));
    }
}
