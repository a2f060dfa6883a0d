//! tutor - 对话式辅导客户端核心
//!
//! 模块划分：
//! - **agent**: 远端教学智能体的接口类型、重试信封、HTTP 传输与会话客户端
//! - **concepts**: 概念名在规范语言与界面语言之间的对照，以及翻译缓存
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、状态投影、可取消任务、展示流水线与编排器
//! - **llm**: 辅助 LLM 后端抽象与实现（Groq / Gemini / Mock）
//! - **net**: 连通性探测
//! - **repl**: 行式交互界面
//! - **storage**: 键值持久化、概念到会话的映射、用户偏好
//! - **visualization**: 概念图结构、提示词与提取

pub mod agent;
pub mod concepts;
pub mod config;
pub mod core;
pub mod llm;
pub mod net;
pub mod repl;
pub mod storage;
pub mod visualization;
