//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TUTOR__*` 覆盖（双下划线表示嵌套，如 `TUTOR__AGENT__BASE_URL=http://host:8000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::agent::RetryPolicy;
use crate::core::RevealTiming;
use crate::visualization::VisualizationSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub retry: RetrySection,
    pub llm: LlmSection,
    pub reveal: RevealSection,
    pub storage: StorageSection,
    pub net: NetSection,
}

/// [agent] 段：远端教学智能体
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub base_url: String,
    /// 随 start / continue 发送的模型；为空时不带
    pub model: Option<String>,
    pub student_level: String,
    /// 单次 HTTP 尝试的超时
    pub http_timeout_secs: u64,
    /// start / continue 的整体上限（含重试）
    pub request_timeout_secs: u64,
    pub slow_network_secs: u64,
    /// 未登记用户名时的 student_id
    pub default_student_id: String,
    /// 这些状态码的回合才生成概念图
    pub visualization_states: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            model: Some("gemma-3-27b-it".to_string()),
            student_level: "medium".to_string(),
            http_timeout_secs: 20,
            request_timeout_secs: 120,
            slow_network_secs: 5,
            default_student_id: "guest_student".to_string(),
            visualization_states: vec!["CI".to_string(), "GE".to_string()],
        }
    }
}

/// [retry] 段：重试信封
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 300,
            backoff_factor: 2.0,
        }
    }
}

impl RetrySection {
    /// 非有限或负的 backoff_factor 回退为默认值 2.0
    pub fn policy(&self) -> RetryPolicy {
        let backoff_factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 0.0 {
            self.backoff_factor
        } else {
            tracing::warn!(
                "Invalid retry.backoff_factor {}, using {}",
                self.backoff_factor,
                RetrySection::default().backoff_factor
            );
            RetrySection::default().backoff_factor
        };
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            backoff_factor,
        }
    }
}

/// [llm] 段：概念图与翻译用的辅助 LLM
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub groq_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    /// 为空时读 GROQ_API_KEY
    pub groq_api_key: Option<String>,
    /// 为空时读 GEMINI_API_KEY
    pub gemini_api_key: Option<String>,
    /// 走 Groq 的模型白名单，其余模型走 Gemini
    pub groq_models: Vec<String>,
    /// 未选模型时概念图与翻译使用的模型
    pub default_model: String,
    pub reading_level: String,
    pub node_budget: u32,
    pub max_words: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        let settings = VisualizationSettings::default();
        Self {
            groq_base_url: None,
            gemini_base_url: None,
            groq_api_key: None,
            gemini_api_key: None,
            default_model: settings
                .groq_models
                .first()
                .cloned()
                .unwrap_or_default(),
            groq_models: settings.groq_models,
            reading_level: settings.reading_level,
            node_budget: settings.node_budget,
            max_words: settings.max_words,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout_secs: 60,
        }
    }
}

impl LlmSection {
    pub fn visualization_settings(&self) -> VisualizationSettings {
        VisualizationSettings {
            groq_models: self.groq_models.clone(),
            reading_level: self.reading_level.clone(),
            node_budget: self.node_budget,
            max_words: self.max_words,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// [reveal] 段：逐词与逐节点节奏（毫秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevealSection {
    pub word_base_ms: u64,
    pub per_char_ms: u64,
    pub max_extra_ms: u64,
    pub node_step_ms: u64,
    pub edge_step_ms: u64,
}

impl Default for RevealSection {
    fn default() -> Self {
        Self {
            word_base_ms: 120,
            per_char_ms: 8,
            max_extra_ms: 200,
            node_step_ms: 400,
            edge_step_ms: 300,
        }
    }
}

impl RevealSection {
    pub fn timing(&self) -> RevealTiming {
        RevealTiming {
            word_base: Duration::from_millis(self.word_base_ms),
            per_char: Duration::from_millis(self.per_char_ms),
            max_extra: Duration::from_millis(self.max_extra_ms),
            node_step: Duration::from_millis(self.node_step_ms),
            edge_step: Duration::from_millis(self.edge_step_ms),
        }
    }
}

/// [storage] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// SQLite 文件；父目录不存在时自动创建
    pub path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("workspace/tutor.db"),
        }
    }
}

/// [net] 段：连通性探测
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetSection {
    pub probe_interval_secs: u64,
}

impl Default for NetSection {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TUTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TUTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TUTOR")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("agent.visualization_states")
            .with_list_parse_key("llm.groq_models")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
