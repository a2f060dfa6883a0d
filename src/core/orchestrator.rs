//! 会话编排器：主控循环
//!
//! 负责：加载配置、组装会话客户端 / 存储 / 翻译 / 概念图后端，建立 cmd/state/event 三通道，
//! 并在后台任务中消费命令、远端结果与展示进度。所有可变状态只在这个循环里修改。
//!
//! 远端调用都在独立任务中执行，结果带上发起时的选择纪元（epoch）回到循环；纪元已过期的结果
//! 不再作用于聊天（过期但成功的 start 仍会保存映射）。展示任务的进度带轮次号（turn），
//! 只有当前轮次的进度会被采纳。

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::api::{
    AvailableModelsResponse, ContinueSessionResponse, PersonasListResponse, SessionHistoryResponse,
    SessionStatusResponse, SessionSummaryResponse, StartSessionResponse,
};
use crate::agent::{HttpAgentApi, SessionClient, SessionIdentity, StartParams};
use crate::concepts::{ConceptResolver, LlmTranslator, TextTranslator, Translator};
use crate::config::{load_config, AppConfig};
use crate::core::reveal::{reveal_graph, reveal_text, RevealTiming, RevealUpdate};
use crate::core::state::{ChatEvent, ChatMessage, ChatState, ConversationPhase};
use crate::core::task::{TaskHandle, TaskKind, TaskSlot};
use crate::core::AgentError;
use crate::llm::{GeminiBackend, GroqBackend, LlmBackend};
use crate::net::{ConnectivityMonitor, HealthProbe};
use crate::storage::{KvStore, MappingEntry, MappingStore, SqliteKv, UserPrefs};
use crate::visualization::{VisualizationClient, VisualizationGraph};

/// 从外部发往编排器的命令
#[derive(Debug)]
pub enum Command {
    /// 读取偏好、刷新目录并自动进入上次的概念
    Initialize,
    /// 按界面语言下的概念名选择概念
    SelectConcept(String),
    /// 丢弃该概念的已存会话后重新选择
    StartFresh(String),
    Send(String),
    /// 点击推荐问题发送
    SendSuggestion(String),
    /// 重发上一条用户消息；start 失败时重新选择概念
    Retry,
    SetLanguage(String),
    SelectModel(String),
    RefreshConcepts,
    RefreshModels,
    SaveUserInfo {
        name: String,
        phone: String,
        language: String,
        concept: Option<String>,
    },
    ConnectivityChanged(bool),
    HasExistingSession {
        concept: String,
        reply: oneshot::Sender<bool>,
    },
    FetchSummary(oneshot::Sender<Result<SessionSummaryResponse, AgentError>>),
    FetchPersonas(oneshot::Sender<Result<PersonasListResponse, AgentError>>),
    /// 清空映射、翻译缓存与用户偏好
    Logout,
    Quit,
}

/// 远端任务回到循环的结果
enum Internal {
    Started {
        epoch: u64,
        concept: String,
        result: Result<StartSessionResponse, AgentError>,
    },
    Resumed {
        epoch: u64,
        history: Result<SessionHistoryResponse, AgentError>,
        status: Result<SessionStatusResponse, AgentError>,
    },
    Replied {
        epoch: u64,
        concept: Option<String>,
        thread_before: Option<String>,
        result: Result<ContinueSessionResponse, AgentError>,
    },
    Concepts {
        language: String,
        concepts: Vec<String>,
    },
    Models(Result<AvailableModelsResponse, AgentError>),
    Retranslated {
        language: String,
        source: String,
        text: String,
    },
}

/// 编排参数
#[derive(Debug, Clone)]
pub struct TutorSettings {
    /// start / continue 的整体上限
    pub request_timeout: Duration,
    pub slow_network_after: Duration,
    pub visualization_states: Vec<String>,
    pub default_student_id: String,
    /// 未选模型时概念图使用的模型
    pub default_model: String,
    pub reveal: RevealTiming,
}

impl Default for TutorSettings {
    fn default() -> Self {
        let cfg = AppConfig::default();
        Self::from_config(&cfg)
    }
}

impl TutorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(cfg.agent.request_timeout_secs),
            slow_network_after: Duration::from_secs(cfg.agent.slow_network_secs),
            visualization_states: cfg.agent.visualization_states.clone(),
            default_student_id: cfg.agent.default_student_id.clone(),
            default_model: cfg.llm.default_model.clone(),
            reveal: cfg.reveal.timing(),
        }
    }
}

/// 编排器依赖；测试中替换为脚本化实现
pub struct TutorParts {
    pub client: Arc<SessionClient>,
    pub kv: Arc<dyn KvStore>,
    pub translator: Arc<dyn Translator>,
    pub visualizer: Arc<VisualizationClient>,
    pub settings: TutorSettings,
}

/// 运行中的编排器
pub struct TutorHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: watch::Receiver<ChatState>,
    events: broadcast::Sender<ChatEvent>,
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl TutorHandle {
    /// 编排器已停止时返回 false
    pub fn send(&self, cmd: Command) -> bool {
        self.commands.send(cmd).is_ok()
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 等到状态满足 pred；编排器停止时返回 None
    pub async fn wait_for(&self, pred: impl FnMut(&ChatState) -> bool) -> Option<ChatState> {
        let mut rx = self.state.clone();
        rx.wait_for(pred).await.ok().map(|s| s.clone())
    }

    pub async fn has_existing_session(&self, concept: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::HasExistingSession {
            concept: concept.to_string(),
            reply,
        }) {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn fetch_summary(&self) -> Result<SessionSummaryResponse, AgentError> {
        let stopped = || AgentError::Application("Tutor is not running".to_string());
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::FetchSummary(reply)) {
            return Err(stopped());
        }
        rx.await.map_err(|_| stopped())?
    }

    pub async fn fetch_personas(&self) -> Result<PersonasListResponse, AgentError> {
        let stopped = || AgentError::Application("Tutor is not running".to_string());
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::FetchPersonas(reply)) {
            return Err(stopped());
        }
        rx.await.map_err(|_| stopped())?
    }

    /// 发送 Quit 并等待循环结束
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Quit);
        let _ = self.join.await;
    }
}

struct Orchestrator {
    client: Arc<SessionClient>,
    mapping: MappingStore,
    resolver: ConceptResolver,
    translator: Arc<TextTranslator>,
    visualizer: Arc<VisualizationClient>,
    prefs: UserPrefs,
    settings: TutorSettings,
    allow_states: HashSet<String>,

    state: ChatState,
    state_tx: watch::Sender<ChatState>,
    events: broadcast::Sender<ChatEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    reveal_tx: mpsc::UnboundedSender<RevealUpdate>,
    shutdown: CancellationToken,
    reveal_slot: TaskSlot,
    graph_slot: TaskSlot,

    /// 每次选择概念 / 登出加一
    epoch: u64,
    /// 每次取消展示加一
    turn: u64,
    /// 当前概念的规范名
    active_concept: Option<String>,
    /// 当前纪元下应有的会话身份
    identity: SessionIdentity,
    /// 会话就绪前排队的第一条消息
    pending: Option<String>,
    /// 该轮展示完成后再发送排队消息
    flush_on_turn: Option<u64>,
}

/// 启动编排循环
pub fn spawn_orchestrator(parts: TutorParts) -> TutorHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<Internal>();
    let (reveal_tx, mut reveal_rx) = mpsc::unbounded_channel::<RevealUpdate>();
    let (state_tx, state_rx) = watch::channel(ChatState::default());
    let (events_tx, _) = broadcast::channel::<ChatEvent>(16);
    let shutdown = CancellationToken::new();

    let translator = Arc::new(TextTranslator::new(parts.translator, parts.kv.clone()));
    let allow_states = parts
        .settings
        .visualization_states
        .iter()
        .map(|s| s.trim().to_string())
        .collect();

    let mut orch = Orchestrator {
        client: parts.client,
        mapping: MappingStore::new(parts.kv.clone()),
        resolver: ConceptResolver::new(parts.kv.clone(), translator.clone()),
        translator,
        visualizer: parts.visualizer,
        prefs: UserPrefs::new(parts.kv),
        settings: parts.settings,
        allow_states,
        state: ChatState::default(),
        state_tx,
        events: events_tx.clone(),
        internal_tx,
        reveal_tx,
        shutdown: shutdown.clone(),
        reveal_slot: TaskSlot::new(TaskKind::Reveal),
        graph_slot: TaskSlot::new(TaskKind::Visualization),
        epoch: 0,
        turn: 0,
        active_concept: None,
        identity: SessionIdentity::default(),
        pending: None,
        flush_on_turn: None,
    };

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        orch.drain_reveals(&mut reveal_rx);
                        if !orch.handle_command(cmd) {
                            break;
                        }
                    }
                    None => break, // 所有句柄已释放
                },
                Some(msg) = internal_rx.recv() => {
                    orch.drain_reveals(&mut reveal_rx);
                    orch.handle_internal(msg);
                }
                Some(update) = reveal_rx.recv() => orch.handle_reveal(update),
            }
        }
        orch.reveal_slot.cancel();
        orch.graph_slot.cancel();
        orch.shutdown.cancel();
        tracing::info!("Orchestrator stopped");
    });

    TutorHandle {
        commands: cmd_tx,
        state: state_rx,
        events: events_tx,
        shutdown,
        join,
    }
}

impl Orchestrator {
    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    /// 返回 false 表示退出循环
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Initialize => self.initialize(),
            Command::SelectConcept(concept) => self.select_concept(concept),
            Command::StartFresh(concept) => self.start_fresh(concept),
            Command::Send(text) => self.send(text, false),
            Command::SendSuggestion(text) => self.send(text, true),
            Command::Retry => self.retry(),
            Command::SetLanguage(language) => self.set_language(language),
            Command::SelectModel(model) => self.select_model(model),
            Command::RefreshConcepts => self.refresh_concepts(),
            Command::RefreshModels => self.refresh_models(),
            Command::SaveUserInfo {
                name,
                phone,
                language,
                concept,
            } => self.save_user_info(name, phone, language, concept),
            Command::ConnectivityChanged(online) => self.connectivity_changed(online),
            Command::HasExistingSession { concept, reply } => {
                let original = self.resolver.original_of(&concept, &self.state.language);
                let _ = reply.send(self.mapping.has(&original));
            }
            Command::FetchSummary(reply) => self.fetch_summary(reply),
            Command::FetchPersonas(reply) => {
                let client = self.client.clone();
                tokio::spawn(async move {
                    let _ = reply.send(client.get_personas().await);
                });
            }
            Command::Logout => self.logout(),
            Command::Quit => return false,
        }
        true
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Started {
                epoch,
                concept,
                result,
            } => self.on_started(epoch, concept, result),
            Internal::Resumed {
                epoch,
                history,
                status,
            } => self.on_resumed(epoch, history, status),
            Internal::Replied {
                epoch,
                concept,
                thread_before,
                result,
            } => self.on_replied(epoch, concept, thread_before, result),
            Internal::Concepts { language, concepts } => {
                if language != self.state.language {
                    return;
                }
                self.resolver.save_displayed_list(&language, &concepts);
                self.state.available_concepts = concepts;
                self.publish();
            }
            Internal::Models(result) => self.on_models(result),
            Internal::Retranslated {
                language,
                source,
                text,
            } => {
                if language == self.state.language && source == self.state.original_response {
                    self.state.translated_output = text;
                    self.publish();
                }
            }
        }
    }

    /// 先应用已排队的展示更新；命令或远端结果可能推进 turn，已发出的 Finished 不能因此丢失
    fn drain_reveals(&mut self, updates: &mut mpsc::UnboundedReceiver<RevealUpdate>) {
        while let Ok(update) = updates.try_recv() {
            self.handle_reveal(update);
        }
    }

    fn handle_reveal(&mut self, update: RevealUpdate) {
        if update.turn() != self.turn {
            tracing::trace!("Dropping update of superseded turn {}", update.turn());
            return;
        }
        let mut finished = false;
        match update {
            RevealUpdate::Translated { text, .. } => {
                self.state.translated_output = text.clone();
                let _ = self.events.send(ChatEvent::SpeechCue(text));
            }
            RevealUpdate::Typing { text, .. } => self.state.typing_text = text,
            RevealUpdate::Finished { text, .. } => {
                self.state.messages.push(ChatMessage::ai(text));
                self.state.is_typing = false;
                self.state.typing_text.clear();
                finished = true;
            }
            RevealUpdate::Graph { graph, .. } => self.state.graph = graph,
        }
        self.publish();

        if finished && self.flush_on_turn == Some(self.turn) {
            self.flush_on_turn = None;
            self.flush_pending();
        }
    }

    // ---- 概念选择 ----

    fn initialize(&mut self) {
        self.state.language = self.prefs.language();
        self.state.user_name = self.prefs.user_name().unwrap_or_default();
        if let Some(cached) = self.resolver.displayed_list(&self.state.language) {
            self.state.available_concepts = cached;
        }
        tracing::info!(
            "Initialized (language={}, user={})",
            self.state.language,
            if self.state.user_name.is_empty() { "-" } else { self.state.user_name.as_str() }
        );
        self.publish();

        self.refresh_models();
        self.refresh_concepts();
        if let Some(concept) = self.prefs.concept() {
            let displayed = self.resolver.displayed_of(&concept, &self.state.language);
            tracing::info!("Auto-starting saved concept {}", concept);
            self.select_concept(displayed);
        }
    }

    fn select_concept(&mut self, displayed: String) {
        let displayed = displayed.trim().to_string();
        if displayed.is_empty() {
            return;
        }
        let original = self.resolver.original_of(&displayed, &self.state.language);
        if self.active_concept.as_deref().is_some_and(|c| c != original) {
            self.state.messages.clear();
            if self.pending.take().is_some() {
                tracing::debug!("Dropped queued message of previous concept");
            }
        }
        tracing::info!("Selecting concept {} ({})", displayed, original);

        self.epoch += 1;
        self.cancel_animations();
        self.active_concept = Some(original.clone());
        self.prefs.save_preferred_concept(&original);
        self.identity = SessionIdentity::default();
        self.client.set_current_thread_and_session(None, None);

        self.state.selected_concept = Some(displayed);
        self.state.graph = VisualizationGraph::idle();
        self.state.agent_state.clear();
        self.state.metadata = None;
        self.state.autosuggestions.clear();
        self.state.original_response.clear();
        self.state.translated_output.clear();
        self.state.session_started = false;
        self.state.is_loading = true;
        self.state.phase = ConversationPhase::Loading;

        match self.mapping.load(&original) {
            Some(entry) => self.resume(entry),
            None => self.start(original),
        }
        self.publish();
    }

    fn start_fresh(&mut self, displayed: String) {
        let original = self.resolver.original_of(displayed.trim(), &self.state.language);
        tracing::info!("Starting fresh session for {}", original);
        self.mapping.delete(&original);
        self.cancel_animations();
        self.identity = SessionIdentity::default();
        self.client.set_current_thread_and_session(None, None);
        self.active_concept = None;
        self.state.messages.clear();
        self.state.graph = VisualizationGraph::idle();
        self.state.session_started = false;
        self.select_concept(displayed);
    }

    fn resume(&mut self, entry: MappingEntry) {
        tracing::info!("Resuming thread {}", entry.thread);
        self.identity = SessionIdentity {
            thread_id: Some(entry.thread.clone()),
            session_id: entry.session.clone(),
        };
        self.client
            .set_current_thread_and_session(Some(entry.thread.clone()), entry.session);
        self.state.phase = ConversationPhase::Resuming;

        let client = self.client.clone();
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        let thread = entry.thread;
        tokio::spawn(async move {
            let (history, status) = tokio::join!(
                client.get_session_history(&thread),
                client.get_session_status(&thread)
            );
            let _ = tx.send(Internal::Resumed {
                epoch,
                history,
                status,
            });
        });
    }

    fn on_resumed(
        &mut self,
        epoch: u64,
        history: Result<SessionHistoryResponse, AgentError>,
        status: Result<SessionStatusResponse, AgentError>,
    ) {
        if epoch != self.epoch {
            tracing::debug!("Discarding stale resume (epoch {})", epoch);
            return;
        }
        self.state.is_loading = false;
        self.state.session_started = true;
        self.state.phase = ConversationPhase::Ready;

        match status {
            Ok(status) => {
                if let Some(current) = status.current_state {
                    self.state.agent_state = current;
                }
            }
            Err(e) => tracing::warn!("Session status unavailable: {}", e),
        }
        match history {
            Ok(history) => match history.last_assistant_message() {
                Some(text) => {
                    let text = text.to_string();
                    self.begin_turn(text);
                }
                None => tracing::debug!("No assistant message in session history"),
            },
            Err(e) => tracing::warn!("Session history unavailable: {}", e),
        }
        self.publish();
        self.after_ready();
    }

    fn start(&mut self, concept: String) {
        self.state.phase = ConversationPhase::Starting;
        let student = if self.state.user_name.trim().is_empty() {
            self.settings.default_student_id.clone()
        } else {
            self.state.user_name.clone()
        };
        let mut params = StartParams::new(concept.clone(), student);
        params.locale_flag = self.state.language.eq_ignore_ascii_case("kn");

        let client = self.client.clone();
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        let limit = self.settings.request_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(limit, client.start_session(params)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout),
            };
            let _ = tx.send(Internal::Started {
                epoch,
                concept,
                result,
            });
        });
    }

    fn on_started(&mut self, epoch: u64, concept: String, result: Result<StartSessionResponse, AgentError>) {
        let current = epoch == self.epoch;
        let result = result.and_then(|resp| match resp.thread_id.clone() {
            Some(thread) if !thread.is_empty() => Ok((thread, resp)),
            _ => Err(AgentError::Application("No thread id in response".to_string())),
        });

        match result {
            Ok((thread, resp)) => {
                self.mapping.save(&concept, &thread, resp.session_id.as_deref());
                if !current {
                    tracing::info!("Late start for {} saved, not shown", concept);
                    self.restore_identity();
                    return;
                }
                self.identity = SessionIdentity {
                    thread_id: Some(thread),
                    session_id: resp.session_id,
                };
                self.restore_identity();

                self.state.is_loading = false;
                self.state.session_started = true;
                self.state.phase = ConversationPhase::Ready;
                if let Some(current_state) = resp.current_state {
                    self.state.agent_state = current_state;
                }
                self.state.metadata = Some(resp.metadata);
                self.state.autosuggestions = resp.autosuggestions;
                match resp.agent_response.filter(|t| !t.trim().is_empty()) {
                    Some(text) => self.begin_turn(text),
                    None => tracing::debug!("Start returned no welcome text"),
                }
            }
            Err(e) => {
                if !current {
                    tracing::debug!("Discarding stale start failure for {}: {}", concept, e);
                    return;
                }
                tracing::error!("Session start failed for {}: {}", concept, e);
                self.identity = SessionIdentity::default();
                self.restore_identity();
                self.state.is_loading = false;
                self.state.session_started = false;
                self.state.phase = ConversationPhase::StartFailed;
                self.fail(&format!("Session start failed: {}", e.user_message()));
            }
        }
        self.publish();
        self.after_ready();
    }

    // ---- 发送 ----

    fn send(&mut self, text: String, clicked: bool) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        self.state.last_user_message = text.clone();

        if !self.state.is_connected {
            tracing::warn!("Send rejected: offline");
            self.fail("No internet connection");
            self.publish();
            return;
        }

        if !self.state.session_started {
            if self.pending.replace(text.clone()).is_some() {
                tracing::warn!("Replacing previously queued message");
            }
            tracing::info!("Session not ready, message queued");
            self.state.messages.push(ChatMessage::user(text));
            self.publish();
            return;
        }

        self.send_now(text, clicked, false);
    }

    fn send_now(&mut self, text: String, clicked: bool, already_shown: bool) {
        if !already_shown {
            self.state.messages.push(ChatMessage::user(text.clone()));
        }
        self.state.is_loading = true;
        self.state.phase = ConversationPhase::AwaitingReply;
        self.cancel_animations();
        self.publish();

        let client = self.client.clone();
        let tx = self.internal_tx.clone();
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let epoch = self.epoch;
        let concept = self.active_concept.clone();
        let thread_before = self.identity.thread_id.clone();
        let limit = self.settings.request_timeout;
        let slow = self.settings.slow_network_after;
        tokio::spawn(async move {
            let timer = TaskHandle::spawn(TaskKind::SlowNetworkTimer, &shutdown, move |token| async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(slow) => {
                        tracing::warn!("Slow network: no reply after {:?}", slow);
                        let _ = events.send(ChatEvent::SlowNetwork);
                    }
                }
            });
            let result = match tokio::time::timeout(limit, client.continue_session_with(&text, clicked)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout),
            };
            timer.cancel();
            let _ = tx.send(Internal::Replied {
                epoch,
                concept,
                thread_before,
                result,
            });
        });
    }

    fn on_replied(
        &mut self,
        epoch: u64,
        concept: Option<String>,
        thread_before: Option<String>,
        result: Result<ContinueSessionResponse, AgentError>,
    ) {
        // 服务端迁移了 thread：无论是否过期都写回映射
        if let (Ok(resp), Some(concept)) = (&result, concept.as_deref()) {
            if let Some(new_thread) = resp.thread_id.as_deref().filter(|t| !t.is_empty()) {
                if thread_before.as_deref() != Some(new_thread) {
                    let session = self.mapping.load(concept).and_then(|e| e.session);
                    self.mapping.save(concept, new_thread, session.as_deref());
                    tracing::info!("Persisted migrated thread {} for {}", new_thread, concept);
                    if epoch == self.epoch {
                        self.identity.thread_id = Some(new_thread.to_string());
                    }
                }
            }
        }
        if epoch != self.epoch {
            tracing::debug!("Discarding stale reply (epoch {})", epoch);
            self.restore_identity();
            return;
        }

        self.state.is_loading = false;
        match result {
            Ok(resp) => {
                if let Some(current_state) = resp.current_state {
                    self.state.agent_state = current_state;
                }
                self.state.metadata = Some(resp.metadata);
                self.state.autosuggestions = resp.autosuggestions;
                match resp.agent_response.filter(|t| !t.trim().is_empty()) {
                    Some(text) => {
                        self.state.phase = ConversationPhase::Ready;
                        self.begin_turn(text);
                    }
                    None => {
                        self.state.phase = ConversationPhase::ErrorRecovered;
                        self.fail("Empty response from server");
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Send failed: {}", e);
                self.state.phase = if self.state.session_started {
                    ConversationPhase::ErrorRecovered
                } else {
                    ConversationPhase::StartFailed
                };
                self.fail(&e.user_message());
            }
        }
        self.publish();
    }

    fn retry(&mut self) {
        if !self.state.session_started {
            if let Some(displayed) = self.state.selected_concept.clone() {
                self.select_concept(displayed);
            }
            return;
        }
        let text = self.state.last_user_message.clone();
        self.send(text, false);
    }

    /// 会话就绪（或 start 失败）后发送排队消息；若正在展示，等展示完成
    fn after_ready(&mut self) {
        if self.flush_on_turn.is_none() {
            self.flush_pending();
        }
    }

    fn flush_pending(&mut self) {
        if let Some(text) = self.pending.take() {
            tracing::info!("Sending queued message");
            self.send_now(text, false, true);
        }
    }

    /// 客户端身份与本纪元应有的身份不一致时改回
    fn restore_identity(&self) {
        if self.client.identity() != self.identity {
            tracing::debug!("Restoring session identity {:?}", self.identity.thread_id);
            self.client.set_current_thread_and_session(
                self.identity.thread_id.clone(),
                self.identity.session_id.clone(),
            );
        }
    }

    fn fail(&mut self, reason: &str) {
        self.state.messages.push(ChatMessage::error(reason));
        self.state.is_typing = false;
        self.state.typing_text.clear();
    }

    // ---- 展示 ----

    fn cancel_animations(&mut self) {
        self.turn += 1;
        self.flush_on_turn = None;
        self.reveal_slot.cancel();
        self.graph_slot.cancel();
        self.state.is_typing = false;
        self.state.typing_text.clear();
    }

    fn should_visualize(&self) -> bool {
        self.allow_states.contains(self.state.agent_state.trim())
    }

    fn visualization_model(&self) -> String {
        self.state
            .selected_model
            .clone()
            .unwrap_or_else(|| self.settings.default_model.clone())
    }

    /// 新的一轮：取消旧展示，启动翻译展示，按状态决定是否生成概念图
    fn begin_turn(&mut self, text: String) {
        self.cancel_animations();
        let turn = self.turn;
        self.state.original_response = text.clone();
        self.state.is_typing = true;

        let language = self.state.language.clone();
        let timing = self.settings.reveal;
        let (translator, updates) = (self.translator.clone(), self.reveal_tx.clone());
        let reply = text.clone();
        let lang = language.clone();
        self.reveal_slot.replace(TaskHandle::spawn(TaskKind::Reveal, &self.shutdown, move |token| {
            reveal_text(turn, reply, lang, translator, timing, token, updates)
        }));

        if self.should_visualize() {
            let model = self.visualization_model();
            let (visualizer, updates) = (self.visualizer.clone(), self.reveal_tx.clone());
            self.graph_slot.replace(TaskHandle::spawn(TaskKind::Visualization, &self.shutdown, move |token| {
                reveal_graph(turn, text, language, model, visualizer, timing, token, updates)
            }));
        } else {
            self.state.graph = VisualizationGraph::idle();
        }

        if self.pending.is_some() && self.state.session_started {
            self.flush_on_turn = Some(turn);
        }
    }

    // ---- 语言 / 目录 / 模型 ----

    fn set_language(&mut self, language: String) {
        let language = language.trim().to_ascii_lowercase();
        if language.is_empty() || language == self.state.language {
            return;
        }
        tracing::info!("Display language {} -> {}", self.state.language, language);
        self.state.language = language.clone();
        self.prefs.update_language(&language);
        if let Some(original) = self.active_concept.as_deref() {
            self.state.selected_concept = Some(self.resolver.displayed_of(original, &language));
        }

        let source = self.state.original_response.clone();
        if !source.trim().is_empty() {
            let translator = self.translator.clone();
            let tx = self.internal_tx.clone();
            let lang = language.clone();
            tokio::spawn(async move {
                let text = translator.translate_text(&source, &lang).await;
                let _ = tx.send(Internal::Retranslated {
                    language: lang,
                    source,
                    text,
                });
            });
        }
        self.publish();
        self.refresh_concepts();
    }

    fn refresh_concepts(&mut self) {
        let resolver = self.resolver.clone();
        let client = self.client.clone();
        let tx = self.internal_tx.clone();
        let language = self.state.language.clone();
        tokio::spawn(async move {
            let concepts = resolver.list_concepts(&client, &language).await;
            let _ = tx.send(Internal::Concepts { language, concepts });
        });
    }

    fn refresh_models(&mut self) {
        let client = self.client.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = client.get_available_models().await;
            let _ = tx.send(Internal::Models(result));
        });
    }

    /// 远端模型在前，Groq 白名单在后，去重
    fn on_models(&mut self, result: Result<AvailableModelsResponse, AgentError>) {
        let mut merged = match result {
            Ok(resp) => resp.models,
            Err(e) => {
                tracing::warn!("Model list unavailable, using Groq models: {}", e);
                Vec::new()
            }
        };
        merged.extend(self.visualizer.groq_models().iter().cloned());
        let mut seen = HashSet::new();
        merged.retain(|m| !m.trim().is_empty() && seen.insert(m.clone()));

        let first = merged.first().cloned();
        self.state.available_models = merged;
        match (self.state.selected_model.is_none(), first) {
            (true, Some(first)) => self.select_model(first),
            _ => self.publish(),
        }
    }

    fn select_model(&mut self, model: String) {
        tracing::info!("Model selected: {}", model);
        self.client.set_model(Some(model.clone()));
        self.state.selected_model = Some(model);
        self.publish();
    }

    // ---- 用户 / 连通性 / 摘要 / 登出 ----

    fn save_user_info(&mut self, name: String, phone: String, language: String, concept: Option<String>) {
        self.prefs
            .save_user_info(name.trim(), phone.trim(), &language, concept.as_deref());
        self.state.user_name = name.trim().to_string();
        self.publish();
        self.set_language(language);
    }

    fn connectivity_changed(&mut self, online: bool) {
        if self.state.is_connected == online {
            return;
        }
        self.state.is_connected = online;
        if online {
            tracing::info!("Network connection restored");
        } else {
            tracing::warn!("Network connection lost");
            if self.state.is_loading {
                self.state.is_loading = false;
                if self.state.session_started {
                    self.state.phase = ConversationPhase::ErrorRecovered;
                }
                self.fail("Network connection lost");
            }
        }
        self.publish();
    }

    fn fetch_summary(&mut self, reply: oneshot::Sender<Result<SessionSummaryResponse, AgentError>>) {
        let Some(thread) = self.identity.thread_id.clone() else {
            let _ = reply.send(Err(AgentError::NoActiveThread));
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            let _ = reply.send(client.get_session_summary(&thread).await);
        });
    }

    fn logout(&mut self) {
        tracing::info!("Logging out, clearing local session data");
        self.epoch += 1;
        self.cancel_animations();
        self.pending = None;
        self.active_concept = None;
        self.identity = SessionIdentity::default();
        self.client.set_current_thread_and_session(None, None);

        self.mapping.clear_all();
        self.resolver.clear();
        self.translator.clear();
        self.prefs.clear();

        let previous = std::mem::take(&mut self.state);
        self.state.is_connected = previous.is_connected;
        self.state.available_models = previous.available_models;
        self.publish();
        self.refresh_concepts();
    }
}

/// 按配置组装并启动编排器与连通性监视
pub async fn create_tutor(config_path: Option<PathBuf>) -> anyhow::Result<TutorHandle> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    if let Some(dir) = cfg.storage.path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let kv: Arc<dyn KvStore> = Arc::new(SqliteKv::open(&cfg.storage.path)?);

    let api = HttpAgentApi::new(
        &cfg.agent.base_url,
        Duration::from_secs(cfg.agent.http_timeout_secs),
    )?;
    let client = Arc::new(
        SessionClient::new(Arc::new(api), cfg.retry.policy())
            .with_model(cfg.agent.model.clone())
            .with_student_level(cfg.agent.student_level.clone()),
    );

    let groq: Arc<dyn LlmBackend> = Arc::new(GroqBackend::new(
        cfg.llm.groq_base_url.as_deref(),
        cfg.llm.groq_api_key.as_deref(),
    ));
    let gemini: Arc<dyn LlmBackend> = Arc::new(GeminiBackend::new(
        cfg.llm.gemini_base_url.as_deref(),
        cfg.llm.gemini_api_key.as_deref(),
        Duration::from_secs(cfg.llm.timeout_secs),
    )?);
    let translator: Arc<dyn Translator> =
        Arc::new(LlmTranslator::new(groq.clone(), cfg.llm.default_model.clone()));
    let visualizer = Arc::new(VisualizationClient::new(
        groq,
        gemini,
        cfg.llm.visualization_settings(),
    ));

    let handle = spawn_orchestrator(TutorParts {
        client: client.clone(),
        kv,
        translator,
        visualizer,
        settings: TutorSettings::from_config(&cfg),
    });

    ConnectivityMonitor::new(
        Arc::new(HealthProbe::new(client)),
        Duration::from_secs(cfg.net.probe_interval_secs),
    )
    .spawn(handle.commands.clone(), handle.shutdown_token());

    tracing::info!("Tutor ready (agent at {})", cfg.agent.base_url);
    Ok(handle)
}
