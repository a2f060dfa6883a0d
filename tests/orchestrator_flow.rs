//! 编排器端到端流程：脚本化服务端 + Mock LLM，虚拟时钟

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tutor::agent::api::{
    AvailableModelsResponse, ContinueSessionResponse, HistoryMessage, PersonaInfo,
    PersonasListResponse, SessionHistoryResponse, SessionStatusResponse, SessionSummaryResponse,
    StartSessionResponse,
};
use tutor::agent::{HttpReply, RetryPolicy, ScriptedAgentApi, SessionClient};
use tutor::concepts::{ConceptResolver, PassthroughTranslator, TextTranslator, Translator};
use tutor::core::{
    spawn_orchestrator, AgentError, ChatEvent, ChatState, Command, ConversationPhase, RevealTiming,
    Sender, TranslateError, TutorHandle, TutorParts, TutorSettings,
};
use tutor::llm::MockLlmBackend;
use tutor::storage::{MappingEntry, MappingStore, MemoryKv, UserPrefs};
use tutor::visualization::{VisualizationClient, VisualizationSettings};

const MAP: &str = r#"[ANSWER] Gravity pulls things down.
[CONCEPT_MAP_JSON] {"visualization_type":"Concept Map","main_concept":"Gravity",
"nodes":[{"id":"A","label":"Gravity","category":"Main"},{"id":"B","label":"Mass","category":"Secondary"}],
"edges":[{"from":"A","to":"B","label":"depends on"}]}"#;

const WELCOME: &str = "Gravity pulls objects toward each other";

struct Harness {
    api: Arc<ScriptedAgentApi>,
    kv: Arc<MemoryKv>,
    llm: Arc<MockLlmBackend>,
    tutor: TutorHandle,
}

impl Harness {
    fn new(api: ScriptedAgentApi) -> Self {
        Self::build(
            api,
            Arc::new(MemoryKv::new()),
            Arc::new(PassthroughTranslator),
            TutorSettings::default(),
        )
    }

    fn build(
        api: ScriptedAgentApi,
        kv: Arc<MemoryKv>,
        translator: Arc<dyn Translator>,
        settings: TutorSettings,
    ) -> Self {
        let api = Arc::new(api);
        let llm = Arc::new(MockLlmBackend::with_reply(MAP));
        let client = Arc::new(SessionClient::new(api.clone(), RetryPolicy::default()));
        let visualizer = Arc::new(VisualizationClient::new(
            llm.clone(),
            llm.clone(),
            VisualizationSettings::default(),
        ));
        let tutor = spawn_orchestrator(TutorParts {
            client,
            kv: kv.clone(),
            translator,
            visualizer,
            settings,
        });
        Self { api, kv, llm, tutor }
    }

    fn send(&self, cmd: Command) {
        assert!(self.tutor.send(cmd), "orchestrator stopped");
    }

    async fn until(&self, what: &str, pred: impl FnMut(&ChatState) -> bool) -> ChatState {
        match tokio::time::timeout(Duration::from_secs(600), self.tutor.wait_for(pred)).await {
            Ok(Some(state)) => state,
            _ => panic!("timed out waiting for {what}: {:#?}", self.tutor.snapshot()),
        }
    }

    fn mapping(&self) -> MappingStore {
        MappingStore::new(self.kv.clone())
    }
}

fn started(thread: &str, state: &str, text: &str) -> StartSessionResponse {
    StartSessionResponse {
        success: true,
        thread_id: Some(thread.to_string()),
        session_id: Some("s1".to_string()),
        current_state: Some(state.to_string()),
        agent_response: Some(text.to_string()),
        ..Default::default()
    }
}

fn reply(text: &str) -> ContinueSessionResponse {
    ContinueSessionResponse {
        success: true,
        agent_response: Some(text.to_string()),
        ..Default::default()
    }
}

fn ai_texts(state: &ChatState) -> Vec<String> {
    state.ai_messages().map(|m| m.content.clone()).collect()
}

/// 给译文加上目标语言前缀
struct Tagging;

#[async_trait]
impl Translator for Tagging {
    async fn translate(
        &self,
        texts: &[String],
        _source: &str,
        target: &str,
    ) -> Result<Vec<String>, TranslateError> {
        Ok(texts.iter().map(|t| format!("[{target}] {t}")).collect())
    }
}

#[tokio::test(start_paused = true)]
async fn test_new_concept_starts_reveals_and_visualizes() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "GE", WELCOME));
    let h = Harness::new(api);
    let mut events = h.tutor.subscribe_events();

    h.send(Command::SelectConcept("Gravity".into()));
    let state = h
        .until("welcome and graph", |s| {
            s.ai_messages().count() == 1 && s.graph.edges.len() == 1
        })
        .await;

    assert_eq!(ai_texts(&state), vec![WELCOME]);
    assert!(state.session_started);
    assert_eq!(state.phase, ConversationPhase::Ready);
    assert_eq!(state.agent_state, "GE");
    assert_eq!(state.graph.main_concept, "Gravity");
    assert_eq!(state.graph.nodes.len(), 2);
    assert_eq!(state.graph.edges[0].id, "A->B");
    assert_eq!(h.llm.calls(), 1);

    assert_eq!(
        h.mapping().load("Gravity"),
        Some(MappingEntry {
            thread: "t1".into(),
            session: Some("s1".into())
        })
    );
    assert!(h.tutor.has_existing_session("Gravity").await);

    let req = &h.api.start_requests()[0];
    assert_eq!(req.concept_title, "Gravity");
    assert_eq!(req.student_id, "guest_student");
    assert!(!req.locale_flag);

    assert_eq!(events.try_recv().ok(), Some(ChatEvent::SpeechCue(WELCOME.to_string())));
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_state_outside_allow_set_skips_visualization() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", WELCOME));
    let h = Harness::new(api);

    h.send(Command::SelectConcept("Gravity".into()));
    let state = h.until("welcome", |s| s.ai_messages().count() == 1).await;
    assert_eq!(state.graph.visualization_type, "None");
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_send_cancels_previous_reveal() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", "Welcome"));
    api.continue_
        .push_ok(reply("alpha beta gamma delta epsilon zeta eta theta"))
        .push_ok(reply("Second answer here"));
    let h = Harness::new(api);

    h.send(Command::SelectConcept("Gravity".into()));
    h.until("welcome", |s| s.ai_messages().count() == 1).await;

    h.send(Command::Send("first question".into()));
    h.until("first reply mid-reveal", |s| s.typing_text.starts_with("alpha"))
        .await;
    h.send(Command::Send("second question".into()));
    h.until("second reply", |s| s.ai_messages().count() == 2).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    let state = h.tutor.snapshot();
    assert_eq!(ai_texts(&state), vec!["Welcome", "Second answer here"]);
    assert!(state.messages.iter().all(|m| !m.content.contains("alpha")));
    assert_eq!(
        state.messages.iter().filter(|m| m.sender == Sender::User).count(),
        2
    );
    assert!(!state.is_typing);
}

#[tokio::test(start_paused = true)]
async fn test_send_at_reveal_completion_keeps_finished_reply() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", "Welcome"));
    api.continue_.push_ok(reply("Answer"));
    let h = Harness::new(api);

    h.send(Command::SelectConcept("Gravity".into()));
    h.until("last word typed", |s| s.typing_text == "Welcome").await;

    // 与展示任务最后一次停顿同一时刻醒来，Finished 与 Send 同时排队
    tokio::time::sleep(RevealTiming::default().word_delay("Welcome")).await;
    h.send(Command::Send("question".into()));
    let state = h.until("answer", |s| s.ai_messages().any(|m| m.content == "Answer")).await;

    assert_eq!(ai_texts(&state), vec!["Welcome", "Answer"]);
}

#[tokio::test(start_paused = true)]
async fn test_saved_mapping_resumes_with_last_assistant_message() {
    let kv = Arc::new(MemoryKv::new());
    MappingStore::new(kv.clone()).save("Gravity", "t9", Some("s9"));

    let api = ScriptedAgentApi::new();
    api.history.push_ok(SessionHistoryResponse {
        success: true,
        exists: true,
        messages: vec![
            HistoryMessage { role: json!("user"), content: json!("hi") },
            HistoryMessage { role: json!("AI"), content: json!("Last tutor words") },
            HistoryMessage { role: json!("user"), content: json!("bye") },
        ],
        ..Default::default()
    });
    api.status.push_ok(SessionStatusResponse {
        success: true,
        exists: true,
        current_state: Some("CI".into()),
        ..Default::default()
    });
    let h = Harness::build(api, kv, Arc::new(PassthroughTranslator), TutorSettings::default());

    h.send(Command::SelectConcept("Gravity".into()));
    let state = h.until("resumed reply", |s| s.ai_messages().count() == 1).await;

    assert_eq!(ai_texts(&state), vec!["Last tutor words"]);
    assert_eq!(state.agent_state, "CI");
    assert!(state.session_started);
    assert_eq!(h.api.start.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resume_survives_history_failure() {
    let kv = Arc::new(MemoryKv::new());
    MappingStore::new(kv.clone()).save("Gravity", "t9", None);
    let api = ScriptedAgentApi::new();
    api.continue_.push_ok(reply("Still here"));
    let h = Harness::build(api, kv, Arc::new(PassthroughTranslator), TutorSettings::default());

    h.send(Command::SelectConcept("Gravity".into()));
    let state = h.until("resumed", |s| s.session_started).await;
    assert!(state.messages.is_empty());

    h.send(Command::Send("are you there?".into()));
    h.until("reply", |s| s.ai_messages().count() == 1).await;
    assert_eq!(h.api.continue_requests()[0].thread_id, "t9");
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_then_reselect_starts_again() {
    let api = ScriptedAgentApi::new();
    for _ in 0..3 {
        api.start.push(Ok(HttpReply::error(500, "boom")));
    }
    api.start.always_ok(started("t2", "AD", "Welcome back"));
    let h = Harness::new(api);

    h.send(Command::SelectConcept("Gravity".into()));
    let state = h
        .until("start failure", |s| s.phase == ConversationPhase::StartFailed)
        .await;
    let last = state.last_message().cloned().unwrap_or_else(|| panic!("no error message"));
    assert!(last.is_error && last.can_retry);
    assert!(last.content.starts_with("Error: Session start failed"));
    assert!(!state.session_started);
    assert!(!h.tutor.has_existing_session("Gravity").await);

    h.send(Command::Retry);
    h.until("second start", |s| s.ai_messages().any(|m| m.content == "Welcome back"))
        .await;
    assert_eq!(h.api.start.calls(), 4);
    assert_eq!(h.api.history.calls(), 0);
    assert_eq!(h.mapping().load("Gravity").map(|e| e.thread), Some("t2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_offline_send_fails_without_network_call() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", "Welcome"));
    let h = Harness::new(api);

    h.send(Command::SelectConcept("Gravity".into()));
    h.until("welcome", |s| s.ai_messages().count() == 1).await;

    h.send(Command::ConnectivityChanged(false));
    h.send(Command::Send("hello".into()));
    let state = h
        .until("offline error", |s| {
            s.last_message().is_some_and(|m| m.content == "Error: No internet connection")
        })
        .await;
    assert!(state.session_started);
    assert_eq!(h.api.continue_.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_message_before_ready_is_flushed_once() {
    let api = ScriptedAgentApi::new();
    api.start
        .with_delay(Duration::from_secs(2))
        .push_ok(started("t1", "AD", "Hello student"));
    api.continue_.push_ok(reply("Answer"));
    let h = Harness::new(api);

    h.send(Command::SelectConcept("Gravity".into()));
    h.send(Command::Send("early question".into()));
    let state = h.until("answer", |s| s.ai_messages().count() == 2).await;

    let contents: Vec<_> = state.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["early question", "Hello student", "Answer"]);
    let sent = h.api.continue_requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_message, "early question");
    assert_eq!(sent[0].thread_id, "t1");
}

#[tokio::test(start_paused = true)]
async fn test_migrated_thread_is_persisted() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", "Welcome"));
    api.continue_
        .push_ok(ContinueSessionResponse {
            thread_id: Some("t2".into()),
            ..reply("Moved")
        })
        .push_ok(reply("Again"));
    let h = Harness::new(api);

    h.send(Command::SelectConcept("Gravity".into()));
    h.until("welcome", |s| s.ai_messages().count() == 1).await;
    h.send(Command::Send("q1".into()));
    h.until("first reply", |s| s.ai_messages().count() == 2).await;
    h.send(Command::Send("q2".into()));
    h.until("second reply", |s| s.ai_messages().count() == 3).await;

    assert_eq!(h.api.continue_requests()[1].thread_id, "t2");
    assert_eq!(
        h.mapping().load("Gravity"),
        Some(MappingEntry {
            thread: "t2".into(),
            session: Some("s1".into())
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_timeout_and_slow_network_signal() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", "Welcome"));
    api.continue_
        .with_delay(Duration::from_secs(300))
        .push_ok(reply("too late"));
    let h = Harness::new(api);
    let mut events = h.tutor.subscribe_events();

    h.send(Command::SelectConcept("Gravity".into()));
    h.until("welcome", |s| s.ai_messages().count() == 1).await;
    h.send(Command::Send("slow question".into()));
    let state = h
        .until("timeout", |s| {
            s.last_message().is_some_and(|m| m.content == "Error: Request timed out")
        })
        .await;

    assert_eq!(state.phase, ConversationPhase::ErrorRecovered);
    assert!(state.session_started && !state.is_loading);
    let mut slow = 0;
    while let Ok(event) = events.try_recv() {
        if event == ChatEvent::SlowNetwork {
            slow += 1;
        }
    }
    assert_eq!(slow, 1);
}

#[tokio::test(start_paused = true)]
async fn test_blank_reply_is_an_error() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", "Welcome"));
    api.continue_.push_ok(reply("   "));
    let h = Harness::new(api);

    h.send(Command::SelectConcept("Gravity".into()));
    h.until("welcome", |s| s.ai_messages().count() == 1).await;
    h.send(Command::Send("question".into()));
    let state = h
        .until("empty reply", |s| s.last_message().is_some_and(|m| m.is_error))
        .await;
    assert_eq!(
        state.last_message().map(|m| m.content.as_str()),
        Some("Error: Empty response from server")
    );
}

#[tokio::test(start_paused = true)]
async fn test_fresh_session_ignores_saved_mapping() {
    let kv = Arc::new(MemoryKv::new());
    MappingStore::new(kv.clone()).save("Gravity", "old", Some("s0"));
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("new", "AD", "Fresh start"));
    let h = Harness::build(api, kv, Arc::new(PassthroughTranslator), TutorSettings::default());

    h.send(Command::StartFresh("Gravity".into()));
    let state = h.until("fresh welcome", |s| s.ai_messages().count() == 1).await;

    assert_eq!(ai_texts(&state), vec!["Fresh start"]);
    assert_eq!(h.api.history.calls(), 0);
    assert_eq!(h.mapping().load("Gravity").map(|e| e.thread), Some("new".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_kannada_display_translates_reply() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", WELCOME));
    let h = Harness::build(
        api,
        Arc::new(MemoryKv::new()),
        Arc::new(Tagging),
        TutorSettings::default(),
    );
    let mut events = h.tutor.subscribe_events();

    h.send(Command::SetLanguage("kn".into()));
    h.send(Command::SelectConcept("Gravity".into()));
    let state = h.until("translated welcome", |s| s.ai_messages().count() == 1).await;

    let expected = format!("[kn] {WELCOME}");
    assert_eq!(ai_texts(&state), vec![expected.clone()]);
    assert_eq!(state.original_response, WELCOME);
    assert!(h.api.start_requests()[0].locale_flag);
    assert_eq!(events.try_recv().ok(), Some(ChatEvent::SpeechCue(expected)));
}

#[tokio::test(start_paused = true)]
async fn test_initialize_merges_models_and_auto_starts_saved_concept() {
    let kv = Arc::new(MemoryKv::new());
    UserPrefs::new(kv.clone()).save_user_info("asha", "9999", "en", Some("Gravity"));
    let api = ScriptedAgentApi::new();
    api.models.push_ok(AvailableModelsResponse {
        models: vec![
            "gemma-3-27b-it".into(),
            "meta-llama/llama-4-scout-17b-16e-instruct".into(),
        ],
        ..Default::default()
    });
    api.start.push_ok(started("t1", "AD", "Welcome asha"));
    let h = Harness::build(api, kv, Arc::new(PassthroughTranslator), TutorSettings::default());

    h.send(Command::Initialize);
    let state = h
        .until("auto start and models", |s| {
            s.ai_messages().count() == 1 && s.selected_model.is_some()
        })
        .await;

    assert_eq!(
        state.available_models,
        vec!["gemma-3-27b-it", "meta-llama/llama-4-scout-17b-16e-instruct"]
    );
    assert_eq!(state.selected_model.as_deref(), Some("gemma-3-27b-it"));
    assert_eq!(state.selected_concept.as_deref(), Some("Gravity"));
    assert_eq!(h.api.start_requests()[0].student_id, "asha");
}

#[tokio::test(start_paused = true)]
async fn test_summary_requires_active_thread() {
    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", "Welcome"));
    api.summary.push_ok(SessionSummaryResponse {
        success: true,
        quiz_score: Some(0.8),
        ..Default::default()
    });
    let h = Harness::new(api);

    assert_eq!(h.tutor.fetch_summary().await, Err(AgentError::NoActiveThread));

    h.send(Command::SelectConcept("Gravity".into()));
    h.until("started", |s| s.session_started).await;
    let summary = h.tutor.fetch_summary().await;
    assert_eq!(summary.map(|s| s.quiz_score), Ok(Some(0.8)));
}

#[tokio::test(start_paused = true)]
async fn test_logout_clears_sessions_and_state() {
    let kv = Arc::new(MemoryKv::new());
    let resolver = || {
        let translator = Arc::new(TextTranslator::new(Arc::new(PassthroughTranslator), kv.clone()));
        ConceptResolver::new(kv.clone(), translator)
    };
    resolver().record_translations("kn", &["Gravity".to_string()], &["ಗುರುತ್ವ".to_string()]);
    assert_eq!(resolver().original_of("ಗುರುತ್ವ", "kn"), "Gravity");

    let api = ScriptedAgentApi::new();
    api.start.push_ok(started("t1", "AD", "Welcome"));
    let h = Harness::build(api, kv.clone(), Arc::new(PassthroughTranslator), TutorSettings::default());

    h.send(Command::SelectConcept("Gravity".into()));
    h.until("welcome", |s| s.ai_messages().count() == 1).await;
    h.send(Command::Logout);
    let state = h
        .until("logged out", |s| s.phase == ConversationPhase::NoConcept)
        .await;

    assert!(state.messages.is_empty());
    assert!(state.selected_concept.is_none());
    assert!(!h.tutor.has_existing_session("Gravity").await);
    assert_eq!(h.mapping().load("Gravity"), None);
    assert_eq!(resolver().original_of("ಗುರುತ್ವ", "kn"), "ಗುರುತ್ವ");
}

#[tokio::test(start_paused = true)]
async fn test_personas_are_fetched_through_the_handle() {
    let api = ScriptedAgentApi::new();
    api.personas.push_ok(PersonasListResponse {
        personas: vec![PersonaInfo {
            name: "Socratic".into(),
            description: "Asks guiding questions".into(),
            ..Default::default()
        }],
        total: 1,
        ..Default::default()
    });
    let h = Harness::new(api);

    let list = h.tutor.fetch_personas().await;
    assert_eq!(list.map(|l| l.personas[0].name.clone()), Ok("Socratic".to_string()));
    assert_eq!(h.api.personas.calls(), 1);
}
