//! 行式交互主循环
//!
//! 逐行读取标准输入，把斜杠命令与普通消息转为 Command 发给编排器；
//! 同时订阅 state 与事件通道，把新增的聊天消息打印出来。

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::{ChatEvent, ChatState, Command, Sender, TutorHandle};

/// 一行输入的解析结果
#[derive(Debug)]
pub enum Input {
    Empty,
    Quit,
    Help,
    Status,
    Map,
    Concepts,
    Models,
    Summary,
    Personas,
    Exists(String),
    /// 第 n 条推荐问题（从 1 开始）
    Suggest(usize),
    Command(Command),
    Unknown(String),
}

pub fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if !line.starts_with('/') {
        return Input::Command(Command::Send(line.to_string()));
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let arg = || rest.to_string();
    match (head, rest.is_empty()) {
        ("/quit" | "/exit", _) => Input::Quit,
        ("/help", _) => Input::Help,
        ("/status", _) => Input::Status,
        ("/map", _) => Input::Map,
        ("/concepts", _) => Input::Concepts,
        ("/models", _) => Input::Models,
        ("/summary", _) => Input::Summary,
        ("/personas", _) => Input::Personas,
        ("/retry", _) => Input::Command(Command::Retry),
        ("/logout", _) => Input::Command(Command::Logout),
        ("/select", false) => Input::Command(Command::SelectConcept(arg())),
        ("/fresh", false) => Input::Command(Command::StartFresh(arg())),
        ("/lang", false) => Input::Command(Command::SetLanguage(arg())),
        ("/model", false) => Input::Command(Command::SelectModel(arg())),
        ("/exists", false) => Input::Exists(arg()),
        ("/suggest", false) => match rest.parse::<usize>() {
            Ok(n) if n > 0 => Input::Suggest(n),
            _ => Input::Unknown(line.to_string()),
        },
        ("/user", false) => {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            match parts.as_slice() {
                [name, phone, language] => Input::Command(Command::SaveUserInfo {
                    name: name.to_string(),
                    phone: phone.to_string(),
                    language: language.to_string(),
                    concept: None,
                }),
                _ => Input::Unknown(line.to_string()),
            }
        }
        _ => Input::Unknown(line.to_string()),
    }
}

fn print_help() {
    println!(
        "Commands:
  /concepts              list concepts        /select <concept>   open a concept
  /fresh <concept>       restart a concept    /exists <concept>   has saved session?
  /lang <code>           display language     /models, /model <id>
  /suggest <n>           send a suggestion    /retry              resend last message
  /summary  /personas  /status  /map          /user <name> <phone> <lang>
  /logout  /quit
Anything else is sent to the tutor."
    );
}

/// 打印 printed 之后的新消息；聊天被整表重置时从头打印
fn render_messages(state: &ChatState, printed: usize) -> usize {
    let start = if state.messages.len() < printed {
        println!("--- chat cleared ---");
        0
    } else {
        printed
    };
    for msg in &state.messages[start..] {
        let who = match (msg.sender, msg.is_error) {
            (Sender::User, _) => "you",
            (Sender::Ai, true) => "!!",
            (Sender::Ai, false) => "tutor",
        };
        println!("[{who}] {}", msg.content);
    }
    state.messages.len()
}

fn render_status(state: &ChatState) {
    println!(
        "phase={:?} concept={} lang={} started={} loading={} online={} state={} model={}",
        state.phase,
        state.selected_concept.as_deref().unwrap_or("-"),
        state.language,
        state.session_started,
        state.is_loading,
        state.is_connected,
        if state.agent_state.is_empty() { "-" } else { state.agent_state.as_str() },
        state.selected_model.as_deref().unwrap_or("-"),
    );
    for (i, s) in state.autosuggestions.iter().enumerate() {
        println!("  suggestion {}: {}", i + 1, s);
    }
}

fn render_map(state: &ChatState) {
    let g = &state.graph;
    println!("{} ({}): {} nodes, {} edges", g.main_concept, g.visualization_type, g.nodes.len(), g.edges.len());
    for edge in &g.edges {
        println!("  {} -[{}]-> {}", edge.from, edge.label, edge.to);
    }
}

fn render_list(title: &str, items: &[String]) {
    if items.is_empty() {
        println!("{title}: (none yet, refreshing)");
        return;
    }
    println!("{title}:");
    for item in items {
        println!("  {item}");
    }
}

/// 运行交互循环，直到 /quit 或输入结束
pub async fn run_repl(handle: TutorHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state_rx = handle.state.clone();
    let mut events = handle.subscribe_events();
    let mut printed = 0usize;

    print_help();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Help => print_help(),
                    Input::Status => render_status(&handle.snapshot()),
                    Input::Map => render_map(&handle.snapshot()),
                    Input::Concepts => {
                        render_list("Concepts", &handle.snapshot().available_concepts);
                        handle.send(Command::RefreshConcepts);
                    }
                    Input::Models => {
                        render_list("Models", &handle.snapshot().available_models);
                        handle.send(Command::RefreshModels);
                    }
                    Input::Summary => match handle.fetch_summary().await {
                        Ok(summary) => println!(
                            "summary: {} (quiz score {:?})",
                            summary.summary.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                            summary.quiz_score
                        ),
                        Err(e) => println!("summary unavailable: {}", e.user_message()),
                    },
                    Input::Personas => match handle.fetch_personas().await {
                        Ok(list) => {
                            for persona in list.personas {
                                println!("  {}: {}", persona.name, persona.description);
                            }
                        }
                        Err(e) => println!("personas unavailable: {}", e.user_message()),
                    },
                    Input::Exists(concept) => {
                        let exists = handle.has_existing_session(&concept).await;
                        println!("{concept}: {}", if exists { "saved session" } else { "no saved session" });
                    }
                    Input::Suggest(n) => {
                        match handle.snapshot().autosuggestions.get(n - 1).cloned() {
                            Some(text) => {
                                handle.send(Command::SendSuggestion(text));
                            }
                            None => println!("no suggestion {n}"),
                        }
                    }
                    Input::Command(cmd) => {
                        if !handle.send(cmd) {
                            break;
                        }
                    }
                    Input::Unknown(line) => println!("unknown command: {line} (try /help)"),
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                printed = render_messages(&state, printed);
            }
            Ok(event) = events.recv() => {
                if event == ChatEvent::SlowNetwork {
                    println!("(the tutor is taking a while, network seems slow)");
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
