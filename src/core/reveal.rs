//! 回复展示流水线与概念图逐步发布
//!
//! 两个任务都不直接改状态，只把带轮次号的 [`RevealUpdate`] 发回编排器，由编排器丢弃过期轮次。
//! 只有 `Finished` 会让编排器追加永久消息，任务被取消时不会发出它。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::concepts::TextTranslator;
use crate::visualization::{VisualizationClient, VisualizationGraph};

/// 逐词 / 逐节点的节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealTiming {
    pub word_base: Duration,
    pub per_char: Duration,
    pub max_extra: Duration,
    pub node_step: Duration,
    pub edge_step: Duration,
}

impl Default for RevealTiming {
    fn default() -> Self {
        Self {
            word_base: Duration::from_millis(120),
            per_char: Duration::from_millis(8),
            max_extra: Duration::from_millis(200),
            node_step: Duration::from_millis(400),
            edge_step: Duration::from_millis(300),
        }
    }
}

impl RevealTiming {
    /// base + min(字数 × per_char, max_extra)
    pub fn word_delay(&self, word: &str) -> Duration {
        let chars = word.chars().count() as u32;
        self.word_base + (self.per_char * chars).min(self.max_extra)
    }
}

/// 任务发回编排器的进度
#[derive(Debug, Clone, PartialEq)]
pub enum RevealUpdate {
    /// 翻译完成：展示目标 + 朗读提示
    Translated { turn: u64, text: String },
    Typing { turn: u64, text: String },
    /// 展示完毕，追加永久消息
    Finished { turn: u64, text: String },
    Graph { turn: u64, graph: VisualizationGraph },
}

impl RevealUpdate {
    pub fn turn(&self) -> u64 {
        match self {
            RevealUpdate::Translated { turn, .. }
            | RevealUpdate::Typing { turn, .. }
            | RevealUpdate::Finished { turn, .. }
            | RevealUpdate::Graph { turn, .. } => *turn,
        }
    }
}

/// 等待 d；期间被取消返回 false
async fn pause(token: &CancellationToken, d: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(d) => true,
    }
}

/// 翻译、发布目标文本、逐词展示，最后请求追加
#[allow(clippy::too_many_arguments)]
pub async fn reveal_text(
    turn: u64,
    text: String,
    language: String,
    translator: Arc<TextTranslator>,
    timing: RevealTiming,
    token: CancellationToken,
    updates: mpsc::UnboundedSender<RevealUpdate>,
) {
    let translated = tokio::select! {
        _ = token.cancelled() => return,
        t = translator.translate_text(&text, &language) => t,
    };
    if token.is_cancelled()
        || updates
            .send(RevealUpdate::Translated {
                turn,
                text: translated.clone(),
            })
            .is_err()
    {
        return;
    }

    let mut shown = String::with_capacity(translated.len());
    for (i, word) in translated.split(' ').enumerate() {
        if i > 0 {
            shown.push(' ');
        }
        shown.push_str(word);
        if updates
            .send(RevealUpdate::Typing {
                turn,
                text: shown.clone(),
            })
            .is_err()
        {
            return;
        }
        if !pause(&token, timing.word_delay(word)).await {
            tracing::debug!("Reveal of turn {} cancelled", turn);
            return;
        }
    }

    let _ = updates.send(RevealUpdate::Finished {
        turn,
        text: translated,
    });
}

/// 生成概念图并逐步发布：空壳 → 逐个节点 → 逐条边
#[allow(clippy::too_many_arguments)]
pub async fn reveal_graph(
    turn: u64,
    reply: String,
    language: String,
    model: String,
    visualizer: Arc<VisualizationClient>,
    timing: RevealTiming,
    token: CancellationToken,
    updates: mpsc::UnboundedSender<RevealUpdate>,
) {
    let graph = tokio::select! {
        _ = token.cancelled() => return,
        g = visualizer.generate(&reply, &language, &model) => g,
    };
    if token.is_cancelled() {
        return;
    }

    if graph.is_empty() {
        let _ = updates.send(RevealUpdate::Graph { turn, graph });
        return;
    }

    let (nodes, edges) = (graph.nodes.len(), graph.edges.len());
    let publish = |n: usize, e: usize| {
        updates
            .send(RevealUpdate::Graph {
                turn,
                graph: graph.prefix(n, e),
            })
            .is_ok()
    };

    if !publish(0, 0) {
        return;
    }
    for n in 1..=nodes {
        if !pause(&token, timing.node_step).await || !publish(n, 0) {
            return;
        }
    }
    for e in 1..=edges {
        if !pause(&token, timing.edge_step).await || !publish(nodes, e) {
            return;
        }
    }
    tracing::debug!("Published graph of turn {} ({} nodes, {} edges)", turn, nodes, edges);
}
