//! 从模型回复中提取概念图
//!
//! 回复里 JSON 前后常夹着说明文字。这里逐个扫描花括号平衡的片段（跳过字符串里的括号），
//! 取第一个同时含四个必需字段的对象。任何失败都返回占位图。

use serde_json::Value;

use crate::visualization::graph::VisualizationGraph;

pub const REQUIRED_KEYS: [&str; 4] = ["visualization_type", "main_concept", "nodes", "edges"];

/// 从 start（必须是 '{'）起找到与之配对的 '}'，返回其后一位
fn matching_brace_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// 文本中所有花括号平衡的片段，按起点顺序
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        if let Some(end) = matching_brace_end(bytes, start) {
            out.push(&text[start..end]);
        }
        // 从下一字节继续，嵌套对象也会被考察
        pos = start + 1;
    }
    out
}

/// OpenAI 风格的 choices 外壳：取第一条 message.content
fn unwrap_envelope(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(String::from)
}

fn has_required_keys(value: &Value) -> bool {
    value
        .as_object()
        .map(|o| REQUIRED_KEYS.iter().all(|k| o.contains_key(*k)))
        .unwrap_or(false)
}

/// 提取并修复概念图；失败时返回 [`VisualizationGraph::placeholder`]
pub fn extract_graph(raw: &str) -> VisualizationGraph {
    if raw.trim_start().starts_with("Error:") {
        tracing::warn!("Visualization backend returned an error: {}", raw.trim());
        return VisualizationGraph::placeholder();
    }

    let content = unwrap_envelope(raw).unwrap_or_else(|| raw.to_string());
    for candidate in balanced_objects(&content) {
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        if !has_required_keys(&value) {
            continue;
        }
        match serde_json::from_value::<VisualizationGraph>(value) {
            Ok(mut graph) => {
                let filled = graph.fill_edge_ids();
                if filled > 0 {
                    tracing::debug!("Synthesized {} missing edge ids", filled);
                }
                tracing::debug!(
                    "Extracted graph with {} nodes, {} edges",
                    graph.nodes.len(),
                    graph.edges.len()
                );
                return graph;
            }
            Err(e) => tracing::debug!("Graph candidate rejected: {}", e),
        }
    }

    tracing::warn!("No concept map JSON found in response ({} chars)", content.len());
    VisualizationGraph::placeholder()
}
