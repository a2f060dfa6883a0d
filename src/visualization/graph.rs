//! 概念图结构
//!
//! 字段名与渲染端约定一致（snake_case，`audioSegments` 例外）。占位图没有专门标记，
//! 靠 `main_concept == "Loading..."` 且只有一个 "Concept" 节点识别，见 [`VisualizationGraph::is_placeholder`]。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const PLACEHOLDER_MAIN_CONCEPT: &str = "Loading...";
pub const PLACEHOLDER_NODE_LABEL: &str = "Concept";

/// 节点 / 边 id 允许是字符串或数字
fn de_stringish<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(default, deserialize_with = "de_stringish")]
    pub id: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub label: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    #[serde(default, deserialize_with = "de_stringish")]
    pub id: String,
    #[serde(deserialize_with = "de_stringish")]
    pub from: String,
    #[serde(deserialize_with = "de_stringish")]
    pub to: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualizationGraph {
    #[serde(default, deserialize_with = "de_stringish")]
    pub visualization_type: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub main_concept: String,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    #[serde(rename = "audioSegments", default)]
    pub audio_segments: Vec<Value>,
}

impl VisualizationGraph {
    /// 提取失败时的单节点占位图
    pub fn placeholder() -> Self {
        Self {
            visualization_type: "Concept Map".to_string(),
            main_concept: PLACEHOLDER_MAIN_CONCEPT.to_string(),
            nodes: vec![GraphNode {
                id: "A".to_string(),
                label: PLACEHOLDER_NODE_LABEL.to_string(),
                category: "Core".to_string(),
            }],
            edges: Vec::new(),
            audio_segments: vec![serde_json::json!({
                "segmentIndex": 0,
                "spokenText": "Loading concept map...",
                "estimatedDuration": 2.0,
                "highlightNodeIds": ["A"],
                "showNodeIds": ["A"],
                "highlightEdgeIds": [],
                "action": "introduce"
            })],
        }
    }

    /// 尚未生成任何图时的空状态
    pub fn idle() -> Self {
        Self {
            visualization_type: "None".to_string(),
            main_concept: "Chat for a Concept Map".to_string(),
            ..Self::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.main_concept == PLACEHOLDER_MAIN_CONCEPT
            && self.nodes.len() == 1
            && self.nodes[0].label == PLACEHOLDER_NODE_LABEL
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// 为缺少 id 的边补上 "{from}->{to}"；返回补了几条
    pub fn fill_edge_ids(&mut self) -> usize {
        let mut filled = 0;
        for edge in self.edges.iter_mut().filter(|e| e.id.trim().is_empty()) {
            edge.id = format!("{}->{}", edge.from, edge.to);
            filled += 1;
        }
        filled
    }

    /// 前 nodes 个节点、前 edges 条边的中间状态（逐步绘制用）
    pub fn prefix(&self, nodes: usize, edges: usize) -> Self {
        Self {
            visualization_type: self.visualization_type.clone(),
            main_concept: self.main_concept.clone(),
            nodes: self.nodes.iter().take(nodes).cloned().collect(),
            edges: self.edges.iter().take(edges).cloned().collect(),
            audio_segments: self.audio_segments.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_heuristic() {
        assert!(VisualizationGraph::placeholder().is_placeholder());
        assert!(!VisualizationGraph::idle().is_placeholder());

        let mut real = VisualizationGraph::placeholder();
        real.main_concept = "Gravity".into();
        assert!(!real.is_placeholder());
    }

    #[test]
    fn test_numeric_ids_accepted() {
        let g: VisualizationGraph = serde_json::from_str(
            r#"{"visualization_type":"Concept Map","main_concept":"X",
                "nodes":[{"id":1,"label":"One"}],"edges":[{"from":1,"to":2}]}"#,
        )
        .unwrap();
        assert_eq!(g.nodes[0].id, "1");
        assert_eq!(g.edges[0].to, "2");
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(VisualizationGraph::placeholder()).unwrap();
        assert!(json.get("audioSegments").is_some());
        assert_eq!(json["main_concept"], "Loading...");
    }

    #[test]
    fn test_prefix() {
        let mut g = VisualizationGraph::placeholder();
        g.nodes.push(GraphNode {
            id: "B".into(),
            ..Default::default()
        });
        let p = g.prefix(1, 0);
        assert_eq!(p.nodes.len(), 1);
        assert_eq!(p.main_concept, g.main_concept);
    }
}
