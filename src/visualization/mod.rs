//! 概念图：结构、提示词、提取修复与后端选择

pub mod client;
pub mod extract;
pub mod graph;
pub mod prompt;

pub use client::{VisualizationClient, VisualizationSettings};
pub use extract::extract_graph;
pub use graph::{GraphEdge, GraphNode, VisualizationGraph};
