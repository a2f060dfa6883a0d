//! 概念图提示词

/// system 提示：要求 [ANSWER] 段加严格 JSON 的概念图段，全部使用目标语言
pub fn system_prompt(language: &str, reading_level: &str, node_budget: u32, max_words: u32) -> String {
    format!(
        r#"You are an AI that creates concept maps for Class {reading_level} students.
Given an AI tutor's explanation/response, create a visual concept map.

IMPORTANT: All text in the concept map (node labels, edge labels, main_concept) must be in {language},
whatever language the AI response is written in.
Respond in this exact format:
[ANSWER]
Explain in under {max_words} words. Be clear, age-appropriate, and conversational.

[CONCEPT_MAP_JSON]
Valid JSON only (no markdown/code blocks):
{{
  "visualization_type": "Concept Map",
  "main_concept": "main topic from the response",
  "nodes": [
    {{"id": "A", "label": "Main", "category": "Main"}},
    {{"id": "B", "label": "Sub 1", "category": "Secondary"}},
    {{"id": "C", "label": "Sub 2", "category": "Secondary"}},
    {{"id": "D", "label": "Detail", "category": "Leaf"}}
  ],
  "edges": [
    {{"from": "A", "to": "B", "label": "relation", "id": "A->B"}},
    {{"from": "A", "to": "C", "label": "relation", "id": "A->C"}},
    {{"from": "B", "to": "D", "label": "relation", "id": "B->D"}}
  ],
  "audioSegments": [
    {{
      "segmentIndex": 0,
      "spokenText": "text from response (in {language})",
      "estimatedDuration": 3.5,
      "highlightNodeIds": ["A"],
      "showNodeIds": ["A"],
      "highlightEdgeIds": [],
      "action": "introduce"
    }}
  ]
}}

Rules:
- Extract key concepts from the AI response
- ALL text (labels, concepts, relations) MUST be in {language}
- 1 Main node, 2-3 Secondary nodes, rest Leaf nodes (~{node_budget} total)
- All edges need "id" as "FROM->TO"
- audioSegments: split response into parts, match node reveals to explanation flow
- estimatedDuration: 2-3 words/second
- action types: "introduce", "expand", "connect"
- Show nodes progressively (start with main only)
- Make it age-appropriate for Class {reading_level}"#
    )
}

pub fn user_prompt(agent_response: &str) -> String {
    format!("AI Response to visualize:\n{agent_response}")
}
