//! Structured comment bodies as the editor produces them.
//!
//! The backend stores a comment as one flat `content` string; the editor
//! works with a small `doc → paragraph → text` tree. Flattening joins the
//! paragraph texts with `'\n'`, and [`CommentBody::plain`] splits them back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DOC: &str = "doc";
const PARAGRAPH: &str = "paragraph";
const TEXT: &str = "text";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Map<String, Value>>,
}

/// A text run (or any other inline node) inside a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineNode {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockNode {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<InlineNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Map<String, Value>>,
}

impl BlockNode {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|inline| inline.text.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentBody {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Vec<BlockNode>,
}

impl CommentBody {
    /// Body with one paragraph per line of `text`.
    pub fn plain(text: &str) -> Self {
        let content = text
            .split('\n')
            .map(|line| BlockNode {
                kind: PARAGRAPH.to_string(),
                content: if line.is_empty() {
                    Vec::new()
                } else {
                    vec![InlineNode {
                        kind: TEXT.to_string(),
                        text: Some(line.to_string()),
                        marks: Vec::new(),
                    }]
                },
                attrs: None,
            })
            .collect();
        Self {
            kind: DOC.to_string(),
            content,
        }
    }

    /// Flatten to the backend's content string. Marks and attrs are dropped.
    pub fn to_plain_text(&self) -> String {
        self.content
            .iter()
            .map(BlockNode::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_roundtrip_keeps_lines() {
        let body = CommentBody::plain("first\n\nthird");
        assert_eq!(body.content.len(), 3);
        assert_eq!(body.to_plain_text(), "first\n\nthird");
    }

    #[test]
    fn test_parses_editor_json_and_drops_marks() {
        let json = r#"{
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "Looks "},
                    {"type": "text", "text": "good", "marks": [{"type": "bold"}]}
                ]},
                {"type": "paragraph"}
            ]
        }"#;
        let body = CommentBody::from_json(json).unwrap();
        assert_eq!(body.to_plain_text(), "Looks good\n");
    }

    #[test]
    fn test_serialized_shape() {
        let json = CommentBody::plain("hi").to_json().unwrap();
        assert_eq!(
            json,
            r#"{"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"hi"}]}]}"#
        );
    }
}
