// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message types for LLM interactions
//!
//! Defines the chat turns exchanged with providers. Document roles map
//! onto chat roles when the tree is replayed as conversation history.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Role of a chat message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System prompt
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool result keyed to a prior tool call
    Tool,
}

impl From<crate::tree::Role> for ChatRole {
    fn from(role: crate::tree::Role) -> Self {
        match role {
            crate::tree::Role::User => ChatRole::User,
            crate::tree::Role::Assistant => ChatRole::Assistant,
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: ChatRole,

    /// Content of the message
    pub content: MessageContent,

    /// Attachment references forwarded to the provider (`media` files)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Content of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),
    /// Multiple content blocks (text, tool use, tool result)
    Blocks(Vec<ContentBlock>),
}

/// A block of content within a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text { text: String },

    /// Tool use request from the assistant
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool result keyed to the call id
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// A file forwarded to the provider as an attachment reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub path: PathBuf,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessageContent::Text(content.into()),
            attachments: Vec::new(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: MessageContent::Text(content.into()),
            attachments: Vec::new(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: MessageContent::Text(content.into()),
            attachments: Vec::new(),
        }
    }

    /// Create an assistant message with content blocks
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: MessageContent::Blocks(blocks),
            attachments: Vec::new(),
        }
    }

    /// Create a tool result message keyed to a call id
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: ChatRole::Tool,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: if is_error { Some(true) } else { None },
            }]),
            attachments: Vec::new(),
        }
    }

    /// Attach files, builder-style.
    pub fn with_attachments(mut self, paths: Vec<PathBuf>) -> Self {
        self.attachments = paths.into_iter().map(|path| Attachment { path }).collect();
        self
    }

    /// Get the text content (first text block for block content)
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(blocks) => blocks.iter().find_map(|block| {
                if let ContentBlock::Text { text } = block {
                    Some(text.as_str())
                } else {
                    None
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("hi").role, ChatRole::User);
        assert_eq!(Message::assistant("yo").role, ChatRole::Assistant);
        assert_eq!(Message::system("sys").role, ChatRole::System);
    }

    #[test]
    fn test_text_accessor() {
        assert_eq!(Message::user("hello").text(), Some("hello"));

        let blocks = Message::assistant_blocks(vec![
            ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "echo_tool".to_string(),
                input: serde_json::json!({}),
            },
            ContentBlock::Text {
                text: "after".to_string(),
            },
        ]);
        assert_eq!(blocks.text(), Some("after"));
    }

    #[test]
    fn test_tool_result_message() {
        let msg = Message::tool_result("call-1", r#"{"result":"hi"}"#, false);
        assert_eq!(msg.role, ChatRole::Tool);
        if let MessageContent::Blocks(blocks) = &msg.content {
            if let ContentBlock::ToolResult {
                tool_use_id,
                is_error,
                ..
            } = &blocks[0]
            {
                assert_eq!(tool_use_id, "call-1");
                assert!(is_error.is_none());
            } else {
                panic!("Expected ToolResult block");
            }
        } else {
            panic!("Expected blocks content");
        }
    }

    #[test]
    fn test_tool_result_error_flag() {
        let msg = Message::tool_result("call-1", r#"{"error":"bad arguments"}"#, true);
        if let MessageContent::Blocks(blocks) = &msg.content {
            if let ContentBlock::ToolResult { is_error, .. } = &blocks[0] {
                assert_eq!(*is_error, Some(true));
            }
        }
    }

    #[test]
    fn test_role_mapping_from_tree() {
        assert_eq!(ChatRole::from(crate::tree::Role::User), ChatRole::User);
        assert_eq!(
            ChatRole::from(crate::tree::Role::Assistant),
            ChatRole::Assistant
        );
    }

    #[test]
    fn test_attachments() {
        let msg =
            Message::user("look at this").with_attachments(vec![PathBuf::from("img.png")]);
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].path, PathBuf::from("img.png"));
    }

    #[test]
    fn test_serialization_round_trip() {
        let msg = Message::assistant_blocks(vec![ContentBlock::ToolUse {
            id: "t1".to_string(),
            name: "echo_tool".to_string(),
            input: serde_json::json!({"msg": "hi"}),
        }]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("tool_use"));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.role, ChatRole::Assistant);
    }
}
