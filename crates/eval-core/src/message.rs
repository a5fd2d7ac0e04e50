//! Conversation Messages
//!
//! Content blocks, messages and the append-only conversation transcript.
//! The wire shape matches the model endpoint's message format, so a
//! [`Conversation`] can be sent as-is and persisted as-is.

use std::borrow::Cow;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input, including tool results
    User,
    /// Assistant (LLM) response
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One block of message content.
///
/// Block types this crate does not model are kept verbatim in
/// [`ContentBlock::Unknown`] and re-serialized unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
        is_error: bool,
    },
    Unknown {
        raw: Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: Vec<Self>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: false,
        }
    }

    /// A tool result flagged as failed, carrying the error text for the model
    pub fn tool_error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: vec![Self::text(message)],
            is_error: true,
        }
    }

    /// Classify a raw JSON block. Never fails: unrecognized or malformed
    /// blocks become [`ContentBlock::Unknown`].
    pub fn from_value(raw: Value) -> Self {
        match serde_json::from_value::<KnownBlock>(raw.clone()) {
            Ok(block) => block.into(),
            Err(err) => {
                tracing::debug!(error = %err, "Carrying unrecognized content block");
                Self::Unknown { raw }
            }
        }
    }

    /// Get the text if this is a Text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub const fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }

    /// Wire type tag of this block
    pub fn type_name(&self) -> &str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::Unknown { raw } => raw.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }
}

/// Recognized block shapes, used for decoding only
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
}

/// Tool result content may be a bare string on the wire
#[derive(Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

impl From<KnownBlock> for ContentBlock {
    fn from(block: KnownBlock) -> Self {
        match block {
            KnownBlock::Text { text } => Self::Text { text },
            KnownBlock::ToolUse { id, name, input } => Self::ToolUse { id, name, input },
            KnownBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Self::ToolResult {
                tool_use_id,
                content: match content {
                    ToolResultContent::Text(text) => vec![Self::Text { text }],
                    ToolResultContent::Blocks(blocks) => blocks,
                },
                is_error,
            },
        }
    }
}

/// Borrowed view used for encoding the recognized variants
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownBlockRef<'a> {
    Text {
        text: &'a str,
    },
    ToolUse {
        id: &'a str,
        name: &'a str,
        input: &'a Value,
    },
    ToolResult {
        tool_use_id: &'a str,
        content: &'a [ContentBlock],
        #[serde(skip_serializing_if = "is_false")]
        is_error: bool,
    },
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

impl Serialize for ContentBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text { text } => KnownBlockRef::Text { text }.serialize(serializer),
            Self::ToolUse { id, name, input } => {
                KnownBlockRef::ToolUse { id, name, input }.serialize(serializer)
            }
            Self::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => KnownBlockRef::ToolResult {
                tool_use_id,
                content,
                is_error: *is_error,
            }
            .serialize(serializer),
            Self::Unknown { raw } => raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ContentBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

/// Message content: a bare string (user messages only) or a block list
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Content as blocks; a bare string is one Text block
    pub fn blocks(&self) -> Cow<'_, [ContentBlock]> {
        match self {
            Self::Text(text) => Cow::Owned(vec![ContentBlock::text(text.clone())]),
            Self::Blocks(blocks) => Cow::Borrowed(blocks),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a user message from a bare query string
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create a user message from blocks (e.g. tool results)
    pub const fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Create an assistant message
    pub const fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn blocks(&self) -> Cow<'_, [ContentBlock]> {
        self.content.blocks()
    }

    /// Ids of the ToolUse blocks, in order
    pub fn tool_use_ids(&self) -> Vec<String> {
        self.blocks()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Ids referenced by the ToolResult blocks, in order
    pub fn tool_result_ids(&self) -> Vec<String> {
        self.blocks()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Text blocks joined with newlines
    pub fn text(&self) -> String {
        self.blocks()
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Append-only conversation history.
///
/// Messages can be added but never removed, replaced or reordered.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Start a conversation with the initial user query
    pub fn new(initial_query: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(initial_query)],
        }
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent assistant message
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Text of the final assistant reply, empty if there is none
    pub fn final_text(&self) -> String {
        self.last_assistant().map(Message::text).unwrap_or_default()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check the transcript ordering rules.
    ///
    /// Roles alternate starting with the user, and each assistant message's
    /// tool uses are answered, one to one and in order, by the next message.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut expected = Role::User;
        for (index, message) in self.messages.iter().enumerate() {
            if message.role != expected {
                return Err(format!(
                    "message {index}: expected {expected} role, found {}",
                    message.role
                ));
            }
            expected = match expected {
                Role::User => Role::Assistant,
                Role::Assistant => Role::User,
            };

            if message.role != Role::Assistant {
                continue;
            }
            let uses = message.tool_use_ids();
            if uses.is_empty() {
                continue;
            }
            let Some(next) = self.messages.get(index + 1) else {
                continue;
            };
            let results = next.tool_result_ids();
            if results != uses {
                return Err(format!(
                    "message {}: tool results {results:?} do not answer tool uses {uses:?}",
                    index + 1
                ));
            }
        }
        Ok(())
    }
}
