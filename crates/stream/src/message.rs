use std::fmt;

use serde::{Deserialize, Serialize};

/// One validated protocol event.
///
/// The wire form is a JSON object tagged by `type`; every variant carries
/// exactly the field its type requires. Extra fields on the wire are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    Start { timestamp: String },
    Content { content: String },
    Error { error: String },
    End { timestamp: String },
}

/// Fieldless mirror of [`StreamMessage`] used for counters and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Start,
    Content,
    Error,
    End,
}

impl StreamMessage {
    pub fn start(timestamp: impl Into<String>) -> Self {
        Self::Start {
            timestamp: timestamp.into(),
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self::Content {
            content: content.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    pub fn end(timestamp: impl Into<String>) -> Self {
        Self::End {
            timestamp: timestamp.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Start { .. } => MessageKind::Start,
            Self::Content { .. } => MessageKind::Content,
            Self::Error { .. } => MessageKind::Error,
            Self::End { .. } => MessageKind::End,
        }
    }

    /// Serializes the message as one wire line, newline included.
    pub fn to_line(&self) -> String {
        // Every variant holds plain strings, so serialization cannot fail.
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [Self::Start, Self::Content, Self::Error, Self::End];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Content => "content",
            Self::Error => "error",
            Self::End => "end",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
