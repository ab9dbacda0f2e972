use parley_stream::{DispatchReport, StreamHandler, dispatch_text};
use serde::{Deserialize, Serialize};

/// Speaker of a stored chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of the `sendMessage` mutation.
///
/// A successful reply carries either a whole `message` or an inline `stream`
/// payload in the newline-delimited protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub session: Option<ChatSession>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn has_stream(&self) -> bool {
        self.success && self.stream.as_deref().is_some_and(|stream| !stream.is_empty())
    }

    /// Runs the inline stream payload through `handler`.
    pub fn replay_stream<H>(&self, handler: H) -> Option<DispatchReport>
    where
        H: StreamHandler,
    {
        if !self.has_stream() {
            return None;
        }
        self.stream
            .as_deref()
            .map(|payload| dispatch_text(payload, handler))
    }

    /// Whole reply text, when the service answered without streaming.
    pub fn reply_text(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.message.as_ref().map(|message| message.content.as_str())
    }
}
