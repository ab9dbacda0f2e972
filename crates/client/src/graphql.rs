use serde::{Deserialize, Serialize};

use crate::error::{ClientResult, GraphQlSnafu, NoDataSnafu};
use crate::types::{ChatResponse, ChatSession};

pub const HELLO_QUERY: &str = "query { hello }";

pub const CREATE_SESSION_MUTATION: &str = r#"
mutation {
  createChatSession {
    id
    messages { id role content timestamp }
    createdAt
    updatedAt
  }
}
"#;

pub const SEND_MESSAGE_MUTATION: &str = r#"
mutation SendMessage($message: String!, $sessionId: ID) {
  sendMessage(message: $message, sessionId: $sessionId) {
    success
    error
    stream
    message { id role content timestamp }
    session {
      id
      messages { id role content timestamp }
      createdAt
      updatedAt
    }
  }
}
"#;

pub const GET_SESSION_QUERY: &str = r#"
query GetChatSession($id: ID!) {
  getChatSession(id: $id) {
    id
    messages { id role content timestamp }
    createdAt
    updatedAt
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphQlRequest<'a> {
    pub query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphQlErrorEntry {
    pub message: String,
}

/// Standard `{ data, errors }` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQlErrorEntry>>,
}

impl<T> GraphQlResponse<T> {
    /// Errors win over data; missing data is an error of its own.
    pub fn into_data(self, stage: &'static str) -> ClientResult<T> {
        if let Some(errors) = self.errors.filter(|errors| !errors.is_empty()) {
            let messages = errors
                .into_iter()
                .map(|entry| entry.message)
                .collect::<Vec<_>>()
                .join(", ");
            return GraphQlSnafu { stage, messages }.fail();
        }

        match self.data {
            Some(data) => Ok(data),
            None => NoDataSnafu { stage }.fail(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HelloData {
    pub hello: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionData {
    pub create_chat_session: ChatSession,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageData {
    pub send_message: ChatResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSessionData {
    pub get_chat_session: Option<ChatSession>,
}
