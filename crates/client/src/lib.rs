#![deny(unsafe_code)]

//! Chat service client built on the `parley-stream` reply protocol.

pub mod config;
pub mod error;
/// GraphQL documents and response envelopes.
pub mod graphql;
pub mod reply;
pub mod service;
pub mod types;

pub use config::{ClientSettings, DEFAULT_GRAPHQL_ENDPOINT, DEFAULT_TIMEOUT_MS, SettingsError};
pub use error::{ClientError, ClientResult, GENERIC_USER_MESSAGE};
pub use reply::ReplyBuffer;
pub use service::ChatService;
pub use types::{ChatMessage, ChatResponse, ChatSession, Role};
