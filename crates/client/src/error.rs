use parley_stream::StreamError;
use snafu::Snafu;

use crate::config::SettingsError;

pub const GENERIC_USER_MESSAGE: &str =
    "Sorry, the AI service is temporarily unavailable. Please try again later.";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    Http {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request timed out after {timeout_ms} ms on `{stage}`"))]
    Timeout { stage: &'static str, timeout_ms: u64 },
    #[snafu(display("HTTP {status}: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("GraphQL error: {messages}"))]
    GraphQl {
        stage: &'static str,
        messages: String,
    },
    #[snafu(display("no data received from server on `{stage}`"))]
    NoData { stage: &'static str },
    #[snafu(display("reply stream failed on `{stage}`: {source}"))]
    Stream {
        stage: &'static str,
        source: StreamError,
    },
    #[snafu(display("{source}"))]
    Settings { source: SettingsError },
    #[snafu(display("failed to read input `{path}`: {source}"))]
    ReadInput {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Sentence suitable for showing in place of a reply.
    ///
    /// Without `details` only timeouts and local problems are described;
    /// everything coming from the service collapses into a generic apology.
    pub fn user_message(&self, details: bool) -> String {
        match self {
            Self::Timeout { .. } => {
                "The request timed out, please check the network connection.".to_string()
            }
            Self::Settings { .. } | Self::ReadInput { .. } => self.to_string(),
            _ if details => format!("AI service error: {self}"),
            _ => GENERIC_USER_MESSAGE.to_string(),
        }
    }
}

impl From<SettingsError> for ClientError {
    fn from(source: SettingsError) -> Self {
        Self::Settings { source }
    }
}
