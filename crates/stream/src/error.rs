use snafu::Snafu;

/// Boxed transport error as produced by the byte source.
pub type TransportSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures that end a stream.
///
/// Record-level problems never show up here; they are filtered by
/// [`crate::record::decode_record`] and the stream keeps going.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StreamError {
    #[snafu(display("stream transport failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: TransportSource,
    },
    #[snafu(display("stream worker for {target} stopped unexpectedly"))]
    WorkerGone {
        stage: &'static str,
        target: String,
    },
}

impl StreamError {
    pub fn transport(stage: &'static str, source: impl Into<TransportSource>) -> Self {
        Self::Transport {
            stage,
            source: source.into(),
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::Transport { stage, .. } | Self::WorkerGone { stage, .. } => stage,
        }
    }
}

/// Why a single line could not become a [`crate::StreamMessage`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RecordError {
    #[snafu(display("record is not valid JSON: {source}"))]
    Syntax {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("record does not match the stream message schema: {source}"))]
    Schema {
        stage: &'static str,
        source: serde_json::Error,
    },
}

impl RecordError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Syntax { .. })
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
