#![deny(unsafe_code)]

//! Decoder and dispatcher for newline-delimited chat reply streams.
//!
//! Bytes go in through [`StreamConsumer`] (push, callbacks),
//! [`decode_messages`] (pull) or [`spawn_session`] (channel); validated
//! [`StreamMessage`]s come out in arrival order.

/// Byte and line segmentation.
pub mod decoder;
/// Read loop, lifecycle phases and dispatch reports.
pub mod dispatch;
pub mod error;
/// Consumer callback contract.
pub mod handler;
pub mod message;
/// Line parsing and schema validation.
pub mod record;
pub mod session;

pub use decoder::{ChunkDecoder, DEFAULT_DELIMITER, LineDecoder};
pub use dispatch::{
    DispatchCounts, DispatchOutcome, DispatchReport, PhaseRejection, PhaseTransition,
    PhaseTransitionResult, StreamConsumer, StreamPhase, decode_messages, dispatch_text,
};
pub use error::{RecordError, StreamError, StreamResult, TransportSource};
pub use handler::{Handlers, StreamHandler};
pub use message::{MessageKind, StreamMessage};
pub use record::{decode_record, parse_record};
pub use session::{
    ConversationId, SessionHandle, SessionWorker, StreamEvent, StreamEventPayload, StreamSession,
    StreamSessionId, StreamTarget, open_session, spawn_session,
};
