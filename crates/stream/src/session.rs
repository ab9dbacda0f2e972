//! Channel-backed stream sessions for callers juggling several replies.
//!
//! Each session owns its consumer; nothing is shared between sessions except
//! the routing key carried on every event.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::dispatch::{DispatchOutcome, StreamConsumer};
use crate::error::{StreamError, StreamResult};
use crate::handler::StreamHandler;

/// Stable identifier for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub u64);

impl ConversationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one streamed reply.
///
/// This must change on every submit/retry so stale events can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Routing key attached to every event of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "conversation {}/session {}",
            self.conversation_id.0, self.session_id.0
        )
    }
}

/// Protocol messages and lifecycle signals as seen by a session reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Started,
    Delta(String),
    /// In-band error; more events may follow.
    Error(String),
    Ended,
    /// Transport failure; last event of the session.
    Failed(String),
    /// Transport finished cleanly; last event of the session.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            StreamEventPayload::Failed(_) | StreamEventPayload::Closed
        )
    }
}

pub type SessionWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receiving side of a session.
///
/// Dropping it cancels the worker, which then releases the byte stream.
pub struct StreamSession {
    target: StreamTarget,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

/// A session plus the future that feeds it; the caller decides where it runs.
pub struct SessionHandle {
    pub session: StreamSession,
    pub worker: SessionWorker,
}

impl StreamSession {
    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    /// Waits for a spawned worker to finish.
    ///
    /// Sessions built with [`open_session`] have no task to wait for.
    pub async fn join(&mut self) -> StreamResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.await.map_err(|error| {
            tracing::error!(target = %self.target, error = %error, "stream worker task failed");
            StreamError::WorkerGone {
                stage: "join-session-worker",
                target: self.target.to_string(),
            }
        })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Builds a session without spawning its worker.
pub fn open_session<S, B, E>(target: StreamTarget, byte_stream: S) -> SessionHandle
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let worker: SessionWorker = Box::pin(run_session_worker(
        target,
        byte_stream,
        event_tx,
        cancel_rx,
    ));

    SessionHandle {
        session: StreamSession {
            target,
            events: event_rx,
            cancel_tx: Some(cancel_tx),
            worker: None,
        },
        worker,
    }
}

/// Builds a session and runs its worker on the current tokio runtime.
pub fn spawn_session<S, B, E>(target: StreamTarget, byte_stream: S) -> StreamSession
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let SessionHandle {
        mut session,
        worker,
    } = open_session(target, byte_stream);
    session.worker = Some(tokio::spawn(worker));
    session
}

struct ChannelHandler {
    target: StreamTarget,
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelHandler {
    fn emit(&self, payload: StreamEventPayload) {
        // The reader may already be gone; its drop also cancels this worker.
        let _ = self.events.send(StreamEvent {
            target: self.target,
            payload,
        });
    }
}

impl StreamHandler for ChannelHandler {
    fn on_content(&mut self, content: &str) {
        self.emit(StreamEventPayload::Delta(content.to_string()));
    }

    fn on_start(&mut self) {
        self.emit(StreamEventPayload::Started);
    }

    fn on_error(&mut self, error: &str) {
        self.emit(StreamEventPayload::Error(error.to_string()));
    }

    fn on_end(&mut self) {
        self.emit(StreamEventPayload::Ended);
    }

    fn on_transport_error(&mut self, error: &StreamError) {
        self.emit(StreamEventPayload::Failed(error.to_string()));
    }
}

async fn run_session_worker<S, B, E>(
    target: StreamTarget,
    byte_stream: S,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    cancel_rx: oneshot::Receiver<()>,
) where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let handler = ChannelHandler {
        target,
        events: event_tx.clone(),
    };
    let report = StreamConsumer::new(handler)
        .run_until_cancelled(byte_stream, cancel_rx)
        .await;

    match report.outcome {
        DispatchOutcome::Completed => {
            let _ = event_tx.send(StreamEvent {
                target,
                payload: StreamEventPayload::Closed,
            });
        }
        DispatchOutcome::Failed(_) => {}
        DispatchOutcome::Cancelled => {
            tracing::debug!(target = %target, "stream session cancelled");
        }
    }
}
