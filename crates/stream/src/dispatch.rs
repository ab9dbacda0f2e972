//! Read loop that turns a chunked byte stream into handler calls.
//!
//! One chunk is decoded and fully dispatched before the next one is
//! requested, so handlers observe messages in arrival order no matter how the
//! transport cut the payload.

use std::future::Future;
use std::ops::ControlFlow;

use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::oneshot;

use crate::decoder::ChunkDecoder;
use crate::error::{StreamError, StreamResult};
use crate::handler::StreamHandler;
use crate::message::{MessageKind, StreamMessage};
use crate::record::decode_record;

/// Lifecycle of one stream instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Reading,
    Closing,
    Failed,
    Cancelled,
    Done,
}

/// Input to [`StreamPhase::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    Open,
    Exhausted,
    TransportFailed,
    Cancel,
    Release,
}

/// Rejection reason for illegal phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRejection {
    AlreadyOpen { phase: StreamPhase },
    NotReading { phase: StreamPhase },
    NotClosing { phase: StreamPhase },
    Terminal { phase: StreamPhase },
}

pub type PhaseTransitionResult = Result<StreamPhase, PhaseRejection>;

impl StreamPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Done)
    }

    /// Handlers may only fire while reading.
    pub fn accepts_messages(self) -> bool {
        matches!(self, Self::Reading)
    }

    /// Applies one transition deterministically.
    ///
    /// Terminal phases reject everything; `Cancel` is accepted from `Idle` so
    /// a stream can be abandoned before its first read.
    pub fn apply(self, transition: PhaseTransition) -> PhaseTransitionResult {
        if self.is_terminal() {
            return Err(PhaseRejection::Terminal { phase: self });
        }

        match transition {
            PhaseTransition::Open => match self {
                Self::Idle => Ok(Self::Reading),
                phase => Err(PhaseRejection::AlreadyOpen { phase }),
            },
            PhaseTransition::Exhausted => self.from_reading(Self::Closing),
            PhaseTransition::TransportFailed => self.from_reading(Self::Failed),
            PhaseTransition::Cancel => match self {
                Self::Idle | Self::Reading => Ok(Self::Cancelled),
                phase => Err(PhaseRejection::NotReading { phase }),
            },
            PhaseTransition::Release => match self {
                Self::Closing => Ok(Self::Done),
                phase => Err(PhaseRejection::NotClosing { phase }),
            },
        }
    }

    fn from_reading(self, next: Self) -> PhaseTransitionResult {
        match self {
            Self::Reading => Ok(next),
            phase => Err(PhaseRejection::NotReading { phase }),
        }
    }
}

/// How a stream ended.
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed,
    Failed(StreamError),
    Cancelled,
}

impl DispatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn error(&self) -> Option<&StreamError> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Completed | Self::Cancelled => None,
        }
    }
}

/// Messages handed to the handler, per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchCounts {
    pub start: usize,
    pub content: usize,
    pub error: usize,
    pub end: usize,
}

impl DispatchCounts {
    fn record(&mut self, kind: MessageKind) {
        let slot = match kind {
            MessageKind::Start => &mut self.start,
            MessageKind::Content => &mut self.content,
            MessageKind::Error => &mut self.error,
            MessageKind::End => &mut self.end,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.start + self.content + self.error + self.end
    }
}

/// Summary returned once a stream reaches a terminal phase.
#[derive(Debug)]
pub struct DispatchReport {
    pub outcome: DispatchOutcome,
    pub chunks: usize,
    pub dispatched: DispatchCounts,
    pub malformed: usize,
    /// Bytes of an unterminated trailing line dropped at end of stream.
    pub discarded_bytes: usize,
}

/// Decoder, handler set and phase for exactly one stream.
pub struct StreamConsumer<H> {
    handler: H,
    decoder: ChunkDecoder,
    phase: StreamPhase,
    chunks: usize,
    dispatched: DispatchCounts,
    malformed: usize,
}

impl<H> StreamConsumer<H>
where
    H: StreamHandler,
{
    pub fn new(handler: H) -> Self {
        Self::with_decoder(handler, ChunkDecoder::new())
    }

    pub fn with_delimiter(handler: H, delimiter: char) -> Self {
        Self::with_decoder(handler, ChunkDecoder::with_delimiter(delimiter))
    }

    fn with_decoder(handler: H, decoder: ChunkDecoder) -> Self {
        Self {
            handler,
            decoder,
            phase: StreamPhase::Idle,
            chunks: 0,
            dispatched: DispatchCounts::default(),
            malformed: 0,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Decodes one chunk and dispatches every message it completed.
    ///
    /// Opens the stream on first use. Does nothing once the stream is terminal.
    pub fn feed(&mut self, chunk: &[u8]) {
        let flow = self.feed_until(chunk, || false);
        debug_assert!(flow.is_continue());
    }

    /// Ends the stream naturally and returns its report.
    pub fn finish(mut self) -> DispatchReport {
        if self.phase == StreamPhase::Idle {
            self.advance(PhaseTransition::Open);
        }
        self.advance(PhaseTransition::Exhausted);
        self.close(DispatchOutcome::Completed)
    }

    /// Drives `stream` to completion.
    pub async fn run<S, B, E>(self, stream: S) -> DispatchReport
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.drive(stream, std::future::pending::<()>()).await
    }

    /// Drives `stream` until it ends, fails, or `cancel_rx` fires.
    ///
    /// A dropped sender counts as cancellation.
    pub async fn run_until_cancelled<S, B, E>(
        self,
        stream: S,
        cancel_rx: oneshot::Receiver<()>,
    ) -> DispatchReport
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.drive(stream, cancel_rx.map(|_| ())).await
    }

    async fn drive<S, B, E, C>(mut self, stream: S, cancel: C) -> DispatchReport
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::error::Error + Send + Sync + 'static,
        C: Future<Output = ()>,
    {
        let mut stream = Box::pin(stream);
        let mut cancel = std::pin::pin!(cancel);
        self.advance(PhaseTransition::Open);

        let outcome = loop {
            tokio::select! {
                biased;
                () = &mut cancel => {
                    tracing::debug!(chunks = self.chunks, "stream cancelled by caller");
                    break DispatchOutcome::Cancelled;
                }
                next_chunk = stream.next() => match next_chunk {
                    Some(Ok(chunk)) => {
                        let flow = self.feed_until(chunk.as_ref(), || {
                            cancel.as_mut().now_or_never().is_some()
                        });
                        if flow.is_break() {
                            tracing::debug!(chunks = self.chunks, "stream cancelled mid-chunk");
                            break DispatchOutcome::Cancelled;
                        }
                    }
                    Some(Err(source)) => {
                        let error = StreamError::transport("read-chunk", source);
                        tracing::warn!(
                            chunks = self.chunks,
                            error = %error,
                            "stream transport failed"
                        );
                        break DispatchOutcome::Failed(error);
                    }
                    None => break DispatchOutcome::Completed,
                },
            }
        };

        // Release the reader before any terminal callback runs.
        drop(stream);

        match outcome {
            DispatchOutcome::Completed => self.advance(PhaseTransition::Exhausted),
            DispatchOutcome::Failed(ref error) => {
                self.advance(PhaseTransition::TransportFailed);
                self.handler.on_transport_error(error);
            }
            DispatchOutcome::Cancelled => self.advance(PhaseTransition::Cancel),
        }
        self.close(outcome)
    }

    fn feed_until(
        &mut self,
        chunk: &[u8],
        mut cancelled: impl FnMut() -> bool,
    ) -> ControlFlow<()> {
        if self.phase == StreamPhase::Idle {
            self.advance(PhaseTransition::Open);
        }
        if !self.phase.accepts_messages() {
            return ControlFlow::Continue(());
        }

        self.chunks += 1;
        for line in self.decoder.push_bytes(chunk) {
            let Some(message) = decode_record(&line) else {
                self.malformed += 1;
                continue;
            };
            if cancelled() {
                return ControlFlow::Break(());
            }
            self.dispatch(message);
        }
        ControlFlow::Continue(())
    }

    fn dispatch(&mut self, message: StreamMessage) {
        self.dispatched.record(message.kind());
        match message {
            StreamMessage::Start { .. } => self.handler.on_start(),
            StreamMessage::Content { content } => self.handler.on_content(&content),
            StreamMessage::Error { error } => self.handler.on_error(&error),
            StreamMessage::End { .. } => self.handler.on_end(),
        }
    }

    fn close(mut self, outcome: DispatchOutcome) -> DispatchReport {
        if self.phase == StreamPhase::Closing {
            self.advance(PhaseTransition::Release);
        }

        let discarded_bytes = self.decoder.finish();
        if discarded_bytes > 0 {
            tracing::debug!(
                discarded_bytes,
                "discarding unterminated trailing line at end of stream"
            );
        }

        tracing::debug!(
            phase = ?self.phase,
            chunks = self.chunks,
            dispatched = self.dispatched.total(),
            malformed = self.malformed,
            "stream closed"
        );

        DispatchReport {
            outcome,
            chunks: self.chunks,
            dispatched: self.dispatched,
            malformed: self.malformed,
            discarded_bytes,
        }
    }

    fn advance(&mut self, transition: PhaseTransition) {
        match self.phase.apply(transition) {
            Ok(next) => self.phase = next,
            Err(rejection) => {
                tracing::error!(?transition, ?rejection, "rejected stream phase transition");
            }
        }
    }
}

/// Dispatches an in-memory payload as a single chunk.
pub fn dispatch_text<H>(text: &str, handler: H) -> DispatchReport
where
    H: StreamHandler,
{
    let mut consumer = StreamConsumer::new(handler);
    consumer.feed(text.as_bytes());
    consumer.finish()
}

/// Pull-based form of the read loop.
///
/// Yields validated messages in arrival order. A transport failure is yielded
/// as the last item.
pub fn decode_messages<S, B, E>(
    stream: S,
) -> impl Stream<Item = StreamResult<StreamMessage>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    async_stream::stream! {
        let mut decoder = ChunkDecoder::new();
        let mut chunks = std::pin::pin!(stream);

        while let Some(next_chunk) = chunks.next().await {
            match next_chunk {
                Ok(chunk) => {
                    for line in decoder.push_bytes(chunk.as_ref()) {
                        if let Some(message) = decode_record(&line) {
                            yield Ok(message);
                        }
                    }
                }
                Err(source) => {
                    yield Err(StreamError::transport("read-chunk", source));
                    return;
                }
            }
        }

        let discarded_bytes = decoder.finish();
        if discarded_bytes > 0 {
            tracing::debug!(
                discarded_bytes,
                "discarding unterminated trailing line at end of stream"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use futures::stream;

    use super::*;
    use crate::handler::Handlers;

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl StreamHandler for Recorder {
        fn on_content(&mut self, content: &str) {
            self.calls.push(format!("content:{content}"));
        }

        fn on_start(&mut self) {
            self.calls.push("start".to_string());
        }

        fn on_error(&mut self, error: &str) {
            self.calls.push(format!("error:{error}"));
        }

        fn on_end(&mut self) {
            self.calls.push("end".to_string());
        }
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, io::Error>> + use<> {
        let owned = parts
            .iter()
            .map(|part| Ok(part.as_bytes().to_vec()))
            .collect::<Vec<_>>();
        stream::iter(owned)
    }

    #[test]
    fn phase_machine_follows_read_lifecycle() {
        let phase = StreamPhase::Idle;
        let phase = phase.apply(PhaseTransition::Open).ok();
        assert_eq!(phase, Some(StreamPhase::Reading));

        let closing = StreamPhase::Reading.apply(PhaseTransition::Exhausted);
        assert_eq!(closing, Ok(StreamPhase::Closing));
        assert_eq!(
            StreamPhase::Closing.apply(PhaseTransition::Release),
            Ok(StreamPhase::Done)
        );
        assert_eq!(
            StreamPhase::Reading.apply(PhaseTransition::TransportFailed),
            Ok(StreamPhase::Failed)
        );
        assert_eq!(
            StreamPhase::Idle.apply(PhaseTransition::Cancel),
            Ok(StreamPhase::Cancelled)
        );
    }

    #[test]
    fn terminal_phases_reject_transitions() {
        for phase in [StreamPhase::Done, StreamPhase::Failed, StreamPhase::Cancelled] {
            assert_eq!(
                phase.apply(PhaseTransition::Open),
                Err(PhaseRejection::Terminal { phase })
            );
        }
        assert_eq!(
            StreamPhase::Reading.apply(PhaseTransition::Open),
            Err(PhaseRejection::AlreadyOpen {
                phase: StreamPhase::Reading
            })
        );
        assert_eq!(
            StreamPhase::Reading.apply(PhaseTransition::Release),
            Err(PhaseRejection::NotClosing {
                phase: StreamPhase::Reading
            })
        );
    }

    #[tokio::test]
    async fn dispatches_in_arrival_order_across_chunks() {
        let mut recorder = Recorder::default();
        let report = StreamConsumer::new(&mut recorder)
            .run(chunks(&[
                "{\"type\":\"start\",\"timestamp\":\"t0\"}\n{\"type\":\"content\",\"con",
                "tent\":\"Hel\"}\n{\"type\":\"content\",\"content\":\"lo\"}\n",
                "{\"type\":\"end\",\"timestamp\":\"t1\"}\n",
            ]))
            .await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.chunks, 3);
        assert_eq!(report.dispatched.total(), 4);
        assert_eq!(
            recorder.calls,
            vec!["start", "content:Hel", "content:lo", "end"]
        );
    }

    #[tokio::test]
    async fn in_band_error_does_not_stop_reading() {
        let mut recorder = Recorder::default();
        let report = StreamConsumer::new(&mut recorder)
            .run(chunks(&[
                "{\"type\":\"error\",\"error\":\"rate limited\"}\n",
                "{\"type\":\"content\",\"content\":\"still here\"}\n",
            ]))
            .await;

        assert!(report.outcome.is_completed());
        assert_eq!(report.dispatched.error, 1);
        assert_eq!(
            recorder.calls,
            vec!["error:rate limited", "content:still here"]
        );
    }

    #[tokio::test]
    async fn transport_failure_reports_once_and_stops() {
        let mut recorder = Recorder::default();
        let parts: Vec<Result<Vec<u8>, io::Error>> = vec![
            Ok(b"{\"type\":\"content\",\"content\":\"A\"}\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset")),
            Ok(b"{\"type\":\"content\",\"content\":\"never\"}\n".to_vec()),
        ];

        let report = StreamConsumer::new(&mut recorder)
            .run(stream::iter(parts))
            .await;

        let error = report.outcome.error().map(StreamError::stage);
        assert_eq!(error, Some("read-chunk"));
        assert_eq!(recorder.calls.len(), 2);
        assert_eq!(recorder.calls[0], "content:A");
        assert!(recorder.calls[1].starts_with("error:"));
        assert!(recorder.calls[1].contains("peer reset"));
    }

    #[tokio::test]
    async fn cancellation_before_first_chunk_fires_nothing() {
        let mut recorder = Recorder::default();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        assert!(cancel_tx.send(()).is_ok());

        let report = StreamConsumer::new(&mut recorder)
            .run_until_cancelled(
                chunks(&["{\"type\":\"content\",\"content\":\"A\"}\n"]),
                cancel_rx,
            )
            .await;

        assert!(matches!(report.outcome, DispatchOutcome::Cancelled));
        assert_eq!(report.chunks, 0);
        assert!(recorder.calls.is_empty());
    }

    #[tokio::test]
    async fn cancellation_while_waiting_stops_the_loop() {
        let mut contents = Vec::new();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let first = stream::iter(vec![Ok::<_, io::Error>(
            b"{\"type\":\"content\",\"content\":\"A\"}\n".to_vec(),
        )]);
        let stalled = first.chain(stream::pending());

        let handler = Handlers::new(|content| contents.push(content.to_string()));
        let consumer = StreamConsumer::new(handler);
        let run = consumer.run_until_cancelled(stalled, cancel_rx);
        let cancel = async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let _ = cancel_tx.send(());
        };

        let (report, ()) = tokio::join!(run, cancel);
        assert!(matches!(report.outcome, DispatchOutcome::Cancelled));
        assert_eq!(report.chunks, 1);
        assert_eq!(contents, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn cancellation_inside_a_chunk_skips_remaining_messages() {
        struct CancelOnFirst {
            cancel_tx: Option<oneshot::Sender<()>>,
            contents: Vec<String>,
        }

        impl StreamHandler for CancelOnFirst {
            fn on_content(&mut self, content: &str) {
                self.contents.push(content.to_string());
                if let Some(cancel_tx) = self.cancel_tx.take() {
                    let _ = cancel_tx.send(());
                }
            }
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let mut handler = CancelOnFirst {
            cancel_tx: Some(cancel_tx),
            contents: Vec::new(),
        };

        let report = StreamConsumer::new(&mut handler)
            .run_until_cancelled(
                chunks(&[concat!(
                    "{\"type\":\"content\",\"content\":\"A\"}\n",
                    "{\"type\":\"content\",\"content\":\"B\"}\n",
                )]),
                cancel_rx,
            )
            .await;

        assert!(matches!(report.outcome, DispatchOutcome::Cancelled));
        assert_eq!(report.chunks, 1);
        assert_eq!(report.dispatched.content, 1);
        assert_eq!(handler.contents, vec!["A".to_string()]);
    }

    #[test]
    fn dispatch_text_discards_unterminated_tail() {
        let mut recorder = Recorder::default();
        let report = dispatch_text(
            "{\"type\":\"content\",\"content\":\"A\"}\n{\"type\":\"content\",\"content\":\"B\"}",
            &mut recorder,
        );

        assert!(report.outcome.is_completed());
        assert_eq!(recorder.calls, vec!["content:A"]);
        assert!(report.discarded_bytes > 0);
    }

    #[test]
    fn finishing_idle_consumer_completes_empty() {
        let recorder = Recorder::default();
        let report = StreamConsumer::new(recorder).finish();
        assert!(report.outcome.is_completed());
        assert_eq!(report.chunks, 0);
        assert_eq!(report.dispatched.total(), 0);
    }

    #[tokio::test]
    async fn pull_stream_yields_messages_then_transport_error() {
        let parts: Vec<Result<Vec<u8>, io::Error>> = vec![
            Ok(b"{\"type\":\"start\",\"timestamp\":\"t0\"}\n{oops\n".to_vec()),
            Ok(b"{\"type\":\"content\",\"content\":\"x\"}\n".to_vec()),
            Err(io::Error::other("gone")),
        ];

        let items = decode_messages(stream::iter(parts)).collect::<Vec<_>>().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().ok(), Some(&StreamMessage::start("t0")));
        assert_eq!(items[1].as_ref().ok(), Some(&StreamMessage::content("x")));
        assert!(matches!(items[2], Err(StreamError::Transport { .. })));
    }
}
