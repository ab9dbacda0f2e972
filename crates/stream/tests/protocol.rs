//! End-to-end behavior of the decoder and dispatcher over chunked payloads.

use std::io;

use bytes::Bytes;
use futures::{StreamExt, stream};
use parley_stream::{
    DispatchOutcome, Handlers, StreamConsumer, StreamHandler, StreamMessage, decode_messages,
};
use proptest::prelude::*;

#[derive(Debug, Default)]
struct Recorder {
    messages: Vec<StreamMessage>,
    transport_errors: usize,
}

impl StreamHandler for Recorder {
    fn on_content(&mut self, content: &str) {
        self.messages.push(StreamMessage::content(content));
    }

    fn on_start(&mut self) {
        self.messages.push(StreamMessage::start(""));
    }

    fn on_error(&mut self, error: &str) {
        self.messages.push(StreamMessage::error(error));
    }

    fn on_end(&mut self) {
        self.messages.push(StreamMessage::end(""));
    }

    fn on_transport_error(&mut self, _error: &parley_stream::StreamError) {
        self.transport_errors += 1;
    }
}

/// Timestamps are informational and never reach handlers.
fn without_timestamps(messages: &[StreamMessage]) -> Vec<StreamMessage> {
    messages
        .iter()
        .map(|message| match message {
            StreamMessage::Start { .. } => StreamMessage::start(""),
            StreamMessage::End { .. } => StreamMessage::end(""),
            other => other.clone(),
        })
        .collect()
}

fn split_at_offsets(payload: &[u8], mut offsets: Vec<usize>) -> Vec<Vec<u8>> {
    offsets.retain(|offset| *offset > 0 && *offset < payload.len());
    offsets.sort_unstable();
    offsets.dedup();

    let mut chunks = Vec::with_capacity(offsets.len() + 1);
    let mut start = 0;
    for offset in offsets {
        chunks.push(payload[start..offset].to_vec());
        start = offset;
    }
    chunks.push(payload[start..].to_vec());
    chunks
}

fn feed_chunks(chunks: &[Vec<u8>]) -> (Recorder, usize) {
    let mut recorder = Recorder::default();
    let mut consumer = StreamConsumer::new(&mut recorder);
    for chunk in chunks {
        consumer.feed(chunk);
    }
    let report = consumer.finish();
    (recorder, report.malformed)
}

fn message_strategy() -> impl Strategy<Value = StreamMessage> {
    prop_oneof![
        "[0-9T:-]{0,24}".prop_map(StreamMessage::start),
        any::<String>().prop_map(StreamMessage::content),
        any::<String>().prop_map(StreamMessage::error),
        "[0-9T:-]{0,24}".prop_map(StreamMessage::end),
    ]
}

proptest! {
    #[test]
    fn dispatch_is_independent_of_chunk_boundaries(
        messages in prop::collection::vec(message_strategy(), 0..24),
        offsets in prop::collection::vec(0usize..4096, 0..32),
    ) {
        let payload = messages.iter().map(StreamMessage::to_line).collect::<String>();
        let payload = payload.as_bytes();

        let (whole, _) = feed_chunks(&[payload.to_vec()]);
        let (split, malformed) = feed_chunks(&split_at_offsets(payload, offsets));
        let bytewise = payload.iter().map(|byte| vec![*byte]).collect::<Vec<_>>();
        let (single_bytes, _) = feed_chunks(&bytewise);

        let expected = without_timestamps(&messages);
        prop_assert_eq!(&whole.messages, &expected);
        prop_assert_eq!(&split.messages, &expected);
        prop_assert_eq!(&single_bytes.messages, &expected);
        prop_assert_eq!(malformed, 0);
    }

    #[test]
    fn every_complete_line_is_parsed_exactly_once(
        records in prop::collection::vec(
            prop_oneof![
                message_strategy().prop_map(Some),
                Just(None),
            ],
            0..24,
        ),
        offsets in prop::collection::vec(0usize..4096, 0..16),
    ) {
        let payload = records
            .iter()
            .map(|record| match record {
                Some(message) => message.to_line(),
                None => "{\"type\":\"content\",\n".to_string(),
            })
            .collect::<String>();

        let (recorder, malformed) = feed_chunks(&split_at_offsets(payload.as_bytes(), offsets));

        let valid = records.iter().flatten().cloned().collect::<Vec<_>>();
        prop_assert_eq!(recorder.messages, without_timestamps(&valid));
        prop_assert_eq!(malformed, records.iter().filter(|record| record.is_none()).count());
    }
}

#[tokio::test]
async fn start_content_end_across_two_chunks() {
    let body = stream::iter(vec![
        Ok::<_, io::Error>(Bytes::from_static(
            b"{\"type\":\"start\",\"timestamp\":\"t0\"}\n{\"type\":\"content\",\"content\":\"Hi\"}\n",
        )),
        Ok(Bytes::from_static(b"{\"type\":\"end\",\"timestamp\":\"t1\"}\n")),
    ]);

    let mut calls = Vec::new();
    let mut errors = 0;
    let handlers = Handlers::new(|content| calls.push(format!("content({content})")))
        .with_start(|| {})
        .with_error(|_| errors += 1);
    let report = StreamConsumer::new(handlers).run(body).await;

    assert!(report.outcome.is_completed());
    assert_eq!(report.dispatched.start, 1);
    assert_eq!(report.dispatched.end, 1);
    assert_eq!(calls, vec!["content(Hi)".to_string()]);
    assert_eq!(errors, 0);
}

#[tokio::test]
async fn broken_line_between_valid_lines_is_skipped() {
    let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(
        b"{\"type\":\"content\",\"content\":\"A\"}\n{bad json\n{\"type\":\"content\",\"content\":\"B\"}\n",
    ))]);

    let mut recorder = Recorder::default();
    let report = StreamConsumer::new(&mut recorder).run(body).await;

    assert!(report.outcome.is_completed());
    assert_eq!(report.malformed, 1);
    assert_eq!(
        recorder.messages,
        vec![StreamMessage::content("A"), StreamMessage::content("B")]
    );
}

#[tokio::test]
async fn ordered_fragments_regardless_of_grouping() {
    let payload = ["Hel", "lo, ", "world"]
        .into_iter()
        .map(|fragment| StreamMessage::content(fragment).to_line())
        .collect::<String>();
    let (first, second) = payload.split_at(payload.len() / 2);
    let body = stream::iter(vec![
        Ok::<_, io::Error>(first.as_bytes().to_vec()),
        Ok(second.as_bytes().to_vec()),
    ]);

    let mut reply = String::new();
    let mut fragments = 0;
    let handlers = Handlers::new(|content| {
        fragments += 1;
        reply.push_str(content);
    });
    let report = StreamConsumer::new(handlers).run(body).await;

    assert!(report.outcome.is_completed());
    assert_eq!(fragments, 3);
    assert_eq!(reply, "Hello, world");
}

#[tokio::test]
async fn transport_rejecting_before_any_message_reports_one_error() {
    let body = stream::iter(vec![Err::<Bytes, _>(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "connection lost",
    ))]);

    let mut errors = Vec::new();
    let mut ends = 0;
    let handlers = Handlers::new(|_| {})
        .with_error(|error| errors.push(error.to_string()))
        .with_end(|| ends += 1);
    let report = StreamConsumer::new(handlers).run(body).await;

    assert!(matches!(report.outcome, DispatchOutcome::Failed(_)));
    assert_eq!(errors.len(), 1);
    assert!(!errors[0].is_empty());
    assert_eq!(ends, 0);
}

#[tokio::test]
async fn trailing_partial_line_is_not_emitted() {
    let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(
        b"{\"type\":\"content\",\"content\":\"A\"}\n{\"type\":\"content\",\"content\":\"B\"}",
    ))]);

    let messages = decode_messages(body).collect::<Vec<_>>().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].as_ref().ok(), Some(&StreamMessage::content("A")));
}
