use std::io::Write;

use parley_stream::{StreamError, StreamHandler};

/// Caller-side accumulator for one streamed reply.
///
/// Concatenates content fragments in arrival order and optionally echoes
/// them to a writer as they come in.
#[derive(Default)]
pub struct ReplyBuffer {
    text: String,
    started: bool,
    ended: bool,
    errors: Vec<String>,
    transport_failed: bool,
    echo: Option<Box<dyn Write + Send>>,
}

impl ReplyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echoing(writer: impl Write + Send + 'static) -> Self {
        Self {
            echo: Some(Box::new(writer)),
            ..Self::default()
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// An `end` message arrived.
    pub fn is_complete(&self) -> bool {
        self.ended
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn transport_failed(&self) -> bool {
        self.transport_failed
    }

    fn echo(&mut self, fragment: &str) {
        let Some(writer) = self.echo.as_mut() else {
            return;
        };
        if let Err(error) = writer
            .write_all(fragment.as_bytes())
            .and_then(|()| writer.flush())
        {
            tracing::warn!(error = %error, "reply echo writer failed; echo disabled");
            self.echo = None;
        }
    }
}

impl StreamHandler for ReplyBuffer {
    fn on_content(&mut self, content: &str) {
        self.text.push_str(content);
        self.echo(content);
    }

    fn on_start(&mut self) {
        self.started = true;
    }

    fn on_error(&mut self, error: &str) {
        tracing::warn!(error = %error, "service reported an error mid-reply");
        self.errors.push(error.to_string());
    }

    fn on_end(&mut self) {
        self.ended = true;
    }

    fn on_transport_error(&mut self, error: &StreamError) {
        self.transport_failed = true;
        self.errors.push(error.to_string());
    }
}
