use crate::error::StreamError;

/// Consumer callbacks for one stream.
///
/// Only `on_content` is mandatory. The other hooks default to doing nothing,
/// so messages without a registered hook are silently dropped.
pub trait StreamHandler {
    fn on_content(&mut self, content: &str);

    fn on_start(&mut self) {}

    /// In-band `error` message. The stream keeps reading afterwards.
    fn on_error(&mut self, _error: &str) {}

    fn on_end(&mut self) {}

    /// Terminal transport failure.
    ///
    /// Reported through `on_error` unless overridden.
    fn on_transport_error(&mut self, error: &StreamError) {
        self.on_error(&error.to_string());
    }
}

impl<H> StreamHandler for &mut H
where
    H: StreamHandler + ?Sized,
{
    fn on_content(&mut self, content: &str) {
        (**self).on_content(content);
    }

    fn on_start(&mut self) {
        (**self).on_start();
    }

    fn on_error(&mut self, error: &str) {
        (**self).on_error(error);
    }

    fn on_end(&mut self) {
        (**self).on_end();
    }

    fn on_transport_error(&mut self, error: &StreamError) {
        (**self).on_transport_error(error);
    }
}

type TextHook<'a> = Box<dyn FnMut(&str) + Send + 'a>;
type SignalHook<'a> = Box<dyn FnMut() + Send + 'a>;

/// Closure-backed [`StreamHandler`].
pub struct Handlers<'a> {
    content: TextHook<'a>,
    start: Option<SignalHook<'a>>,
    error: Option<TextHook<'a>>,
    end: Option<SignalHook<'a>>,
}

impl<'a> Handlers<'a> {
    pub fn new(on_content: impl FnMut(&str) + Send + 'a) -> Self {
        Self {
            content: Box::new(on_content),
            start: None,
            error: None,
            end: None,
        }
    }

    pub fn with_start(mut self, hook: impl FnMut() + Send + 'a) -> Self {
        self.start = Some(Box::new(hook));
        self
    }

    pub fn with_error(mut self, hook: impl FnMut(&str) + Send + 'a) -> Self {
        self.error = Some(Box::new(hook));
        self
    }

    pub fn with_end(mut self, hook: impl FnMut() + Send + 'a) -> Self {
        self.end = Some(Box::new(hook));
        self
    }
}

impl StreamHandler for Handlers<'_> {
    fn on_content(&mut self, content: &str) {
        (self.content)(content);
    }

    fn on_start(&mut self) {
        if let Some(hook) = self.start.as_mut() {
            hook();
        }
    }

    fn on_error(&mut self, error: &str) {
        if let Some(hook) = self.error.as_mut() {
            hook(error);
        }
    }

    fn on_end(&mut self) {
        if let Some(hook) = self.end.as_mut() {
            hook();
        }
    }
}
