//! Mock completion backend for testing.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{CompletionBackend, LlmError};

/// A configurable reply for [`MockCompletion`].
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Answer with this text.
    Answer(String),
    /// Answer by echoing the question back.
    Echo,
    /// Fail with this error.
    Fail(LlmError),
}

impl MockReply {
    pub fn answer(text: impl Into<String>) -> Self {
        MockReply::Answer(text.into())
    }
}

/// A hand-rolled mock implementing [`CompletionBackend`].
///
/// Replies come from a sequence (one per call, repeating the last once
/// exhausted) or a single fixed reply. Every call's context is recorded.
pub struct MockCompletion {
    responses: Mutex<Vec<MockReply>>,
    fallback: MockReply,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    contexts: Mutex<Vec<String>>,
}

impl MockCompletion {
    /// A mock that always gives `reply`.
    pub fn new(reply: MockReply) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: reply,
            delay: None,
            call_count: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// A mock that gives `replies` in order, then repeats the last one.
    pub fn with_sequence(mut replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "sequence must have at least one reply");
        replies.reverse();
        let fallback = replies[0].clone();
        Self {
            responses: Mutex::new(replies),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Contexts received so far, in call order.
    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> MockReply {
        match self.responses.lock() {
            Ok(mut seq) => seq.pop().unwrap_or_else(|| self.fallback.clone()),
            Err(_) => self.fallback.clone(),
        }
    }
}

impl CompletionBackend for MockCompletion {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete<'a>(
        &'a self,
        context: &'a str,
        question: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.contexts.lock() {
            seen.push(context.to_string());
        }
        let reply = self.next_reply();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match reply {
                MockReply::Answer(text) => Ok(text),
                MockReply::Echo => Ok(question.to_string()),
                MockReply::Fail(err) => Err(err),
            }
        })
    }
}
