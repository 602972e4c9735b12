//! Scripted language model for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::synthesis::LanguageModel;

/// A [`LanguageModel`] that replays queued replies, then a fixed answer.
///
/// Records every prompt it receives so tests can assert on what the
/// synthesizer sent.
#[derive(Debug)]
pub struct MockLanguageModel {
    replies: Mutex<VecDeque<Result<String>>>,
    fallback: String,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl MockLanguageModel {
    /// A model that always answers `fallback`.
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue replies returned, in order, before the fallback.
    pub fn with_replies(self, replies: impl IntoIterator<Item = Result<String>>) -> Self {
        if let Ok(mut queue) = self.replies.lock() {
            queue.extend(replies);
        }
        self
    }

    /// Sleep this long before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of completed or failed calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self.replies.lock().ok().and_then(|mut queue| queue.pop_front());
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}
