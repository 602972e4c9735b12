//! Answer synthesis: context assembly, prompting, and the language model seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::document::{AnswerResponse, Passage, QueryResult};
use crate::error::{RagError, Result};
use crate::text::truncate_chars;

/// Separator placed between chunks in the context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Answer returned when retrieval found nothing. The model is not called.
pub const NO_RELEVANT_CONTENT: &str =
    "I couldn't find any relevant content in your documents to answer that question.";

/// A text completion model.
///
/// Implementations report failures as [`RagError::SynthesisError`] with
/// `transient` set for rate limits, timeouts and server errors.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier for logs and errors.
    fn name(&self) -> &str;

    /// Complete `prompt` and return the generated text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// The retrieved chunks that fit in the context budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    /// The rendered context block.
    pub text: String,
    /// The chunks included, most relevant first.
    pub passages: Vec<Passage>,
}

impl Context {
    /// Distinct source documents, in order of first appearance.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for passage in &self.passages {
            if !sources.contains(&passage.document_id) {
                sources.push(passage.document_id.clone());
            }
        }
        sources
    }
}

/// Assemble the context block from ranked results.
///
/// Chunks are taken in ranking order while they fit in `max_chars`, so the
/// kept set is always a prefix of the ranking. Each chunk is headed by
/// `[<document> p.<page>]`. If not even the first chunk fits, it is cut to
/// the budget, losing its header too when the header alone is too long.
pub fn build_context(result: &QueryResult, max_chars: usize) -> Context {
    let separator_chars = CONTEXT_SEPARATOR.chars().count();
    let mut context = Context::default();
    let mut used = 0;

    for scored in result.iter() {
        let record = &scored.record;
        let header = format!("[{} p.{}]\n", record.document_id, record.page);
        let header_chars = header.chars().count();
        let cost = header_chars
            + record.text.chars().count()
            + if context.passages.is_empty() { 0 } else { separator_chars };

        let (header, text) = if used + cost <= max_chars {
            (header.as_str(), record.text.as_str())
        } else if !context.passages.is_empty() {
            break;
        } else if header_chars < max_chars {
            (header.as_str(), truncate_chars(&record.text, max_chars - header_chars))
        } else {
            ("", truncate_chars(&record.text, max_chars))
        };
        if text.trim().is_empty() {
            break;
        }

        if !context.passages.is_empty() {
            context.text.push_str(CONTEXT_SEPARATOR);
        }
        context.text.push_str(header);
        context.text.push_str(text);
        used += cost.min(max_chars);
        context.passages.push(Passage {
            document_id: record.document_id.clone(),
            page: record.page,
            score: scored.score,
            text: text.to_string(),
        });
    }

    context
}

/// Bind the question and context into the instruction template.
pub fn render_prompt(question: &str, context: &str) -> String {
    format!(
        "You are helping the user explore their written articles.\n\
         Use the following context from their articles to answer the question thoughtfully.\n\
         \n\
         Guidelines:\n\
         - If you reference specific information, mention which article it comes from\n\
         - If you're not certain about something, say so honestly\n\
         - Provide detailed, helpful answers based on the context\n\
         - If the context doesn't contain relevant information, say so\n\
         \n\
         Context from articles:\n\
         {context}\n\
         \n\
         Question: {question}\n\
         \n\
         Answer:"
    )
}

/// Turns retrieved chunks into a grounded, source-attributed answer.
pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    max_context_chars: usize,
    max_attempts: u32,
    backoff: Duration,
}

impl Synthesizer {
    pub fn new(config: &RagConfig, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            max_context_chars: config.max_context_chars,
            max_attempts: config.synthesis_max_attempts.max(1),
            backoff: config.synthesis_backoff(),
        }
    }

    /// Answer `question` from `result`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SynthesisError`] once the model has failed
    /// permanently or the retry budget is spent. No partial answer is
    /// ever returned.
    pub async fn answer(&self, question: &str, result: &QueryResult) -> Result<AnswerResponse> {
        let context = build_context(result, self.max_context_chars);
        if context.passages.is_empty() {
            debug!(retrieved = result.len(), "no usable context, skipping language model");
            return Ok(AnswerResponse {
                answer: NO_RELEVANT_CONTENT.to_string(),
                sources: Vec::new(),
                chunks_used: 0,
                passages: Vec::new(),
            });
        }

        let prompt = render_prompt(question, &context.text);
        debug!(
            chunks = context.passages.len(),
            context_chars = context.text.chars().count(),
            "assembled context"
        );

        let answer = self.complete_with_retry(&prompt).await?;
        let sources = context.sources();
        info!(
            model = self.model.name(),
            chunks_used = context.passages.len(),
            sources = sources.len(),
            "answer synthesized"
        );

        Ok(AnswerResponse {
            answer,
            sources,
            chunks_used: context.passages.len(),
            passages: context.passages,
        })
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            let error = match self.model.complete(prompt).await {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => RagError::SynthesisError {
                    model: self.model.name().to_string(),
                    message: "model returned an empty completion".into(),
                    transient: true,
                },
                Err(e @ RagError::SynthesisError { .. }) => e,
                Err(e) => RagError::SynthesisError {
                    model: self.model.name().to_string(),
                    message: e.to_string(),
                    transient: e.is_retryable(),
                },
            };

            if !error.is_retryable() || attempt >= self.max_attempts {
                return Err(error);
            }

            let delay = self.backoff.saturating_mul(1 << (attempt - 1).min(16));
            warn!(
                model = self.model.name(),
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "language model call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Mutex;

    use super::*;
    use crate::document::{IndexRecord, ScoredRecord};

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self { replies: Mutex::new(replies.into()), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies.lock().await.pop_front().unwrap_or_else(|| Ok("fallback".into()))
        }
    }

    fn transient() -> RagError {
        RagError::SynthesisError { model: "scripted".into(), message: "429".into(), transient: true }
    }

    fn result(items: &[(&str, &str, f32)]) -> QueryResult {
        QueryResult::new(
            items
                .iter()
                .enumerate()
                .map(|(i, (doc, text, score))| ScoredRecord {
                    record: IndexRecord {
                        chunk_id: format!("{doc}_{i}"),
                        document_id: doc.to_string(),
                        page: 1,
                        sequence: i as u32,
                        text: text.to_string(),
                        vector: vec![],
                        embedding_model_version: "test".into(),
                    },
                    score: *score,
                })
                .collect(),
        )
    }

    fn config() -> RagConfig {
        RagConfig::builder().synthesis_retry(3, Duration::from_millis(10)).build().unwrap()
    }

    #[test]
    fn context_is_a_prefix_within_budget() {
        let ranked =
            result(&[("a.pdf", "first chunk", 0.9), ("b.pdf", "second", 0.5), ("a.pdf", "third", 0.1)]);
        let full = build_context(&ranked, 10_000);
        assert_eq!(full.passages.len(), 3);
        assert_eq!(full.sources(), vec!["a.pdf", "b.pdf"]);
        assert!(full.text.starts_with("[a.pdf p.1]\nfirst chunk\n\n---\n\n[b.pdf p.1]\nsecond"));

        let budget = "[a.pdf p.1]\nfirst chunk".chars().count() + 3;
        let tight = build_context(&ranked, budget);
        assert_eq!(tight.passages.len(), 1);
        assert!(tight.text.chars().count() <= budget);
    }

    #[test]
    fn oversized_top_chunk_is_cut() {
        let ranked = result(&[("a.pdf", "0123456789abcdef", 0.9)]);
        let context = build_context(&ranked, 20);
        assert_eq!(context.passages.len(), 1);
        assert_eq!(context.text.chars().count(), 20);
        assert_eq!(context.passages[0].text, "01234567");
    }

    #[test]
    fn tiny_budget_keeps_text_over_header() {
        let ranked = result(&[("a-rather-long-document-name.pdf", "zebras graze", 0.9)]);
        let context = build_context(&ranked, 6);
        assert_eq!(context.text, "zebras");
        assert_eq!(context.passages.len(), 1);
        assert_eq!(context.sources(), vec!["a-rather-long-document-name.pdf"]);

        let blank = result(&[("a.pdf", "   padded", 0.9)]);
        assert!(build_context(&blank, 2).passages.is_empty());
    }

    #[tokio::test]
    async fn model_never_sees_an_empty_context() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let tight = RagConfig::builder().max_context_chars(2).build().unwrap();
        let synthesizer = Synthesizer::new(&tight, model.clone());

        let response = synthesizer.answer("q", &result(&[("a.pdf", "   padded", 1.0)])).await.unwrap();
        assert_eq!(response.answer, NO_RELEVANT_CONTENT);
        assert_eq!(response.chunks_used, 0);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);

        let tight = RagConfig::builder().max_context_chars(10).build().unwrap();
        let synthesizer = Synthesizer::new(&tight, model.clone());
        let response = synthesizer.answer("q", &result(&[("notes.pdf", "cats nap all day", 1.0)])).await.unwrap();
        assert_eq!(response.answer, "fallback");
        assert_eq!(response.chunks_used, 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prompt_binds_question_and_context() {
        let prompt = render_prompt("What about cats?", "[pets p.1]\ncats");
        assert!(prompt.starts_with("You are helping the user explore their written articles."));
        assert!(prompt.contains("Context from articles:\n[pets p.1]\ncats\n\nQuestion: What about cats?"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[tokio::test]
    async fn empty_result_skips_model() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let synthesizer = Synthesizer::new(&config(), model.clone());

        let response = synthesizer.answer("anything?", &QueryResult::default()).await.unwrap();
        assert_eq!(response.answer, NO_RELEVANT_CONTENT);
        assert_eq!(response.chunks_used, 0);
        assert!(response.sources.is_empty());
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let replies = vec![Err(transient()), Ok("  ".into()), Ok("Cats nap.".into())];
        let model = Arc::new(ScriptedModel::new(replies));
        let synthesizer = Synthesizer::new(&config(), model.clone());

        let response = synthesizer.answer("cats?", &result(&[("pets.txt", "cats", 1.0)])).await.unwrap();
        assert_eq!(response.answer, "Cats nap.");
        assert_eq!(response.sources, vec!["pets.txt"]);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget_or_permanent_error() {
        let model =
            Arc::new(ScriptedModel::new(vec![Err(transient()), Err(transient()), Err(transient())]));
        let synthesizer = Synthesizer::new(&config(), model.clone());
        let err = synthesizer.answer("q", &result(&[("a", "b", 1.0)])).await.unwrap_err();
        assert!(matches!(err, RagError::SynthesisError { .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);

        let permanent =
            RagError::SynthesisError { model: "scripted".into(), message: "400".into(), transient: false };
        let model = Arc::new(ScriptedModel::new(vec![Err(permanent)]));
        let synthesizer = Synthesizer::new(&config(), model.clone());
        assert!(synthesizer.answer("q", &result(&[("a", "b", 1.0)])).await.is_err());
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }
}
