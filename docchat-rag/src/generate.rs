use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use docchat_core::{
    DocchatError, Llm, LlmRequest, Message, Retrying, Runnable, SearchResult, SourceRef,
    StreamEvent, Value,
};
use docchat_prompt::{qa_prompt, ChatPromptTemplate};

use crate::config::DEFAULT_DONT_KNOW_ANSWER;
use crate::{RagConfig, RagError};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// A finished answer with the passages it was grounded on.
#[derive(Clone, Debug, PartialEq)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnswerEvent {
    /// Retrieval finished; generation starts next.
    Retrieved { sources: Vec<SourceRef> },
    Token(String),
    Answer(RagAnswer),
}

pub fn source_refs(retrieved: &[SearchResult]) -> Vec<SourceRef> {
    retrieved
        .iter()
        .map(|result| {
            let document = &result.document;
            SourceRef {
                source: document.source().unwrap_or(&document.id).to_string(),
                page: document.page(),
                chunk_index: document.metadata.get("chunk_index").and_then(Value::as_u64),
                score: result.score,
            }
        })
        .collect()
}

/// Incrementally strips reasoning from model output.
///
/// `<think>…</think>` blocks are dropped even when the tags are split across
/// chunks. With an answer prefix configured, text up to and including the
/// prefix is held back; if the prefix never appears, the held text is
/// released by [`AnswerFilter::finish`].
#[derive(Clone, Debug)]
pub struct AnswerFilter {
    answer_prefix: Option<String>,
    in_think: bool,
    pending: String,
    before_prefix: String,
    reached: bool,
    trim_next: bool,
}

impl AnswerFilter {
    pub fn new(answer_prefix: Option<String>) -> Self {
        let answer_prefix = answer_prefix.filter(|prefix| !prefix.is_empty());
        Self {
            reached: answer_prefix.is_none(),
            answer_prefix,
            in_think: false,
            pending: String::new(),
            before_prefix: String::new(),
            trim_next: false,
        }
    }

    /// Feeds one chunk and returns the part that may be shown now.
    pub fn push(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let mut visible = String::new();
        loop {
            if self.in_think {
                match self.pending.find(THINK_CLOSE) {
                    Some(idx) => {
                        self.pending.drain(..idx + THINK_CLOSE.len());
                        self.in_think = false;
                    }
                    None => {
                        let cut = self.pending.len() - partial_suffix(&self.pending, THINK_CLOSE);
                        self.pending.drain(..cut);
                        break;
                    }
                }
            } else {
                match self.pending.find(THINK_OPEN) {
                    Some(idx) => {
                        let text: String = self.pending.drain(..idx).collect();
                        self.pending.drain(..THINK_OPEN.len());
                        self.in_think = true;
                        visible.push_str(&self.release(&text));
                    }
                    None => {
                        let cut = self.pending.len() - partial_suffix(&self.pending, THINK_OPEN);
                        let text: String = self.pending.drain(..cut).collect();
                        visible.push_str(&self.release(&text));
                        break;
                    }
                }
            }
        }
        visible
    }

    /// Flushes whatever is still buffered at the end of the output.
    pub fn finish(&mut self) -> String {
        let mut visible = String::new();
        if !self.in_think {
            let text = std::mem::take(&mut self.pending);
            visible.push_str(&self.release(&text));
        }
        self.pending.clear();
        self.in_think = false;

        if !self.reached {
            self.reached = true;
            visible.push_str(std::mem::take(&mut self.before_prefix).trim());
        }
        visible
    }

    fn release(&mut self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        if self.reached {
            return self.trim_leading(text);
        }

        self.before_prefix.push_str(text);
        let Some(prefix) = self.answer_prefix.clone() else {
            return String::new();
        };
        match self.before_prefix.find(&prefix) {
            Some(idx) => {
                let rest = self.before_prefix[idx + prefix.len()..].to_string();
                self.before_prefix.clear();
                self.reached = true;
                self.trim_next = true;
                self.trim_leading(&rest)
            }
            None => String::new(),
        }
    }

    fn trim_leading(&mut self, text: &str) -> String {
        if !self.trim_next {
            return text.to_string();
        }
        let trimmed = text.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
        if !trimmed.is_empty() {
            self.trim_next = false;
        }
        trimmed.to_string()
    }
}

/// Length of the longest suffix of `text` that starts `tag`.
fn partial_suffix(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}

/// Applies [`AnswerFilter`] to a complete model output.
pub fn filter_answer(output: &str, answer_prefix: Option<&str>) -> String {
    let mut filter = AnswerFilter::new(answer_prefix.map(str::to_string));
    let mut answer = filter.push(output);
    answer.push_str(&filter.finish());
    answer.trim().to_string()
}

enum Next {
    Cancelled,
    TimedOut,
    Item(Option<Result<StreamEvent, DocchatError>>),
}

/// Stuffs retrieved chunks into the QA prompt and asks the model.
#[derive(Clone)]
pub struct AnswerGenerator {
    llm: Arc<dyn Llm>,
    prompt: ChatPromptTemplate,
    timeout: Duration,
    max_retries: usize,
    retry_base_delay: Duration,
    answer_prefix: Option<String>,
    dont_know_answer: String,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self {
            llm,
            prompt: qa_prompt(),
            timeout: Duration::from_secs(120),
            max_retries: 0,
            retry_base_delay: Duration::from_millis(200),
            answer_prefix: None,
            dont_know_answer: DEFAULT_DONT_KNOW_ANSWER.to_string(),
        }
    }

    pub fn from_config(llm: Arc<dyn Llm>, config: &RagConfig) -> Self {
        Self::new(llm)
            .with_timeout(config.generation_timeout())
            .with_max_retries(config.max_retries)
            .with_answer_prefix(config.answer_prefix.clone())
            .with_dont_know_answer(config.dont_know_answer.clone())
    }

    pub fn with_prompt(mut self, prompt: ChatPromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_answer_prefix(mut self, answer_prefix: Option<String>) -> Self {
        self.answer_prefix = answer_prefix;
        self
    }

    pub fn with_dont_know_answer(mut self, answer: impl Into<String>) -> Self {
        self.dont_know_answer = answer.into();
        self
    }

    pub fn dont_know_answer(&self) -> &str {
        &self.dont_know_answer
    }

    pub fn render_messages(
        &self,
        query: &str,
        retrieved: &[SearchResult],
    ) -> Result<Vec<Message>, RagError> {
        let context = retrieved
            .iter()
            .map(|result| result.document.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut vars = HashMap::new();
        vars.insert("context".to_string(), Value::String(context));
        vars.insert("question".to_string(), Value::String(query.to_string()));
        Ok(self.prompt.format_messages(&vars)?)
    }

    pub async fn generate(
        &self,
        query: &str,
        retrieved: &[SearchResult],
    ) -> Result<RagAnswer, RagError> {
        let sources = source_refs(retrieved);
        if retrieved.is_empty() {
            tracing::info!("no context retrieved, skipping generation");
            return Ok(RagAnswer {
                answer: self.dont_know_answer.clone(),
                sources,
            });
        }

        let request = LlmRequest {
            model: String::new(),
            messages: self.render_messages(query, retrieved)?,
        };
        let call = async {
            if self.max_retries == 0 {
                self.llm.invoke(request).await
            } else {
                Retrying::new(self.llm.clone(), self.max_retries + 1)
                    .with_base_delay(self.retry_base_delay)
                    .invoke(request)
                    .await
            }
        };
        let response = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| DocchatError::Timeout(self.timeout))??;

        Ok(RagAnswer {
            answer: filter_answer(&response.content, self.answer_prefix.as_deref()),
            sources,
        })
    }

    /// Streams visible answer tokens, then the assembled [`RagAnswer`].
    ///
    /// The whole stream is bounded by the generation timeout and stops with
    /// `DocchatError::Cancelled` once `cancel` fires.
    pub fn generate_stream(
        &self,
        query: &str,
        retrieved: Vec<SearchResult>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<AnswerEvent, RagError>> {
        let this = self.clone();
        let query = query.to_string();

        async_stream::stream! {
            let sources = source_refs(&retrieved);
            if retrieved.is_empty() {
                tracing::info!("no context retrieved, skipping generation");
                let answer = this.dont_know_answer.clone();
                yield Ok(AnswerEvent::Token(answer.clone()));
                yield Ok(AnswerEvent::Answer(RagAnswer { answer, sources }));
                return;
            }

            let messages = match this.render_messages(&query, &retrieved) {
                Ok(messages) => messages,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            let request = LlmRequest { model: String::new(), messages };
            let deadline = tokio::time::Instant::now() + this.timeout;
            let mut tokens = this.llm.stream(request);
            let mut filter = AnswerFilter::new(this.answer_prefix.clone());
            let mut answer = String::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Next::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Next::TimedOut,
                    item = tokens.next() => Next::Item(item),
                };
                match next {
                    Next::Cancelled => {
                        tracing::info!("generation cancelled");
                        yield Err(RagError::Generation(DocchatError::Cancelled));
                        return;
                    }
                    Next::TimedOut => {
                        tracing::warn!(timeout_secs = this.timeout.as_secs(), "generation timed out");
                        yield Err(RagError::Generation(DocchatError::Timeout(this.timeout)));
                        return;
                    }
                    Next::Item(None) | Next::Item(Some(Ok(StreamEvent::FinalAnswer(_)))) => break,
                    Next::Item(Some(Ok(StreamEvent::ContentChunk(chunk)))) => {
                        let visible = filter.push(&chunk);
                        if !visible.is_empty() {
                            answer.push_str(&visible);
                            yield Ok(AnswerEvent::Token(visible));
                        }
                    }
                    Next::Item(Some(Ok(_))) => {}
                    Next::Item(Some(Err(err))) => {
                        yield Err(RagError::Generation(err));
                        return;
                    }
                }
            }

            let rest = filter.finish();
            if !rest.is_empty() {
                answer.push_str(&rest);
                yield Ok(AnswerEvent::Token(rest));
            }
            yield Ok(AnswerEvent::Answer(RagAnswer {
                answer: answer.trim().to_string(),
                sources,
            }));
        }
        .boxed()
    }
}
