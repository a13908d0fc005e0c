//! Streaming query orchestrator.
//!
//! Coordinates one query end to end: retrieval (when the caller includes
//! the knowledge base), file-tool injection (when the question matches a
//! file intent), prompt assembly, making sure the chosen model is running,
//! and streaming the generation back as an ordered event sequence:
//! exactly one metadata event, then text chunks, then one `done` or one
//! `error` event.
//!
//! The stream is pull-based: dropping it closes the channel, which makes
//! the producer task bail out on its next send and drop the engine stream,
//! aborting generation at the engine boundary.

use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::behavior::BehaviorSet;
use crate::config::{GenerationConfig, RetrievalConfig};
use crate::engine::{GenerateOptions, InferenceEngine};
use crate::error::{Error, Result};
use crate::intent::{self, FileIntent};
use crate::lifecycle::LifecycleManager;
use crate::models::{QueryEvent, RankedSource};
use crate::rank;
use crate::store::DocumentStore;
use crate::tools::FileTools;

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub question: String,
    pub model_name: Option<String>,
    pub include_files: bool,
}

/// A collected (non-streaming) answer.
#[derive(Debug, Clone)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<RankedSource>,
    pub model_used: String,
}

/// Ordered event stream for one query. Dropping it cancels the query.
pub struct EventStream {
    rx: mpsc::Receiver<QueryEvent>,
}

impl futures::Stream for EventStream {
    type Item = QueryEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<QueryEvent>> {
        self.rx.poll_recv(cx)
    }
}

struct Prepared {
    model: String,
    sources: Vec<RankedSource>,
    prompt: String,
    options: GenerateOptions,
}

pub struct Orchestrator {
    engine: Arc<dyn InferenceEngine>,
    store: Arc<DocumentStore>,
    tools: Arc<FileTools>,
    lifecycle: Arc<LifecycleManager>,
    behaviors: Arc<BehaviorSet>,
    retrieval: RetrievalConfig,
    generation: GenerationConfig,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        store: Arc<DocumentStore>,
        tools: Arc<FileTools>,
        lifecycle: Arc<LifecycleManager>,
        behaviors: Arc<BehaviorSet>,
        retrieval: RetrievalConfig,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            engine,
            store,
            tools,
            lifecycle,
            behaviors,
            retrieval,
            generation,
        }
    }

    /// Stream a query as an ordered event sequence: one metadata event,
    /// then text chunks, then one `done` or `error` event.
    pub fn stream(self: Arc<Self>, request: QueryRequest) -> EventStream {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            self.run(request, tx).await;
        });
        EventStream { rx }
    }

    /// Run the same pipeline without streaming, collecting the whole
    /// answer.
    pub async fn answer(&self, request: QueryRequest) -> Result<QueryAnswer> {
        let include_files = request.include_files;
        let prepared = self.prepare(&request).await?;
        self.lifecycle.ensure_running(&prepared.model).await?;

        let answer = self
            .engine
            .generate(&prepared.model, &prepared.prompt, &prepared.options)
            .await?;
        debug!(model = %prepared.model, include_files, "query answered");

        Ok(QueryAnswer {
            answer,
            sources: prepared.sources,
            model_used: prepared.model,
        })
    }

    async fn run(&self, request: QueryRequest, tx: mpsc::Sender<QueryEvent>) {
        let include_files = request.include_files;

        let prepared = match self.prepare(&request).await {
            Ok(p) => p,
            Err(e) => {
                let _ = tx.send(error_event(&e)).await;
                return;
            }
        };

        let metadata = QueryEvent::Metadata {
            model_used: prepared.model.clone(),
            sources: prepared.sources.clone(),
            include_files,
        };
        if tx.send(metadata).await.is_err() {
            return;
        }

        if let Err(e) = self.lifecycle.ensure_running(&prepared.model).await {
            let _ = tx.send(error_event(&e)).await;
            return;
        }

        let mut chunks = match self
            .engine
            .generate_stream(&prepared.model, &prepared.prompt, &prepared.options)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.send(error_event(&e)).await;
                return;
            }
        };

        while let Some(item) = chunks.next().await {
            match item {
                Ok(text) => {
                    // A failed send means the client went away; dropping
                    // `chunks` here closes the engine connection.
                    if tx.send(QueryEvent::Chunk { response: text }).await.is_err() {
                        debug!("client disconnected mid-stream, aborting generation");
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(error_event(&e)).await;
                    return;
                }
            }
        }

        let _ = tx.send(QueryEvent::done()).await;
    }

    /// Resolve the model, gather sources and tool context, and assemble
    /// the prompt. Everything here is either in-memory or bounded by the
    /// tool timeout.
    async fn prepare(&self, request: &QueryRequest) -> Result<Prepared> {
        let model = self
            .lifecycle
            .resolve_model(request.model_name.as_deref())
            .await?;

        let sources = if request.include_files {
            let snapshot = self.store.snapshot();
            rank::search(&request.question, &snapshot, self.retrieval.top_k)
        } else {
            Vec::new()
        };

        let tool_context = if request.include_files {
            self.inject_tool_context(&request.question).await
        } else {
            None
        };

        let profile = self.behaviors.current();
        let prompt = assemble_prompt(
            &request.question,
            &profile.raw_text,
            &sources,
            tool_context.as_deref(),
            self.retrieval.max_context_chars,
        );

        Ok(Prepared {
            model,
            sources,
            prompt,
            options: GenerateOptions::for_query(&self.generation, request.include_files),
        })
    }

    /// Best-effort file-tool lookup for questions that match a file
    /// intent. Degrades by omission: a timeout or tool failure just means
    /// no extra context.
    async fn inject_tool_context(&self, question: &str) -> Option<String> {
        let directories = self.tools.top_level_directories();
        let file_intent = intent::classify(question, &directories);
        if file_intent == FileIntent::None {
            return None;
        }

        let tools = Arc::clone(&self.tools);
        let deadline = Duration::from_secs(self.retrieval.tool_timeout_secs);
        let lookup =
            tokio::task::spawn_blocking(move || run_file_intent(&tools, file_intent));

        match tokio::time::timeout(deadline, lookup).await {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => {
                warn!(error = %e, "tool lookup task failed, continuing without file context");
                None
            }
            Err(_) => {
                warn!("tool lookup timed out, continuing without file context");
                None
            }
        }
    }
}

fn error_event(e: &Error) -> QueryEvent {
    QueryEvent::Error {
        error: e.to_string(),
        kind: e.kind().to_string(),
    }
}

// ============ Tool context ============

fn run_file_intent(tools: &FileTools, file_intent: FileIntent) -> Option<String> {
    match file_intent {
        FileIntent::None => None,
        FileIntent::FindLatest { directory, pattern } => {
            let latest = tools.find_latest(directory.as_deref(), &pattern).ok()?;
            let content = tools
                .get_content(&latest.path, None)
                .unwrap_or_default();
            Some(format!(
                "LATEST FILE:\nFilename: {}\nModified: {}\n\nCONTENT:\n{}",
                latest.path,
                latest.modified_at.format("%Y-%m-%d %H:%M:%S"),
                content.trim()
            ))
        }
        FileIntent::DateSearch { date } => {
            let matches = tools.grep_content(&date, None, false, 5).ok()?;
            if matches.is_empty() {
                return Some(format!("No knowledge-base file mentions the date {date}."));
            }
            Some(format_grep_block(
                &format!("FILES MENTIONING {date}:"),
                &matches,
            ))
        }
        FileIntent::ContentSearch { term } => {
            let matches = tools.grep_content(&term, None, false, 5).ok()?;
            if matches.is_empty() {
                return None;
            }
            Some(format_grep_block(
                &format!("FILES MENTIONING '{term}':"),
                &matches,
            ))
        }
    }
}

fn format_grep_block(title: &str, matches: &[crate::tools::GrepMatch]) -> String {
    let mut block = String::from(title);
    for m in matches {
        block.push_str(&format!("\n\n{}:", m.file.path));
        for line in &m.lines {
            block.push_str(&format!("\n  line {}: {}", line.line_number, line.text.trim()));
        }
    }
    block
}

// ============ Prompt assembly ============

/// Build the full prompt: behavior profile, then tool context, then
/// knowledge-base context (bounded by the character budget), then the
/// question.
fn assemble_prompt(
    question: &str,
    personality: &str,
    sources: &[RankedSource],
    tool_context: Option<&str>,
    max_context_chars: usize,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(personality.trim());
    prompt.push_str("\n\n");

    if let Some(context) = tool_context {
        prompt.push_str(
            "File lookups have already been performed. Use only these results; \
             do not suggest commands or tools.\n\n",
        );
        prompt.push_str(context.trim());
        prompt.push_str("\n\n");
    }

    if !sources.is_empty() {
        prompt.push_str("Context from knowledge base:\n");
        prompt.push_str(&build_kb_context(sources, max_context_chars));
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!("User question: {question}\n\n"));
    if sources.is_empty() && tool_context.is_none() {
        prompt.push_str("Please respond according to your personality and provide a helpful answer.");
    } else {
        prompt.push_str(
            "Please provide a helpful response based on the context provided. \
             If the context doesn't contain enough information, say so clearly.",
        );
    }
    prompt
}

fn build_kb_context(sources: &[RankedSource], max_chars: usize) -> String {
    let mut context = String::new();
    for source in sources {
        let block = match &source.unit.section_header {
            Some(header) => format!(
                "--- {} ({})\n{}",
                source.unit.filename, header, source.unit.content
            ),
            None => format!("--- {}\n{}", source.unit.filename, source.unit.content),
        };
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&block);
        if context.len() > max_chars {
            break;
        }
    }

    if context.len() > max_chars {
        let mut end = max_chars;
        while !context.is_char_boundary(end) {
            end -= 1;
        }
        context.truncate(end);
        context.push_str("... [truncated]");
    }
    context
}
