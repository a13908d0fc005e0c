//! Inference engine boundary.
//!
//! The core treats the model runtime as an opaque service behind the
//! [`InferenceEngine`] trait: list models, report what is loaded, load and
//! unload, create/delete derived models, and generate text with incremental
//! output. [`OllamaEngine`] is the production implementation over the
//! Ollama HTTP API; tests substitute stub engines with call counting.
//!
//! Ollama mapping:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | `list_models` | `GET /api/tags` |
//! | `running_models` | `GET /api/ps` |
//! | `start` | `POST /api/generate` with an empty prompt (loads the model) |
//! | `stop` | `POST /api/generate` with `keep_alive: 0` (unloads it) |
//! | `create_model` | `POST /api/create` |
//! | `delete_model` | `DELETE /api/delete` |
//! | `pull` | `POST /api/pull` |
//! | `generate`/`generate_stream` | `POST /api/generate` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::{EngineConfig, GenerationConfig};
use crate::error::{Error, Result};

/// One model as reported by the engine, before classification.
#[derive(Debug, Clone)]
pub struct EngineModel {
    pub name: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Sampling and context options passed through to generation calls.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub num_predict: u32,
    pub repeat_penalty: f64,
    pub num_ctx: u32,
}

impl GenerateOptions {
    /// Options for a query; the context window widens when knowledge-base
    /// context is spliced into the prompt.
    pub fn for_query(config: &GenerationConfig, include_files: bool) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            num_predict: config.num_predict,
            repeat_penalty: config.repeat_penalty,
            num_ctx: if include_files {
                config.num_ctx_with_files
            } else {
                config.num_ctx
            },
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "temperature": self.temperature,
            "top_p": self.top_p,
            "top_k": self.top_k,
            "num_predict": self.num_predict,
            "repeat_penalty": self.repeat_penalty,
            "num_ctx": self.num_ctx,
        })
    }
}

/// The opaque inference-engine dependency.
///
/// Engine calls are the only suspension points in the system; everything
/// in-memory stays synchronous.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// All installed models.
    async fn list_models(&self) -> Result<Vec<EngineModel>>;

    /// Names of the models currently loaded in memory.
    async fn running_models(&self) -> Result<Vec<String>>;

    /// Load a model into memory.
    async fn start(&self, name: &str) -> Result<()>;

    /// Unload a model from memory.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Create or update a derived model from a Modelfile.
    async fn create_model(&self, name: &str, modelfile: &str) -> Result<()>;

    /// Delete a model from the engine.
    async fn delete_model(&self, name: &str) -> Result<()>;

    /// Download a model into the engine.
    async fn pull(&self, name: &str) -> Result<()>;

    /// Generate a complete response.
    async fn generate(&self, name: &str, prompt: &str, opts: &GenerateOptions) -> Result<String>;

    /// Generate with incremental output. Dropping the returned stream
    /// closes the underlying connection, aborting generation engine-side.
    async fn generate_stream(
        &self,
        name: &str,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<String>>>;
}

// ============ Ollama implementation ============

pub struct OllamaEngine {
    base_url: String,
    client: reqwest::Client,
    pull_timeout: Duration,
}

impl OllamaEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::engine(format!("failed to build http client: {e}")))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            pull_timeout: Duration::from_secs(config.pull_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, mapping transport failures to `EngineUnavailable`
    /// and engine-reported errors to `Engine`.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::engine_unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| format!("HTTP {status}"));
        Err(Error::engine(message))
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ApiModel>,
}

#[derive(Debug, Deserialize)]
struct ApiModel {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified_at: Option<String>,
}

impl From<ApiModel> for EngineModel {
    fn from(m: ApiModel) -> Self {
        let modified_at = m
            .modified_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Self {
            name: m.name,
            size_bytes: m.size,
            modified_at,
        }
    }
}

#[async_trait]
impl InferenceEngine for OllamaEngine {
    async fn list_models(&self) -> Result<Vec<EngineModel>> {
        let resp = self.send(self.client.get(self.url("/api/tags"))).await?;
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| Error::engine(format!("bad tags response: {e}")))?;
        Ok(tags.models.into_iter().map(EngineModel::from).collect())
    }

    async fn running_models(&self) -> Result<Vec<String>> {
        let resp = self.send(self.client.get(self.url("/api/ps"))).await?;
        let ps: TagsResponse = resp
            .json()
            .await
            .map_err(|e| Error::engine(format!("bad ps response: {e}")))?;
        Ok(ps.models.into_iter().map(|m| m.name).collect())
    }

    async fn start(&self, name: &str) -> Result<()> {
        debug!(model = name, "loading model");
        // An empty prompt makes the engine load the model without
        // generating anything.
        self.send(self.client.post(self.url("/api/generate")).json(&serde_json::json!({
            "model": name,
            "prompt": "",
            "stream": false,
        })))
        .await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        debug!(model = name, "unloading model");
        // keep_alive 0 tells the engine to unload immediately.
        self.send(self.client.post(self.url("/api/generate")).json(&serde_json::json!({
            "model": name,
            "prompt": "",
            "stream": false,
            "keep_alive": 0,
        })))
        .await?;
        Ok(())
    }

    async fn create_model(&self, name: &str, modelfile: &str) -> Result<()> {
        debug!(model = name, "creating derived model");
        let resp = self
            .send(self.client.post(self.url("/api/create")).json(&serde_json::json!({
                "name": name,
                "modelfile": modelfile,
                "stream": false,
            })))
            .await?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::engine(format!("bad create response: {e}")))?;
        let status = body.get("status").and_then(|s| s.as_str()).unwrap_or("");
        if status.contains("success") {
            Ok(())
        } else {
            Err(Error::engine(format!(
                "model create did not report success: {status}"
            )))
        }
    }

    async fn delete_model(&self, name: &str) -> Result<()> {
        debug!(model = name, "deleting model");
        self.send(
            self.client
                .delete(self.url("/api/delete"))
                .json(&serde_json::json!({ "name": name })),
        )
        .await?;
        Ok(())
    }

    async fn pull(&self, name: &str) -> Result<()> {
        debug!(model = name, "pulling model");
        self.send(
            self.client
                .post(self.url("/api/pull"))
                .timeout(self.pull_timeout)
                .json(&serde_json::json!({ "name": name, "stream": false })),
        )
        .await?;
        Ok(())
    }

    async fn generate(&self, name: &str, prompt: &str, opts: &GenerateOptions) -> Result<String> {
        let resp = self
            .send(self.client.post(self.url("/api/generate")).json(&serde_json::json!({
                "model": name,
                "prompt": prompt,
                "stream": false,
                "options": opts.to_json(),
            })))
            .await?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::engine(format!("bad generate response: {e}")))?;
        Ok(body
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn generate_stream(
        &self,
        name: &str,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let resp = self
            .send(self.client.post(self.url("/api/generate")).json(&serde_json::json!({
                "model": name,
                "prompt": prompt,
                "stream": true,
                "options": opts.to_json(),
            })))
            .await?;

        let body = resp.bytes_stream().boxed();
        let stream = futures::stream::try_unfold(
            (body, String::new()),
            |(mut body, mut buf)| async move {
                loop {
                    while let Some(pos) = buf.find('\n') {
                        let line: String = buf.drain(..=pos).collect();
                        match parse_stream_line(line.trim())? {
                            StreamLine::Chunk(text) => return Ok(Some((text, (body, buf)))),
                            StreamLine::Done => return Ok(None),
                            StreamLine::Empty => {}
                        }
                    }
                    match body.next().await {
                        Some(Ok(bytes)) => buf.push_str(&String::from_utf8_lossy(&bytes)),
                        Some(Err(e)) => {
                            return Err(Error::engine_unavailable(format!(
                                "generation stream interrupted: {e}"
                            )))
                        }
                        None => {
                            let tail = std::mem::take(&mut buf);
                            if let StreamLine::Chunk(text) = parse_stream_line(tail.trim())? {
                                return Ok(Some((text, (body, buf))));
                            }
                            return Ok(None);
                        }
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}

// ============ NDJSON stream decoding ============

#[derive(Debug)]
enum StreamLine {
    Chunk(String),
    Done,
    Empty,
}

/// Decode one NDJSON line from a streaming generate response.
fn parse_stream_line(line: &str) -> Result<StreamLine> {
    if line.is_empty() {
        return Ok(StreamLine::Empty);
    }

    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| Error::engine(format!("unparseable stream line: {e}")))?;

    if let Some(message) = value.get("error").and_then(|e| e.as_str()) {
        return Err(Error::engine(message.to_string()));
    }

    if let Some(text) = value.get("response").and_then(|r| r.as_str()) {
        if !text.is_empty() {
            return Ok(StreamLine::Chunk(text.to_string()));
        }
    }

    if value.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
        return Ok(StreamLine::Done);
    }

    Ok(StreamLine::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_line_with_text_is_a_chunk() {
        match parse_stream_line(r#"{"response":"Hel","done":false}"#).unwrap() {
            StreamLine::Chunk(text) => assert_eq!(text, "Hel"),
            _ => panic!("expected chunk"),
        }
    }

    #[test]
    fn stream_line_done_terminates() {
        assert!(matches!(
            parse_stream_line(r#"{"response":"","done":true}"#).unwrap(),
            StreamLine::Done
        ));
    }

    #[test]
    fn stream_line_error_is_typed() {
        let err = parse_stream_line(r#"{"error":"model not found"}"#).unwrap_err();
        assert_eq!(err.kind(), "engine_error");
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(matches!(parse_stream_line("").unwrap(), StreamLine::Empty));
    }

    #[test]
    fn garbage_lines_are_engine_errors() {
        assert!(parse_stream_line("not json").is_err());
    }

    #[test]
    fn options_widen_context_for_file_queries() {
        let config = GenerationConfig::default();
        let plain = GenerateOptions::for_query(&config, false);
        let with_files = GenerateOptions::for_query(&config, true);
        assert!(with_files.num_ctx > plain.num_ctx);
    }

    #[test]
    fn api_model_parses_timestamps() {
        let m = ApiModel {
            name: "llama3.2:3b".into(),
            size: 42,
            modified_at: Some("2025-08-01T10:00:00Z".into()),
        };
        let engine_model = EngineModel::from(m);
        assert!(engine_model.modified_at.is_some());

        let m = ApiModel {
            name: "x".into(),
            size: 0,
            modified_at: Some("garbage".into()),
        };
        assert!(EngineModel::from(m).modified_at.is_none());
    }
}
