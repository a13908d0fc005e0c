#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use colloquy::config::{
    BehaviorsConfig, Config, EngineConfig, GenerationConfig, KnowledgeBaseConfig, RetrievalConfig,
    ServerConfig, TrainingConfig,
};
use colloquy::engine::{EngineModel, GenerateOptions, InferenceEngine};
use colloquy::error::{Error, Result};

/// In-memory engine double with call counting and failure injection.
pub struct StubEngine {
    pub installed: Mutex<Vec<String>>,
    pub running: Mutex<Vec<String>>,
    /// Chunks emitted by `generate_stream`.
    pub chunks: Mutex<Vec<String>>,
    /// Prompts seen by `generate` / `generate_stream`.
    pub prompts: Mutex<Vec<String>>,

    pub list_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub create_calls: AtomicUsize,

    /// Delay injected into `start`, to exercise timeouts and joins.
    pub start_delay: Mutex<Option<Duration>>,
    pub fail_list: AtomicBool,
    /// When set, `create_model` fails with this message.
    pub fail_create: Mutex<Option<String>>,
    /// When set, the generate stream errors after its first chunk.
    pub fail_mid_stream: AtomicBool,
}

impl StubEngine {
    pub fn with_models(names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            installed: Mutex::new(names.iter().map(|s| s.to_string()).collect()),
            running: Mutex::new(Vec::new()),
            chunks: Mutex::new(vec!["Hello".to_string(), " world".to_string()]),
            prompts: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            start_delay: Mutex::new(None),
            fail_list: AtomicBool::new(false),
            fail_create: Mutex::new(None),
            fail_mid_stream: AtomicBool::new(false),
        })
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn set_running(&self, names: &[&str]) {
        *self.running.lock().unwrap() = names.iter().map(|s| s.to_string()).collect();
    }
}

#[async_trait]
impl InferenceEngine for StubEngine {
    async fn list_models(&self) -> Result<Vec<EngineModel>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::engine_unavailable("stub engine offline"));
        }
        Ok(self
            .installed
            .lock()
            .unwrap()
            .iter()
            .map(|name| EngineModel {
                name: name.clone(),
                size_bytes: 1 << 30,
                modified_at: None,
            })
            .collect())
    }

    async fn running_models(&self) -> Result<Vec<String>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::engine_unavailable("stub engine offline"));
        }
        Ok(self.running.lock().unwrap().clone())
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.start_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.running.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap().retain(|m| m != name);
        Ok(())
    }

    async fn create_model(&self, name: &str, _modelfile: &str) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_create.lock().unwrap().clone() {
            return Err(Error::engine(message));
        }
        let bare = name.strip_suffix(":latest").unwrap_or(name).to_string();
        let mut installed = self.installed.lock().unwrap();
        if !installed.contains(&bare) {
            installed.push(bare);
        }
        Ok(())
    }

    async fn delete_model(&self, name: &str) -> Result<()> {
        self.installed.lock().unwrap().retain(|m| m != name);
        self.running.lock().unwrap().retain(|m| m != name);
        Ok(())
    }

    async fn pull(&self, name: &str) -> Result<()> {
        self.installed.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn generate(&self, _name: &str, prompt: &str, _opts: &GenerateOptions) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("stub answer".to_string())
    }

    async fn generate_stream(
        &self,
        _name: &str,
        prompt: &str,
        _opts: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<String>>> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if self.fail_mid_stream.load(Ordering::SeqCst) {
            let items = vec![
                Ok("partial".to_string()),
                Err(Error::engine("generation blew up")),
            ];
            return Ok(futures::stream::iter(items).boxed());
        }

        let chunks: Vec<Result<String>> =
            self.chunks.lock().unwrap().iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// A workspace with a small knowledge base, behaviors dir, and artifacts
/// dir, plus a config pointing at them.
pub fn test_workspace() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let kb = tmp.path().join("knowledge_base");
    fs::create_dir_all(kb.join("general")).unwrap();
    fs::create_dir_all(kb.join("misc")).unwrap();
    write_kb_file(
        &kb,
        "general/overview.md",
        "# Overview\nThis knowledge base covers the home lab.\n\n## Setup\ninstall steps for the server rack and all the cabling involved\n",
    );
    write_kb_file(
        &kb,
        "misc/groceries.md",
        "# Groceries\nmilk, eggs, and a long enough list of pantry staples to matter\n",
    );

    let behaviors = tmp.path().join("behaviors");
    fs::create_dir_all(&behaviors).unwrap();
    fs::write(behaviors.join("behavior.md"), "Answer tersely and cite sources.").unwrap();

    let config = Config {
        knowledge_base: KnowledgeBaseConfig {
            root: kb,
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
        },
        engine: EngineConfig {
            start_timeout_secs: 1,
            stop_timeout_secs: 1,
            ..EngineConfig::default()
        },
        generation: GenerationConfig::default(),
        retrieval: RetrievalConfig::default(),
        training: TrainingConfig {
            artifacts_dir: tmp.path().join("local_models"),
            ..TrainingConfig::default()
        },
        behaviors: BehaviorsConfig {
            dir: behaviors,
            default_file: "behavior.md".to_string(),
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    };

    (tmp, config)
}

pub fn write_kb_file(kb_root: &Path, relative: &str, content: &str) {
    let path = kb_root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}
