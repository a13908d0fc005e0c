use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub behaviors: BehaviorsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeBaseConfig {
    /// Root of the markdown tree. Read-only to the core.
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Base URL of the Ollama API.
    #[serde(default = "default_engine_url")]
    pub url: String,
    /// Timeout applied to every ordinary engine call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How long `select`/`ensure_running` waits for a model load. Model
    /// loads can be slow, so this is generous but finite.
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    /// Timeout for model downloads (`pull`).
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,
    /// How long the model registry serves a cached listing before
    /// re-querying the engine.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Warm up the selected model in the background on `serve` startup.
    #[serde(default)]
    pub preload_model: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            request_timeout_secs: default_request_timeout(),
            start_timeout_secs: default_start_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            pull_timeout_secs: default_pull_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            preload_model: false,
        }
    }
}

fn default_engine_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_start_timeout() -> u64 {
    60
}
fn default_stop_timeout() -> u64 {
    20
}
fn default_pull_timeout() -> u64 {
    300
}
fn default_cache_ttl() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f64,
    /// Context window for plain questions.
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    /// Context window when knowledge-base context is spliced in.
    #[serde(default = "default_num_ctx_with_files")]
    pub num_ctx_with_files: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            num_predict: default_num_predict(),
            repeat_penalty: default_repeat_penalty(),
            num_ctx: default_num_ctx(),
            num_ctx_with_files: default_num_ctx_with_files(),
        }
    }
}

fn default_temperature() -> f64 {
    0.1
}
fn default_top_p() -> f64 {
    0.8
}
fn default_top_k() -> u32 {
    40
}
fn default_num_predict() -> u32 {
    2048
}
fn default_repeat_penalty() -> f64 {
    1.1
}
fn default_num_ctx() -> u32 {
    2048
}
fn default_num_ctx_with_files() -> u32 {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Maximum number of ranked sources returned per query.
    #[serde(default = "default_top_k_sources")]
    pub top_k: usize,
    /// Character budget for knowledge-base context in the prompt.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Deadline for a file-tool injection lookup; on expiry the query
    /// proceeds without that context.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k_sources(),
            max_context_chars: default_max_context_chars(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

fn default_top_k_sources() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    2000
}
fn default_tool_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrainingConfig {
    /// Where Modelfiles and training datasets are written.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Suffix used when the caller does not supply one.
    #[serde(default = "default_suffix")]
    pub default_suffix: String,
    /// Name suffixes recognized as marking a derived model. Fallback only;
    /// the artifact index is the source of truth for models trained here.
    #[serde(default = "default_trained_suffixes")]
    pub trained_suffixes: Vec<String>,
    /// Sections shorter than this are skipped when building examples.
    #[serde(default = "default_min_section_chars")]
    pub min_section_chars: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            default_suffix: default_suffix(),
            trained_suffixes: default_trained_suffixes(),
            min_section_chars: default_min_section_chars(),
        }
    }
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("./local_models")
}
fn default_suffix() -> String {
    "trained".to_string()
}
fn default_trained_suffixes() -> Vec<String> {
    vec!["trained".to_string(), "tech".to_string()]
}
fn default_min_section_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct BehaviorsConfig {
    /// Directory of selectable profile files.
    #[serde(default = "default_behaviors_dir")]
    pub dir: PathBuf,
    /// Profile loaded at startup and used as the fallback.
    #[serde(default = "default_behavior_file")]
    pub default_file: String,
}

impl Default for BehaviorsConfig {
    fn default() -> Self {
        Self {
            dir: default_behaviors_dir(),
            default_file: default_behavior_file(),
        }
    }
}

fn default_behaviors_dir() -> PathBuf {
    PathBuf::from("./behaviors")
}
fn default_behavior_file() -> String {
    "behavior.md".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.knowledge_base.include_globs.is_empty() {
        anyhow::bail!("knowledge_base.include_globs must not be empty");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.engine.start_timeout_secs == 0 || config.engine.stop_timeout_secs == 0 {
        anyhow::bail!("engine start/stop timeouts must be > 0");
    }

    if config.training.default_suffix.trim().is_empty() {
        anyhow::bail!("training.default_suffix must not be empty");
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_applies_defaults() {
        let toml_str = r#"
[knowledge_base]
root = "/data/knowledge_base"

[server]
bind = "127.0.0.1:5557"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.url, "http://localhost:11434");
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.training.default_suffix, "trained");
        assert_eq!(config.knowledge_base.include_globs, vec!["**/*.md"]);
        assert!(config
            .training
            .trained_suffixes
            .contains(&"trained".to_string()));
    }

    #[test]
    fn overrides_apply() {
        let toml_str = r#"
[knowledge_base]
root = "/kb"
include_globs = ["**/*.md", "**/*.txt"]

[engine]
url = "http://ollama:11434"
start_timeout_secs = 90

[retrieval]
top_k = 8

[training]
trained_suffixes = ["trained", "tech", "qa"]

[server]
bind = "0.0.0.0:5557"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.url, "http://ollama:11434");
        assert_eq!(config.engine.start_timeout_secs, 90);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.training.trained_suffixes.len(), 3);
        // defaults still apply for unset fields
        assert_eq!(config.engine.stop_timeout_secs, 20);
    }
}
