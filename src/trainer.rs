//! Training artifact builder.
//!
//! Turns a selection of knowledge-base documents plus a behavior profile
//! into a per-base-model fine-tuning package: a Modelfile and a JSONL
//! dataset under the artifacts directory, registered engine-side as a
//! derived model. Packages are keyed by `(base model, suffix)`; re-training
//! a key updates its files in place instead of creating a duplicate.
//!
//! The [`ArtifactIndex`] is the persistent side table mapping derived-model
//! names to their artifact sets. It, not the naming convention, is the
//! source of truth for which models were trained here.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::behavior::BehaviorSet;
use crate::config::TrainingConfig;
use crate::engine::InferenceEngine;
use crate::error::{Error, Result};
use crate::models::{BehaviorProfile, DocumentUnit, TrainOutcome, TrainingArtifactSet};
use crate::store::DocumentStore;

const INDEX_FILE: &str = "artifacts.json";

/// Reinforcement records appended to every dataset regardless of the
/// document selection.
const IDENTITY_QUESTIONS: [&str; 3] = [
    "Who are you?",
    "How should you respond?",
    "What do you know about?",
];

// ============ Artifact index ============

type ArtifactKey = (String, String);

/// Persistent side table of training artifact sets, keyed by
/// `(base_model_name, custom_suffix)`.
pub struct ArtifactIndex {
    dir: PathBuf,
    sets: RwLock<HashMap<ArtifactKey, TrainingArtifactSet>>,
}

impl ArtifactIndex {
    /// Load the index from `<dir>/artifacts.json`, creating the directory
    /// if needed. A missing or unreadable index starts empty.
    pub fn load(dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut sets = HashMap::new();
        let index_path = dir.join(INDEX_FILE);
        if index_path.exists() {
            match std::fs::read_to_string(&index_path) {
                Ok(raw) => match serde_json::from_str::<Vec<TrainingArtifactSet>>(&raw) {
                    Ok(entries) => {
                        for set in entries {
                            sets.insert(
                                (set.base_model_name.clone(), set.custom_suffix.clone()),
                                set,
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "artifact index unparseable, starting empty"),
                },
                Err(e) => warn!(error = %e, "artifact index unreadable, starting empty"),
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            sets: RwLock::new(sets),
        })
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    pub fn get(&self, base_model: &str, suffix: &str) -> Option<TrainingArtifactSet> {
        self.sets
            .read()
            .expect("artifact lock poisoned")
            .get(&(base_model.to_string(), suffix.to_string()))
            .cloned()
    }

    pub fn all(&self) -> Vec<TrainingArtifactSet> {
        let mut sets: Vec<TrainingArtifactSet> = self
            .sets
            .read()
            .expect("artifact lock poisoned")
            .values()
            .cloned()
            .collect();
        sets.sort_by(|a, b| a.trained_model_name.cmp(&b.trained_model_name));
        sets
    }

    /// Find the set that produced `model_name`, ignoring a `:latest` tag.
    pub fn find_by_trained_name(&self, model_name: &str) -> Option<TrainingArtifactSet> {
        let bare = model_name.strip_suffix(":latest").unwrap_or(model_name);
        self.sets
            .read()
            .expect("artifact lock poisoned")
            .values()
            .find(|s| s.trained_model_name == bare)
            .cloned()
    }

    /// Insert or replace an entry and persist the index file.
    pub fn upsert(&self, set: TrainingArtifactSet) -> Result<()> {
        let mut sets = self.sets.write().expect("artifact lock poisoned");
        sets.insert(
            (set.base_model_name.clone(), set.custom_suffix.clone()),
            set,
        );
        self.persist(&sets)
    }

    /// Remove an entry and persist. Returns the removed set, if any.
    pub fn remove(&self, base_model: &str, suffix: &str) -> Result<Option<TrainingArtifactSet>> {
        let mut sets = self.sets.write().expect("artifact lock poisoned");
        let removed = sets.remove(&(base_model.to_string(), suffix.to_string()));
        if removed.is_some() {
            self.persist(&sets)?;
        }
        Ok(removed)
    }

    fn persist(&self, sets: &HashMap<ArtifactKey, TrainingArtifactSet>) -> Result<()> {
        let mut entries: Vec<&TrainingArtifactSet> = sets.values().collect();
        entries.sort_by(|a, b| a.trained_model_name.cmp(&b.trained_model_name));
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| Error::engine(format!("failed to encode artifact index: {e}")))?;
        std::fs::write(self.dir.join(INDEX_FILE), json)?;
        Ok(())
    }
}

// ============ Trainer ============

#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub base_model: String,
    /// Files and/or folders relative to the knowledge-base root. Empty
    /// means the whole knowledge base.
    pub selected_paths: Vec<String>,
    pub custom_suffix: Option<String>,
    pub behavior_filename: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub artifact: TrainingArtifactSet,
    pub outcome: TrainOutcome,
    pub training_examples: usize,
    /// Whether a derived model for this key already existed before the run.
    pub model_existed: bool,
    pub used_fallback_profile: bool,
}

/// One instruction/response record in the JSONL dataset.
#[derive(Debug, Clone, Serialize)]
struct TrainingExample {
    instruction: String,
    input: String,
    output: String,
}

pub struct Trainer {
    engine: Arc<dyn InferenceEngine>,
    store: Arc<DocumentStore>,
    behaviors: Arc<BehaviorSet>,
    artifacts: Arc<ArtifactIndex>,
    config: TrainingConfig,
    /// Serializes training runs per artifact key; distinct keys proceed
    /// concurrently.
    key_locks: tokio::sync::Mutex<HashMap<ArtifactKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Trainer {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        store: Arc<DocumentStore>,
        behaviors: Arc<BehaviorSet>,
        artifacts: Arc<ArtifactIndex>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            engine,
            store,
            behaviors,
            artifacts,
            config,
            key_locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn artifacts(&self) -> &ArtifactIndex {
        &self.artifacts
    }

    /// Build (or rebuild) the fine-tuning package for `request` and
    /// register the derived model engine-side.
    pub async fn train(&self, request: TrainRequest) -> Result<TrainReport> {
        let installed = self.engine.list_models().await?;
        if !installed.iter().any(|m| m.name == request.base_model) {
            return Err(Error::invalid_selection(format!(
                "base model '{}' is not installed",
                request.base_model
            )));
        }

        let snapshot = self.store.snapshot();
        let units = resolve_selection(&snapshot, &request.selected_paths)?;

        let (profile, used_fallback_profile) =
            self.behaviors.resolve(request.behavior_filename.as_deref());

        let examples = build_examples(&units, &profile, self.config.min_section_chars);
        if examples.len() <= IDENTITY_QUESTIONS.len() {
            return Err(Error::NoTrainableContent {
                message: "selection produced no usable document sections".to_string(),
            });
        }

        let suffix = sanitize_suffix(
            request
                .custom_suffix
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(&self.config.default_suffix),
        );
        let key = (request.base_model.clone(), suffix.clone());
        let key_lock = self.key_lock(&key).await;
        let _guard = key_lock.lock().await;

        let trained_model_name = derived_model_name(&request.base_model, &suffix);
        let existing = self.artifacts.get(&request.base_model, &suffix);
        let model_existed = existing.is_some()
            || installed.iter().any(|m| {
                m.name == trained_model_name
                    || m.name.strip_suffix(":latest") == Some(trained_model_name.as_str())
            });

        let safe_name = format!("{}_{}", sanitize_model_name(&request.base_model), suffix);
        let training_data_path = self
            .config
            .artifacts_dir
            .join(format!("ollama_training_{safe_name}.jsonl"));
        let modelfile_path = self
            .config
            .artifacts_dir
            .join(format!("Modelfile_{safe_name}"));

        std::fs::create_dir_all(&self.config.artifacts_dir)?;
        write_dataset(&training_data_path, &examples)?;

        let modelfile = render_modelfile(&request.base_model, &profile, &training_data_path);
        std::fs::write(&modelfile_path, &modelfile)?;

        info!(
            base = %request.base_model,
            trained = %trained_model_name,
            examples = examples.len(),
            "training artifacts written"
        );

        // The artifact files stay on disk on failure so a retry does not
        // need to rebuild the dataset.
        let create_target = if model_existed {
            format!("{trained_model_name}:latest")
        } else {
            trained_model_name.clone()
        };
        self.engine
            .create_model(&create_target, &modelfile)
            .await
            .map_err(|e| Error::TrainingEngineFailure {
                message: e.to_string(),
            })?;

        let now = Utc::now();
        let (created_at, outcome) = match &existing {
            Some(prev) => (prev.created_at, TrainOutcome::Updated),
            None => (now, TrainOutcome::Created),
        };

        let artifact = TrainingArtifactSet {
            base_model_name: request.base_model.clone(),
            custom_suffix: suffix,
            modelfile_path,
            training_data_path,
            trained_model_name,
            created_at,
            updated_at: now,
        };
        self.artifacts.upsert(artifact.clone())?;

        Ok(TrainReport {
            artifact,
            outcome,
            training_examples: examples.len(),
            model_existed,
            used_fallback_profile,
        })
    }

    /// Delete artifact files whose derived model no longer exists in the
    /// engine, plus stray artifact-shaped files the index does not know
    /// about. Returns the removed file names.
    pub async fn cleanup_orphaned_files(&self) -> Result<Vec<String>> {
        let installed = self.engine.list_models().await?;
        let installed_names: Vec<String> = installed
            .iter()
            .map(|m| {
                m.name
                    .strip_suffix(":latest")
                    .unwrap_or(&m.name)
                    .to_string()
            })
            .collect();

        let mut removed = Vec::new();

        for set in self.artifacts.all() {
            if installed_names.contains(&set.trained_model_name) {
                continue;
            }
            for path in [&set.modelfile_path, &set.training_data_path] {
                if path.exists() {
                    std::fs::remove_file(path)?;
                    removed.push(file_name_of(path));
                }
            }
            self.artifacts
                .remove(&set.base_model_name, &set.custom_suffix)?;
            info!(model = %set.trained_model_name, "removed orphaned training artifacts");
        }

        // Stray files from older runs that never made it into the index.
        let indexed: Vec<PathBuf> = self
            .artifacts
            .all()
            .iter()
            .flat_map(|s| [s.modelfile_path.clone(), s.training_data_path.clone()])
            .collect();
        for entry in std::fs::read_dir(self.artifacts.dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let is_artifact_shaped =
                name.starts_with("Modelfile_") || name.starts_with("ollama_training_");
            if is_artifact_shaped && !indexed.contains(&entry.path()) {
                std::fs::remove_file(entry.path())?;
                removed.push(name);
            }
        }

        Ok(removed)
    }

    async fn key_lock(&self, key: &ArtifactKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks.entry(key.clone()).or_default().clone()
    }
}

// ============ Selection, examples, rendering ============

/// Resolve selected files/folders against the snapshot. Invalid paths are
/// dropped with a warning; an empty resolution is fatal.
fn resolve_selection<'a>(
    snapshot: &'a [DocumentUnit],
    selected_paths: &[String],
) -> Result<Vec<&'a DocumentUnit>> {
    if snapshot.is_empty() {
        return Err(Error::NoTrainableContent {
            message: "knowledge base is empty".to_string(),
        });
    }

    if selected_paths.is_empty() {
        return Ok(snapshot.iter().collect());
    }

    let mut units: Vec<&DocumentUnit> = Vec::new();
    for raw in selected_paths {
        let path = raw.trim_matches('/');
        let matched: Vec<&DocumentUnit> = snapshot
            .iter()
            .filter(|u| {
                u.filename == path
                    || u.folder_path == path
                    || u.folder_path.starts_with(&format!("{path}/"))
            })
            .collect();
        if matched.is_empty() {
            warn!(path = raw.as_str(), "selected path matched nothing, dropping");
        }
        for unit in matched {
            if !units
                .iter()
                .any(|u| u.filename == unit.filename && u.section_header == unit.section_header)
            {
                units.push(unit);
            }
        }
    }

    if units.is_empty() {
        return Err(Error::NoTrainableContent {
            message: "none of the selected paths matched knowledge-base documents".to_string(),
        });
    }
    Ok(units)
}

/// One instruction/response record per usable section, plus the fixed
/// identity records derived from the behavior profile.
fn build_examples(
    units: &[&DocumentUnit],
    profile: &BehaviorProfile,
    min_section_chars: usize,
) -> Vec<TrainingExample> {
    let mut examples = Vec::new();

    for unit in units {
        let content = unit.content.trim();
        if content.len() < min_section_chars {
            continue;
        }

        let instruction = match &unit.section_header {
            Some(header) => format!("What is {}?", header.to_lowercase()),
            None => format!(
                "What information is in {}?",
                unit.filename.trim_end_matches(".md").replace(['_', '-'], " ")
            ),
        };

        examples.push(TrainingExample {
            instruction,
            input: String::new(),
            output: format!(
                "Based on the knowledge base:\n\n{}\n\nSource: {}",
                content, unit.filename
            ),
        });
    }

    let identity_answers = [
        format!(
            "I am a personal knowledge-base assistant. {}",
            profile.description
        ),
        profile.raw_text.trim().to_string(),
        "I answer from the documents in this knowledge base and say so when they do not cover a question.".to_string(),
    ];
    for (question, answer) in IDENTITY_QUESTIONS.iter().zip(identity_answers) {
        examples.push(TrainingExample {
            instruction: question.to_string(),
            input: String::new(),
            output: answer,
        });
    }

    examples
}

fn write_dataset(path: &std::path::Path, examples: &[TrainingExample]) -> Result<()> {
    let mut out = String::new();
    for example in examples {
        let line = serde_json::to_string(example)
            .map_err(|e| Error::engine(format!("failed to encode training example: {e}")))?;
        out.push_str(&line);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

fn render_modelfile(
    base_model: &str,
    profile: &BehaviorProfile,
    training_data_path: &std::path::Path,
) -> String {
    format!(
        r#"FROM {base_model}
SYSTEM """{system}"""

PARAMETER temperature 0.3
PARAMETER top_p 0.8
PARAMETER top_k 40
PARAMETER num_predict 150
PARAMETER repeat_penalty 1.1
PARAMETER num_ctx 2048
PARAMETER stop "Human:"
PARAMETER stop "Assistant:"

TRAIN {train_path}
"#,
        base_model = base_model,
        system = profile.raw_text.trim(),
        train_path = training_data_path.display(),
    )
}

/// Engine model names contain `:` and `/`, which are not valid in derived
/// names or file names.
pub fn sanitize_model_name(name: &str) -> String {
    name.replace([':', '/'], "_")
}

fn sanitize_suffix(suffix: &str) -> String {
    suffix
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// The deterministic name a `(base model, suffix)` pair trains into.
pub fn derived_model_name(base_model: &str, suffix: &str) -> String {
    format!("{}-{}", sanitize_model_name(base_model), suffix)
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
