//! Model registry: a TTL-cached view of the engine's installed and running
//! models, classified into base and trained models.
//!
//! Classification consults the training artifact index first (the source
//! of truth for models trained here) and falls back to the
//! configured derived-name suffixes for models trained outside this
//! system. When the engine is unreachable the registry serves the last
//! good listing flagged stale, or a typed `EngineUnavailable` error if it
//! has never seen one.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::engine::{EngineModel, InferenceEngine};
use crate::error::{Error, Result};
use crate::models::ModelDescriptor;
use crate::trainer::ArtifactIndex;

/// Friendly one-liners for well-known model families.
const KNOWN_DESCRIPTIONS: &[(&str, &str)] = &[
    ("llama2", "Meta's LLaMA 2 - general purpose, well-balanced"),
    ("llama3.2:3b", "Meta's LLaMA 3.2 3B - fast and efficient"),
    ("llama3.2:1b", "Meta's LLaMA 3.2 1B - ultra-fast, lightweight"),
    ("mistral", "Mistral 7B - fast and capable"),
    ("codellama", "Code Llama - specialized for programming"),
    ("phi3", "Microsoft Phi-3 - small but powerful"),
    ("qwen", "Alibaba Qwen - multilingual"),
    ("gemma", "Google Gemma - research-focused"),
    ("nomic-embed-text", "Nomic Embed - text embeddings only"),
];

/// A model listing plus whether it came from an expired cache because the
/// engine was unreachable.
#[derive(Debug, Clone)]
pub struct ModelListing {
    pub models: Vec<ModelDescriptor>,
    pub stale: bool,
}

struct CacheEntry {
    models: Vec<ModelDescriptor>,
    fetched_at: Instant,
}

pub struct ModelRegistry {
    engine: Arc<dyn InferenceEngine>,
    artifacts: Arc<ArtifactIndex>,
    trained_suffixes: Vec<String>,
    ttl: Duration,
    cache: Mutex<Option<CacheEntry>>,
    /// Collapses concurrent refreshes into one in-flight engine call.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ModelRegistry {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        artifacts: Arc<ArtifactIndex>,
        trained_suffixes: Vec<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            engine,
            artifacts,
            trained_suffixes,
            ttl,
            cache: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The current model listing, served from cache within the TTL.
    pub async fn list_models(&self) -> Result<ModelListing> {
        if let Some(models) = self.cached_fresh() {
            return Ok(ModelListing {
                models,
                stale: false,
            });
        }

        let _writer = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(models) = self.cached_fresh() {
            return Ok(ModelListing {
                models,
                stale: false,
            });
        }

        match self.fetch().await {
            Ok(models) => {
                *self.cache.lock().expect("registry lock poisoned") = Some(CacheEntry {
                    models: models.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(ModelListing {
                    models,
                    stale: false,
                })
            }
            Err(e) => {
                let cached = self
                    .cache
                    .lock()
                    .expect("registry lock poisoned")
                    .as_ref()
                    .map(|entry| entry.models.clone());
                match cached {
                    Some(models) => {
                        warn!(error = %e, "engine unreachable, serving stale model listing");
                        Ok(ModelListing {
                            models,
                            stale: true,
                        })
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Drop the cache and re-query the engine.
    pub async fn refresh(&self) -> Result<ModelListing> {
        self.invalidate();
        self.list_models().await
    }

    /// Drop the cache. Called after every start/stop/train/delete mutation.
    pub fn invalidate(&self) {
        *self.cache.lock().expect("registry lock poisoned") = None;
    }

    /// Look up one model by name in the current listing.
    pub async fn find(&self, name: &str) -> Result<Option<ModelDescriptor>> {
        let listing = self.list_models().await?;
        Ok(listing.models.into_iter().find(|m| m.name == name))
    }

    fn cached_fresh(&self) -> Option<Vec<ModelDescriptor>> {
        let cache = self.cache.lock().expect("registry lock poisoned");
        cache
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.models.clone())
    }

    async fn fetch(&self) -> Result<Vec<ModelDescriptor>> {
        let installed = self.engine.list_models().await?;
        // A ps failure should not hide the listing; report nothing running.
        let running = match self.engine.running_models().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "could not query running models");
                Vec::new()
            }
        };

        debug!(installed = installed.len(), running = running.len(), "model listing refreshed");

        Ok(installed
            .into_iter()
            .map(|m| self.describe(m, &running))
            .collect())
    }

    fn describe(&self, model: EngineModel, running: &[String]) -> ModelDescriptor {
        let classification = classify(&model.name, &self.artifacts, &self.trained_suffixes);
        let description = describe_model(&model.name, &classification);
        ModelDescriptor {
            is_running: running.contains(&model.name),
            is_trained: classification.is_trained,
            base_model_name: classification.base_model,
            description,
            name: model.name,
            size_bytes: model.size_bytes,
            modified_at: model.modified_at,
        }
    }
}

// ============ Classification ============

#[derive(Debug, Clone)]
pub(crate) struct Classification {
    pub is_trained: bool,
    pub base_model: String,
}

/// Classify a model name as base or trained and derive its base name.
///
/// The artifact index wins; the suffix convention is only a fallback for
/// models trained outside this system.
pub(crate) fn classify(
    name: &str,
    artifacts: &ArtifactIndex,
    trained_suffixes: &[String],
) -> Classification {
    if let Some(set) = artifacts.find_by_trained_name(name) {
        return Classification {
            is_trained: true,
            base_model: set.base_model_name,
        };
    }

    let bare = name.strip_suffix(":latest").unwrap_or(name);
    for suffix in trained_suffixes {
        if let Some(base) = bare.strip_suffix(&format!("-{suffix}")) {
            return Classification {
                is_trained: true,
                base_model: base.to_string(),
            };
        }
    }

    Classification {
        is_trained: false,
        base_model: name.to_string(),
    }
}

fn describe_model(name: &str, classification: &Classification) -> String {
    if let Some((_, desc)) = KNOWN_DESCRIPTIONS.iter().find(|(n, _)| *n == name) {
        return desc.to_string();
    }

    let base_lookup = classification.base_model.replace('_', ":");
    if let Some((_, desc)) = KNOWN_DESCRIPTIONS
        .iter()
        .find(|(n, _)| *n == base_lookup || *n == classification.base_model)
    {
        if classification.is_trained {
            return format!("{desc} (custom trained)");
        }
        return desc.to_string();
    }

    if classification.is_trained {
        "Custom trained model".to_string()
    } else {
        "Language model".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainingArtifactSet;
    use chrono::Utc;
    use tempfile::TempDir;

    fn index_with_entry(tmp: &TempDir) -> ArtifactIndex {
        let index = ArtifactIndex::load(tmp.path()).unwrap();
        index
            .upsert(TrainingArtifactSet {
                base_model_name: "llama3.2:3b".into(),
                custom_suffix: "qa".into(),
                modelfile_path: tmp.path().join("Modelfile_llama3.2_3b_qa"),
                training_data_path: tmp.path().join("ollama_training_llama3.2_3b_qa.jsonl"),
                trained_model_name: "llama3.2_3b-qa".into(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();
        index
    }

    fn suffixes() -> Vec<String> {
        vec!["trained".to_string(), "tech".to_string()]
    }

    #[test]
    fn artifact_index_is_source_of_truth() {
        let tmp = TempDir::new().unwrap();
        let index = index_with_entry(&tmp);

        // "qa" is not in the suffix fallback, but the index knows it.
        let c = classify("llama3.2_3b-qa", &index, &suffixes());
        assert!(c.is_trained);
        assert_eq!(c.base_model, "llama3.2:3b");

        // Tagged variants resolve too.
        let c = classify("llama3.2_3b-qa:latest", &index, &suffixes());
        assert!(c.is_trained);
    }

    #[test]
    fn suffix_convention_is_the_fallback() {
        let tmp = TempDir::new().unwrap();
        let index = ArtifactIndex::load(tmp.path()).unwrap();

        let c = classify("mistral-trained", &index, &suffixes());
        assert!(c.is_trained);
        assert_eq!(c.base_model, "mistral");

        let c = classify("mistral-trained:latest", &index, &suffixes());
        assert!(c.is_trained);
        assert_eq!(c.base_model, "mistral");

        let c = classify("qwen-tech", &index, &suffixes());
        assert!(c.is_trained);
    }

    #[test]
    fn base_models_classify_as_themselves() {
        let tmp = TempDir::new().unwrap();
        let index = ArtifactIndex::load(tmp.path()).unwrap();

        let c = classify("llama3.2:3b", &index, &suffixes());
        assert!(!c.is_trained);
        assert_eq!(c.base_model, "llama3.2:3b");
    }

    #[test]
    fn descriptions_cover_known_and_derived_models() {
        let tmp = TempDir::new().unwrap();
        let index = ArtifactIndex::load(tmp.path()).unwrap();

        let base = classify("llama3.2:3b", &index, &suffixes());
        assert!(describe_model("llama3.2:3b", &base).contains("LLaMA 3.2 3B"));

        let trained = classify("mistral-trained", &index, &suffixes());
        let desc = describe_model("mistral-trained", &trained);
        assert!(desc.contains("Mistral"));
        assert!(desc.contains("custom trained"));

        let unknown = classify("somethingelse", &index, &suffixes());
        assert_eq!(describe_model("somethingelse", &unknown), "Language model");
    }
}
