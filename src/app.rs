//! Process-wide application context.
//!
//! One [`App`] wires the document store, file tools, behavior profiles,
//! model registry, lifecycle manager, trainer, and orchestrator around a
//! shared engine client. Mutable process-wide state (selected model,
//! selected behavior, store snapshot) lives behind atomic swaps inside the
//! respective components, never as free globals.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::behavior::BehaviorSet;
use crate::config::Config;
use crate::engine::{InferenceEngine, OllamaEngine};
use crate::lifecycle::LifecycleManager;
use crate::orchestrator::Orchestrator;
use crate::registry::ModelRegistry;
use crate::store::DocumentStore;
use crate::tools::FileTools;
use crate::trainer::{ArtifactIndex, TrainReport, TrainRequest, Trainer};

pub struct App {
    pub config: Config,
    pub engine: Arc<dyn InferenceEngine>,
    pub store: Arc<DocumentStore>,
    pub tools: Arc<FileTools>,
    pub behaviors: Arc<BehaviorSet>,
    pub registry: Arc<ModelRegistry>,
    pub lifecycle: Arc<LifecycleManager>,
    pub trainer: Arc<Trainer>,
    pub orchestrator: Arc<Orchestrator>,
}

impl App {
    /// Build the full context over the configured Ollama engine and run
    /// the initial knowledge-base scan.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let engine: Arc<dyn InferenceEngine> = Arc::new(OllamaEngine::new(&config.engine)?);
        Self::with_engine(config, engine)
    }

    /// Build the context over an arbitrary engine implementation. Used by
    /// tests to substitute a stub engine.
    pub fn with_engine(config: Config, engine: Arc<dyn InferenceEngine>) -> Result<Arc<Self>> {
        let store = Arc::new(DocumentStore::new(&config.knowledge_base)?);
        let loaded = store.reload()?;
        info!(units = loaded, root = %config.knowledge_base.root.display(), "knowledge base loaded");

        let tools = Arc::new(FileTools::new(&config.knowledge_base.root));
        let behaviors = Arc::new(BehaviorSet::new(&config.behaviors));
        let artifacts = Arc::new(ArtifactIndex::load(&config.training.artifacts_dir)?);

        let registry = Arc::new(ModelRegistry::new(
            Arc::clone(&engine),
            Arc::clone(&artifacts),
            config.training.trained_suffixes.clone(),
            Duration::from_secs(config.engine.cache_ttl_secs),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&engine),
            Arc::clone(&registry),
            &config.engine,
        ));
        let trainer = Arc::new(Trainer::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            Arc::clone(&behaviors),
            Arc::clone(&artifacts),
            config.training.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&engine),
            Arc::clone(&store),
            Arc::clone(&tools),
            Arc::clone(&lifecycle),
            Arc::clone(&behaviors),
            config.retrieval.clone(),
            config.generation.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            engine,
            store,
            tools,
            behaviors,
            registry,
            lifecycle,
            trainer,
            orchestrator,
        }))
    }

    /// Run a training request and invalidate the model listing afterwards.
    pub async fn train(&self, request: TrainRequest) -> crate::error::Result<TrainReport> {
        let report = self.trainer.train(request).await?;
        self.registry.invalidate();
        Ok(report)
    }

    /// Warm up the default model in the background so the first query does
    /// not pay the load cost. Failures only log.
    pub fn preload_default_model(&self) {
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move {
            match lifecycle.resolve_model(None).await {
                Ok(model) => match lifecycle.ensure_running(&model).await {
                    Ok(()) => info!(model = %model, "model preloaded"),
                    Err(e) => warn!(model = %model, error = %e, "model preload failed"),
                },
                Err(e) => warn!(error = %e, "no model available to preload"),
            }
        });
    }
}
