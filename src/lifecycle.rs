//! Per-model lifecycle management.
//!
//! Tracks a `Stopped → Starting → Running → Stopping → Stopped` state
//! machine per model name and guards it so at most one transition is in
//! flight per name. A `start` or `stop` arriving while the same transition
//! is already running waits on the per-model lock and then observes the
//! resulting state instead of issuing a duplicate engine call. Distinct
//! model names transition independently and concurrently.
//!
//! Also owns the process-wide "selected model" used by the orchestrator
//! when a request names no model: explicit state with an atomic swap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::InferenceEngine;
use crate::error::{Error, Result};
use crate::models::ModelState;
use crate::registry::ModelRegistry;

/// Base models tried, in order, when nothing is selected and no trained
/// model is available.
const PREFERRED_DEFAULTS: &[&str] = &["llama3.2:3b", "llama2", "mistral", "codellama"];

struct ModelSlot {
    state: Mutex<ModelState>,
    /// Held for the duration of a transition; joiners queue here.
    transition: tokio::sync::Mutex<()>,
}

impl ModelSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(ModelState::Stopped),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> ModelState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: ModelState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }
}

pub struct LifecycleManager {
    engine: Arc<dyn InferenceEngine>,
    registry: Arc<ModelRegistry>,
    slots: Mutex<HashMap<String, Arc<ModelSlot>>>,
    selected: RwLock<Option<String>>,
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        registry: Arc<ModelRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            slots: Mutex::new(HashMap::new()),
            selected: RwLock::new(None),
            start_timeout: Duration::from_secs(config.start_timeout_secs),
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
        }
    }

    /// Observed state for a model; `Stopped` until seen otherwise.
    pub fn state_of(&self, name: &str) -> ModelState {
        self.slot(name).state()
    }

    /// Load a model into engine memory.
    ///
    /// A failed or timed-out start reverts the state to `Stopped` and
    /// surfaces a typed error.
    pub async fn start(&self, name: &str) -> Result<()> {
        let slot = self.slot(name);
        if slot.state() == ModelState::Running {
            return Ok(());
        }

        let _guard = slot.transition.lock().await;
        // An in-flight start we queued behind may have finished the job.
        if slot.state() == ModelState::Running {
            return Ok(());
        }

        slot.set_state(ModelState::Starting);
        match timeout(self.start_timeout, self.engine.start(name)).await {
            Ok(Ok(())) => {
                slot.set_state(ModelState::Running);
                self.registry.invalidate();
                info!(model = name, "model started");
                Ok(())
            }
            Ok(Err(e)) => {
                slot.set_state(ModelState::Stopped);
                warn!(model = name, error = %e, "model start failed");
                Err(e)
            }
            Err(_) => {
                slot.set_state(ModelState::Stopped);
                Err(Error::StartTimeout {
                    model: name.to_string(),
                    seconds: self.start_timeout.as_secs(),
                })
            }
        }
    }

    /// Unload a model from engine memory.
    ///
    /// A failed or timed-out stop reverts the state to `Running`.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let slot = self.slot(name);

        let _guard = slot.transition.lock().await;
        if slot.state() == ModelState::Stopped {
            // A model can be loaded engine-side without this process ever
            // having started it (e.g. after a restart).
            if !self.engine_running(name).await {
                return Ok(());
            }
            slot.set_state(ModelState::Running);
        }

        slot.set_state(ModelState::Stopping);
        match timeout(self.stop_timeout, self.engine.stop(name)).await {
            Ok(Ok(())) => {
                slot.set_state(ModelState::Stopped);
                self.registry.invalidate();
                info!(model = name, "model stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                slot.set_state(ModelState::Running);
                warn!(model = name, error = %e, "model stop failed");
                Err(e)
            }
            Err(_) => {
                slot.set_state(ModelState::Running);
                Err(Error::StopTimeout {
                    model: name.to_string(),
                    seconds: self.stop_timeout.as_secs(),
                })
            }
        }
    }

    /// Make sure a model is loaded before generation, within the start
    /// deadline.
    ///
    /// A model may be running engine-side without this process having
    /// started it; the engine's view is reconciled first.
    pub async fn ensure_running(&self, name: &str) -> Result<()> {
        let slot = self.slot(name);
        if slot.state() == ModelState::Running {
            return Ok(());
        }

        if self.engine_running(name).await {
            slot.set_state(ModelState::Running);
            return Ok(());
        }

        self.start(name).await
    }

    async fn engine_running(&self, name: &str) -> bool {
        match self.engine.running_models().await {
            Ok(running) => running.iter().any(|m| m == name),
            Err(e) => {
                warn!(model = name, error = %e, "could not reconcile running state");
                false
            }
        }
    }

    /// Select a model as the process-wide default, starting it if needed.
    pub async fn select(&self, name: &str) -> Result<()> {
        let listing = self.registry.list_models().await?;
        if !listing.models.iter().any(|m| m.name == name) {
            return Err(Error::invalid_selection(format!(
                "model '{name}' is not installed"
            )));
        }

        self.ensure_running(name).await?;
        *self.selected.write().expect("selected lock poisoned") = Some(name.to_string());
        info!(model = name, "model selected");
        Ok(())
    }

    /// The currently selected model, if any.
    pub fn selected_model(&self) -> Option<String> {
        self.selected
            .read()
            .expect("selected lock poisoned")
            .clone()
    }

    /// The model a request should use: the explicit choice, else the
    /// selected model, else a deterministic default (trained models first,
    /// then well-known bases, then the first installed).
    pub async fn resolve_model(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(name) = explicit {
            return Ok(name.to_string());
        }
        if let Some(name) = self.selected_model() {
            return Ok(name);
        }

        let listing = self.registry.list_models().await?;
        if let Some(trained) = listing.models.iter().find(|m| m.is_trained) {
            return Ok(trained.name.clone());
        }
        for preferred in PREFERRED_DEFAULTS {
            if let Some(m) = listing.models.iter().find(|m| m.name == *preferred) {
                return Ok(m.name.clone());
            }
        }
        listing
            .models
            .first()
            .map(|m| m.name.clone())
            .ok_or_else(|| Error::invalid_selection("no models installed"))
    }

    /// Delete a model from the engine and drop its tracked state.
    ///
    /// Training artifact files are left alone; removing them is an
    /// explicit cleanup operation.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.engine.delete_model(name).await?;

        self.slots.lock().expect("slots lock poisoned").remove(name);
        {
            let mut selected = self.selected.write().expect("selected lock poisoned");
            if selected.as_deref() == Some(name) {
                *selected = None;
            }
        }
        self.registry.invalidate();
        info!(model = name, "model deleted");
        Ok(())
    }

    fn slot(&self, name: &str) -> Arc<ModelSlot> {
        self.slots
            .lock()
            .expect("slots lock poisoned")
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ModelSlot::new()))
            .clone()
    }
}
