//! Behavior (personality) profiles.
//!
//! Profiles are plain text files in a configurable directory. The selected
//! profile is process-wide state held behind an atomic swap; it shapes
//! query prompts and seeds identity records at training time. Selection is
//! not persisted; a restart goes back to the configured default.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::config::BehaviorsConfig;
use crate::error::{Error, Result};
use crate::models::BehaviorProfile;

/// Prompt used when no profile file is available at all.
const DEFAULT_PROMPT: &str =
    "You are a helpful AI assistant. Provide accurate, clear, and helpful responses.";

const PROFILE_EXTENSIONS: &[&str] = &["md", "txt"];
const DESCRIPTION_CHARS: usize = 120;

pub struct BehaviorSet {
    dir: PathBuf,
    current: RwLock<Arc<BehaviorProfile>>,
}

impl BehaviorSet {
    /// Load the configured default profile, falling back to the built-in
    /// prompt when the file is missing.
    pub fn new(config: &BehaviorsConfig) -> Self {
        let set = Self {
            dir: config.dir.clone(),
            current: RwLock::new(Arc::new(built_in_default())),
        };

        match set.load(&config.default_file) {
            Ok(profile) => {
                *set.current.write().expect("behavior lock poisoned") = Arc::new(profile);
            }
            Err(e) => {
                warn!(file = %config.default_file, error = %e, "no default behavior profile, using built-in");
            }
        }

        set
    }

    /// All selectable profiles in the behaviors directory.
    pub fn list(&self) -> Vec<BehaviorProfile> {
        let mut profiles: Vec<BehaviorProfile> = std::fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| PROFILE_EXTENSIONS.contains(&ext))
                    .unwrap_or(false)
            })
            .filter_map(|e| {
                let filename = e.file_name().to_string_lossy().to_string();
                self.load(&filename).ok()
            })
            .collect();
        profiles.sort_by(|a, b| a.filename.cmp(&b.filename));
        profiles
    }

    /// Load one profile by file name, or `NotFound`.
    pub fn load(&self, filename: &str) -> Result<BehaviorProfile> {
        let path = self.dir.join(filename);
        let raw_text = std::fs::read_to_string(&path)
            .map_err(|_| Error::not_found(format!("behavior profile '{filename}'")))?;
        Ok(profile_from(filename, raw_text))
    }

    /// Select a profile as the process-wide current one.
    pub fn select(&self, filename: &str) -> Result<BehaviorProfile> {
        let profile = self.load(filename)?;
        *self.current.write().expect("behavior lock poisoned") = Arc::new(profile.clone());
        Ok(profile)
    }

    /// Re-read the currently selected profile from disk.
    pub fn reload(&self) -> Result<BehaviorProfile> {
        let filename = self.current().filename.clone();
        if filename == "default" {
            return Ok(built_in_default());
        }
        self.select(&filename)
    }

    /// The current profile. Cheap clone of an `Arc` snapshot.
    pub fn current(&self) -> Arc<BehaviorProfile> {
        self.current.read().expect("behavior lock poisoned").clone()
    }

    /// Load `filename` if given and present, otherwise the current profile.
    /// The boolean reports whether the fallback was taken despite an
    /// explicit request.
    pub fn resolve(&self, filename: Option<&str>) -> (Arc<BehaviorProfile>, bool) {
        match filename {
            None => (self.current(), false),
            Some(name) => match self.load(name) {
                Ok(profile) => (Arc::new(profile), false),
                Err(e) => {
                    warn!(file = name, error = %e, "requested behavior profile missing, using current");
                    (self.current(), true)
                }
            },
        }
    }
}

fn built_in_default() -> BehaviorProfile {
    BehaviorProfile {
        filename: "default".to_string(),
        display_name: "Default".to_string(),
        description: "Built-in fallback profile".to_string(),
        raw_text: DEFAULT_PROMPT.to_string(),
    }
}

fn profile_from(filename: &str, raw_text: String) -> BehaviorProfile {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    let display_name = stem.replace(['_', '-'], " ");

    let description = raw_text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .unwrap_or("")
        .chars()
        .take(DESCRIPTION_CHARS)
        .collect();

    BehaviorProfile {
        filename: filename.to_string(),
        display_name,
        description,
        raw_text,
    }
}
