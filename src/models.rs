//! Core data models used throughout Colloquy.
//!
//! These types represent the document units, ranked sources, model
//! descriptors, and training artifacts that flow through the retrieval,
//! lifecycle, and training pipelines.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One addressable unit of the knowledge base: a markdown section (or a
/// whole headerless file), snapshotted at scan time.
///
/// Units are immutable; a rescan produces a new snapshot rather than
/// mutating units in place. Uniquely identified by
/// `(filename, folder_path, section_header)`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentUnit {
    /// Path of the source file relative to the knowledge-base root.
    pub filename: String,
    /// Containing folder relative to the root, or `"root"` for top-level files.
    pub folder_path: String,
    /// The markdown header this section sits under, if any.
    pub section_header: Option<String>,
    /// Section body text (header line excluded).
    pub content: String,
    /// File modification time at scan.
    pub modified_at: DateTime<Utc>,
}

/// A document section ranked against a query.
///
/// Derived per query, never persisted. Within one result sequence the
/// `relevance_score` is non-increasing; ties are broken by recency.
#[derive(Debug, Clone, Serialize)]
pub struct RankedSource {
    #[serde(flatten)]
    pub unit: DocumentUnit,
    /// Relevance in `[0, 100]`.
    pub relevance_score: f64,
    /// Leading slice of the section content, for display.
    pub content_preview: String,
}

/// Everything the UI needs to know about one engine-hosted model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    /// Whether the engine currently has this model loaded in memory.
    pub is_running: bool,
    /// Whether this is a derived (fine-tuned) model rather than a base model.
    pub is_trained: bool,
    /// The base model this was derived from; equals `name` for base models.
    pub base_model_name: String,
    /// Friendly one-line description.
    pub description: String,
}

/// Lifecycle state of one model, tracked per model name.
///
/// At most one transition is in flight per name at a time; a failed
/// transition reverts to the prior stable state (`Stopped` or `Running`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fine-tuning package: the Modelfile and training dataset written for
/// a `(base model, suffix)` pair, plus the derived model it produces.
///
/// Keyed by `(base_model_name, custom_suffix)`. Re-training the same key
/// overwrites the files in place rather than creating a second set.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct TrainingArtifactSet {
    pub base_model_name: String,
    pub custom_suffix: String,
    pub modelfile_path: std::path::PathBuf,
    pub training_data_path: std::path::PathBuf,
    /// Name the derived model is registered under in the engine.
    pub trained_model_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whether a training run created a new artifact set or updated an
/// existing one in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainOutcome {
    Created,
    Updated,
}

/// A personality profile: a plain text file that shapes the assistant's
/// tone at query time and seeds identity records at training time.
#[derive(Debug, Clone, Serialize)]
pub struct BehaviorProfile {
    /// File name within the behaviors directory, or `"default"` for the
    /// built-in fallback.
    pub filename: String,
    pub display_name: String,
    pub description: String,
    /// Full profile text, spliced verbatim into prompts.
    #[serde(skip)]
    pub raw_text: String,
}

/// Events produced by a streaming query, in order: exactly one `Metadata`,
/// zero or more `Chunk`s, then exactly one of `Done` or `Error`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryEvent {
    Metadata {
        model_used: String,
        sources: Vec<RankedSource>,
        include_files: bool,
    },
    Chunk {
        response: String,
    },
    Done {
        done: bool,
    },
    Error {
        error: String,
        kind: String,
    },
}

impl QueryEvent {
    pub fn done() -> Self {
        Self::Done { done: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_state_round_trip() {
        for s in [
            ModelState::Stopped,
            ModelState::Starting,
            ModelState::Running,
            ModelState::Stopping,
        ] {
            assert!(!s.as_str().is_empty());
            assert_eq!(s.to_string(), s.as_str());
        }
    }

    #[test]
    fn query_events_serialize_to_wire_shapes() {
        let meta = QueryEvent::Metadata {
            model_used: "llama3.2:3b".into(),
            sources: vec![],
            include_files: true,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["model_used"], "llama3.2:3b");
        assert_eq!(json["include_files"], true);

        let chunk = QueryEvent::Chunk {
            response: "hello".into(),
        };
        assert_eq!(serde_json::to_value(&chunk).unwrap()["response"], "hello");

        let done = QueryEvent::done();
        assert_eq!(serde_json::to_value(&done).unwrap()["done"], true);

        let err = QueryEvent::Error {
            error: "engine gone".into(),
            kind: "engine_unavailable".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "engine_unavailable");
    }
}
