//! Typed error taxonomy for the core subsystems.
//!
//! Lifecycle and training failures are always surfaced as one of these
//! variants; transient local failures (tool timeouts, cache misses) are
//! absorbed at their call sites with a logged warning instead. Each variant
//! carries a human-readable message and maps to a stable machine-readable
//! kind via [`Error::kind`]; callers never see a raw backtrace.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The inference engine could not be reached at all. Recoverable;
    /// callers may retry once the engine is back.
    #[error("inference engine unavailable: {message}")]
    EngineUnavailable { message: String },

    /// The engine was reachable but rejected the request.
    #[error("inference engine error: {message}")]
    Engine { message: String },

    /// A model did not confirm `Running` within the start deadline. Its
    /// state has been reverted to `Stopped`.
    #[error("model '{model}' did not start within {seconds}s")]
    StartTimeout { model: String, seconds: u64 },

    /// A model did not confirm `Stopped` within the stop deadline. Its
    /// state has been reverted to `Running`.
    #[error("model '{model}' did not stop within {seconds}s")]
    StopTimeout { model: String, seconds: u64 },

    /// Training selection resolved to zero documents.
    #[error("no trainable content: {message}")]
    NoTrainableContent { message: String },

    /// The engine rejected the assembled Modelfile. The artifact files are
    /// left on disk so a retry does not rebuild the dataset.
    #[error("engine rejected training artifacts: {message}")]
    TrainingEngineFailure { message: String },

    /// A file-tool lookup found nothing.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A caller referenced a model or path that does not exist (or escapes
    /// the knowledge-base root).
    #[error("invalid selection: {message}")]
    InvalidSelection { message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable kind, used in HTTP error bodies and
    /// streaming `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EngineUnavailable { .. } => "engine_unavailable",
            Self::Engine { .. } => "engine_error",
            Self::StartTimeout { .. } => "start_timeout",
            Self::StopTimeout { .. } => "stop_timeout",
            Self::NoTrainableContent { .. } => "no_trainable_content",
            Self::TrainingEngineFailure { .. } => "training_engine_failure",
            Self::NotFound { .. } => "not_found",
            Self::InvalidSelection { .. } => "invalid_selection",
            Self::Io(_) => "io_error",
        }
    }

    pub fn engine_unavailable(message: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid_selection(message: impl Into<String>) -> Self {
        Self::InvalidSelection {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(
            Error::engine_unavailable("down").kind(),
            "engine_unavailable"
        );
        assert_eq!(
            Error::StartTimeout {
                model: "m".into(),
                seconds: 30
            }
            .kind(),
            "start_timeout"
        );
        assert_eq!(Error::not_found("x").kind(), "not_found");
    }

    #[test]
    fn messages_are_human_readable() {
        let e = Error::StartTimeout {
            model: "llama3.2:3b".into(),
            seconds: 60,
        };
        assert_eq!(e.to_string(), "model 'llama3.2:3b' did not start within 60s");
    }
}
