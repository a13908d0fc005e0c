//! # Colloquy
//!
//! A local-first knowledge-base assistant over Ollama.
//!
//! Colloquy scans a markdown knowledge base into addressable document
//! units, ranks them against natural-language questions, manages the
//! engine's models (start/stop/select/fine-tune), and streams grounded
//! answers back as an ordered event sequence.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌───────────────┐
//! │ Document   │──▶│ Relevance │──▶│   Streaming    │
//! │ Store      │   │ Ranker    │   │  Orchestrator  │──▶ data: events
//! └────────────┘   └──────────┘   └───────┬───────┘
//!       │          ┌──────────┐           │
//!       └─────────▶│ File     │───────────┤
//!                  │ Tools    │           ▼
//! ┌────────────┐   └──────────┘   ┌───────────────┐
//! │ Training   │◀──────────────── │   Lifecycle    │
//! │ Artifact   │                  │ Mgr + Registry │
//! │ Builder    │─────────────────▶│    (Ollama)    │
//! └────────────┘                  └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Knowledge-base scanning and snapshots |
//! | [`rank`] | Lexical relevance ranking |
//! | [`intent`] | File-intent classification |
//! | [`tools`] | Deterministic file-system query tools |
//! | [`engine`] | Inference engine boundary (Ollama client) |
//! | [`registry`] | Model registry with TTL cache |
//! | [`lifecycle`] | Per-model start/stop state machine |
//! | [`behavior`] | Behavior (personality) profiles |
//! | [`trainer`] | Training artifact builder |
//! | [`orchestrator`] | Streaming query pipeline |
//! | [`server`] | HTTP surface for the UI |
//! | [`app`] | Process-wide context wiring |

pub mod app;
pub mod behavior;
pub mod config;
pub mod engine;
pub mod error;
pub mod intent;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod rank;
pub mod registry;
pub mod server;
pub mod store;
pub mod tools;
pub mod trainer;
