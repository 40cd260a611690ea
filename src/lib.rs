// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # activity-sync
//!
//! Resumable pagination engine that pulls community activity (chat
//! messages, social mentions, article comments, repository events) into a
//! canonical activity/member stream.
//!
//! ## Features
//!
//! - **Checkpointed iteration**: every step produces a serializable
//!   `{endpoints, endpoint, page}` cursor that resumes exactly
//! - **Limit aware**: response budgets, global quotas and wall-clock
//!   ceilings either sleep in place or hand off a continuation message
//! - **Dynamic discovery**: adapters splice newly found sub-resources
//!   (threads, comment feeds) into the working queue mid-run
//! - **Credential pool**: shared per-credential budgets with rotation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use activity_sync::adapter::ArticleAdapter;
//! use activity_sync::engine::{iterate, Iteration, RunMode};
//!
//! let mut adapter = ArticleAdapter::new(ctx, source, articles);
//! let iteration = Iteration::new(adapter.universe(), checkpoint, false, None, 0);
//! let report = iterate(&mut adapter, iteration, RunMode::short_lived_default()).await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       iterate(adapter, ...)                     │
//! │   get → parse_and_write → transition → sleep | hand off | done  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │Checkpoint│  Adapter  │     Pool      │   Queue   │   Store     │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ Endpoint │ Chat      │ Budgets       │ Trigger   │ Bulk sink   │
//! │ Codec    │ Social    │ Rotation      │ Memory    │ Settings    │
//! │ Deque    │ Article   │ Retry wrapper │ JSONL     │ Completion  │
//! │          │ Reach/Repo│               │           │             │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(missing_docs)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Checkpoints, endpoint ids and the working queue
pub mod checkpoint;

/// Canonical activity and member drafts
pub mod activity;

/// Pagination state machine
pub mod engine;

/// Platform adapters
pub mod adapter;

/// Shared credential budget pool
pub mod pool;

/// HTTP client, retry policy and rate limiting
pub mod http;

/// Continuation messages and queues
pub mod queue;

/// Activity sinks and integration settings
pub mod store;

/// Engine configuration
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

pub use checkpoint::{Checkpoint, EndpointId};
pub use engine::{iterate, Iteration, RunMode, RunOutcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
