//! Checkpoint module
//!
//! The serializable cursor that lets an integration run stop anywhere and
//! resume exactly where it left off.
//!
//! # Overview
//!
//! The checkpoint module provides:
//! - `EndpointId` - Simple or composite endpoint identifier
//! - `Checkpoint` - `{endpoints, endpoint, page}` cursor
//! - `EndpointQueue` - Working queue with `insert_after` for discovered endpoints

mod queue;
mod types;

pub use queue::EndpointQueue;
pub use types::{Checkpoint, CommentFeed, CompositeEndpoint, EndpointId, ReachSubject};
