//! Loom Core - Foundational types for the Loom generation graph
//!
//! This crate provides the types that every other Loom crate depends on:
//! - `JobId` - Identity of one generation slot (graph + node)
//! - `LeaseId` - Identity of one exclusive lease on a slot
//! - `ContentHash` - SHA-256 based content hashing for artifacts
//! - Error types and Result alias

mod error;
mod hash;
mod id;

pub use error::{
    truncate_detail, LoomError, ProviderError, ProviderErrorKind, Result, STATUS_DETAIL_LIMIT,
};
pub use hash::ContentHash;
pub use id::{JobId, LeaseId};
