//! Database Layer
//!
//! This module handles durable storage of the content tree:
//!
//! - The [`NodeStore`] trait: owner-scoped reads plus one atomic write entry point
//! - [`MemoryStore`]: in-process backend for tests and ephemeral services
//! - `TursoStore`: embedded libsql backend (feature `turso`, on by default)
//! - [`DomainEvent`]: change notifications published by the service layer
//!
//! # Architecture
//!
//! Records carry a store-managed `revision`. Writers stage a [`WriteBatch`] of
//! revision-guarded mutations; a backend applies the batch completely or not
//! at all and reports a lost race as [`StoreError::Conflict`].

mod error;
pub mod events;
mod memory_store;
mod node_store;
#[cfg(feature = "turso")]
mod turso_store;

pub use error::StoreError;
pub use events::DomainEvent;
pub use memory_store::MemoryStore;
pub use node_store::{
    Mutation, NodeFilter, NodeStore, ParentScope, Record, StoreResult, TrashFilter, WriteBatch,
};
#[cfg(feature = "turso")]
pub use turso_store::TursoStore;
