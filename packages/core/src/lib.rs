//! Folio Core - Hierarchical Content Store
//!
//! This crate provides the multi-tenant content tree behind Folio: collections
//! and content owned by one user each, explicit child ordering, cascading
//! trash with single-node restore, permanent purge, and the prerequisite
//! graph between content items.
//!
//! # Architecture
//!
//! - **Owner-scoped storage**: a node owned by someone else reads as missing
//! - **Atomic commands**: each operation stages its changes on a unit of work
//!   and commits them as one revision-guarded batch
//! - **Pluggable backends**: in-memory store, or embedded libsql (feature `turso`)
//!
//! # Modules
//!
//! - [`models`] - Data structures (Collection, Content, patches, read views)
//! - [`services`] - Business services (TreeService, LifecycleEngine, etc.)
//! - [`db`] - NodeStore abstraction, backends and domain events
//! - [`config`] - StoreConfig
//! - [`logging`] - tracing subscriber bootstrap

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::StoreConfig;
pub use db::{DomainEvent, MemoryStore, NodeStore, StoreError};
pub use models::*;
pub use services::{TreeError, TreeService};
