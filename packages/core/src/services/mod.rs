//! Business Services
//!
//! This module contains the content tree's business logic:
//!
//! - `TreeService` - the operation surface (create, update, order, link, lifecycle, queries)
//! - `LifecycleEngine` - cascading trash, single-node restore, subtree purge, checked moves
//! - `OrderingManager` - the only writer of a collection's child arrays
//! - `PrerequisiteGraphManager` - prerequisite edges and their acyclicity
//! - `TreeQuery` - read-side assembly (tree levels, ordered children, breadcrumbs, trash)
//! - `UnitOfWork` - staged, revision-guarded reads and writes of one command
//!
//! Services coordinate between the database layer and callers, implementing
//! business rules and keeping every command atomic.

pub mod error;
pub mod idempotency;
pub mod invariants;
pub mod lifecycle;
pub mod ordering;
pub mod prerequisites;
pub mod query;
pub mod tree_service;
pub mod unit_of_work;

pub use error::TreeError;
pub use idempotency::{Claim, ClaimGuard, IdempotencyCache};
pub use invariants::{audit, InvariantViolation};
pub use lifecycle::{LifecycleEngine, MoveOutcome, Subtree};
pub use ordering::OrderingManager;
pub use prerequisites::PrerequisiteGraphManager;
pub use query::TreeQuery;
pub use tree_service::TreeService;
pub use unit_of_work::UnitOfWork;
