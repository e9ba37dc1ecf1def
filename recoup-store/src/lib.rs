//! Recoup storage layer.
//!
//! Persistence for advances, payments, and the audit trail.
//!
//! # Architecture
//!
//! - **Repository traits**: the storage interface (ports)
//! - **In-memory store**: fast implementation for testing and development
//! - **PostgreSQL store**: production implementation (feature `postgres`)
//!
//! The audit repository is deliberately append-only: there is no update or
//! delete surface, matching the compliance requirement that audit entries
//! are immutable once written.

#![warn(clippy::all)]

mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{AdvanceRepository, AuditLogRepository, PaymentRepository, Store};
