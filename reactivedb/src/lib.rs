//! Schema-typed, reactive, client-side document database core.
//!
//! This crate defines the storage-agnostic half of the system: the value
//! utilities, the query descriptor model, the [`State`] reactive cell, the
//! deduplicating [`SourceCache`], the [`Provider`] contract a storage
//! backend must satisfy, and the [`Database`]/[`ItemRef`]/[`QueryRef`]
//! facade applications program against. `reactivedb-memory` supplies the
//! reference in-memory [`Provider`].

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod error;
pub mod pagination;
pub mod provider;
pub mod query;
pub mod reference;
pub mod scheduler;
pub mod source_cache;
pub mod state;
pub mod value;

pub use error::{Error, Result};
pub use pagination::Pagination;
pub use provider::Provider;
pub use query::{Descriptor, Filter, FilterOp, SortDir, SortField};
pub use reference::{Database, ItemRef, QueryRef};
pub use scheduler::Scheduler;
pub use source_cache::SourceCache;
pub use state::{State, Unsubscribe};
pub use value::{fingerprint, Patched, UpdateOp};

// vim: ts=4
