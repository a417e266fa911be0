//! Reference in-memory [`Provider`](reactivedb::Provider) implementation
//! for `reactivedb`: every record lives in process memory, lost on drop,
//! with subscriptions dispatched at the database's scheduling boundary.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod id;
mod provider;

pub use config::ProviderConfig;
pub use id::generate_id;
pub use provider::MemoryProvider;

// vim: ts=4
