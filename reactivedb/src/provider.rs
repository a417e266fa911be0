//! The storage contract every backend (in-memory, networked, or otherwise)
//! must satisfy. Modeled on the `async_trait`-based adapter traits this
//! crate's host codebase puts at its storage seams: one method per
//! operation, `Result<T>` returns, `Debug + Send + Sync` so providers can
//! be held behind an `Arc<dyn Provider>`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::query::Descriptor;
use crate::state::Unsubscribe;
use crate::value::UpdateOp;

/// Callback invoked with the latest value of a single document (`None` if
/// absent) whenever it changes.
pub type ItemObserver = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Callback invoked with the latest ordered view of a query whenever it
/// changes.
pub type QueryObserver = Arc<dyn Fn(Vec<(String, Value)>) + Send + Sync>;

/// The contract a storage backend implements. The [`crate::reference`]
/// facade never talks to a backend any other way.
#[async_trait]
pub trait Provider: std::fmt::Debug + Send + Sync {
	async fn get_item(&self, collection: &str, id: &str) -> Result<Option<Value>>;
	async fn set_item(&self, collection: &str, id: &str, record: Value) -> Result<()>;
	async fn update_item(&self, collection: &str, id: &str, updates: Vec<(String, UpdateOp)>) -> Result<()>;
	async fn delete_item(&self, collection: &str, id: &str) -> Result<()>;
	/// Inserts `record` under a freshly generated id, returning it.
	async fn add_item(&self, collection: &str, record: Value) -> Result<String>;

	async fn get_query(&self, collection: &str, descriptor: &Descriptor) -> Result<Vec<(String, Value)>>;
	async fn count_query(&self, collection: &str, descriptor: &Descriptor) -> Result<usize>;
	async fn delete_query(&self, collection: &str, descriptor: &Descriptor) -> Result<usize>;
	async fn update_query(
		&self,
		collection: &str,
		descriptor: &Descriptor,
		updates: Vec<(String, UpdateOp)>,
	) -> Result<usize>;

	async fn subscribe_item(&self, collection: &str, id: &str, observer: ItemObserver) -> Result<Unsubscribe>;
	async fn subscribe_query(
		&self,
		collection: &str,
		descriptor: &Descriptor,
		observer: QueryObserver,
	) -> Result<Unsubscribe>;
}

// vim: ts=4
