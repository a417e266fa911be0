//! The application-facing facade: [`Database`], [`Collection`], [`ItemRef`]
//! and [`QueryRef`]. Every read, write, and subscription a caller issues
//! passes through here to the configured [`Provider`], with live-value
//! subscriptions deduplicated through a pair of [`SourceCache`]s so two
//! consumers of the same item or query share one provider subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::provider::{ItemObserver, Provider, QueryObserver};
use crate::query::{Descriptor, FilterOp, SortDir};
use crate::scheduler::Scheduler;
use crate::source_cache::SourceCache;
use crate::state::Unsubscribe;
use crate::value::UpdateOp;

type ItemView = Option<Value>;
type QueryView = Vec<(String, Value)>;

/// The entry point applications construct once per storage backend.
#[derive(Clone)]
pub struct Database {
	provider: Arc<dyn Provider>,
	scheduler: Scheduler,
	item_cache: SourceCache<ItemView>,
	query_cache: SourceCache<QueryView>,
}

impl Database {
	pub fn new(provider: Arc<dyn Provider>) -> Self {
		Self {
			provider,
			scheduler: Scheduler::new(),
			item_cache: SourceCache::new(),
			query_cache: SourceCache::new(),
		}
	}

	pub fn collection(&self, name: impl Into<String>) -> Collection {
		Collection { db: self.clone(), name: Arc::from(name.into()) }
	}

	/// Convenience for `collection(name).query()`.
	pub fn query(&self, name: impl Into<String>) -> QueryRef {
		self.collection(name).query()
	}

	pub fn scheduler(&self) -> &Scheduler {
		&self.scheduler
	}
}

/// A handle to one named collection.
#[derive(Clone)]
pub struct Collection {
	db: Database,
	name: Arc<str>,
}

impl Collection {
	pub fn item(&self, id: impl Into<String>) -> ItemRef {
		ItemRef { db: self.db.clone(), collection: self.name.clone(), id: Arc::from(id.into()) }
	}

	pub fn query(&self) -> QueryRef {
		QueryRef { db: self.db.clone(), collection: self.name.clone(), descriptor: Descriptor::new() }
	}

	pub async fn add(&self, record: Value) -> Result<String> {
		self.db.provider.add_item(&self.name, record).await
	}
}

/// A reference to a single `(collection, id)` document.
#[derive(Clone)]
pub struct ItemRef {
	db: Database,
	collection: Arc<str>,
	id: Arc<str>,
}

impl ItemRef {
	pub async fn value(&self) -> Result<Option<Value>> {
		self.db.provider.get_item(&self.collection, &self.id).await
	}

	/// Like [`Self::value`] but turns absence into `Error::NotFound`.
	pub async fn require(&self) -> Result<Value> {
		self.value().await?.ok_or_else(|| Error::NotFound {
			collection: self.collection.to_string().into_boxed_str(),
			id: self.id.to_string().into_boxed_str(),
		})
	}

	pub async fn set(&self, record: Value) -> Result<()> {
		self.db.provider.set_item(&self.collection, &self.id, record).await
	}

	pub async fn update(&self, updates: Vec<(String, UpdateOp)>) -> Result<()> {
		self.db.provider.update_item(&self.collection, &self.id, updates).await
	}

	pub async fn delete(&self) -> Result<()> {
		self.db.provider.delete_item(&self.collection, &self.id).await
	}

	fn cache_key(&self) -> String {
		format!("{}/{}", self.collection, self.id)
	}

	/// Subscribes to this document's live value. Multiple subscribers to
	/// the same `(collection, id)` share one underlying provider
	/// subscription via the database's item [`SourceCache`]. `on_error` is
	/// invoked if establishing the underlying provider subscription fails;
	/// the same failure is also set on the shared cached state so a caller
	/// can retry by calling [`crate::source_cache::SourceCache::refresh`].
	pub async fn subscribe(
		&self,
		on_next: impl Fn(Option<Value>) + Send + Sync + 'static,
		on_error: impl Fn(&Error) + Send + Sync + 'static,
	) -> Unsubscribe {
		let key = self.cache_key();
		let scheduler = self.db.scheduler.clone();
		self.db.item_cache.acquire(&key, move || {
			crate::state::State::from_future(scheduler, async { Ok(None) })
		});
		let provider = self.db.provider.clone();
		let collection = self.collection.clone();
		let id = self.id.clone();
		self.db.item_cache.subscribe_to(&key, move |state| {
			wire_item_subscription(provider, collection, id, state.clone())
		});
		self.db.item_cache.subscribe_with_error(&key, on_next, on_error)
	}
}

fn wire_item_subscription(
	provider: Arc<dyn Provider>,
	collection: Arc<str>,
	id: Arc<str>,
	state: crate::state::State<ItemView>,
) -> Unsubscribe {
	let cancelled = Arc::new(AtomicBool::new(false));
	let real_unsub: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
	{
		let cancelled = cancelled.clone();
		let real_unsub = real_unsub.clone();
		tokio::spawn(async move {
			let error_state = state.clone();
			let observer: ItemObserver = Arc::new(move |value| state.set(value));
			match provider.subscribe_item(&collection, &id, observer).await {
				Ok(unsub) => {
					if cancelled.load(Ordering::Acquire) {
						unsub.call();
					} else {
						*real_unsub.lock() = Some(unsub);
					}
				}
				Err(err) => {
					tracing::error!(error = %err, "item subscription failed");
					error_state.set_future(async move { Err(err) });
				}
			}
		});
	}
	Unsubscribe::new(move || {
		cancelled.store(true, Ordering::Release);
		if let Some(u) = real_unsub.lock().take() {
			u.call();
		}
	})
}

/// An immutable filter/sort/limit view over a collection.
#[derive(Clone)]
pub struct QueryRef {
	db: Database,
	collection: Arc<str>,
	descriptor: Descriptor,
}

impl QueryRef {
	pub fn is(mut self, field: impl Into<String>, operand: Value) -> Self {
		self.descriptor = self.descriptor.with_filter(field, FilterOp::Is, operand);
		self
	}

	pub fn in_(mut self, field: impl Into<String>, operand: Vec<Value>) -> Self {
		self.descriptor = self.descriptor.with_filter(field, FilterOp::In, Value::Array(operand));
		self
	}

	pub fn contains(mut self, field: impl Into<String>, operand: Value) -> Self {
		self.descriptor = self.descriptor.with_filter(field, FilterOp::Contains, operand);
		self
	}

	pub fn lt(mut self, field: impl Into<String>, operand: Value) -> Self {
		self.descriptor = self.descriptor.with_filter(field, FilterOp::Lt, operand);
		self
	}

	pub fn lte(mut self, field: impl Into<String>, operand: Value) -> Self {
		self.descriptor = self.descriptor.with_filter(field, FilterOp::Lte, operand);
		self
	}

	pub fn gt(mut self, field: impl Into<String>, operand: Value) -> Self {
		self.descriptor = self.descriptor.with_filter(field, FilterOp::Gt, operand);
		self
	}

	pub fn gte(mut self, field: impl Into<String>, operand: Value) -> Self {
		self.descriptor = self.descriptor.with_filter(field, FilterOp::Gte, operand);
		self
	}

	pub fn asc(mut self, field: impl Into<String>) -> Self {
		self.descriptor = self.descriptor.with_sort(field, SortDir::Asc);
		self
	}

	pub fn desc(mut self, field: impl Into<String>) -> Self {
		self.descriptor = self.descriptor.with_sort(field, SortDir::Desc);
		self
	}

	pub fn max(mut self, limit: usize) -> Self {
		self.descriptor = self.descriptor.with_limit(limit);
		self
	}

	pub fn descriptor(&self) -> &Descriptor {
		&self.descriptor
	}

	pub fn fingerprint(&self) -> String {
		self.descriptor.fingerprint()
	}

	/// The database's scheduler, for components (e.g. [`crate::pagination::Pagination`])
	/// that keep their own [`crate::state::State`] alongside this query.
	pub(crate) fn scheduler(&self) -> Scheduler {
		self.db.scheduler().clone()
	}

	/// True iff `a` and `b` target the same collection and carry the same
	/// descriptor fingerprint, i.e. denote the same view.
	pub fn is_same_ref(a: &QueryRef, b: &QueryRef) -> bool {
		a.collection == b.collection && a.fingerprint() == b.fingerprint()
	}

	pub async fn value(&self) -> Result<Vec<(String, Value)>> {
		crate::query::validate(&self.descriptor)?;
		self.db.provider.get_query(&self.collection, &self.descriptor).await
	}

	pub async fn count(&self) -> Result<usize> {
		crate::query::validate(&self.descriptor)?;
		self.db.provider.count_query(&self.collection, &self.descriptor).await
	}

	pub async fn delete(&self) -> Result<usize> {
		crate::query::validate(&self.descriptor)?;
		self.db.provider.delete_query(&self.collection, &self.descriptor).await
	}

	pub async fn update(&self, updates: Vec<(String, UpdateOp)>) -> Result<usize> {
		crate::query::validate(&self.descriptor)?;
		self.db.provider.update_query(&self.collection, &self.descriptor, updates).await
	}

	fn cache_key(&self) -> String {
		format!("{}::{}", self.collection, self.fingerprint())
	}

	/// Subscribes to this query's live view. Multiple subscribers to an
	/// equal-fingerprint descriptor share one underlying provider
	/// subscription via the database's query [`SourceCache`]. `on_error` is
	/// invoked if establishing the underlying provider subscription fails;
	/// the same failure is also set on the shared cached state so a caller
	/// can retry by calling [`crate::source_cache::SourceCache::refresh`].
	pub async fn subscribe(
		&self,
		on_next: impl Fn(Vec<(String, Value)>) + Send + Sync + 'static,
		on_error: impl Fn(&Error) + Send + Sync + 'static,
	) -> Unsubscribe {
		let key = self.cache_key();
		let scheduler = self.db.scheduler.clone();
		self.db.query_cache.acquire(&key, move || {
			crate::state::State::from_future(scheduler, async { Ok(Vec::new()) })
		});
		let provider = self.db.provider.clone();
		let collection = self.collection.clone();
		let descriptor = self.descriptor.clone();
		self.db.query_cache.subscribe_to(&key, move |state| {
			wire_query_subscription(provider, collection, descriptor, state.clone())
		});
		self.db.query_cache.subscribe_with_error(&key, on_next, on_error)
	}
}

fn wire_query_subscription(
	provider: Arc<dyn Provider>,
	collection: Arc<str>,
	descriptor: Descriptor,
	state: crate::state::State<QueryView>,
) -> Unsubscribe {
	let cancelled = Arc::new(AtomicBool::new(false));
	let real_unsub: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
	{
		let cancelled = cancelled.clone();
		let real_unsub = real_unsub.clone();
		tokio::spawn(async move {
			let error_state = state.clone();
			let observer: QueryObserver = Arc::new(move |view| state.set(view));
			match provider.subscribe_query(&collection, &descriptor, observer).await {
				Ok(unsub) => {
					if cancelled.load(Ordering::Acquire) {
						unsub.call();
					} else {
						*real_unsub.lock() = Some(unsub);
					}
				}
				Err(err) => {
					tracing::error!(error = %err, "query subscription failed");
					error_state.set_future(async move { Err(err) });
				}
			}
		});
	}
	Unsubscribe::new(move || {
		cancelled.store(true, Ordering::Release);
		if let Some(u) = real_unsub.lock().take() {
			u.call();
		}
	})
}

// vim: ts=4
