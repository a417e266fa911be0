//! A keyed, deduplicating registry of [`State`]s shared across consumers.
//!
//! Grounded on the host codebase's adapter instance cache: a
//! double-checked-locking lookup keyed by a string, and a grace-timer
//! eviction loop spawned per entry once its last observer disconnects,
//! cancelled if a fresh acquisition arrives first. Here the key is a
//! descriptor/fetch fingerprint rather than a database-instance key, and
//! eviction defaults to a much shorter grace window (60s vs. the adapter's
//! idle-instance sweep) since a `State` is cheap to recreate.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::state::{State, Unsubscribe};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

struct Entry<T> {
	state: State<T>,
	subscription: Option<Unsubscribe>,
	grace_task: Option<JoinHandle<()>>,
}

/// Ensures at most one [`State`] (and, via [`Self::subscribe_to`], at most
/// one live provider subscription) exists per fingerprint key at a time.
pub struct SourceCache<T> {
	entries: Arc<Mutex<HashMap<String, Entry<T>>>>,
	grace_period: Duration,
}

impl<T> Clone for SourceCache<T> {
	fn clone(&self) -> Self {
		Self { entries: self.entries.clone(), grace_period: self.grace_period }
	}
}

impl<T> SourceCache<T>
where
	T: Clone + PartialEq + Send + Sync + 'static,
{
	pub fn new() -> Self {
		Self::with_grace_period(DEFAULT_GRACE_PERIOD)
	}

	pub fn with_grace_period(grace_period: Duration) -> Self {
		Self { entries: Arc::new(Mutex::new(HashMap::new())), grace_period }
	}

	/// Returns the cached state for `key`, creating it via `factory` on
	/// first use. A fresh acquisition cancels any pending grace-timer
	/// eviction for this key.
	pub fn acquire(&self, key: &str, factory: impl FnOnce() -> State<T>) -> State<T> {
		let mut entries = self.entries.lock();
		if let Some(entry) = entries.get_mut(key) {
			if let Some(handle) = entry.grace_task.take() {
				handle.abort();
			}
			return entry.state.clone();
		}
		let state = factory();
		entries.insert(
			key.to_string(),
			Entry { state: state.clone(), subscription: None, grace_task: None },
		);
		state
	}

	/// Subscribes to the cached state for `key` and arranges for a
	/// grace-timer eviction to start once this was the last observer to
	/// leave. No-op (returns a dummy `Unsubscribe`) if `key` was never
	/// acquired.
	pub fn subscribe(&self, key: &str, on_next: impl Fn(T) + Send + Sync + 'static) -> Unsubscribe {
		self.subscribe_with(key, |state| state.subscribe(on_next))
	}

	/// Like [`Self::subscribe`] but also registers an error handler on the
	/// cached state's error channel.
	pub fn subscribe_with_error(
		&self,
		key: &str,
		on_next: impl Fn(T) + Send + Sync + 'static,
		on_error: impl Fn(&crate::error::Error) + Send + Sync + 'static,
	) -> Unsubscribe {
		self.subscribe_with(key, |state| state.subscribe_with_error(on_next, on_error))
	}

	fn subscribe_with(&self, key: &str, attach: impl FnOnce(&State<T>) -> Unsubscribe) -> Unsubscribe {
		let state = {
			let entries = self.entries.lock();
			entries.get(key).map(|e| e.state.clone())
		};
		let Some(state) = state else {
			return Unsubscribe::noop();
		};
		let inner = attach(&state);
		let cache = self.clone();
		let key = key.to_string();
		let watched_state = state.clone();
		Unsubscribe::new(move || {
			inner.call();
			if watched_state.observer_count() == 0 {
				cache.start_grace_timer(&key);
			}
		})
	}

	fn start_grace_timer(&self, key: &str) {
		let mut entries = self.entries.lock();
		let Some(entry) = entries.get_mut(key) else {
			return;
		};
		if entry.grace_task.is_some() {
			return;
		}
		let entries_arc = self.entries.clone();
		let grace_period = self.grace_period;
		let key_owned = key.to_string();
		let handle = tokio::spawn(async move {
			tokio::time::sleep(grace_period).await;
			let mut entries = entries_arc.lock();
			if let Some(entry) = entries.get(&key_owned) {
				if entry.state.observer_count() == 0 {
					entry.state.close();
					entries.remove(&key_owned);
				}
			}
		});
		entry.grace_task = Some(handle);
	}

	/// Wires a provider-driven live subscription onto the cached state for
	/// `key`, exactly once: subsequent calls while already subscribed are a
	/// no-op, matching the "while subscribed, refresh is a no-op"
	/// invariant.
	pub fn subscribe_to(&self, key: &str, subscriber: impl FnOnce(&State<T>) -> Unsubscribe) {
		let mut entries = self.entries.lock();
		let Some(entry) = entries.get_mut(key) else {
			return;
		};
		if entry.subscription.is_some() {
			return;
		}
		entry.subscription = Some(subscriber(&entry.state));
	}

	/// Initiates a fetch if the cached state is stale, idle (not pending,
	/// not backed by a live [`Self::subscribe_to`] subscription) and older
	/// than `max_age`.
	pub fn refresh<F, Fut>(&self, key: &str, fetcher: F, max_age: Duration)
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		let entries = self.entries.lock();
		let Some(entry) = entries.get(key) else {
			return;
		};
		if entry.subscription.is_some() || entry.state.is_pending() {
			return;
		}
		let stale = entry.state.age().is_none_or(|age| age > max_age);
		if stale {
			entry.state.set_future(fetcher());
		}
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<T> Default for SourceCache<T>
where
	T: Clone + PartialEq + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}


// vim: ts=4
