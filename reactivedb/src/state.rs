//! The reactive [`State`] cell: a value, possibly pending, possibly
//! errored, with a set of observers delivered to at scheduling boundaries.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::Error;
use crate::scheduler::Scheduler;

type NextFn<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&Error) + Send + Sync>;

struct ObserverEntry<T> {
	id: u64,
	on_next: NextFn<T>,
	on_error: Option<ErrorFn>,
	last_value: Option<T>,
	last_error_seen: bool,
}

struct Inner<T> {
	value: Option<T>,
	pending: bool,
	error: Option<Arc<Error>>,
	last_update: Option<Instant>,
	observers: Vec<ObserverEntry<T>>,
	next_observer_id: u64,
	generation: u64,
	closed: bool,
	delivery_scheduled: bool,
}

/// A reactive value cell: current value, pending/error status, age, and a
/// set of observers notified at the next scheduling boundary.
///
/// Cloning a `State` shares the same underlying cell (it is a thin `Arc`
/// handle), matching the reference-semantics the value this is adapted from
/// relies on.
pub struct State<T> {
	inner: Arc<Mutex<Inner<T>>>,
	scheduler: Scheduler,
}

impl<T> Clone for State<T> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone(), scheduler: self.scheduler.clone() }
	}
}

/// A handle returned by [`State::subscribe`]. Calling it detaches the
/// observer; it is synchronous and idempotent.
pub struct Unsubscribe(Box<dyn FnOnce() + Send>);

impl Unsubscribe {
	pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
		Self(Box::new(f))
	}

	/// An `Unsubscribe` that does nothing, for call sites where there was
	/// never anything to detach from.
	pub fn noop() -> Self {
		Self(Box::new(|| {}))
	}

	pub fn call(self) {
		(self.0)();
	}
}

impl<T> State<T>
where
	T: Clone + PartialEq + Send + Sync + 'static,
{
	/// Creates a state already holding `value`.
	pub fn new(scheduler: Scheduler, value: T) -> Self {
		let inner = Inner {
			value: Some(value),
			pending: false,
			error: None,
			last_update: Some(Instant::now()),
			observers: Vec::new(),
			next_observer_id: 0,
			generation: 0,
			closed: false,
			delivery_scheduled: false,
		};
		Self { inner: Arc::new(Mutex::new(inner)), scheduler }
	}

	/// Creates an empty, pending state that will be populated once `fut`
	/// resolves.
	pub fn from_future<F>(scheduler: Scheduler, fut: F) -> Self
	where
		F: Future<Output = crate::error::Result<T>> + Send + 'static,
	{
		let state = Self {
			inner: Arc::new(Mutex::new(Inner {
				value: None,
				pending: true,
				error: None,
				last_update: None,
				observers: Vec::new(),
				next_observer_id: 0,
				generation: 0,
				closed: false,
				delivery_scheduled: false,
			})),
			scheduler,
		};
		state.spawn_resolution(0, fut);
		state
	}

	pub fn value(&self) -> Option<T> {
		self.inner.lock().value.clone()
	}

	pub fn is_pending(&self) -> bool {
		self.inner.lock().pending
	}

	pub fn error(&self) -> Option<Arc<Error>> {
		self.inner.lock().error.clone()
	}

	pub fn age(&self) -> Option<Duration> {
		self.inner.lock().last_update.map(|t| t.elapsed())
	}

	pub fn observer_count(&self) -> usize {
		self.inner.lock().observers.len()
	}

	/// Sets the value directly. A value equal to the current one (and no
	/// pending/error state to clear) is a no-op: no delivery is scheduled.
	pub fn set(&self, value: T) {
		let should_deliver = {
			let mut inner = self.inner.lock();
			if inner.closed {
				return;
			}
			inner.generation += 1;
			let had_transient_state = inner.pending || inner.error.is_some();
			inner.pending = false;
			inner.error = None;
			if !had_transient_state && inner.value.as_ref() == Some(&value) {
				false
			} else {
				inner.value = Some(value);
				inner.last_update = Some(Instant::now());
				true
			}
		};
		if should_deliver {
			self.schedule_delivery();
		}
	}

	/// Replaces the value with the result of `fut`, marking the state
	/// pending until it resolves. A later `set`/`set_future` call
	/// supersedes this one: its resolution is dropped on arrival.
	pub fn set_future<F>(&self, fut: F)
	where
		F: Future<Output = crate::error::Result<T>> + Send + 'static,
	{
		let generation = {
			let mut inner = self.inner.lock();
			if inner.closed {
				return;
			}
			inner.generation += 1;
			inner.pending = true;
			inner.generation
		};
		self.spawn_resolution(generation, fut);
	}

	fn spawn_resolution<F>(&self, generation: u64, fut: F)
	where
		F: Future<Output = crate::error::Result<T>> + Send + 'static,
	{
		let state = self.clone();
		tokio::spawn(async move {
			let result = fut.await;
			let should_deliver = {
				let mut inner = state.inner.lock();
				if inner.closed || inner.generation != generation {
					return;
				}
				inner.pending = false;
				match result {
					Ok(value) => {
						let unchanged = inner.error.is_none() && inner.value.as_ref() == Some(&value);
						inner.error = None;
						if unchanged {
							false
						} else {
							inner.value = Some(value);
							inner.last_update = Some(Instant::now());
							true
						}
					}
					Err(err) => {
						inner.error = Some(Arc::new(err));
						true
					}
				}
			};
			if should_deliver {
				state.schedule_delivery();
			}
		});
	}

	/// Functional update: `f` receives the current value (if any) and
	/// returns the next one.
	pub fn update(&self, f: impl FnOnce(Option<&T>) -> T) {
		let current = self.inner.lock().value.clone();
		let next = f(current.as_ref());
		self.set(next);
	}

	/// Registers an observer. It is never invoked synchronously: the first
	/// delivery (current value or error, if any exists yet) happens at the
	/// next scheduling boundary, same as every subsequent one.
	pub fn subscribe(&self, on_next: impl Fn(T) + Send + Sync + 'static) -> Unsubscribe {
		self.subscribe_inner(Arc::new(on_next), None)
	}

	pub fn subscribe_with_error(
		&self,
		on_next: impl Fn(T) + Send + Sync + 'static,
		on_error: impl Fn(&Error) + Send + Sync + 'static,
	) -> Unsubscribe {
		self.subscribe_inner(Arc::new(on_next), Some(Arc::new(on_error)))
	}

	fn subscribe_inner(&self, on_next: NextFn<T>, on_error: Option<ErrorFn>) -> Unsubscribe {
		let id = {
			let mut inner = self.inner.lock();
			let id = inner.next_observer_id;
			inner.next_observer_id += 1;
			inner.observers.push(ObserverEntry {
				id,
				on_next,
				on_error,
				last_value: None,
				last_error_seen: false,
			});
			id
		};
		self.schedule_delivery();
		let weak = Arc::downgrade(&self.inner);
		Unsubscribe(Box::new(move || {
			if let Some(inner) = weak.upgrade() {
				inner.lock().observers.retain(|o| o.id != id);
			}
		}))
	}

	/// Closes the state: releases all observers; no further deliveries.
	pub fn close(&self) {
		let mut inner = self.inner.lock();
		inner.closed = true;
		inner.observers.clear();
	}

	fn schedule_delivery(&self) {
		let mut inner = self.inner.lock();
		if inner.closed || inner.delivery_scheduled {
			return;
		}
		inner.delivery_scheduled = true;
		drop(inner);
		let state = self.clone();
		self.scheduler.schedule(move || state.deliver());
	}

	fn deliver(&self) {
		let (value, error, ids): (Option<T>, Option<Arc<Error>>, Vec<u64>) = {
			let mut inner = self.inner.lock();
			inner.delivery_scheduled = false;
			if inner.closed {
				return;
			}
			(inner.value.clone(), inner.error.clone(), inner.observers.iter().map(|o| o.id).collect())
		};
		for id in ids {
			let (on_next, on_error, needs_next, needs_error) = {
				let mut inner = self.inner.lock();
				let Some(entry) = inner.observers.iter_mut().find(|o| o.id == id) else {
					continue;
				};
				let needs_error = error.is_some() && !entry.last_error_seen;
				let needs_next = !needs_error
					&& value.is_some()
					&& (entry.last_value.is_none() || entry.last_value.as_ref() != value.as_ref());
				if needs_error {
					entry.last_error_seen = true;
				}
				if needs_next {
					entry.last_value = value.clone();
				}
				(entry.on_next.clone(), entry.on_error.clone(), needs_next, needs_error)
			};
			if needs_error {
				if let Some(err) = &error {
					if let Some(handler) = on_error {
						handler(err);
					} else {
						tracing::error!(error = %err, "unhandled state error");
					}
				}
			} else if needs_next {
				if let Some(value) = value.clone() {
					on_next(value);
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn set_equal_value_does_not_notify() {
		let scheduler = Scheduler::new();
		let state = State::new(scheduler.clone(), 1_i32);
		let count = Arc::new(AtomicUsize::new(0));
		let c = count.clone();
		let _unsub = state.subscribe(move |_| {
			c.fetch_add(1, Ordering::SeqCst);
		});
		scheduler.drain();
		assert_eq!(count.load(Ordering::SeqCst), 1);
		state.set(1);
		scheduler.drain();
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn subscribe_is_never_synchronous() {
		let scheduler = Scheduler::new();
		let state = State::new(scheduler.clone(), 1_i32);
		let count = Arc::new(AtomicUsize::new(0));
		let c = count.clone();
		let _unsub = state.subscribe(move |_| {
			c.fetch_add(1, Ordering::SeqCst);
		});
		assert_eq!(count.load(Ordering::SeqCst), 0);
		scheduler.drain();
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn coalesces_bursty_mutations_into_one_delivery() {
		let scheduler = Scheduler::new();
		let state = State::new(scheduler.clone(), 1_i32);
		scheduler.drain();
		let values = Arc::new(Mutex::new(Vec::new()));
		let v = values.clone();
		let _unsub = state.subscribe(move |val| v.lock().push(val));
		state.set(2);
		state.set(3);
		state.set(4);
		scheduler.drain();
		assert_eq!(*values.lock(), vec![4]);
	}

	#[tokio::test]
	async fn unsubscribe_stops_further_deliveries() {
		let scheduler = Scheduler::new();
		let state = State::new(scheduler.clone(), 1_i32);
		let count = Arc::new(AtomicUsize::new(0));
		let c = count.clone();
		let unsub = state.subscribe(move |_| {
			c.fetch_add(1, Ordering::SeqCst);
		});
		scheduler.drain();
		unsub.call();
		state.set(2);
		scheduler.drain();
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn future_resolution_sets_value() {
		let scheduler = Scheduler::new();
		let state: State<i32> = State::from_future(scheduler.clone(), async { Ok(42) });
		assert!(state.is_pending());
		tokio::task::yield_now().await;
		tokio::task::yield_now().await;
		assert_eq!(state.value(), Some(42));
		assert!(!state.is_pending());
	}

	#[tokio::test]
	async fn superseded_future_is_dropped_on_arrival() {
		let scheduler = Scheduler::new();
		let state: State<i32> = State::new(scheduler.clone(), 1);
		state.set_future(async {
			tokio::time::sleep(Duration::from_millis(50)).await;
			Ok(999)
		});
		state.set(2);
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(state.value(), Some(2));
	}

	#[tokio::test]
	async fn future_error_sets_error_channel() {
		let scheduler = Scheduler::new();
		let state: State<i32> =
			State::from_future(scheduler.clone(), async { Err(Error::Provider("boom".into())) });
		tokio::task::yield_now().await;
		tokio::task::yield_now().await;
		assert!(state.error().is_some());
		assert!(!state.is_pending());
	}
}

// vim: ts=4
