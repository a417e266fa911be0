//! The scheduling-boundary primitive used by [`crate::state::State`] and
//! every [`crate::provider::Provider`] to coalesce notifications.
//!
//! There is no shared, implicit microtask queue the way a single-threaded
//! host runtime provides one for free; instead each [`Database`] (or a
//! standalone [`State`]) owns one [`Scheduler`]. Callbacks queued between
//! two flushes are delivered exactly once, in registration order, carrying
//! whatever is true at flush time. Callbacks queued *during* a flush (for
//! example because a subscriber reacted by registering a new one) are
//! deferred to the next flush rather than run immediately, so flushing
//! never re-enters itself.
//!
//! [`Database`]: crate::reference::Database

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Inner {
	pending: Mutex<Vec<Callback>>,
	flush_scheduled: AtomicBool,
}

/// A per-database scheduling-boundary queue.
#[derive(Clone, Default)]
pub struct Scheduler {
	inner: Arc<Inner>,
}

impl Scheduler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues `callback` for delivery at the next flush boundary. If no
	/// flush is currently scheduled on the live runtime, spawns one.
	pub fn schedule(&self, callback: impl FnOnce() + Send + 'static) {
		{
			let mut pending = self.inner.pending.lock();
			pending.push(Box::new(callback));
		}
		if self
			.inner
			.flush_scheduled
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_ok()
		{
			let scheduler = self.clone();
			tokio::spawn(async move {
				tokio::task::yield_now().await;
				scheduler.flush();
			});
		}
	}

	/// Runs exactly one flush pass: everything queued so far is delivered;
	/// anything queued by those deliveries waits for the next flush.
	pub fn flush(&self) {
		self.inner.flush_scheduled.store(false, Ordering::Release);
		let batch: Vec<Callback> = std::mem::take(&mut *self.inner.pending.lock());
		for callback in batch {
			callback();
		}
	}

	/// Synchronous equivalent of the live-runtime boundary, for tests that
	/// don't want to depend on task scheduling order.
	pub fn drain(&self) {
		self.flush();
	}

	/// True if anything is queued for the next flush.
	pub fn has_pending(&self) -> bool {
		!self.inner.pending.lock().is_empty()
	}
}


// vim: ts=4
