//! Cursor-style growing pagination over a sorted, limited [`QueryRef`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::query::SortDir;
use crate::reference::QueryRef;
use crate::state::{State, Unsubscribe};

/// Wraps a sorted-and-limited [`QueryRef`] and maintains a growing ordered
/// list of loaded records, fetched page by page via [`Self::forward`] and
/// [`Self::backward`]. The list itself is a [`State`], so callers can
/// [`Self::subscribe`] to it like any other reactive value instead of
/// polling [`Self::items`].
pub struct Pagination {
	base: QueryRef,
	items: State<Vec<(String, Value)>>,
	exhausted_forward: Arc<AtomicBool>,
	exhausted_backward: Arc<AtomicBool>,
}

impl Pagination {
	/// Fails if `query` has no sort or no limit: both are required to make
	/// cursor-based paging well-defined.
	pub fn new(query: QueryRef) -> Result<Self> {
		let descriptor = query.descriptor();
		if descriptor.sorts.is_empty() {
			return Err(Error::InvalidArgument("pagination requires at least one sort".into()));
		}
		if descriptor.limit.is_none() {
			return Err(Error::InvalidArgument("pagination requires a limit".into()));
		}
		let scheduler = query.scheduler();
		Ok(Self {
			base: query,
			items: State::new(scheduler, Vec::new()),
			exhausted_forward: Arc::new(AtomicBool::new(false)),
			exhausted_backward: Arc::new(AtomicBool::new(false)),
		})
	}

	pub fn items(&self) -> Vec<(String, Value)> {
		self.items.value().unwrap_or_default()
	}

	/// Subscribes to the growing page. Never delivered synchronously, same
	/// as every other [`State`].
	pub fn subscribe(&self, on_next: impl Fn(Vec<(String, Value)>) + Send + Sync + 'static) -> Unsubscribe {
		self.items.subscribe(on_next)
	}

	pub fn is_forward_exhausted(&self) -> bool {
		self.exhausted_forward.load(Ordering::Acquire)
	}

	pub fn is_backward_exhausted(&self) -> bool {
		self.exhausted_backward.load(Ordering::Acquire)
	}

	fn limit(&self) -> usize {
		self.base.descriptor().limit.unwrap_or(0)
	}

	fn primary_sort(&self) -> (String, SortDir) {
		self.base
			.descriptor()
			.sorts
			.first()
			.map(|s| (s.field.clone(), s.direction))
			.unwrap_or(("id".to_string(), SortDir::Asc))
	}

	fn cursor_value(field: &str, id: &str, record: &Value) -> Value {
		if field == "id" {
			Value::String(id.to_string())
		} else {
			record.get(field).cloned().unwrap_or(Value::Null)
		}
	}

	/// Loads the next page past the last loaded record, appending to the
	/// end. A short page (fewer records than the limit) marks forward
	/// paging exhausted.
	pub async fn forward(&self) -> Result<usize> {
		let last = self.items.value().and_then(|items| items.last().cloned());
		let (field, direction) = self.primary_sort();
		let mut page_query = self.base.clone();
		if let Some((id, record)) = last {
			let value = Self::cursor_value(&field, &id, &record);
			page_query = match direction {
				SortDir::Asc => page_query.gt(field, value),
				SortDir::Desc => page_query.lt(field, value),
			};
		}
		let page = page_query.value().await?;
		let got = page.len();
		self.items.update(move |current| {
			let mut next = current.cloned().unwrap_or_default();
			next.extend(page);
			next
		});
		if got < self.limit() {
			self.exhausted_forward.store(true, Ordering::Release);
		}
		Ok(got)
	}

	/// Loads the page immediately before the first loaded record,
	/// prepending it. A short page marks backward paging exhausted.
	pub async fn backward(&self) -> Result<usize> {
		let first = self.items.value().and_then(|items| items.first().cloned());
		let (field, direction) = self.primary_sort();
		let mut page_query = self.base.clone();
		// Fetch with the sort reversed so `max(limit)` keeps the records
		// immediately adjacent to the cursor rather than the farthest ones.
		page_query = match direction {
			SortDir::Asc => page_query.desc(field.clone()),
			SortDir::Desc => page_query.asc(field.clone()),
		};
		if let Some((id, record)) = &first {
			let value = Self::cursor_value(&field, id, record);
			page_query = match direction {
				SortDir::Asc => page_query.lt(field, value),
				SortDir::Desc => page_query.gt(field, value),
			};
		}
		let mut page = page_query.value().await?;
		let got = page.len();
		page.reverse();
		self.items.update(move |current| {
			let mut next = page;
			next.extend(current.cloned().unwrap_or_default());
			next
		});
		if got < self.limit() {
			self.exhausted_backward.store(true, Ordering::Release);
		}
		Ok(got)
	}
}

// vim: ts=4
