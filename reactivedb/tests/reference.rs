//! End-to-end exercise of `Database`/`ItemRef`/`QueryRef`/`Pagination`
//! against a minimal stub provider (this crate cannot depend on
//! `reactivedb-memory`, which depends on it).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reactivedb::provider::{ItemObserver, Provider, QueryObserver};
use reactivedb::value::UpdateOp;
use reactivedb::{Database, Descriptor, Error, Pagination, Result, Unsubscribe};
use serde_json::{json, Value};

#[derive(Debug, Default)]
struct StubProvider {
	records: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl Provider for StubProvider {
	async fn get_item(&self, _collection: &str, id: &str) -> Result<Option<Value>> {
		Ok(self.records.lock().get(id).cloned())
	}

	async fn set_item(&self, _collection: &str, id: &str, record: Value) -> Result<()> {
		self.records.lock().insert(id.to_string(), record);
		Ok(())
	}

	async fn update_item(&self, collection: &str, id: &str, updates: Vec<(String, UpdateOp)>) -> Result<()> {
		let current = self.get_item(collection, id).await?.unwrap_or(Value::Null);
		let patched = reactivedb::value::update_record(&current, &updates)?;
		self.set_item(collection, id, patched.into_inner()).await
	}

	async fn delete_item(&self, _collection: &str, id: &str) -> Result<()> {
		self.records.lock().remove(id);
		Ok(())
	}

	async fn add_item(&self, _collection: &str, record: Value) -> Result<String> {
		let id = format!("id{}", self.records.lock().len());
		self.records.lock().insert(id.clone(), record);
		Ok(id)
	}

	async fn get_query(&self, _collection: &str, descriptor: &Descriptor) -> Result<Vec<(String, Value)>> {
		let snapshot: Vec<(String, Value)> =
			self.records.lock().iter().map(|(id, v)| (id.clone(), v.clone())).collect();
		Ok(descriptor.evaluate(&snapshot).into_iter().map(|(id, v)| (id.to_string(), v.clone())).collect())
	}

	async fn count_query(&self, collection: &str, descriptor: &Descriptor) -> Result<usize> {
		Ok(self.get_query(collection, descriptor).await?.len())
	}

	async fn delete_query(&self, collection: &str, descriptor: &Descriptor) -> Result<usize> {
		let matched = self.get_query(collection, descriptor).await?;
		let mut records = self.records.lock();
		let mut removed = 0;
		for (id, _) in matched {
			if records.remove(&id).is_some() {
				removed += 1;
			}
		}
		Ok(removed)
	}

	async fn update_query(
		&self,
		collection: &str,
		descriptor: &Descriptor,
		updates: Vec<(String, UpdateOp)>,
	) -> Result<usize> {
		let matched = self.get_query(collection, descriptor).await?;
		for (id, _) in &matched {
			self.update_item(collection, id, updates.clone()).await?;
		}
		Ok(matched.len())
	}

	async fn subscribe_item(&self, _collection: &str, _id: &str, _observer: ItemObserver) -> Result<Unsubscribe> {
		Ok(Unsubscribe::noop())
	}

	async fn subscribe_query(
		&self,
		_collection: &str,
		_descriptor: &Descriptor,
		_observer: QueryObserver,
	) -> Result<Unsubscribe> {
		Ok(Unsubscribe::noop())
	}
}

fn database() -> Database {
	Database::new(Arc::new(StubProvider::default()))
}

#[tokio::test]
async fn item_crud_round_trip() {
	let db = database();
	let item = db.collection("people").item("alice");
	assert_eq!(item.value().await.expect("get"), None);

	item.set(json!({"name": "Alice", "age": 30})).await.expect("set");
	assert_eq!(item.require().await.expect("require"), json!({"name": "Alice", "age": 30}));

	item.update(vec![("age".to_string(), UpdateOp::Sum(1.0))]).await.expect("update");
	assert_eq!(item.value().await.expect("get"), Some(json!({"name": "Alice", "age": 31})));

	item.delete().await.expect("delete");
	assert!(matches!(item.require().await, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn query_filters_sorts_and_limits() {
	let db = database();
	let people = db.collection("people");
	people.add(json!({"name": "Alice", "age": 30})).await.expect("add");
	people.add(json!({"name": "Bob", "age": 25})).await.expect("add");
	people.add(json!({"name": "Cara", "age": 40})).await.expect("add");

	let adults_by_age = people.query().gte("age", json!(18)).asc("age").max(2);
	let page = adults_by_age.value().await.expect("query");
	assert_eq!(page.iter().map(|(_, r)| r["name"].clone()).collect::<Vec<_>>(), vec![json!("Bob"), json!("Alice")]);
	assert_eq!(adults_by_age.count().await.expect("count"), 2);
}

#[tokio::test]
async fn query_ref_identity_ignores_builder_call_order() {
	let db = database();
	let a = db.query("people").is("name", json!("Alice")).gt("age", json!(10));
	let b = db.query("people").gt("age", json!(10)).is("name", json!("Alice"));
	assert!(reactivedb::QueryRef::is_same_ref(&a, &b));
}

#[tokio::test]
async fn pagination_pages_forward_and_backward() {
	let db = database();
	let items = db.collection("items");
	for i in 0..5 {
		items.add(json!({"num": i})).await.expect("add");
	}
	let query = items.query().asc("num").max(2);
	let pager = Pagination::new(query).expect("valid pagination");

	pager.forward().await.expect("page 1");
	pager.forward().await.expect("page 2");
	assert_eq!(pager.items().iter().map(|(_, r)| r["num"].clone()).collect::<Vec<_>>(), vec![json!(0), json!(1), json!(2), json!(3)]);
	assert!(!pager.is_forward_exhausted());

	pager.forward().await.expect("page 3");
	assert!(pager.is_forward_exhausted());
}

#[tokio::test]
async fn pagination_requires_sort_and_limit() {
	let db = database();
	let unsorted = db.query("items");
	assert!(Pagination::new(unsorted).is_err());

	let unlimited = db.query("items").asc("num");
	assert!(Pagination::new(unlimited).is_err());
}
