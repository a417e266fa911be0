//! Query descriptor types and their evaluation against a collection.

use std::cmp::Ordering;

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::value::fingerprint;

/// A filter operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
	Is,
	In,
	Contains,
	Lt,
	Lte,
	Gt,
	Gte,
}

impl FilterOp {
	fn as_str(self) -> &'static str {
		match self {
			FilterOp::Is => "is",
			FilterOp::In => "in",
			FilterOp::Contains => "contains",
			FilterOp::Lt => "lt",
			FilterOp::Lte => "lte",
			FilterOp::Gt => "gt",
			FilterOp::Gte => "gte",
		}
	}
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
	Asc,
	Desc,
}

/// One `(field, op, operand)` filter clause.
#[derive(Debug, Clone)]
pub struct Filter {
	pub field: String,
	pub op: FilterOp,
	pub operand: Value,
}

/// One `(field, direction)` sort clause.
#[derive(Debug, Clone)]
pub struct SortField {
	pub field: String,
	pub direction: SortDir,
}

/// An immutable filter/sort/limit descriptor. Two descriptors with equal
/// [`Descriptor::fingerprint`] denote the same view; callers should never
/// rely on structural equality or instance identity instead.
#[derive(Debug, Clone, Default)]
pub struct Descriptor {
	pub filters: Vec<Filter>,
	pub sorts: Vec<SortField>,
	pub limit: Option<usize>,
}

impl Descriptor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_filter(mut self, field: impl Into<String>, op: FilterOp, operand: Value) -> Self {
		self.filters.push(Filter { field: field.into(), op, operand });
		self
	}

	pub fn with_sort(mut self, field: impl Into<String>, direction: SortDir) -> Self {
		self.sorts.push(SortField { field: field.into(), direction });
		self
	}

	pub fn with_limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	/// A canonical, deterministic serialization used as a cache key and
	/// equality check. Filters are sorted by `(field, op)` then operand
	/// fingerprint; sorts are preserved in declaration order.
	pub fn fingerprint(&self) -> String {
		let mut filters: Vec<&Filter> = self.filters.iter().collect();
		filters.sort_by(|a, b| {
			a.field
				.cmp(&b.field)
				.then_with(|| a.op.as_str().cmp(b.op.as_str()))
				.then_with(|| fingerprint(&a.operand).cmp(&fingerprint(&b.operand)))
		});
		let filters_json: Vec<Value> = filters
			.iter()
			.map(|f| json!({"f": f.field, "o": f.op.as_str(), "v": f.operand}))
			.collect();
		let sorts_json: Vec<Value> = self
			.sorts
			.iter()
			.map(|s| json!({"f": s.field, "d": if s.direction == SortDir::Asc { "asc" } else { "desc" }}))
			.collect();
		let mut obj = json!({"filters": filters_json, "sorts": sorts_json});
		if let Some(limit) = self.limit {
			obj["limit"] = json!(limit);
		}
		fingerprint(&obj)
	}

	/// Evaluates this descriptor against a snapshot of a collection,
	/// returning the matched, sorted, and sliced `(id, record)` pairs.
	pub fn evaluate<'a>(&self, records: &'a [(String, Value)]) -> Vec<(&'a str, &'a Value)> {
		let mut matched: Vec<(&str, &Value)> = records
			.iter()
			.filter(|(id, record)| self.matches(id, record))
			.map(|(id, record)| (id.as_str(), record))
			.collect();
		matched.sort_by(|(id_a, a), (id_b, b)| self.compare(id_a, a, id_b, b));
		if let Some(limit) = self.limit {
			matched.truncate(limit);
		}
		matched
	}

	/// Counts matches, honoring the limit the way [`Self::evaluate`] would
	/// (matches capped at the limit since a capped count is all a caller
	/// needs and a full sort is unnecessary work to produce it).
	pub fn count(&self, records: &[(String, Value)]) -> usize {
		let matches = records.iter().filter(|(id, record)| self.matches(id, record)).count();
		self.limit.map_or(matches, |limit| matches.min(limit))
	}

	pub fn matches(&self, id: &str, record: &Value) -> bool {
		self.filters.iter().all(|filter| filter_matches(id, record, filter))
	}

	fn compare(&self, id_a: &str, a: &Value, id_b: &str, b: &Value) -> Ordering {
		for sort in &self.sorts {
			let va = field_value(id_a, a, &sort.field);
			let vb = field_value(id_b, b, &sort.field);
			let ord = compare_optional(va.as_ref(), vb.as_ref());
			let ord = if sort.direction == SortDir::Desc { ord.reverse() } else { ord };
			if ord != Ordering::Equal {
				return ord;
			}
		}
		id_a.cmp(id_b)
	}
}

fn filter_matches(id: &str, record: &Value, filter: &Filter) -> bool {
	let field_val = field_value(id, record, &filter.field);
	match filter.op {
		FilterOp::Is => compare_optional(field_val.as_ref(), Some(&filter.operand)) == Ordering::Equal,
		FilterOp::In => match filter.operand.as_array() {
			Some(items) => items
				.iter()
				.any(|item| compare_optional(field_val.as_ref(), Some(item)) == Ordering::Equal),
			None => false,
		},
		FilterOp::Contains => match &field_val {
			Some(Value::Array(items)) => items.contains(&filter.operand),
			_ => false,
		},
		FilterOp::Lt => compare_optional(field_val.as_ref(), Some(&filter.operand)) == Ordering::Less,
		FilterOp::Lte => {
			compare_optional(field_val.as_ref(), Some(&filter.operand)) != Ordering::Greater
		}
		FilterOp::Gt => {
			compare_optional(field_val.as_ref(), Some(&filter.operand)) == Ordering::Greater
		}
		FilterOp::Gte => compare_optional(field_val.as_ref(), Some(&filter.operand)) != Ordering::Less,
	}
}

fn field_value(id: &str, record: &Value, field: &str) -> Option<Value> {
	if field == "id" {
		return Some(Value::String(id.to_string()));
	}
	record.get(field).cloned()
}

/// Total order over optional JSON-like values per the fixed cross-type
/// ranking `number < string < bool < null < other < absent`, with absent
/// (`None`) always sorting last. The reference query evaluator this is
/// adapted from falls back to stringifying mismatched types; this
/// implementation instead gives every JSON type a fixed rank so the order
/// is total and predictable across types, not just within one.
pub fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> Ordering {
	match (a, b) {
		(None, None) => Ordering::Equal,
		(None, Some(_)) => Ordering::Greater,
		(Some(_), None) => Ordering::Less,
		(Some(x), Some(y)) => compare_values(x, y),
	}
}

fn type_rank(v: &Value) -> u8 {
	match v {
		Value::Number(_) => 0,
		Value::String(_) => 1,
		Value::Bool(_) => 2,
		Value::Null => 3,
		Value::Array(_) | Value::Object(_) => 4,
	}
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
	let (ra, rb) = (type_rank(a), type_rank(b));
	if ra != rb {
		return ra.cmp(&rb);
	}
	match (a, b) {
		(Value::Number(x), Value::Number(y)) => {
			x.as_f64().and_then(|x| y.as_f64().map(|y| x.partial_cmp(&y))).flatten().unwrap_or(Ordering::Equal)
		}
		(Value::String(x), Value::String(y)) => x.cmp(y),
		(Value::Bool(x), Value::Bool(y)) => x.cmp(y),
		(Value::Null, Value::Null) => Ordering::Equal,
		_ => a.to_string().cmp(&b.to_string()),
	}
}

/// Validates a builder-constructed descriptor, surfacing the
/// invalid-argument error the reference layer raises for malformed
/// `in` operands.
pub fn validate(descriptor: &Descriptor) -> Result<()> {
	for filter in &descriptor.filters {
		if filter.op == FilterOp::In && !filter.operand.is_array() {
			return Err(Error::InvalidArgument(format!(
				"filter {}: `in` requires an array operand",
				filter.field
			)));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn records() -> Vec<(String, Value)> {
		vec![
			("a".into(), json!({"group": "a", "num": 100, "tags": ["odd"]})),
			("b".into(), json!({"group": "b", "num": 200, "tags": ["even"]})),
			("c".into(), json!({"group": "a", "num": 300, "tags": ["odd", "big"]})),
		]
	}

	#[test]
	fn is_filter_matches_equal_field() {
		let d = Descriptor::new().with_filter("group", FilterOp::Is, json!("a"));
		let recs = records();
		let got = d.evaluate(&recs);
		assert_eq!(got.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec!["a", "c"]);
	}

	#[test]
	fn in_filter_with_empty_operand_matches_nothing() {
		let d = Descriptor::new().with_filter("group", FilterOp::In, json!([]));
		assert!(d.evaluate(&records()).is_empty());
	}

	#[test]
	fn contains_filter_matches_array_membership() {
		let d = Descriptor::new().with_filter("tags", FilterOp::Contains, json!("odd"));
		let recs = records();
		let got = d.evaluate(&recs);
		assert_eq!(got.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec!["a", "c"]);
	}

	#[test]
	fn sort_asc_then_limit() {
		let d = Descriptor::new().with_sort("num", SortDir::Asc).with_limit(2);
		let recs = records();
		let got = d.evaluate(&recs);
		assert_eq!(got.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec!["a", "b"]);
	}

	#[test]
	fn limit_zero_yields_empty() {
		let d = Descriptor::new().with_sort("num", SortDir::Asc).with_limit(0);
		assert!(d.evaluate(&records()).is_empty());
	}

	#[test]
	fn tie_breaks_ascending_by_id() {
		let recs = vec![
			("z".into(), json!({"num": 1})),
			("a".into(), json!({"num": 1})),
		];
		let d = Descriptor::new().with_sort("num", SortDir::Asc);
		let got = d.evaluate(&recs);
		assert_eq!(got.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec!["a", "z"]);
	}

	#[test]
	fn fingerprint_is_independent_of_filter_declaration_order() {
		let d1 = Descriptor::new()
			.with_filter("a", FilterOp::Is, json!(1))
			.with_filter("b", FilterOp::Is, json!(2));
		let d2 = Descriptor::new()
			.with_filter("b", FilterOp::Is, json!(2))
			.with_filter("a", FilterOp::Is, json!(1));
		assert_eq!(d1.fingerprint(), d2.fingerprint());
	}

	#[test]
	fn fingerprint_depends_on_sort_order() {
		let d1 = Descriptor::new().with_sort("a", SortDir::Asc).with_sort("b", SortDir::Asc);
		let d2 = Descriptor::new().with_sort("b", SortDir::Asc).with_sort("a", SortDir::Asc);
		assert_ne!(d1.fingerprint(), d2.fingerprint());
	}

	#[test]
	fn cross_type_order_number_before_string_before_bool_before_null_before_absent() {
		let num = Some(json!(1));
		let s = Some(json!("x"));
		let b = Some(json!(true));
		let null = Some(Value::Null);
		assert_eq!(compare_optional(num.as_ref(), s.as_ref()), Ordering::Less);
		assert_eq!(compare_optional(s.as_ref(), b.as_ref()), Ordering::Less);
		assert_eq!(compare_optional(b.as_ref(), null.as_ref()), Ordering::Less);
		assert_eq!(compare_optional(null.as_ref(), None), Ordering::Less);
	}

	#[test]
	fn validate_rejects_non_array_in_operand() {
		let d = Descriptor::new().with_filter("group", FilterOp::In, json!("a"));
		assert!(validate(&d).is_err());
	}
}

// vim: ts=4
