//! Immutable update operations over JSON-like records.
//!
//! The distilled convention this module implements ("return the input
//! instance unchanged if nothing changed") assumes host values compare
//! equal by reference identity. Rust values here are owned, so instead of
//! relying on pointer equality each operation returns a [`Patched<T>`]
//! wrapper that tags whether anything actually changed, while still handing
//! back an owned value either way.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The result of an immutable update: either nothing changed (the original
/// value, untouched) or something did (the new value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patched<T> {
	Unchanged(T),
	Changed(T),
}

impl<T> Patched<T> {
	pub fn changed(&self) -> bool {
		matches!(self, Patched::Changed(_))
	}

	pub fn into_inner(self) -> T {
		match self {
			Patched::Unchanged(v) | Patched::Changed(v) => v,
		}
	}
}

/// An update operator applied to one (possibly dotted) field path.
#[derive(Debug, Clone)]
pub enum UpdateOp {
	/// Replace the field's value outright.
	Set(Value),
	/// Add (or, for a negative operand, subtract) a number from the
	/// existing numeric field, treating a missing field as zero.
	Sum(f64),
	/// Append items to an array field, skipping ones already present.
	WithItems(Vec<Value>),
	/// Remove items from an array field.
	OmitItems(Vec<Value>),
}

/// Sets `obj[key] = value`, returning `obj` unchanged if the value is
/// already equal.
pub fn with_field(obj: &Value, key: &str, value: Value) -> Patched<Value> {
	if obj.get(key) == Some(&value) {
		return Patched::Unchanged(obj.clone());
	}
	let mut map = as_object(obj);
	map.insert(key.to_string(), value);
	Patched::Changed(Value::Object(map))
}

/// Removes `key` from `obj`, returning `obj` unchanged if the key was
/// already absent.
pub fn without_field(obj: &Value, key: &str) -> Patched<Value> {
	if obj.get(key).is_none() {
		return Patched::Unchanged(obj.clone());
	}
	let mut map = as_object(obj);
	map.remove(key);
	Patched::Changed(Value::Object(map))
}

/// Shallow-merges `patch` onto `obj`: top-level keys overwrite, a `null`
/// patch value deletes the key, nested objects are replaced wholesale (not
/// deep-merged).
pub fn merge_fields(obj: &Value, patch: &Value) -> Patched<Value> {
	let patch_map = match patch {
		Value::Object(m) => m,
		_ => return Patched::Unchanged(obj.clone()),
	};
	let mut changed = false;
	let mut out = as_object(obj);
	for (key, value) in patch_map {
		if value.is_null() {
			if out.remove(key).is_some() {
				changed = true;
			}
			continue;
		}
		if out.get(key) != Some(value) {
			out.insert(key.clone(), value.clone());
			changed = true;
		}
	}
	if changed {
		Patched::Changed(Value::Object(out))
	} else {
		Patched::Unchanged(obj.clone())
	}
}

/// Applies a set of keyed update operators to `record`, where keys may be
/// dotted paths (`"a.b.c"`). Intermediate missing objects are created along
/// the way; an intermediate that exists but is not an object is a fatal
/// programmer error, mirroring the host merge helper's own handling of the
/// same condition.
pub fn update_record(record: &Value, updates: &[(String, UpdateOp)]) -> Result<Patched<Value>> {
	if updates.is_empty() {
		return Ok(Patched::Unchanged(record.clone()));
	}
	let mut out = as_object(record);
	let mut changed = false;
	for (path, op) in updates {
		if apply_dotted_update(&mut out, path, op)? {
			changed = true;
		}
	}
	if changed {
		Ok(Patched::Changed(Value::Object(out)))
	} else {
		Ok(Patched::Unchanged(record.clone()))
	}
}

fn apply_dotted_update(root: &mut Map<String, Value>, path: &str, op: &UpdateOp) -> Result<bool> {
	let mut segments = path.split('.').peekable();
	let mut cursor = root;
	loop {
		let segment = match segments.next() {
			Some(s) => s,
			None => return Err(Error::Invariant(format!("empty update path: {path}"))),
		};
		if segments.peek().is_none() {
			return Ok(apply_leaf_op(cursor, segment, op));
		}
		let entry = cursor.entry(segment.to_string()).or_insert_with(|| Value::Object(Map::new()));
		match entry {
			Value::Object(m) => cursor = m,
			_ => {
				return Err(Error::Invariant(format!(
					"update path {path} runs through non-object field {segment}"
				)))
			}
		}
	}
}

fn apply_leaf_op(map: &mut Map<String, Value>, key: &str, op: &UpdateOp) -> bool {
	match op {
		UpdateOp::Set(value) => {
			if map.get(key) == Some(value) {
				false
			} else {
				map.insert(key.to_string(), value.clone());
				true
			}
		}
		UpdateOp::Sum(delta) => {
			let current = map.get(key).and_then(Value::as_f64).unwrap_or(0.0);
			if *delta == 0.0 {
				return false;
			}
			let next = current + delta;
			map.insert(key.to_string(), json_number(next));
			true
		}
		UpdateOp::WithItems(items) => {
			let mut arr = map.get(key).and_then(Value::as_array).cloned().unwrap_or_default();
			let mut changed = false;
			for item in items {
				if !arr.contains(item) {
					arr.push(item.clone());
					changed = true;
				}
			}
			if changed {
				map.insert(key.to_string(), Value::Array(arr));
			}
			changed
		}
		UpdateOp::OmitItems(items) => {
			let Some(arr) = map.get(key).and_then(Value::as_array) else {
				return false;
			};
			let before = arr.len();
			let next: Vec<Value> = arr.iter().filter(|v| !items.contains(v)).cloned().collect();
			if next.len() == before {
				return false;
			}
			map.insert(key.to_string(), Value::Array(next));
			true
		}
	}
}

fn json_number(n: f64) -> Value {
	serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

fn as_object(value: &Value) -> Map<String, Value> {
	match value {
		Value::Object(m) => m.clone(),
		_ => Map::new(),
	}
}

/// A stable, deterministic string digest of any JSON-like value: a
/// canonical, key-sorted, whitespace-free serialization. Equal inputs
/// (structurally) always produce equal output; used as a cache key and a
/// cheap equality check for descriptors.
pub fn fingerprint(value: &Value) -> String {
	let mut out = String::new();
	write_canonical(value, &mut out);
	out
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort();
			out.push('{');
			for (i, key) in keys.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				out.push_str(&serde_json::to_string(key).unwrap_or_default());
				out.push(':');
				write_canonical(&map[*key], out);
			}
			out.push('}');
		}
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_canonical(item, out);
			}
			out.push(']');
		}
		other => out.push_str(&other.to_string()),
	}
}


// vim: ts=4
