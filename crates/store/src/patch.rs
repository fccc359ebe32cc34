//! Structural deep-diff and patch replay over JSON trees.
//!
//! A [`Patch`] is the minimal ordered edit list transforming one store
//! snapshot into the next. Diffing compares before/after snapshots directly,
//! so handlers mutate drafts freely and never emit edits themselves.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from applying a patch to a snapshot tree.
#[derive(Debug, Error)]
pub enum PatchError {
	/// A path segment did not resolve inside the target tree.
	#[error("unresolved patch path: {0}")]
	BadPath(String),

	/// An array index segment was not a number or was out of bounds.
	#[error("invalid array index in patch path: {0}")]
	BadIndex(String),

	/// Add/Replace op without a value, or Remove with one.
	#[error("malformed patch op at {0}")]
	Malformed(String),
}

/// One edit step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
	/// Insert a value at a path that does not yet exist.
	Add {
		/// JSON-pointer path.
		path: String,
		/// Value to insert.
		value: Value,
	},
	/// Replace the value at an existing path.
	Replace {
		/// JSON-pointer path.
		path: String,
		/// New value.
		value: Value,
	},
	/// Remove the value at an existing path.
	Remove {
		/// JSON-pointer path.
		path: String,
	},
}

impl PatchOp {
	/// The op's target path.
	#[must_use]
	pub fn path(&self) -> &str {
		match self {
			Self::Add { path, .. } | Self::Replace { path, .. } | Self::Remove { path } => path,
		}
	}
}

/// Ordered edit list for one mutation of one store.
pub type Patch = Vec<PatchOp>;

fn escape(seg: &str) -> String {
	seg.replace('~', "~0").replace('/', "~1")
}

fn unescape(seg: &str) -> String {
	seg.replace("~1", "/").replace("~0", "~")
}

/// Computes the ordered edit list transforming `old` into `new`.
///
/// Array shrinkage is emitted as removals from the highest index downward so
/// replay against a growing/shrinking `Vec` stays index-stable.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> Patch {
	let mut out = Vec::new();
	diff_inner("", old, new, &mut out);
	out
}

fn diff_inner(path: &str, old: &Value, new: &Value, out: &mut Patch) {
	if old == new {
		return;
	}
	match (old, new) {
		(Value::Object(a), Value::Object(b)) => {
			for (key, old_val) in a {
				let child = format!("{path}/{}", escape(key));
				match b.get(key) {
					Some(new_val) => diff_inner(&child, old_val, new_val, out),
					None => out.push(PatchOp::Remove { path: child }),
				}
			}
			for (key, new_val) in b {
				if !a.contains_key(key) {
					out.push(PatchOp::Add {
						path: format!("{path}/{}", escape(key)),
						value: new_val.clone(),
					});
				}
			}
		}
		(Value::Array(a), Value::Array(b)) => {
			let shared = a.len().min(b.len());
			for i in 0..shared {
				diff_inner(&format!("{path}/{i}"), &a[i], &b[i], out);
			}
			for (i, new_val) in b.iter().enumerate().skip(shared) {
				out.push(PatchOp::Add {
					path: format!("{path}/{i}"),
					value: new_val.clone(),
				});
			}
			// High to low: keeps earlier indices valid during replay.
			for i in (shared..a.len()).rev() {
				out.push(PatchOp::Remove { path: format!("{path}/{i}") });
			}
		}
		_ => out.push(PatchOp::Replace {
			path: path.to_owned(),
			value: new.clone(),
		}),
	}
}

/// Applies one patch in order against a snapshot tree.
pub fn apply(tree: &mut Value, patch: &Patch) -> Result<(), PatchError> {
	for op in patch {
		apply_op(tree, op)?;
	}
	Ok(())
}

fn apply_op(tree: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
	let path = op.path();
	let segments: Vec<String> = if path.is_empty() {
		Vec::new()
	} else {
		path.split('/').skip(1).map(unescape).collect()
	};

	if segments.is_empty() {
		return match op {
			PatchOp::Replace { value, .. } | PatchOp::Add { value, .. } => {
				*tree = value.clone();
				Ok(())
			}
			PatchOp::Remove { .. } => Err(PatchError::Malformed(path.to_owned())),
		};
	}

	let (last, parents) = segments.split_last().ok_or_else(|| PatchError::BadPath(path.to_owned()))?;
	let mut node = tree;
	for seg in parents {
		node = match node {
			Value::Object(map) => map.get_mut(seg).ok_or_else(|| PatchError::BadPath(path.to_owned()))?,
			Value::Array(items) => {
				let idx: usize = seg.parse().map_err(|_| PatchError::BadIndex(path.to_owned()))?;
				items.get_mut(idx).ok_or_else(|| PatchError::BadIndex(path.to_owned()))?
			}
			_ => return Err(PatchError::BadPath(path.to_owned())),
		};
	}

	match node {
		Value::Object(map) => match op {
			PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } => {
				map.insert(last.clone(), value.clone());
			}
			PatchOp::Remove { .. } => {
				map.remove(last).ok_or_else(|| PatchError::BadPath(path.to_owned()))?;
			}
		},
		Value::Array(items) => {
			let idx: usize = last.parse().map_err(|_| PatchError::BadIndex(path.to_owned()))?;
			match op {
				PatchOp::Add { value, .. } => {
					if idx > items.len() {
						return Err(PatchError::BadIndex(path.to_owned()));
					}
					items.insert(idx, value.clone());
				}
				PatchOp::Replace { value, .. } => {
					*items.get_mut(idx).ok_or_else(|| PatchError::BadIndex(path.to_owned()))? = value.clone();
				}
				PatchOp::Remove { .. } => {
					if idx >= items.len() {
						return Err(PatchError::BadIndex(path.to_owned()));
					}
					items.remove(idx);
				}
			}
		}
		_ => return Err(PatchError::BadPath(path.to_owned())),
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	fn roundtrip(old: Value, new: Value) {
		let patch = diff(&old, &new);
		let mut replayed = old;
		apply(&mut replayed, &patch).unwrap();
		assert_eq!(replayed, new);
	}

	#[test]
	fn object_add_remove_replace() {
		roundtrip(
			json!({"a": 1, "b": {"c": true}, "gone": null}),
			json!({"a": 2, "b": {"c": false, "d": "x"}}),
		);
	}

	#[test]
	fn array_growth_and_shrink() {
		roundtrip(json!([1, 2, 3]), json!([1, 9]));
		roundtrip(json!([]), json!([{"id": "a"}, {"id": "b"}]));
		roundtrip(json!([1, 2, 3, 4]), json!([]));
	}

	#[test]
	fn nested_record_edit_is_minimal() {
		let old = json!({"entities": [{"id": "m0", "query": "select 1"}]});
		let new = json!({"entities": [{"id": "m0", "query": "select 2"}]});
		let patch = diff(&old, &new);
		assert_eq!(
			patch,
			vec![PatchOp::Replace {
				path: "/entities/0/query".to_owned(),
				value: json!("select 2"),
			}]
		);
	}

	#[test]
	fn equal_trees_diff_empty() {
		let tree = json!({"entities": [], "last_updated": 0});
		assert!(diff(&tree, &tree).is_empty());
	}

	#[test]
	fn escaped_keys_resolve() {
		roundtrip(json!({"a/b": 1}), json!({"a/b": 2, "c~d": 3}));
	}
}
