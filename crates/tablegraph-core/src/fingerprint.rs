//! Deterministic content fingerprints.
//!
//! Both identifiers in the system are derived from content rather than
//! generated: session ids hash the ingested input, and graph element ids
//! hash a label plus its properties. [`Fingerprint`] is the single canonical
//! encoder behind both.
//!
//! # Encoding
//!
//! - every field is written as `<len>:<bytes>` so no separator can collide
//!   with content;
//! - values carry a type tag (`n`, `b`, `i`, `f`, `s`), so `1` and `"1"`
//!   hash differently;
//! - maps are written with their keys sorted, so insertion order never
//!   changes the result.
//!
//! The digest is SHA-256, rendered as lowercase hex.
//!
//! # Example
//!
//! ```rust
//! use tablegraph_core::fingerprint::element_id;
//! use tablegraph_core::Value;
//! use indexmap::IndexMap;
//!
//! let mut a = IndexMap::new();
//! a.insert("name".to_string(), Value::from("John"));
//! a.insert("age".to_string(), Value::Int(30));
//!
//! let mut b = IndexMap::new();
//! b.insert("age".to_string(), Value::Int(30));
//! b.insert("name".to_string(), Value::from("John"));
//!
//! assert_eq!(element_id("Person", &a), element_id("Person", &b));
//! ```

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::table::Value;

/// Incremental canonical hasher.
#[derive(Clone, Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a length-prefixed byte field.
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.hasher.update(data.len().to_string().as_bytes());
        self.hasher.update(b":");
        self.hasher.update(data);
        self
    }

    pub fn text(self, s: &str) -> Self {
        self.bytes(s.as_bytes())
    }

    /// Append a tagged scalar.
    pub fn value(self, v: &Value) -> Self {
        match v {
            Value::Null => self.text("n"),
            Value::Bool(b) => self.text(if *b { "b:1" } else { "b:0" }),
            Value::Int(i) => self.text(&format!("i:{}", i)),
            // `{:?}` keeps a trailing `.0`, so 1.0 and 1 stay distinct.
            Value::Float(x) => self.text(&format!("f:{:?}", x)),
            Value::Text(s) => self.text("s").text(s),
        }
    }

    /// Append a map with keys sorted.
    pub fn map(self, map: &IndexMap<String, Value>) -> Self {
        let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let mut fp = self.text(&format!("m{}", pairs.len()));
        for (k, v) in pairs {
            fp = fp.text(k).value(v);
        }
        fp
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Identity of a graph element: label plus its properties, order-independent.
pub fn element_id(label: &str, properties: &IndexMap<String, Value>) -> String {
    Fingerprint::new().text(label).map(properties).finish()
}

/// Canonical encoding of a join key. Returns `None` when any part is null,
/// since null never joins.
pub(crate) fn join_key(values: &[&Value]) -> Option<String> {
    if values.iter().any(|v| v.is_null()) {
        return None;
    }
    Some(
        values
            .iter()
            .fold(Fingerprint::new(), |fp, v| fp.value(v))
            .finish(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_element_id_is_stable() {
        let p = props(&[("city", Value::from("NYC"))]);
        assert_eq!(element_id("City", &p), element_id("City", &p));
        assert_eq!(element_id("City", &p).len(), 64);
    }

    #[test]
    fn test_element_id_ignores_insertion_order() {
        let a = props(&[("id", Value::Int(1)), ("name", Value::from("John"))]);
        let b = props(&[("name", Value::from("John")), ("id", Value::Int(1))]);
        assert_eq!(element_id("Person", &a), element_id("Person", &b));
    }

    #[test]
    fn test_element_id_depends_on_label_and_types() {
        let int = props(&[("id", Value::Int(1))]);
        let text = props(&[("id", Value::from("1"))]);
        let float = props(&[("id", Value::Float(1.0))]);
        assert_ne!(element_id("A", &int), element_id("B", &int));
        assert_ne!(element_id("A", &int), element_id("A", &text));
        assert_ne!(element_id("A", &int), element_id("A", &float));
    }

    #[test]
    fn test_length_prefix_prevents_concatenation_collisions() {
        let a = Fingerprint::new().text("ab").text("c").finish();
        let b = Fingerprint::new().text("a").text("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_join_key_rejects_null() {
        assert!(join_key(&[&Value::Int(1), &Value::Null]).is_none());
        assert_eq!(
            join_key(&[&Value::Int(1)]),
            join_key(&[&Value::Int(1)])
        );
    }
}
