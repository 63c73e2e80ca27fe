//! Attribute sets and attribute deltas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A multi-valued attribute set.
///
/// Attribute names are case-insensitive and stored lowercased; values keep
/// their original casing but compare case-insensitively, which is the
/// default string matching rule in directory servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attributes {
    map: BTreeMap<String, Vec<String>>,
}

impl Attributes {
    /// Creates an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single value to an attribute.
    pub fn insert(&mut self, attr: impl AsRef<str>, value: impl Into<String>) {
        let values = self.map.entry(attr.as_ref().to_ascii_lowercase()).or_default();
        let value = value.into();
        if !values.iter().any(|v| v.eq_ignore_ascii_case(&value)) {
            values.push(value);
        }
    }

    /// Replaces all values of an attribute. An empty value list removes it.
    pub fn set(&mut self, attr: impl AsRef<str>, values: Vec<String>) {
        let key = attr.as_ref().to_ascii_lowercase();
        if values.is_empty() {
            self.map.remove(&key);
        } else {
            self.map.insert(key, values);
        }
    }

    /// Returns the values of an attribute, if present.
    pub fn get(&self, attr: &str) -> Option<&[String]> {
        self.map
            .get(&attr.to_ascii_lowercase())
            .map(|v| v.as_slice())
    }

    /// Returns the first value of an attribute, if present.
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.get(attr).and_then(|v| v.first()).map(String::as_str)
    }

    /// Returns true if the attribute is present with at least one value.
    pub fn contains_attr(&self, attr: &str) -> bool {
        self.get(attr).is_some_and(|v| !v.is_empty())
    }

    /// Returns true if the attribute carries the given value.
    pub fn contains_value(&self, attr: &str, value: &str) -> bool {
        self.get(attr)
            .is_some_and(|vs| vs.iter().any(|v| v.eq_ignore_ascii_case(value)))
    }

    /// Removes an attribute entirely.
    pub fn remove(&mut self, attr: &str) {
        self.map.remove(&attr.to_ascii_lowercase());
    }

    /// Removes specific values from an attribute, dropping the attribute
    /// when no values remain.
    pub fn remove_values(&mut self, attr: &str, values: &[String]) {
        let key = attr.to_ascii_lowercase();
        if let Some(existing) = self.map.get_mut(&key) {
            existing.retain(|v| !values.iter().any(|r| r.eq_ignore_ascii_case(v)));
            if existing.is_empty() {
                self.map.remove(&key);
            }
        }
    }

    /// Applies an attribute delta in place.
    pub fn apply(&mut self, delta: &AttributeMod) {
        match delta.op {
            ModOp::Add => {
                for value in &delta.values {
                    self.insert(&delta.attr, value.clone());
                }
            }
            ModOp::Replace => self.set(&delta.attr, delta.values.clone()),
            ModOp::Delete => {
                if delta.values.is_empty() {
                    self.remove(&delta.attr);
                } else {
                    self.remove_values(&delta.attr, &delta.values);
                }
            }
        }
    }

    /// Iterates over `(attribute, values)` pairs in attribute order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no attributes are present.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        if self.map.len() != other.map.len() {
            return false;
        }
        self.map.iter().all(|(k, vs)| {
            other.map.get(k).is_some_and(|os| {
                vs.len() == os.len()
                    && vs
                        .iter()
                        .zip(os.iter())
                        .all(|(a, b)| a.eq_ignore_ascii_case(b))
            })
        })
    }
}

impl Eq for Attributes {}

impl<A: AsRef<str>, V: Into<String>> FromIterator<(A, V)> for Attributes {
    fn from_iter<T: IntoIterator<Item = (A, V)>>(iter: T) -> Self {
        let mut attrs = Attributes::new();
        for (a, v) in iter {
            attrs.insert(a, v);
        }
        attrs
    }
}

/// The kind of change an [`AttributeMod`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModOp {
    /// Add values to an attribute.
    Add,
    /// Replace all values of an attribute.
    Replace,
    /// Delete listed values, or the whole attribute when no values are given.
    Delete,
}

/// A single attribute change, the unit of a modify delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMod {
    /// The kind of change.
    pub op: ModOp,
    /// The attribute name.
    pub attr: String,
    /// The values the change applies.
    pub values: Vec<String>,
}

impl AttributeMod {
    /// Creates an add delta.
    pub fn add(attr: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            op: ModOp::Add,
            attr: attr.into(),
            values,
        }
    }

    /// Creates a replace delta.
    pub fn replace(attr: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            op: ModOp::Replace,
            attr: attr.into(),
            values,
        }
    }

    /// Creates a delete delta. Empty `values` removes the whole attribute.
    pub fn delete(attr: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            op: ModOp::Delete,
            attr: attr.into(),
            values,
        }
    }
}

impl fmt::Display for AttributeMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            ModOp::Add => "add",
            ModOp::Replace => "replace",
            ModOp::Delete => "delete",
        };
        write!(f, "{} {}: {}", op, self.attr, self.values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_case_insensitive() {
        let mut attrs = Attributes::new();
        attrs.insert("objectClass", "person");
        attrs.insert("OBJECTCLASS", "top");

        let values = attrs.get("objectclass").unwrap();
        assert_eq!(values, &["person".to_string(), "top".to_string()]);
        assert!(attrs.contains_attr("ObjectClass"));
    }

    #[test]
    fn insert_dedupes_values() {
        let mut attrs = Attributes::new();
        attrs.insert("cn", "Foo");
        attrs.insert("cn", "foo");
        assert_eq!(attrs.get("cn").unwrap().len(), 1);
    }

    #[test]
    fn apply_add_replace_delete() {
        let mut attrs: Attributes = [("cn", "foo"), ("uid", "u1")].into_iter().collect();

        attrs.apply(&AttributeMod::add("mail", vec!["foo@example.com".into()]));
        assert!(attrs.contains_attr("mail"));

        attrs.apply(&AttributeMod::replace("uid", vec!["u2".into()]));
        assert_eq!(attrs.first("uid"), Some("u2"));

        attrs.apply(&AttributeMod::delete("mail", vec![]));
        assert!(!attrs.contains_attr("mail"));
    }

    #[test]
    fn delete_specific_values() {
        let mut attrs = Attributes::new();
        attrs.insert("member", "cn=a");
        attrs.insert("member", "cn=b");

        attrs.apply(&AttributeMod::delete("member", vec!["CN=A".into()]));
        assert_eq!(attrs.get("member").unwrap(), &["cn=b".to_string()]);

        attrs.apply(&AttributeMod::delete("member", vec!["cn=b".into()]));
        assert!(!attrs.contains_attr("member"));
    }

    #[test]
    fn replace_with_empty_removes() {
        let mut attrs: Attributes = [("l", "foo")].into_iter().collect();
        attrs.apply(&AttributeMod::replace("l", vec![]));
        assert!(attrs.is_empty());
    }

    #[test]
    fn equality_ignores_value_case() {
        let a: Attributes = [("cn", "Foo")].into_iter().collect();
        let b: Attributes = [("CN", "foo")].into_iter().collect();
        assert_eq!(a, b);
    }
}
