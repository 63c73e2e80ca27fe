//! Property-based test generators using proptest.
//!
//! Strategies over the directory data model: DNs, attribute sets, entries
//! and filter expressions, shaped so every generated value is well formed.

use dirsync_model::{Attributes, DirectoryEntry, Dn, Filter};
use proptest::prelude::*;

/// Strategy for attribute names.
pub fn attr_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,11}").expect("valid regex")
}

/// Strategy for attribute values: printable, no filter metacharacters.
pub fn attr_value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9._@-][a-zA-Z0-9 ._@-]{0,14}[a-zA-Z0-9._@-]?")
        .expect("valid regex")
}

/// Strategy for a single RDN such as `cn=alice`.
pub fn rdn_strategy() -> impl Strategy<Value = String> {
    let value = prop::string::string_regex("[a-zA-Z0-9._@-]{1,12}").expect("valid regex");
    (attr_name_strategy(), value).prop_map(|(attr, value)| format!("{attr}={value}"))
}

/// Strategy for DNs between one and `max_depth` RDNs deep.
pub fn dn_strategy(max_depth: usize) -> impl Strategy<Value = Dn> {
    prop::collection::vec(rdn_strategy(), 1..=max_depth)
        .prop_map(|rdns| Dn::parse(&rdns.join(", ")).expect("generated DN parses"))
}

/// Strategy for attribute sets with one to five attributes.
pub fn attributes_strategy() -> impl Strategy<Value = Attributes> {
    prop::collection::btree_map(
        attr_name_strategy(),
        prop::collection::vec(attr_value_strategy(), 1..3),
        1..6,
    )
    .prop_map(|map| {
        let mut attrs = Attributes::new();
        for (name, values) in map {
            for value in values {
                attrs.insert(&name, value);
            }
        }
        attrs
    })
}

/// Strategy for directory entries placed under `suffix`.
pub fn entry_strategy(suffix: &Dn) -> impl Strategy<Value = DirectoryEntry> {
    let suffix = suffix.clone();
    (dn_strategy(2), attributes_strategy())
        .prop_map(move |(rdns, attrs)| DirectoryEntry::new(rdns.append(&suffix), attrs))
}

fn leaf_filter_strategy() -> impl Strategy<Value = Filter> {
    prop_oneof![
        attr_name_strategy().prop_map(Filter::present),
        (attr_name_strategy(), attr_value_strategy()).prop_map(|(a, v)| Filter::equality(a, v)),
        (attr_name_strategy(), attr_value_strategy())
            .prop_map(|(attr, value)| Filter::GreaterOrEqual { attr, value }),
        (attr_name_strategy(), attr_value_strategy())
            .prop_map(|(attr, value)| Filter::LessOrEqual { attr, value }),
    ]
}

/// Strategy for filter expressions, composing leaves with and/or/not up to
/// `depth` levels deep.
pub fn filter_strategy(depth: u32) -> impl Strategy<Value = Filter> {
    leaf_filter_strategy().prop_recursive(depth, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Filter::And),
            prop::collection::vec(inner.clone(), 1..4).prop_map(Filter::Or),
            inner.prop_map(|f| Filter::Not(Box::new(f))),
        ]
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
