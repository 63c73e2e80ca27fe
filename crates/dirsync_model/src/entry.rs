//! Directory entries and search scopes.

use crate::attrs::Attributes;
use crate::dn::Dn;
use serde::{Deserialize, Serialize};

/// The scope of a directory search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchScope {
    /// Only the base DN itself.
    Base,
    /// Direct children of the base DN.
    One,
    /// The base DN and all of its descendants.
    Sub,
}

/// An entry fetched from a directory: a DN and its attribute set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// The entry's distinguished name.
    pub dn: Dn,
    /// The entry's attributes.
    pub attrs: Attributes,
}

impl DirectoryEntry {
    /// Creates an entry.
    pub fn new(dn: Dn, attrs: Attributes) -> Self {
        Self { dn, attrs }
    }
}
