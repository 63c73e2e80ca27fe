//! Changelog records.

use crate::attrs::{AttributeMod, Attributes};
use crate::dn::Dn;
use serde::{Deserialize, Serialize};

/// The operation a changelog entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// An entry was added.
    Add,
    /// An entry was modified.
    Modify,
    /// An entry was deleted.
    Delete,
}

impl ChangeType {
    /// Returns the changelog wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
        }
    }
}

/// The payload carried by a changelog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangePayload {
    /// Full attribute set of a newly added entry.
    Add(Attributes),
    /// Attribute delta of a modified entry.
    Modify(Vec<AttributeMod>),
    /// Deletes carry no payload.
    Delete,
}

/// A single unit of remote change, consumed exactly once.
///
/// Change numbers are assigned by the remote server and are monotonically
/// increasing; they are the ordering and resume key for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    /// Remote-assigned, monotonically increasing change number.
    pub change_number: u64,
    /// The changed entry's DN on the remote tree.
    pub target_dn: Dn,
    /// The change payload.
    pub payload: ChangePayload,
    /// Remote change time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl ChangelogEntry {
    /// Creates an add record.
    pub fn add(change_number: u64, target_dn: Dn, attrs: Attributes, timestamp_ms: u64) -> Self {
        Self {
            change_number,
            target_dn,
            payload: ChangePayload::Add(attrs),
            timestamp_ms,
        }
    }

    /// Creates a modify record.
    pub fn modify(
        change_number: u64,
        target_dn: Dn,
        mods: Vec<AttributeMod>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            change_number,
            target_dn,
            payload: ChangePayload::Modify(mods),
            timestamp_ms,
        }
    }

    /// Creates a delete record.
    pub fn delete(change_number: u64, target_dn: Dn, timestamp_ms: u64) -> Self {
        Self {
            change_number,
            target_dn,
            payload: ChangePayload::Delete,
            timestamp_ms,
        }
    }

    /// Returns the operation type of this record.
    pub fn change_type(&self) -> ChangeType {
        match self.payload {
            ChangePayload::Add(_) => ChangeType::Add,
            ChangePayload::Modify(_) => ChangeType::Modify,
            ChangePayload::Delete => ChangeType::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    #[test]
    fn change_type_follows_payload() {
        let add = ChangelogEntry::add(1, dn("cn=a, o=x"), Attributes::new(), 0);
        let modify = ChangelogEntry::modify(2, dn("cn=a, o=x"), vec![], 0);
        let delete = ChangelogEntry::delete(3, dn("cn=a, o=x"), 0);

        assert_eq!(add.change_type(), ChangeType::Add);
        assert_eq!(modify.change_type(), ChangeType::Modify);
        assert_eq!(delete.change_type(), ChangeType::Delete);
    }

    #[test]
    fn change_type_names() {
        assert_eq!(ChangeType::Add.as_str(), "add");
        assert_eq!(ChangeType::Modify.as_str(), "modify");
        assert_eq!(ChangeType::Delete.as_str(), "delete");
    }
}
