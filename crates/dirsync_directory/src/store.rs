//! In-memory directory tree.

use crate::feed::MemoryChangelog;
use dirsync_model::{
    AttributeMod, Attributes, ChangePayload, DirectoryEntry, DirectoryError, Dn, Filter,
    SearchScope,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// An in-memory directory server.
///
/// Entries live in a DN-keyed map; the hierarchy is derived from DN suffix
/// relationships, so parents are not required to exist before children are
/// added. Mutations optionally append to a [`MemoryChangelog`], which is how
/// the remote side of a replication test produces its stream.
pub struct MemoryDirectory {
    suffix: Dn,
    tree: RwLock<BTreeMap<Dn, Attributes>>,
    changelog: Option<Arc<MemoryChangelog>>,
}

impl MemoryDirectory {
    /// Creates a directory rooted at `suffix` with no changelog.
    pub fn new(suffix: Dn) -> Self {
        Self {
            suffix,
            tree: RwLock::new(BTreeMap::new()),
            changelog: None,
        }
    }

    /// Creates a directory that records every mutation to a changelog feed.
    pub fn with_changelog(suffix: Dn) -> Self {
        Self {
            suffix,
            tree: RwLock::new(BTreeMap::new()),
            changelog: Some(Arc::new(MemoryChangelog::new())),
        }
    }

    /// Returns the directory's root suffix.
    pub fn suffix(&self) -> &Dn {
        &self.suffix
    }

    /// Returns the changelog feed, if this directory records one.
    pub fn changelog(&self) -> Option<&Arc<MemoryChangelog>> {
        self.changelog.as_ref()
    }

    /// Searches under `base` with the given scope and filter.
    ///
    /// Returns `NoSuchObject` when the base DN itself does not exist; a
    /// successful search with zero results means the base exists but the
    /// filter matched nothing.
    pub fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let tree = self.tree.read();
        if !tree.contains_key(base) {
            return Err(DirectoryError::no_such_object(base.as_str()));
        }

        let results: Vec<DirectoryEntry> = tree
            .iter()
            .filter(|&(dn, _)| match scope {
                SearchScope::Base => dn == base,
                SearchScope::One => dn.parent().as_ref() == Some(base),
                SearchScope::Sub => dn.is_descendant_of(base),
            })
            .filter(|&(_, attrs)| filter.matches(attrs))
            .map(|(dn, attrs)| DirectoryEntry::new(dn.clone(), attrs.clone()))
            .collect();

        Ok(results)
    }

    /// Adds an entry. Fails with `EntryAlreadyExists` on a DN collision.
    pub fn add(&self, dn: Dn, attrs: Attributes) -> Result<(), DirectoryError> {
        let mut tree = self.tree.write();
        if tree.contains_key(&dn) {
            return Err(DirectoryError::already_exists(dn.as_str()));
        }
        debug!(dn = %dn, "add entry");
        tree.insert(dn.clone(), attrs.clone());
        drop(tree);

        if let Some(feed) = &self.changelog {
            feed.record(dn, ChangePayload::Add(attrs));
        }
        Ok(())
    }

    /// Applies an attribute delta to an existing entry.
    pub fn modify(&self, dn: &Dn, mods: &[AttributeMod]) -> Result<(), DirectoryError> {
        let mut tree = self.tree.write();
        let attrs = tree
            .get_mut(dn)
            .ok_or_else(|| DirectoryError::no_such_object(dn.as_str()))?;
        for delta in mods {
            attrs.apply(delta);
        }
        debug!(dn = %dn, mods = mods.len(), "modify entry");
        drop(tree);

        if let Some(feed) = &self.changelog {
            feed.record(dn.clone(), ChangePayload::Modify(mods.to_vec()));
        }
        Ok(())
    }

    /// Deletes a leaf entry.
    ///
    /// Deleting a DN with children is refused with the not-allowed-on-
    /// non-leaf result code, as a protocol server would.
    pub fn delete(&self, dn: &Dn) -> Result<(), DirectoryError> {
        let mut tree = self.tree.write();
        if !tree.contains_key(dn) {
            return Err(DirectoryError::no_such_object(dn.as_str()));
        }
        let has_children = tree
            .keys()
            .any(|other| other != dn && other.is_descendant_of(dn));
        if has_children {
            return Err(DirectoryError::Protocol {
                code: 66,
                message: format!("not allowed on non-leaf: {dn}"),
            });
        }
        debug!(dn = %dn, "delete entry");
        tree.remove(dn);
        drop(tree);

        if let Some(feed) = &self.changelog {
            feed.record(dn.clone(), ChangePayload::Delete);
        }
        Ok(())
    }

    /// Returns the entry at `dn`, if present.
    pub fn get(&self, dn: &Dn) -> Option<DirectoryEntry> {
        self.tree
            .read()
            .get(dn)
            .map(|attrs| DirectoryEntry::new(dn.clone(), attrs.clone()))
    }

    /// Returns true if an entry exists at `dn`.
    pub fn contains(&self, dn: &Dn) -> bool {
        self.tree.read().contains_key(dn)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    /// Returns true if the directory holds no entries.
    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().map(|&(a, v)| (a, v)).collect()
    }

    fn populated() -> MemoryDirectory {
        let dir = MemoryDirectory::new(dn("o=example"));
        dir.add(dn("o=example"), attrs(&[("objectclass", "organization")]))
            .unwrap();
        dir.add(
            dn("cn=alice, o=example"),
            attrs(&[("objectclass", "person"), ("uid", "alice")]),
        )
        .unwrap();
        dir.add(
            dn("cn=bob, o=example"),
            attrs(&[("objectclass", "person")]),
        )
        .unwrap();
        dir
    }

    #[test]
    fn base_search_finds_entry() {
        let dir = populated();
        let hits = dir
            .search(
                &dn("cn=alice, o=example"),
                SearchScope::Base,
                &Filter::present("objectclass"),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].dn, dn("cn=alice, o=example"));
    }

    #[test]
    fn search_missing_base_is_no_such_object() {
        let dir = populated();
        let err = dir
            .search(
                &dn("cn=ghost, o=example"),
                SearchScope::Base,
                &Filter::present("objectclass"),
            )
            .unwrap_err();
        assert!(err.is_no_such_object());
    }

    #[test]
    fn search_existing_base_with_unmatched_filter_is_empty() {
        let dir = populated();
        let hits = dir
            .search(
                &dn("cn=bob, o=example"),
                SearchScope::Base,
                &Filter::present("uid"),
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn sub_search_spans_descendants() {
        let dir = populated();
        let hits = dir
            .search(
                &dn("o=example"),
                SearchScope::Sub,
                &Filter::equality("objectclass", "person"),
            )
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn one_search_spans_children_only() {
        let dir = populated();
        let hits = dir
            .search(
                &dn("o=example"),
                SearchScope::One,
                &Filter::present("objectclass"),
            )
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let dir = populated();
        let err = dir
            .add(dn("cn=alice, o=example"), Attributes::new())
            .unwrap_err();
        assert!(matches!(err, DirectoryError::EntryAlreadyExists { .. }));
    }

    #[test]
    fn modify_applies_delta() {
        let dir = populated();
        dir.modify(
            &dn("cn=bob, o=example"),
            &[AttributeMod::add("uid", vec!["bob".into()])],
        )
        .unwrap();
        let entry = dir.get(&dn("cn=bob, o=example")).unwrap();
        assert_eq!(entry.attrs.first("uid"), Some("bob"));
    }

    #[test]
    fn delete_refuses_non_leaf() {
        let dir = populated();
        let err = dir.delete(&dn("o=example")).unwrap_err();
        assert!(matches!(err, DirectoryError::Protocol { code: 66, .. }));

        dir.delete(&dn("cn=alice, o=example")).unwrap();
        assert!(!dir.contains(&dn("cn=alice, o=example")));
    }

    #[test]
    fn mutations_feed_the_changelog() {
        let dir = MemoryDirectory::with_changelog(dn("o=example"));
        dir.add(dn("cn=a, o=example"), attrs(&[("uid", "a")]))
            .unwrap();
        dir.modify(
            &dn("cn=a, o=example"),
            &[AttributeMod::replace("uid", vec!["b".into()])],
        )
        .unwrap();
        dir.delete(&dn("cn=a, o=example")).unwrap();

        let feed = dir.changelog().unwrap();
        let entries = feed.entries_after(0);
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries
                .iter()
                .map(|e| e.change_number)
                .collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
