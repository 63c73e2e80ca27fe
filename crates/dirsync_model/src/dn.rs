//! Distinguished names.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error returned when a DN string cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnError {
    /// The DN string was empty.
    #[error("empty DN")]
    Empty,
    /// An RDN component was malformed.
    #[error("malformed RDN {rdn:?} in {dn:?}")]
    MalformedRdn {
        /// The offending RDN component.
        rdn: String,
        /// The full input string.
        dn: String,
    },
}

/// A distinguished name identifying an entry in a directory tree.
///
/// The name is stored in a normalized rendering: RDN components trimmed of
/// surrounding whitespace and joined with `", "`. Comparison and hashing are
/// case-insensitive, matching how directory servers treat DNs, while the
/// original casing is preserved for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dn(String);

impl Dn {
    /// Parses a DN from its string form.
    ///
    /// Each RDN must contain an attribute/value separator (`=`). Escaped
    /// characters inside values are kept verbatim.
    pub fn parse(input: &str) -> Result<Self, DnError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DnError::Empty);
        }

        let mut rdns = Vec::new();
        for rdn in split_rdns(input) {
            let rdn = rdn.trim();
            if rdn.is_empty() || !rdn.contains('=') {
                return Err(DnError::MalformedRdn {
                    rdn: rdn.to_string(),
                    dn: input.to_string(),
                });
            }
            rdns.push(rdn.to_string());
        }

        Ok(Self(rdns.join(", ")))
    }

    /// Returns the normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates the RDN components, leaf first.
    pub fn rdns(&self) -> impl Iterator<Item = &str> {
        split_rdns(&self.0).into_iter().map(str::trim)
    }

    /// Returns the number of RDN components.
    pub fn depth(&self) -> usize {
        self.rdns().count()
    }

    /// Returns the parent DN, or `None` for a single-RDN name.
    pub fn parent(&self) -> Option<Dn> {
        let rdns: Vec<&str> = self.rdns().collect();
        if rdns.len() <= 1 {
            None
        } else {
            Some(Dn(rdns[1..].join(", ")))
        }
    }

    /// Appends a suffix below this name.
    ///
    /// `cn=foo, o=remote` appended with `cn=repl, o=local` yields
    /// `cn=foo, o=remote, cn=repl, o=local`. This is the DN translation used
    /// to place a remote entry under the local replication subtree.
    pub fn append(&self, suffix: &Dn) -> Dn {
        Dn(format!("{}, {}", self.0, suffix.0))
    }

    /// Returns true if `self` sits at or below `ancestor` in the tree.
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        let own: Vec<&str> = self.rdns().collect();
        let anc: Vec<&str> = ancestor.rdns().collect();
        if anc.len() > own.len() {
            return false;
        }
        own[own.len() - anc.len()..]
            .iter()
            .zip(anc.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

/// Splits a DN string on unescaped commas.
fn split_rdns(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ',' => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Dn {}

impl std::hash::Hash for Dn {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .to_ascii_lowercase()
            .cmp(&other.0.to_ascii_lowercase())
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Dn {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_spacing() {
        let dn = Dn::parse("cn=foo,o=example").unwrap();
        assert_eq!(dn.as_str(), "cn=foo, o=example");

        let dn = Dn::parse("  cn=foo ,   o=example ").unwrap();
        assert_eq!(dn.as_str(), "cn=foo, o=example");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(Dn::parse(""), Err(DnError::Empty));
        assert!(matches!(
            Dn::parse("cn=foo,,o=example"),
            Err(DnError::MalformedRdn { .. })
        ));
        assert!(matches!(
            Dn::parse("justavalue"),
            Err(DnError::MalformedRdn { .. })
        ));
    }

    #[test]
    fn equality_is_case_insensitive() {
        let a = Dn::parse("CN=Foo, O=Example").unwrap();
        let b = Dn::parse("cn=foo, o=example").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn append_builds_local_dn() {
        let target = Dn::parse("cn=foo, o=remote").unwrap();
        let suffix = Dn::parse("cn=repl, o=local").unwrap();
        assert_eq!(
            target.append(&suffix).as_str(),
            "cn=foo, o=remote, cn=repl, o=local"
        );
    }

    #[test]
    fn descendant_checks() {
        let base = Dn::parse("o=example").unwrap();
        let child = Dn::parse("cn=foo, o=example").unwrap();
        let other = Dn::parse("cn=foo, o=other").unwrap();

        assert!(child.is_descendant_of(&base));
        assert!(base.is_descendant_of(&base));
        assert!(!other.is_descendant_of(&base));
        assert!(!base.is_descendant_of(&child));
    }

    #[test]
    fn parent_walks_up() {
        let dn = Dn::parse("cn=foo, ou=people, o=example").unwrap();
        let parent = dn.parent().unwrap();
        assert_eq!(parent.as_str(), "ou=people, o=example");
        assert_eq!(Dn::parse("o=example").unwrap().parent(), None);
    }

    #[test]
    fn escaped_comma_stays_in_rdn() {
        let dn = Dn::parse("cn=doe\\, john, o=example").unwrap();
        assert_eq!(dn.depth(), 2);
        assert_eq!(dn.rdns().next().unwrap(), "cn=doe\\, john");
    }
}
