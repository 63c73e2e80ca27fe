//! LDAP-style search filters.
//!
//! Implements the subset of RFC 4515 filter strings the replication policy
//! needs: equality, presence, substring, ordering comparisons and the
//! and/or/not composites. A parsed [`Filter`] is an immutable predicate over
//! an entry's [`Attributes`].

use crate::attrs::Attributes;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors produced while parsing a filter string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterParseError {
    /// The input was empty.
    #[error("empty filter")]
    Empty,
    /// The input ended inside a filter expression.
    #[error("unexpected end of filter")]
    UnexpectedEnd,
    /// An unexpected character was found.
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        found: char,
        /// Byte offset into the input.
        offset: usize,
    },
    /// A `\XX` escape was malformed.
    #[error("invalid escape sequence at offset {offset}")]
    BadEscape {
        /// Byte offset into the input.
        offset: usize,
    },
    /// Input remained after a complete filter expression.
    #[error("trailing characters after filter at offset {offset}")]
    TrailingInput {
        /// Byte offset into the input.
        offset: usize,
    },
    /// An attribute description was empty.
    #[error("empty attribute name at offset {offset}")]
    EmptyAttribute {
        /// Byte offset into the input.
        offset: usize,
    },
}

/// A parsed filter expression.
///
/// Matching follows the directory caseIgnoreMatch convention: attribute
/// names and values compare case-insensitively. Ordering comparisons use
/// numeric order when both sides parse as integers, string order otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All nested filters must match. `(&)` matches everything.
    And(Vec<Filter>),
    /// At least one nested filter must match. `(|)` matches nothing.
    Or(Vec<Filter>),
    /// The nested filter must not match.
    Not(Box<Filter>),
    /// An attribute carries the given value.
    Equality {
        /// Attribute name.
        attr: String,
        /// Expected value.
        value: String,
    },
    /// An attribute is present with any value.
    Present {
        /// Attribute name.
        attr: String,
    },
    /// An attribute value matches a wildcard pattern.
    Substring {
        /// Attribute name.
        attr: String,
        /// Required prefix, if any.
        initial: Option<String>,
        /// Required interior fragments, in order.
        any: Vec<String>,
        /// Required suffix, if any.
        fin: Option<String>,
    },
    /// An attribute value is >= the given value.
    GreaterOrEqual {
        /// Attribute name.
        attr: String,
        /// Comparison value.
        value: String,
    },
    /// An attribute value is <= the given value.
    LessOrEqual {
        /// Attribute name.
        attr: String,
        /// Comparison value.
        value: String,
    },
}

impl Filter {
    /// Parses a filter string such as `(&(objectclass=person)(uid=*))`.
    pub fn parse(input: &str) -> Result<Self, FilterParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(FilterParseError::Empty);
        }
        let chars: Vec<char> = input.chars().collect();
        let mut parser = Parser { chars, pos: 0 };
        let filter = parser.parse_filter()?;
        if parser.pos != parser.chars.len() {
            return Err(FilterParseError::TrailingInput { offset: parser.pos });
        }
        Ok(filter)
    }

    /// Creates a presence filter for an attribute.
    ///
    /// `Filter::present("objectclass")` is the catch-all existence filter:
    /// it matches every well-formed directory entry.
    pub fn present(attr: impl Into<String>) -> Self {
        Filter::Present { attr: attr.into() }
    }

    /// Creates an equality filter.
    pub fn equality(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equality {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Evaluates the filter against an attribute set.
    pub fn matches(&self, attrs: &Attributes) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(attrs)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(attrs)),
            Filter::Not(filter) => !filter.matches(attrs),
            Filter::Equality { attr, value } => attrs.contains_value(attr, value),
            Filter::Present { attr } => attrs.contains_attr(attr),
            Filter::Substring {
                attr,
                initial,
                any,
                fin,
            } => attrs
                .get(attr)
                .is_some_and(|vs| vs.iter().any(|v| substring_match(v, initial, any, fin))),
            Filter::GreaterOrEqual { attr, value } => attrs.get(attr).is_some_and(|vs| {
                vs.iter()
                    .any(|v| compare_values(v, value) != Ordering::Less)
            }),
            Filter::LessOrEqual { attr, value } => attrs.get(attr).is_some_and(|vs| {
                vs.iter()
                    .any(|v| compare_values(v, value) != Ordering::Greater)
            }),
        }
    }
}

/// Orders two attribute values: numerically when both are integers,
/// case-insensitively as strings otherwise.
fn compare_values(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
    }
}

/// Matches a value against substring pattern parts, case-insensitively.
fn substring_match(
    value: &str,
    initial: &Option<String>,
    any: &[String],
    fin: &Option<String>,
) -> bool {
    let value = value.to_ascii_lowercase();
    let mut rest = value.as_str();

    if let Some(prefix) = initial {
        let prefix = prefix.to_ascii_lowercase();
        if !rest.starts_with(&prefix) {
            return false;
        }
        rest = &rest[prefix.len()..];
    }

    for fragment in any {
        let fragment = fragment.to_ascii_lowercase();
        match rest.find(&fragment) {
            Some(at) => rest = &rest[at + fragment.len()..],
            None => return false,
        }
    }

    if let Some(suffix) = fin {
        let suffix = suffix.to_ascii_lowercase();
        if !rest.ends_with(&suffix) {
            return false;
        }
    }

    true
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterParseError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(FilterParseError::UnexpectedChar {
                found: c,
                offset: self.pos - 1,
            }),
            None => Err(FilterParseError::UnexpectedEnd),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, FilterParseError> {
        self.expect('(')?;
        let filter = match self.peek() {
            Some('&') => {
                self.bump();
                Filter::And(self.parse_filter_list()?)
            }
            Some('|') => {
                self.bump();
                Filter::Or(self.parse_filter_list()?)
            }
            Some('!') => {
                self.bump();
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_comparison()?,
            None => return Err(FilterParseError::UnexpectedEnd),
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_filter_list(&mut self) -> Result<Vec<Filter>, FilterParseError> {
        let mut filters = Vec::new();
        while self.peek() == Some('(') {
            filters.push(self.parse_filter()?);
        }
        Ok(filters)
    }

    fn parse_comparison(&mut self) -> Result<Filter, FilterParseError> {
        let attr_start = self.pos;
        let mut attr = String::new();
        let op = loop {
            match self.bump() {
                Some('=') => break '=',
                Some('>') => {
                    self.expect('=')?;
                    break '>';
                }
                Some('<') => {
                    self.expect('=')?;
                    break '<';
                }
                Some(c @ (')' | '(')) => {
                    return Err(FilterParseError::UnexpectedChar {
                        found: c,
                        offset: self.pos - 1,
                    })
                }
                Some(c) => attr.push(c),
                None => return Err(FilterParseError::UnexpectedEnd),
            }
        };
        if attr.is_empty() {
            return Err(FilterParseError::EmptyAttribute { offset: attr_start });
        }

        let (segments, starred) = self.parse_value()?;
        match op {
            '>' => Ok(Filter::GreaterOrEqual {
                attr,
                value: segments.concat(),
            }),
            '<' => Ok(Filter::LessOrEqual {
                attr,
                value: segments.concat(),
            }),
            _ if !starred => Ok(Filter::Equality {
                attr,
                value: segments.concat(),
            }),
            _ if segments.iter().all(String::is_empty) => Ok(Filter::Present { attr }),
            _ => {
                let mut parts = segments;
                let fin = match parts.pop() {
                    Some(s) if !s.is_empty() => Some(s),
                    _ => None,
                };
                let initial = match parts.first() {
                    Some(s) if !s.is_empty() => Some(s.clone()),
                    _ => None,
                };
                let any = parts
                    .into_iter()
                    .skip(1)
                    .filter(|s| !s.is_empty())
                    .collect();
                Ok(Filter::Substring {
                    attr,
                    initial,
                    any,
                    fin,
                })
            }
        }
    }

    /// Reads a value up to the closing paren. Returns the `*`-separated
    /// segments (escapes decoded) and whether any wildcard was seen.
    fn parse_value(&mut self) -> Result<(Vec<String>, bool), FilterParseError> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut starred = false;
        loop {
            match self.peek() {
                Some(')') | None => break,
                Some('*') => {
                    self.bump();
                    starred = true;
                    segments.push(std::mem::take(&mut current));
                }
                Some('\\') => {
                    let offset = self.pos;
                    self.bump();
                    let hi = self.bump().ok_or(FilterParseError::UnexpectedEnd)?;
                    let lo = self.bump().ok_or(FilterParseError::UnexpectedEnd)?;
                    let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16)
                        .map_err(|_| FilterParseError::BadEscape { offset })?;
                    current.push(byte as char);
                }
                Some(c) => {
                    self.bump();
                    current.push(c);
                }
            }
        }
        segments.push(current);
        Ok((segments, starred))
    }
}

/// Escapes the characters RFC 4515 reserves inside values.
fn escape_value(value: &str, out: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in value.chars() {
        match c {
            '(' => out.write_str("\\28")?,
            ')' => out.write_str("\\29")?,
            '*' => out.write_str("\\2a")?,
            '\\' => out.write_str("\\5c")?,
            _ => fmt::Write::write_char(out, c)?,
        }
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Not(filter) => write!(f, "(!{filter})"),
            Filter::Equality { attr, value } => {
                write!(f, "({attr}=")?;
                escape_value(value, f)?;
                f.write_str(")")
            }
            Filter::Present { attr } => write!(f, "({attr}=*)"),
            Filter::Substring {
                attr,
                initial,
                any,
                fin,
            } => {
                write!(f, "({attr}=")?;
                if let Some(initial) = initial {
                    escape_value(initial, f)?;
                }
                for fragment in any {
                    f.write_str("*")?;
                    escape_value(fragment, f)?;
                }
                f.write_str("*")?;
                if let Some(fin) = fin {
                    escape_value(fin, f)?;
                }
                f.write_str(")")
            }
            Filter::GreaterOrEqual { attr, value } => {
                write!(f, "({attr}>=")?;
                escape_value(value, f)?;
                f.write_str(")")
            }
            Filter::LessOrEqual { attr, value } => {
                write!(f, "({attr}<=")?;
                escape_value(value, f)?;
                f.write_str(")")
            }
        }
    }
}

impl std::str::FromStr for Filter {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
