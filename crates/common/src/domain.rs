//! Hostname grammar and the ordered, de-duplicated whitelist model.
//!
//! Grammar: dot-separated labels of `[a-z0-9]` with optional internal
//! hyphens, each 1-63 characters, and a final label made of letters only,
//! at least two long. Inputs are normalized before they are tested: the
//! scheme, path, query, fragment and port are stripped and the host is
//! lowercased.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
        .unwrap_or_else(|err| panic!("domain grammar failed to compile: {err}"))
});

static SCHEME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9+.\-]*://")
        .unwrap_or_else(|err| panic!("scheme pattern failed to compile: {err}"))
});

const MAX_DOMAIN_LEN: usize = 253;

/// Strip scheme, path, query, fragment and port, then lowercase.
pub fn normalize_domain(input: &str) -> String {
    let lowered = input.trim().to_ascii_lowercase();
    let without_scheme = match SCHEME_RE.find(&lowered) {
        Some(m) => &lowered[m.end()..],
        None => lowered.as_str(),
    };
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    host.to_string()
}

pub fn validate_domain(input: &str) -> bool {
    let host = normalize_domain(input);
    host.len() <= MAX_DOMAIN_LEN && DOMAIN_RE.is_match(&host)
}

/// A single validated, normalized hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainEntry(String);

/// Rejected hostname input, kept verbatim for error reporting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid domain format: {0}")]
pub struct InvalidDomain(pub String);

impl DomainEntry {
    pub fn parse(input: &str) -> Result<Self, InvalidDomain> {
        if validate_domain(input) {
            Ok(Self(normalize_domain(input)))
        } else {
            Err(InvalidDomain(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DomainEntry {
    type Error = InvalidDomain;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DomainEntry> for String {
    fn from(value: DomainEntry) -> Self {
        value.0
    }
}

/// Validate every input, returning the parsed entries or every rejected input.
pub fn parse_all<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<DomainEntry>, Vec<String>> {
    let mut entries = Vec::with_capacity(inputs.len());
    let mut invalid = Vec::new();
    for input in inputs {
        match DomainEntry::parse(input.as_ref()) {
            Ok(entry) => entries.push(entry),
            Err(InvalidDomain(raw)) => invalid.push(raw),
        }
    }
    if invalid.is_empty() {
        Ok(entries)
    } else {
        Err(invalid)
    }
}

/// Ordered set of domains applied identically to every browser target.
///
/// Insertion order is kept only because the backend stores entries under
/// positional indices; duplicates are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DomainEntry>", into = "Vec<DomainEntry>")]
pub struct Whitelist {
    entries: Vec<DomainEntry>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the entry was already present.
    pub fn insert(&mut self, entry: DomainEntry) -> bool {
        if self.entries.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Returns `false` when the entry was absent.
    pub fn remove(&mut self, entry: &DomainEntry) -> bool {
        let before = self.entries.len();
        self.entries.retain(|existing| existing != entry);
        self.entries.len() != before
    }

    pub fn contains(&self, entry: &DomainEntry) -> bool {
        self.entries.contains(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainEntry> {
        self.entries.iter()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.as_str().to_string()).collect()
    }
}

impl FromIterator<DomainEntry> for Whitelist {
    fn from_iter<I: IntoIterator<Item = DomainEntry>>(iter: I) -> Self {
        let mut whitelist = Self::new();
        for entry in iter {
            whitelist.insert(entry);
        }
        whitelist
    }
}

impl From<Vec<DomainEntry>> for Whitelist {
    fn from(entries: Vec<DomainEntry>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<Whitelist> for Vec<DomainEntry> {
    fn from(value: Whitelist) -> Self {
        value.entries
    }
}

impl<'a> IntoIterator for &'a Whitelist {
    type Item = &'a DomainEntry;
    type IntoIter = std::slice::Iter<'a, DomainEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
