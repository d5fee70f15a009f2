//! Ordered, multi-value header map.
//!
//! Names compare case-insensitively ([RFC 9110 §5.1]) but keep the spelling
//! they were inserted with, so a captured response replays byte-for-byte.
//!
//! [RFC 9110 §5.1]: https://www.rfc-editor.org/rfc/rfc9110#section-5.1

use serde::{Deserialize, Serialize};

/// A case-insensitive header map that keeps every value in insertion order.
///
/// Serializes as a list of `[name, value]` pairs.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::Headers;
///
/// let mut live: Headers = [("Content-Type", "text/plain"), ("X-Trace", "7")]
///     .into_iter()
///     .collect();
/// let stored: Headers = [("content-type", "application/json")].into_iter().collect();
///
/// live.override_with(&stored);
/// assert_eq!(live.get("Content-Type"), Some("application/json"));
/// assert_eq!(live.get("x-trace"), Some("7"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

fn same_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field; existing values for `name` are kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| same_name(field, name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(field, _)| same_name(field, name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Drops every value for `name`, returning whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(field, _)| !same_name(field, name));
        self.fields.len() != before
    }

    /// Distinct names in first-seen order, using the first spelling seen.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(at, (name, _))| {
                !self.fields[..*at]
                    .iter()
                    .any(|(earlier, _)| same_name(earlier, name))
            })
            .map(|(_, (name, _))| name.as_str())
    }

    /// Replaces every field named in `other` with `other`'s values. Fields
    /// `other` does not mention are left alone.
    pub fn override_with(&mut self, other: &Headers) {
        for name in other.names() {
            self.remove(name);
        }
        self.extend(other.iter());
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<N, V> Extend<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (N, V)>>(&mut self, fields: I) {
        for (name, value) in fields {
            self.insert(name, value);
        }
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(fields: I) -> Self {
        let mut headers = Self::new();
        headers.extend(fields);
        headers
    }
}
