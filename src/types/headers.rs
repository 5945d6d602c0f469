//! Case-insensitive header map.

use std::collections::btree_map::{self, BTreeMap};
use std::slice;

/// Header that may not be folded into one comma-separated value.
const SET_COOKIE: &str = "set-cookie";

/// Header collection keyed by lowercased header name.
///
/// Each name holds one value; inserting an existing name replaces it, and
/// [`Headers::append`] folds repeats into a comma-separated list. The one
/// exception is `Set-Cookie`, whose values stay separate and are read back
/// with [`Headers::get_all`]. Iteration order is by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any existing value for the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), vec![value.into()])
            .and_then(|previous| previous.into_iter().next())
    }

    /// Adds a value to a header that may already be present.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();
        match self.entries.get_mut(&name) {
            Some(values) if name == SET_COOKIE => values.push(value),
            Some(values) => {
                if let Some(first) = values.first_mut() {
                    first.push_str(", ");
                    first.push_str(&value);
                }
            }
            None => {
                self.entries.insert(name, vec![value]);
            }
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns the value for `name`, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every value stored for `name`, ignoring case.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns true if a header with `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .and_then(|values| values.into_iter().next())
    }

    /// Copies every header of `other` into `self`; `other` wins on conflict.
    pub fn merge(&mut self, other: &Headers) {
        for (name, values) in &other.entries {
            self.entries.insert(name.clone(), values.clone());
        }
    }

    /// Iterates over `(name, value)` pairs, one pair per stored value.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            entries: self.entries.iter(),
            current: None,
        }
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Iterator over header pairs.
#[derive(Debug)]
pub struct Iter<'a> {
    entries: btree_map::Iter<'a, String, Vec<String>>,
    current: Option<(&'a str, slice::Iter<'a, String>)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((name, values)) = &mut self.current {
                if let Some(value) = values.next() {
                    return Some((*name, value.as_str()));
                }
            }
            let (name, values) = self.entries.next()?;
            self.current = Some((name.as_str(), values.iter()));
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");

        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert!(headers.contains("Content-type"));
    }

    #[test]
    fn test_insert_replaces_existing_value() {
        let mut headers = Headers::new();
        headers.insert("X-Trace", "one");
        let previous = headers.insert("x-trace", "two");

        assert_eq!(previous.as_deref(), Some("one"));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("X-TRACE"), Some("two"));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut defaults = Headers::new().with("Accept", "text/plain").with("X-A", "1");
        let overrides = Headers::new().with("accept", "application/json");

        defaults.merge(&overrides);

        assert_eq!(defaults.get("accept"), Some("application/json"));
        assert_eq!(defaults.get("x-a"), Some("1"));
    }

    #[test]
    fn test_from_iterator() {
        let headers: Headers = vec![("A", "1"), ("b", "2")].into_iter().collect();
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_append_folds_repeated_values() {
        let mut headers = Headers::new();
        headers.append("Vary", "Accept");
        headers.append("vary", "Origin");

        assert_eq!(headers.get("vary"), Some("Accept, Origin"));
        assert_eq!(headers.get_all("vary"), vec!["Accept, Origin"]);
    }

    #[test]
    fn test_set_cookie_values_stay_separate() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT");
        headers.append("set-cookie", "b=2");
        headers.insert("Accept", "*/*");

        assert_eq!(
            headers.get_all("set-cookie"),
            vec!["a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT", "b=2"]
        );
        assert_eq!(headers.len(), 2);

        let pairs: Vec<(&str, &str)> = headers.iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("accept", "*/*"),
                ("set-cookie", "a=1; Expires=Wed, 21 Oct 2015 07:28:00 GMT"),
                ("set-cookie", "b=2"),
            ]
        );
    }
}
