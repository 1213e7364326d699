use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque string-to-string bag forwarded verbatim to storage backends.
///
/// The storage core never reads or branches on these entries; only a
/// backend that understands a particular key may act on it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hints(BTreeMap<String, String>);

impl Hints {
    /// An empty hint bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace an entry, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Hints {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_lookup() {
        let hints = Hints::new().with("mimetype", "text/xml").with("size", "42");
        assert_eq!(hints.get("mimetype"), Some("text/xml"));
        assert_eq!(hints.get("missing"), None);
        assert_eq!(hints.len(), 2);
    }

    #[test]
    fn iteration_is_sorted() {
        let hints: Hints = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]
        .into_iter()
        .collect();
        let keys: Vec<&str> = hints.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn serde_is_a_plain_map() {
        let hints = Hints::new().with("k", "v");
        let json = serde_json::to_string(&hints).unwrap();
        assert_eq!(json, r#"{"k":"v"}"#);
        let parsed: Hints = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, hints);
    }

    #[test]
    fn default_is_empty() {
        assert!(Hints::default().is_empty());
    }
}
