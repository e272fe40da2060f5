//! Label mappings and their stored document form.
//!
//! A [`Labels`] value is an order-irrelevant string-to-string mapping. At the
//! storage boundary it is always written as a JSON object; the empty mapping
//! encodes to `{}` and never to `null` or an absent column, so decoding a
//! stored row is total.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Canonical encoding of an empty label mapping.
pub const EMPTY_DOCUMENT: &str = "{}";

/// Key-value annotations narrowing a metric's identity (e.g. which GPU).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Mapping with a single entry.
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = Self::new();
        labels.insert(key, value);
        labels
    }

    /// Insert a label, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// Merge `other` into `self`. Keys present in both take `other`'s value.
    pub fn merge(&mut self, other: &Labels) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Encode as a stored label document.
    pub fn to_document(&self) -> Result<String> {
        if self.is_empty() {
            return Ok(EMPTY_DOCUMENT.to_string());
        }
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Decode a stored label document. Blank and `null` documents decode to
    /// the empty mapping.
    pub fn from_document(doc: &str) -> Result<Self> {
        let doc = doc.trim();
        if doc.is_empty() || doc == "null" {
            return Ok(Self::new());
        }
        Ok(Self(serde_json::from_str(doc)?))
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K, V> FromIterator<(K, V)> for Labels
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
