//! Documents, field selectors and result records.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A document: field name -> field value.
///
/// Stages share documents as `Arc<Document>`; two hits refer to the same document when their
/// `Arc`s point to the same allocation, regardless of field contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, String>);

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(field.into(), value.into())
    }

    /// Value of `field`, if present.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Iterate `(field, value)` pairs in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Document {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Ordered field selector (`on`): which fields make up a document's content string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(Vec<String>);

impl Fields {
    /// Field names, in concatenation order.
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Content string: the selected field values joined by a single space, in `on` order.
    pub fn content(&self, document: &Document) -> Result<String, Error> {
        let mut out = String::new();
        for (i, field) in self.0.iter().enumerate() {
            let value = document.get(field).ok_or_else(|| Error::MissingField {
                field: field.clone(),
            })?;
            if i > 0 {
                out.push(' ');
            }
            out.push_str(value);
        }
        Ok(out)
    }

    /// Content strings for a batch; fails on the first document missing a field.
    pub fn contents<'a, I>(&self, documents: I) -> Result<Vec<String>, Error>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        documents.into_iter().map(|d| self.content(d)).collect()
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

impl From<&str> for Fields {
    fn from(field: &str) -> Self {
        Self(vec![field.to_string()])
    }
}

impl From<String> for Fields {
    fn from(field: String) -> Self {
        Self(vec![field])
    }
}

impl<const N: usize> From<[&str; N]> for Fields {
    fn from(fields: [&str; N]) -> Self {
        Self(fields.iter().map(|f| f.to_string()).collect())
    }
}

impl From<Vec<String>> for Fields {
    fn from(fields: Vec<String>) -> Self {
        Self(fields)
    }
}

impl From<&[&str]> for Fields {
    fn from(fields: &[&str]) -> Self {
        Self(fields.iter().map(|f| f.to_string()).collect())
    }
}

/// A ranked result: a shared document and the score the producing stage gave it.
///
/// Zero-shot rankers report the classifier's `similarity`; retrievers report their engine score
/// (BM25 relevance, TF-IDF cosine similarity).
#[derive(Debug, Clone)]
pub struct Hit {
    /// The matched document.
    pub document: Arc<Document>,
    /// Relevance score (higher is better).
    pub score: f32,
}

impl Hit {
    /// Pair a document with its score.
    pub fn new(document: Arc<Document>, score: f32) -> Self {
        Self { document, score }
    }

    /// Whether both hits refer to the same document instance.
    pub fn same_document(&self, other: &Hit) -> bool {
        Arc::ptr_eq(&self.document, &other.document)
    }

    /// Identity key used for dedup/intersection across stages.
    pub(crate) fn key(&self) -> *const Document {
        Arc::as_ptr(&self.document)
    }
}

/// Truncate to an optional capacity.
pub(crate) fn truncate<T>(mut items: Vec<T>, k: Option<usize>) -> Vec<T> {
    if let Some(k) = k {
        items.truncate(k);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_joins_fields_in_on_order() {
        let doc = Document::from([("title", "Paris"), ("article", "capital of France")]);
        let on = Fields::from(["article", "title"]);
        assert_eq!(on.content(&doc).unwrap(), "capital of France Paris");
    }

    #[test]
    fn content_reports_missing_field() {
        let doc = Document::new().with("title", "Paris");
        let err = Fields::from(["title", "article"]).content(&doc).unwrap_err();
        assert_eq!(
            err,
            Error::MissingField {
                field: "article".into()
            }
        );
    }

    #[test]
    fn fields_display_is_comma_joined() {
        assert_eq!(Fields::from(["title", "article"]).to_string(), "title, article");
    }

    #[test]
    fn hits_compare_by_identity() {
        let a = Arc::new(Document::from([("t", "x")]));
        let b = Arc::new(Document::from([("t", "x")]));
        assert!(Hit::new(a.clone(), 1.0).same_document(&Hit::new(a, 0.0)));
        assert!(!Hit::new(b.clone(), 1.0).same_document(&Hit::new(Arc::new((*b).clone()), 1.0)));
    }
}
