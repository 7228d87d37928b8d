//! TF-IDF retriever ranking by cosine similarity.
//!
//! The vectorizer is refit over the whole corpus on every `add`, so the vocabulary always covers
//! exactly the documents added so far. Query terms outside that vocabulary are ignored; documents
//! with zero similarity are never returned.
//!
//! References:
//! - Spärck Jones (1972): term specificity / IDF motivation.
//! - Salton & Buckley (1988): term-weighting approaches in automatic text retrieval.

use crate::compose::{restrict, Combinator, Stage};
use crate::document::{truncate, Document, Fields, Hit};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How raw term counts become weights (delegates to `rankfns::tf_transform`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TfVariant {
    /// The raw count.
    Linear,
    /// Sublinear: one plus the log of the count.
    LogScaled,
}

/// IDF weighting over the fitted corpus (`N` documents, term in `df` of them).
///
/// Both forms add 1 so terms present in every document keep a non-zero weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdfVariant {
    /// `ln(N / df) + 1`.
    Standard,
    /// `ln((1 + N) / (1 + df)) + 1`, counting one extra document that holds every term.
    Smoothed,
}

impl From<TfVariant> for rankfns::TfVariant {
    fn from(v: TfVariant) -> Self {
        match v {
            TfVariant::Linear => rankfns::TfVariant::Linear,
            TfVariant::LogScaled => rankfns::TfVariant::LogScaled,
        }
    }
}

/// Vectorizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfIdfConfig {
    /// Term-frequency transform.
    pub tf_variant: TfVariant,
    /// IDF transform.
    pub idf_variant: IdfVariant,
    /// Lowercase text before tokenizing.
    pub lowercase: bool,
    /// Shortest token kept, in characters.
    pub min_token_len: usize,
}

impl Default for TfIdfConfig {
    fn default() -> Self {
        Self {
            tf_variant: TfVariant::Linear,
            idf_variant: IdfVariant::Smoothed,
            lowercase: true,
            min_token_len: 2,
        }
    }
}

impl TfIdfConfig {
    /// Log-scaled TF with smoothed IDF.
    pub fn sublinear() -> Self {
        Self {
            tf_variant: TfVariant::LogScaled,
            ..Self::default()
        }
    }
}

/// Sparse vector: `(term id, weight)` pairs sorted by term id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    entries: Vec<(u32, f32)>,
}

impl SparseVector {
    /// Build from arbitrary pairs; duplicate ids are summed.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, f32)>) -> Self {
        let mut merged: BTreeMap<u32, f32> = BTreeMap::new();
        for (id, w) in entries {
            *merged.entry(id).or_default() += w;
        }
        Self {
            entries: merged.into_iter().collect(),
        }
    }

    /// Entries, sorted by term id.
    pub fn entries(&self) -> &[(u32, f32)] {
        &self.entries
    }

    /// Whether the vector has no non-zero entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.entries.iter().map(|(_, w)| w * w).sum::<f32>().sqrt()
    }

    /// Scale to unit length (no-op for the zero vector).
    pub fn normalized(mut self) -> Self {
        let norm = self.norm();
        if norm > 0.0 {
            for (_, w) in &mut self.entries {
                *w /= norm;
            }
        }
        self
    }

    /// Dot product (a merge over the two sorted entry lists).
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (a, b) = (&self.entries, &other.entries);
        let (mut i, mut j) = (0usize, 0usize);
        let mut sum = 0.0;
        while i < a.len() && j < b.len() {
            match a[i].0.cmp(&b[j].0) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += a[i].1 * b[j].1;
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Turns text into vectors in a space fitted on a corpus.
///
/// `transform` must map into the space of the most recent `fit_transform`.
pub trait Vectorizer: Send + Sync {
    /// Fit the vector space on `corpus` and return one row per document.
    ///
    /// A corpus that yields no terms leaves the vectorizer unfitted and returns no rows.
    fn fit_transform(&mut self, corpus: &[String]) -> Vec<SparseVector>;

    /// Whether a space has been fitted.
    fn is_fitted(&self) -> bool;

    /// Project `text` into the fitted space. Fails with [`Error::NotFitted`] before fitting.
    fn transform(&self, text: &str) -> Result<SparseVector, Error>;
}

/// TF-IDF vectorizer producing l2-normalized rows, so dot product = cosine similarity.
#[derive(Debug, Clone, Default)]
pub struct TfIdfVectorizer {
    config: TfIdfConfig,
    vocabulary: Option<HashMap<String, u32>>,
    idf: Vec<f32>,
}

impl TfIdfVectorizer {
    /// Unfitted vectorizer.
    pub fn new(config: TfIdfConfig) -> Self {
        Self {
            config,
            vocabulary: None,
            idf: Vec::new(),
        }
    }

    /// Configuration.
    pub fn config(&self) -> &TfIdfConfig {
        &self.config
    }

    /// Fitted vocabulary size (`None` before fitting).
    pub fn vocabulary_len(&self) -> Option<usize> {
        self.vocabulary.as_ref().map(HashMap::len)
    }

    /// Split text into terms: runs of alphanumerics/underscore, at least `min_token_len` chars.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let text = if self.config.lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| !t.is_empty() && t.chars().count() >= self.config.min_token_len)
            .map(str::to_string)
            .collect()
    }

    fn idf(&self, n: usize, df: u32) -> f32 {
        let (n, df) = (n as f32, df as f32);
        match self.config.idf_variant {
            IdfVariant::Standard => (n / df).ln() + 1.0,
            IdfVariant::Smoothed => ((1.0 + n) / (1.0 + df)).ln() + 1.0,
        }
    }

    fn tf(&self, count: u32) -> f32 {
        rankfns::tf_transform(count, self.config.tf_variant.into())
    }

    fn vectorize(&self, vocabulary: &HashMap<String, u32>, text: &str) -> SparseVector {
        let mut counts: HashMap<u32, u32> = HashMap::new();
        for term in self.tokenize(text) {
            if let Some(&id) = vocabulary.get(&term) {
                *counts.entry(id).or_default() += 1;
            }
        }
        SparseVector::from_entries(
            counts
                .into_iter()
                .map(|(id, c)| (id, self.tf(c) * self.idf[id as usize])),
        )
        .normalized()
    }
}

impl Vectorizer for TfIdfVectorizer {
    fn fit_transform(&mut self, corpus: &[String]) -> Vec<SparseVector> {
        let mut doc_freq: BTreeMap<String, u32> = BTreeMap::new();
        for text in corpus {
            let mut terms = self.tokenize(text);
            terms.sort_unstable();
            terms.dedup();
            for term in terms {
                *doc_freq.entry(term).or_default() += 1;
            }
        }

        if doc_freq.is_empty() {
            self.vocabulary = None;
            self.idf.clear();
            return Vec::new();
        }

        // Term ids follow lexicographic order, independent of insertion order.
        let mut vocabulary = HashMap::with_capacity(doc_freq.len());
        let mut idf = Vec::with_capacity(doc_freq.len());
        for (id, (term, df)) in doc_freq.into_iter().enumerate() {
            idf.push(self.idf(corpus.len(), df));
            vocabulary.insert(term, id as u32);
        }
        self.idf = idf;

        let rows = corpus
            .iter()
            .map(|text| self.vectorize(&vocabulary, text))
            .collect();
        self.vocabulary = Some(vocabulary);
        rows
    }

    fn transform(&self, text: &str) -> Result<SparseVector, Error> {
        let vocabulary = self.vocabulary.as_ref().ok_or(Error::NotFitted)?;
        Ok(self.vectorize(vocabulary, text))
    }

    fn is_fitted(&self) -> bool {
        self.vocabulary.is_some()
    }
}

/// TF-IDF retriever over a single text field.
pub struct TfIdf<V = TfIdfVectorizer> {
    on: Fields,
    k: Option<usize>,
    vectorizer: V,
    documents: Vec<Arc<Document>>,
    contents: Vec<String>,
    matrix: Option<Vec<SparseVector>>,
}

impl TfIdf<TfIdfVectorizer> {
    /// Retriever over `field` with the default vectorizer.
    pub fn new(field: impl Into<String>) -> Self {
        Self::with_vectorizer(field, TfIdfVectorizer::default())
    }

    /// Retriever over `field` with a configured default vectorizer.
    pub fn with_config(field: impl Into<String>, config: TfIdfConfig) -> Self {
        Self::with_vectorizer(field, TfIdfVectorizer::new(config))
    }
}

impl<V: Vectorizer> TfIdf<V> {
    /// Retriever over `field` with a custom vectorizer.
    pub fn with_vectorizer(field: impl Into<String>, vectorizer: V) -> Self {
        Self {
            on: Fields::from(field.into()),
            k: None,
            vectorizer,
            documents: Vec::new(),
            contents: Vec::new(),
            matrix: None,
        }
    }

    /// Cap the number of returned documents.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Capacity (`None` = every document with positive similarity).
    pub fn k(&self) -> Option<usize> {
        self.k
    }

    /// Corpus, in insertion order.
    pub fn documents(&self) -> &[Arc<Document>] {
        &self.documents
    }

    /// The vectorizer.
    pub fn vectorizer(&self) -> &V {
        &self.vectorizer
    }

    /// Append documents and refit the vectorizer over the whole corpus.
    ///
    /// The batch is validated first: if any document lacks the field, nothing is added.
    pub fn add<I>(&mut self, documents: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arc<Document>>,
    {
        let batch: Vec<Arc<Document>> = documents.into_iter().map(Into::into).collect();
        let contents = self.on.contents(batch.iter().map(|d| &**d))?;

        self.documents.extend(batch);
        self.contents.extend(contents);
        let matrix = self.vectorizer.fit_transform(&self.contents);
        debug!(
            documents = self.documents.len(),
            rows = matrix.len(),
            fitted = self.vectorizer.is_fitted(),
            "refit tfidf matrix"
        );
        self.matrix = self.vectorizer.is_fitted().then_some(matrix);
        Ok(self)
    }

    /// Documents with positive cosine similarity to `query`, most similar first, truncated to `k`.
    pub fn retrieve(&self, query: &str) -> Result<Vec<Hit>, Error> {
        let hits = truncate(self.rank(query)?, self.k);
        debug!(query, hits = hits.len(), "tfidf retrieve");
        Ok(hits)
    }

    fn rank(&self, query: &str) -> Result<Vec<Hit>, Error> {
        let matrix = self.matrix.as_ref().ok_or(Error::NotFitted)?;
        let q = self.vectorizer.transform(query)?;

        let mut scored: Vec<(usize, f32)> = matrix
            .iter()
            .map(|row| q.dot(row))
            .enumerate()
            .filter(|(_, s)| s.is_finite() && *s > 0.0)
            .collect();
        // Deterministic: similarity desc, then corpus position asc.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .map(|(pos, s)| Hit::new(self.documents[pos].clone(), s))
            .collect())
    }
}

impl<V> fmt::Display for TfIdf<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TfIdf retriever\n\t on: {}\n\t documents: {}",
            self.on,
            self.documents.len()
        )
    }
}

impl<V: Vectorizer + 'static> Stage for TfIdf<V> {
    fn validate(&self, documents: &[Arc<Document>]) -> Result<(), Error> {
        self.on.contents(documents.iter().map(|d| &**d)).map(|_| ())
    }

    fn add(&mut self, documents: &[Arc<Document>]) -> Result<(), Error> {
        TfIdf::add(self, documents.iter().cloned()).map(|_| ())
    }

    fn search(&self, query: &str, candidates: Option<&[Hit]>) -> Result<Vec<Hit>, Error> {
        match candidates {
            None => self.retrieve(query),
            Some(c) => Ok(truncate(restrict(self.rank(query)?, c), self.k)),
        }
    }

    fn flatten(self: Box<Self>, _: Combinator) -> Vec<Box<dyn Stage>> {
        vec![self]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(hits: &[Hit]) -> Vec<&str> {
        hits.iter().map(|h| h.document.get("title").unwrap()).collect()
    }

    #[test]
    fn tokenize_drops_short_tokens_and_punctuation() {
        let v = TfIdfVectorizer::default();
        assert_eq!(
            v.tokenize("Github Library, with PyTorch & a snake_case id."),
            vec!["github", "library", "with", "pytorch", "snake_case", "id"]
        );
    }

    #[test]
    fn rows_are_unit_length() {
        let mut v = TfIdfVectorizer::default();
        let rows = v.fit_transform(&["alpha beta beta".into(), "beta gamma".into()]);
        for row in rows {
            assert!((row.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn smoothed_idf_matches_formula() {
        let mut v = TfIdfVectorizer::default();
        v.fit_transform(&["aa bb".into(), "aa cc".into(), "dd".into()]);
        // df(aa) = 2, n = 3.
        let expected = (4.0f32 / 3.0).ln() + 1.0;
        let id = v.vocabulary.as_ref().unwrap()["aa"] as usize;
        assert!((v.idf[id] - expected).abs() < 1e-6);
    }

    #[test]
    fn transform_before_fit_is_an_error() {
        let v = TfIdfVectorizer::default();
        assert_eq!(v.transform("anything"), Err(Error::NotFitted));
    }

    #[test]
    fn query_before_add_is_not_fitted() {
        let r = TfIdf::new("title");
        assert_eq!(r.retrieve("anything").unwrap_err(), Error::NotFitted);
    }

    #[test]
    fn shorter_document_wins_and_ties_keep_corpus_order() {
        let mut r = TfIdf::new("title").with_k(2);
        r.add([
            Document::from([("url", "ckb"), ("title", "Github library with PyTorch and Transformers.")]),
            Document::from([("url", "mkb"), ("title", "Github Library with PyTorch.")]),
            Document::from([("url", "blp"), ("title", "Github Library with Pytorch and Transformers.")]),
        ])
        .unwrap();

        let hits = r.retrieve("Github").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.get("url"), Some("mkb"));
        assert_eq!(hits[1].document.get("url"), Some("ckb"));
    }

    #[test]
    fn zero_similarity_documents_are_dropped() {
        let mut r = TfIdf::new("title");
        r.add([
            Document::from([("title", "rust ownership")]),
            Document::from([("title", "python typing")]),
        ])
        .unwrap();
        assert_eq!(titles(&r.retrieve("rust").unwrap()), vec!["rust ownership"]);
        assert!(r.retrieve("haskell").unwrap().is_empty());
    }

    #[test]
    fn add_refits_vocabulary() {
        let mut r = TfIdf::new("title");
        r.add([Document::from([("title", "rust ownership")])]).unwrap();
        assert!(r.retrieve("borrowing").unwrap().is_empty());
        r.add([Document::from([("title", "rust borrowing")])]).unwrap();
        assert_eq!(titles(&r.retrieve("borrowing").unwrap()), vec!["rust borrowing"]);
        assert_eq!(r.to_string(), "TfIdf retriever\n\t on: title\n\t documents: 2");
    }

    #[test]
    fn log_scaled_tf_weights_follow_one_plus_ln() {
        let mut v = TfIdfVectorizer::new(TfIdfConfig::sublinear());
        let rows = v.fit_transform(&["spam spam spam eggs".into(), "eggs ham".into()]);
        let vocab = v.vocabulary.as_ref().unwrap();
        let weight = |row: &SparseVector, term: &str| {
            let id = vocab[term];
            row.entries().iter().find(|(i, _)| *i == id).map(|(_, w)| *w).unwrap()
        };
        let (spam, eggs) = (weight(&rows[0], "spam"), weight(&rows[0], "eggs"));
        let expected = (1.0 + 3f32.ln()) * v.idf[vocab["spam"] as usize]
            / (1.0 * v.idf[vocab["eggs"] as usize]);
        assert!((spam / eggs - expected).abs() < 1e-5);
    }

    #[test]
    fn empty_batch_on_fresh_retriever_stays_unfitted() {
        let mut r = TfIdf::new("title");
        r.add(Vec::<Document>::new()).unwrap();
        assert_eq!(r.retrieve("anything").unwrap_err(), Error::NotFitted);

        r.add([Document::from([("title", "a b c")])]).unwrap();
        assert_eq!(r.documents().len(), 1);
        assert_eq!(r.retrieve("anything").unwrap_err(), Error::NotFitted);
        assert!(!r.vectorizer().is_fitted());

        r.add([Document::from([("title", "rust")])]).unwrap();
        assert_eq!(titles(&r.retrieve("rust").unwrap()), vec!["rust"]);
    }

    #[test]
    fn sublinear_config_dampens_repetition() {
        let mut linear = TfIdfVectorizer::default();
        let mut sub = TfIdfVectorizer::new(TfIdfConfig::sublinear());
        let corpus = vec!["spam spam spam spam eggs".to_string(), "eggs ham".to_string()];
        let l = linear.fit_transform(&corpus);
        let s = sub.fit_transform(&corpus);
        let spam_l = linear.transform("spam").unwrap().dot(&l[0]);
        let spam_s = sub.transform("spam").unwrap().dot(&s[0]);
        assert!(spam_s < spam_l);
    }
}
