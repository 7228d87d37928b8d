//! BM25 retrievers (Okapi, BM25L, BM25+) over an in-memory corpus.
//!
//! Every `add` re-tokenizes the whole corpus and rebuilds the scoring statistics from scratch;
//! corpora are assumed small enough for that to be cheap. Scoring visits every document (there is
//! no inverted index), and every document is returned, ranked by score.
//!
//! Ranking is deterministic: score desc, then the later corpus position first.
//!
//! References:
//! - Robertson & Zaragoza (2009). "The Probabilistic Relevance Framework: BM25 and Beyond."
//! - Lv & Zhai (2011). "When documents are very long, BM25 fails!" (BM25L)
//! - Lv & Zhai (2011). "Lower-bounding term frequency normalization." (BM25+)
//! - Trotman, Puurula & Burgess (2014). "Improvements to BM25 and Language Models Examined."

use crate::compose::{restrict, Combinator, Stage};
use crate::document::{truncate, Document, Fields, Hit};
use crate::tokenize::{Tokenizer, Whitespace};
use crate::Error;
use rankfns::bm25_tf;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// BM25 variant selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Bm25Variant {
    /// Okapi BM25; negative IDFs are floored at `epsilon * mean_idf`.
    Okapi {
        /// IDF floor, as a fraction of the mean IDF.
        epsilon: f32,
    },
    /// BM25L: shifts the length-normalized TF by `delta`.
    L {
        /// Additive shift on the normalized term frequency.
        delta: f32,
    },
    /// BM25+: lower-bounds every in-vocabulary query term's contribution by `delta * idf`.
    Plus {
        /// Additive lower bound on the TF contribution.
        delta: f32,
    },
}

impl Default for Bm25Variant {
    fn default() -> Self {
        Self::okapi()
    }
}

impl Bm25Variant {
    /// Okapi with the conventional epsilon (0.25).
    pub fn okapi() -> Self {
        Self::Okapi { epsilon: 0.25 }
    }
    /// BM25L with the conventional delta (0.5).
    pub fn bm25l() -> Self {
        Self::L { delta: 0.5 }
    }
    /// BM25+ with the conventional delta (1.0).
    pub fn bm25plus() -> Self {
        Self::Plus { delta: 1.0 }
    }

    /// Name used when describing a retriever.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Okapi { .. } => "BM25Okapi",
            Self::L { .. } => "BM25L",
            Self::Plus { .. } => "BM25Plus",
        }
    }
}

/// BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation parameter.
    pub k1: f32,
    /// Length normalization parameter.
    pub b: f32,
    /// Variant choice (Okapi/BM25L/BM25+) and its smoothing parameter.
    pub variant: Bm25Variant,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            variant: Bm25Variant::okapi(),
        }
    }
}

impl Bm25Params {
    /// Okapi parameters with the given smoothing values.
    pub fn okapi(k1: f32, b: f32, epsilon: f32) -> Self {
        Self {
            k1,
            b,
            variant: Bm25Variant::Okapi { epsilon },
        }
    }

    /// BM25L parameters with the given smoothing values.
    pub fn bm25l(k1: f32, b: f32, delta: f32) -> Self {
        Self {
            k1,
            b,
            variant: Bm25Variant::L { delta },
        }
    }

    /// BM25+ parameters with the given smoothing values.
    pub fn bm25plus(k1: f32, b: f32, delta: f32) -> Self {
        Self {
            k1,
            b,
            variant: Bm25Variant::Plus { delta },
        }
    }
}

/// Corpus statistics for BM25 scoring, built in one pass over a tokenized corpus.
///
/// Document positions match the order of the corpus handed to [`Bm25Index::build`].
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    params: Bm25Params,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<u32>,
    avg_doc_len: f32,
    idf: HashMap<String, f32>,
}

impl Bm25Index {
    /// Build statistics over `corpus` (one token list per document).
    pub fn build<S: AsRef<str>>(corpus: &[Vec<S>], params: Bm25Params) -> Self {
        let mut term_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut doc_freq: BTreeMap<String, u32> = BTreeMap::new();
        let mut total_len: u64 = 0;

        for tokens in corpus {
            let mut tf: HashMap<String, u32> = HashMap::new();
            for t in tokens {
                *tf.entry(t.as_ref().to_string()).or_default() += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
            doc_lens.push(tokens.len() as u32);
            total_len += tokens.len() as u64;
            term_freqs.push(tf);
        }

        let avg_doc_len = if corpus.is_empty() {
            0.0
        } else {
            total_len as f32 / corpus.len() as f32
        };
        let idf = compute_idf(&doc_freq, corpus.len() as f32, params.variant);

        Self {
            params,
            term_freqs,
            doc_lens,
            avg_doc_len,
            idf,
        }
    }

    /// Number of indexed documents.
    pub fn num_docs(&self) -> usize {
        self.doc_lens.len()
    }

    /// Number of distinct terms.
    pub fn vocabulary_len(&self) -> usize {
        self.idf.len()
    }

    /// Average document length (in terms).
    pub fn avg_doc_len(&self) -> f32 {
        self.avg_doc_len
    }

    /// IDF of `term` (0 for out-of-vocabulary terms).
    pub fn idf(&self, term: &str) -> f32 {
        self.idf.get(term).copied().unwrap_or(0.0)
    }

    /// Parameters the index was built with.
    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// BM25 score of the document at `pos` (caller provides tokenized query terms).
    ///
    /// Repeated query terms count once per occurrence.
    pub fn score<S: AsRef<str>>(&self, pos: usize, query_terms: &[S]) -> f32 {
        let (Some(tf), Some(&dl)) = (self.term_freqs.get(pos), self.doc_lens.get(pos)) else {
            return 0.0;
        };
        if self.avg_doc_len == 0.0 {
            return 0.0;
        }
        let Bm25Params { k1, b, variant } = self.params;
        let dl = dl as f32;

        let mut score = 0.0;
        for term in query_terms {
            let term = term.as_ref();
            let idf = self.idf(term);
            if idf == 0.0 {
                continue;
            }
            let f = tf.get(term).copied().unwrap_or(0) as f32;
            score += match variant {
                Bm25Variant::Okapi { .. } if f == 0.0 => continue,
                Bm25Variant::Okapi { .. } => idf * bm25_tf(f, dl, self.avg_doc_len, k1, b),
                // Absent terms still earn the delta lower bound.
                Bm25Variant::Plus { delta } if f == 0.0 => idf * delta,
                Bm25Variant::Plus { delta } => {
                    idf * (delta + bm25_tf(f, dl, self.avg_doc_len, k1, b))
                }
                Bm25Variant::L { delta } => {
                    // Absent terms still earn the delta-shifted contribution.
                    let norm = 1.0 - b + b * dl / self.avg_doc_len;
                    let ctd = if norm > 0.0 { f / norm } else { 0.0 };
                    let denom = k1 + ctd + delta;
                    if denom <= 0.0 {
                        continue;
                    }
                    idf * (k1 + 1.0) * (ctd + delta) / denom
                }
            };
        }
        score
    }

    /// Scores for every document, in corpus order.
    pub fn scores<S: AsRef<str>>(&self, query_terms: &[S]) -> Vec<f32> {
        (0..self.num_docs())
            .map(|pos| self.score(pos, query_terms))
            .collect()
    }
}

fn compute_idf(
    doc_freq: &BTreeMap<String, u32>,
    n: f32,
    variant: Bm25Variant,
) -> HashMap<String, f32> {
    let raw = doc_freq.iter().map(|(t, &df)| {
        let df = df as f32;
        let idf = match variant {
            Bm25Variant::Okapi { .. } => (n - df + 0.5).ln() - (df + 0.5).ln(),
            Bm25Variant::L { .. } => (n + 1.0).ln() - (df + 0.5).ln(),
            Bm25Variant::Plus { .. } => ((n + 1.0) / df).ln(),
        };
        (t.clone(), idf)
    });
    let Bm25Variant::Okapi { epsilon } = variant else {
        return raw.collect();
    };

    // Sum in term order so the floor is identical however the corpus was batched.
    let mut raw: Vec<(String, f32)> = raw.collect();
    if raw.is_empty() {
        return HashMap::new();
    }
    let mean = raw.iter().map(|(_, idf)| idf).sum::<f32>() / raw.len() as f32;
    // Terms in more than half the corpus get a negative idf; floor them.
    let floor = epsilon * mean;
    for (_, idf) in &mut raw {
        if *idf < 0.0 {
            *idf = floor;
        }
    }
    raw.into_iter().collect()
}

/// BM25 retriever: owns a corpus, ranks all of it against a query.
pub struct Bm25<T = Whitespace> {
    on: Fields,
    tokenizer: T,
    k: Option<usize>,
    params: Bm25Params,
    documents: Vec<Arc<Document>>,
    contents: Vec<String>,
    index: Bm25Index,
}

impl Bm25<Whitespace> {
    /// Retriever with explicit parameters and the whitespace tokenizer.
    pub fn new(on: impl Into<Fields>, params: Bm25Params) -> Self {
        Self {
            on: on.into(),
            tokenizer: Whitespace,
            k: None,
            params,
            documents: Vec::new(),
            contents: Vec::new(),
            index: Bm25Index::build::<String>(&[], params),
        }
    }

    /// Okapi BM25 with k1=1.5, b=0.75, epsilon=0.25.
    pub fn okapi(on: impl Into<Fields>) -> Self {
        Self::new(on, Bm25Params::default())
    }

    /// BM25L with k1=1.5, b=0.75, delta=0.5.
    pub fn bm25l(on: impl Into<Fields>) -> Self {
        Self::new(
            on,
            Bm25Params {
                variant: Bm25Variant::bm25l(),
                ..Bm25Params::default()
            },
        )
    }

    /// BM25+ with k1=1.5, b=0.75, delta=1.0.
    pub fn bm25plus(on: impl Into<Fields>) -> Self {
        Self::new(
            on,
            Bm25Params {
                variant: Bm25Variant::bm25plus(),
                ..Bm25Params::default()
            },
        )
    }
}

impl<T: Tokenizer> Bm25<T> {
    /// Replace the tokenizer (applies to the corpus and to queries).
    ///
    /// Documents already added are re-tokenized with the new tokenizer.
    pub fn with_tokenizer<U: Tokenizer>(self, tokenizer: U) -> Bm25<U> {
        let mut next = Bm25 {
            on: self.on,
            tokenizer,
            k: self.k,
            params: self.params,
            documents: self.documents,
            contents: self.contents,
            index: self.index,
        };
        next.index = next.rebuild(&[]);
        next
    }

    /// Cap the number of returned documents.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Capacity (`None` = return every document).
    pub fn k(&self) -> Option<usize> {
        self.k
    }

    /// Field selector.
    pub fn on(&self) -> &Fields {
        &self.on
    }

    /// Scoring parameters.
    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Corpus, in insertion order.
    pub fn documents(&self) -> &[Arc<Document>] {
        &self.documents
    }

    /// Current scoring statistics.
    pub fn index(&self) -> &Bm25Index {
        &self.index
    }

    /// Append documents and rebuild the index over the whole corpus.
    ///
    /// The batch is validated first: if any document lacks an `on` field, nothing is added.
    pub fn add<I>(&mut self, documents: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arc<Document>>,
    {
        let batch: Vec<Arc<Document>> = documents.into_iter().map(Into::into).collect();
        let contents = self.on.contents(batch.iter().map(|d| &**d))?;
        let index = self.rebuild(&contents);

        self.documents.extend(batch);
        self.contents.extend(contents);
        self.index = index;
        debug!(
            retriever = self.params.variant.name(),
            documents = self.documents.len(),
            vocabulary = self.index.vocabulary_len(),
            avg_doc_len = self.index.avg_doc_len(),
            "rebuilt bm25 index"
        );
        Ok(self)
    }

    fn rebuild(&self, extra: &[String]) -> Bm25Index {
        let corpus: Vec<Vec<String>> = self
            .contents
            .iter()
            .chain(extra)
            .map(|c| self.tokenizer.tokenize(c))
            .collect();
        Bm25Index::build(&corpus, self.params)
    }

    /// Rank the whole corpus against `query`, truncated to `k`.
    pub fn retrieve(&self, query: &str) -> Vec<Hit> {
        let hits = truncate(self.rank(query), self.k);
        debug!(
            retriever = self.params.variant.name(),
            query,
            hits = hits.len(),
            "bm25 retrieve"
        );
        hits
    }

    fn rank(&self, query: &str) -> Vec<Hit> {
        let terms = self.tokenizer.tokenize(query);
        let mut ranked: Vec<(usize, f32)> =
            self.index.scores(&terms).into_iter().enumerate().collect();
        // Deterministic: score desc, then later position first.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        ranked
            .into_iter()
            .map(|(pos, score)| Hit::new(self.documents[pos].clone(), score))
            .collect()
    }
}

impl<T: Tokenizer> fmt::Display for Bm25<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} retriever\n\t on: {}\n\t documents: {}",
            self.params.variant.name(),
            self.on,
            self.documents.len()
        )
    }
}

impl<T: Tokenizer> fmt::Debug for Bm25<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bm25")
            .field("on", &self.on)
            .field("k", &self.k)
            .field("params", &self.params)
            .field("documents", &self.documents.len())
            .finish()
    }
}

impl<T: Tokenizer + 'static> Stage for Bm25<T> {
    fn validate(&self, documents: &[Arc<Document>]) -> Result<(), Error> {
        self.on.contents(documents.iter().map(|d| &**d)).map(|_| ())
    }

    fn add(&mut self, documents: &[Arc<Document>]) -> Result<(), Error> {
        Bm25::add(self, documents.iter().cloned()).map(|_| ())
    }

    fn search(&self, query: &str, candidates: Option<&[Hit]>) -> Result<Vec<Hit>, Error> {
        match candidates {
            None => Ok(self.retrieve(query)),
            Some(c) => Ok(truncate(restrict(self.rank(query), c), self.k)),
        }
    }

    fn flatten(self: Box<Self>, _: Combinator) -> Vec<Box<dyn Stage>> {
        vec![self]
    }
}
