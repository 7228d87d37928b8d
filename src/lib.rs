//! `lexpipe`: composable lexical retrieval pipelines.
//!
//! Retrievers own a corpus and rank it against a query; rankers re-score a candidate list
//! handed to them. Both implement [`compose::Stage`], so they can be chained and combined:
//! - [`bm25::Bm25`] (Okapi / BM25L / BM25+) and [`tfidf::TfIdf`] are retrievers.
//! - [`zero_shot::ZeroShot`] is a stateless ranker backed by a pluggable classifier.
//! - [`compose::Pipeline`], [`compose::Union`] and [`compose::Intersection`] combine stages.
//!
//! Scope:
//! - In-memory corpora, rebuilt from scratch on every `add`
//! - Deterministic ranking (documented tie-break per engine)
//! - Pluggable tokenizers, vectorizers and zero-shot classifiers
//!
//! Non-goals:
//! - Inverted indexes / sharding (scoring scans the whole corpus)
//! - Persisting indexes
//! - Training relevance models
//!
//! ```
//! use lexpipe::bm25::Bm25;
//! use lexpipe::document::Document;
//!
//! let mut retriever = Bm25::okapi(["title", "article"]).with_k(3);
//! retriever
//!     .add([
//!         Document::from([("title", "Paris"), ("article", "This town is the capital of France")]),
//!         Document::from([("title", "Eiffel tower"), ("article", "Eiffel tower is based in Paris")]),
//!         Document::from([("title", "Montreal"), ("article", "Montreal is in Canada.")]),
//!     ])
//!     .unwrap();
//!
//! let hits = retriever.retrieve("Paris");
//! assert_eq!(hits[0].document.get("title"), Some("Eiffel tower"));
//! ```
//!
//! References:
//! - Robertson & Zaragoza (2009): BM25 and beyond
//! - Lv & Zhai (2011): lower-bounding term frequency normalization (BM25L / BM25+)
//! - Trotman, Puurula & Burgess (2014): improvements to BM25 and language models examined
//! - Yin, Hay & Roth (2019): zero-shot text classification via entailment

pub mod bm25;
pub mod compose;
pub mod document;
pub mod tfidf;
pub mod tokenize;
pub mod zero_shot;

pub use compose::{intersect, sequential, union, Intersection, Pipeline, Stage, Union};
pub use document::{Document, Fields, Hit};
pub use error::Error;

mod error {
    /// Errors for retrieval pipelines.
    #[derive(thiserror::Error, Debug, Clone, PartialEq)]
    pub enum Error {
        /// A document lacks one of the fields named in `on`.
        #[error("document is missing field `{field}`")]
        MissingField {
            /// Name of the absent field.
            field: String,
        },
        /// The vectorizer was queried before any documents were added.
        #[error("vectorizer is not fitted: add documents before querying")]
        NotFitted,
        /// The classifier returned a label that was never submitted.
        #[error("classifier returned unknown label `{0}`")]
        UnknownLabel(String),
        /// The classifier returned labels and scores of different lengths.
        #[error("classifier returned {labels} labels but {scores} scores")]
        MalformedClassification {
            /// Number of labels returned.
            labels: usize,
            /// Number of scores returned.
            scores: usize,
        },
        /// The classifier itself failed.
        #[error("classifier failed: {0}")]
        Classifier(String),
    }
}
