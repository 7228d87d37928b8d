//! Zero-shot ranking: documents are scored as candidate labels of the query.
//!
//! The ranker keeps no corpus and precomputes nothing; each call hands the candidates' content
//! strings to a [`ZeroShotClassifier`] and reorders the candidates by the returned scores.
//!
//! Labels are mapped back to documents by position, not by content alone: each returned label
//! consumes the next unused candidate with that content string, so candidates with identical
//! content each receive exactly one score.

use crate::compose::{Combinator, Stage};
use crate::document::{truncate, Document, Fields, Hit};
use crate::Error;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Classifier output: labels and scores aligned by position, best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Candidate labels, ordered by descending score.
    pub labels: Vec<String>,
    /// Score of the label at the same position.
    pub scores: Vec<f32>,
}

/// Scores arbitrary candidate labels against a sequence without task-specific training.
pub trait ZeroShotClassifier: Send + Sync {
    /// Model identifier, for display.
    fn model_name(&self) -> &str;

    /// Score every label against `sequence`.
    ///
    /// With `multi_label`, labels are scored independently; otherwise scores are normalized
    /// across labels (they sum to 1). The result is sorted by descending score.
    fn classify(
        &self,
        sequence: &str,
        candidate_labels: &[String],
        multi_label: bool,
    ) -> Result<Classification, Error>;
}

/// Lexical stand-in for an entailment model.
///
/// The entailment logit of a label is `sharpness * overlap`, where `overlap` is the share of the
/// query's distinct terms (lowercased alphanumeric runs) found in the label. Multi-label scoring
/// applies a logistic centered on half overlap; single-label scoring applies a softmax.
#[derive(Debug, Clone, Copy)]
pub struct LexicalOverlap {
    /// Logit scale.
    pub sharpness: f32,
}

impl Default for LexicalOverlap {
    fn default() -> Self {
        Self { sharpness: 5.0 }
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

impl ZeroShotClassifier for LexicalOverlap {
    fn model_name(&self) -> &str {
        "lexical-overlap"
    }

    fn classify(
        &self,
        sequence: &str,
        candidate_labels: &[String],
        multi_label: bool,
    ) -> Result<Classification, Error> {
        let query = terms(sequence);
        let logits: Vec<f32> = candidate_labels
            .iter()
            .map(|label| {
                if query.is_empty() {
                    return 0.0;
                }
                let label = terms(label);
                let shared = query.iter().filter(|t| label.contains(*t)).count();
                self.sharpness * shared as f32 / query.len() as f32
            })
            .collect();

        let scores: Vec<f32> = if multi_label {
            let center = self.sharpness / 2.0;
            logits
                .iter()
                .map(|z| 1.0 / (1.0 + (-(z - center)).exp()))
                .collect()
        } else {
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exp: Vec<f32> = logits.iter().map(|z| (z - max).exp()).collect();
            let total: f32 = exp.iter().sum();
            exp.into_iter().map(|e| e / total).collect()
        };

        let mut order: Vec<usize> = (0..candidate_labels.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then_with(|| a.cmp(&b)));

        Ok(Classification {
            labels: order.iter().map(|&i| candidate_labels[i].clone()).collect(),
            scores: order.iter().map(|&i| scores[i]).collect(),
        })
    }
}

/// Zero-shot ranker.
pub struct ZeroShot<C = LexicalOverlap> {
    classifier: C,
    on: Fields,
    k: Option<usize>,
    multi_class: bool,
}

impl ZeroShot<LexicalOverlap> {
    /// Ranker using the lexical-overlap classifier.
    pub fn lexical(on: impl Into<Fields>) -> Self {
        Self::new(LexicalOverlap::default(), on)
    }
}

impl<C: ZeroShotClassifier> ZeroShot<C> {
    /// Ranker over `on` using `classifier`, scoring labels independently.
    pub fn new(classifier: C, on: impl Into<Fields>) -> Self {
        Self {
            classifier,
            on: on.into(),
            k: None,
            multi_class: true,
        }
    }

    /// Cap the number of returned documents.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    /// Score labels independently (`true`) or as mutually exclusive classes (`false`).
    pub fn with_multi_class(mut self, multi_class: bool) -> Self {
        self.multi_class = multi_class;
        self
    }

    /// Capacity.
    pub fn k(&self) -> Option<usize> {
        self.k
    }

    /// Whether labels are scored independently.
    pub fn multi_class(&self) -> bool {
        self.multi_class
    }

    /// Zero-shot keeps no corpus and precomputes nothing; this is a no-op.
    pub fn add<I>(&mut self, _documents: I) -> &mut Self
    where
        I: IntoIterator,
    {
        self
    }

    /// Rank `documents` against `query`, best first, truncated to `k`.
    ///
    /// Each hit's score is the classifier's similarity for that document.
    pub fn rank(&self, query: &str, documents: &[Arc<Document>]) -> Result<Vec<Hit>, Error> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let contents = self.on.contents(documents.iter().map(|d| &**d))?;
        let Classification { labels, scores } =
            self.classifier
                .classify(query, &contents, self.multi_class)?;
        if labels.len() != scores.len() {
            return Err(Error::MalformedClassification {
                labels: labels.len(),
                scores: scores.len(),
            });
        }

        let mut slots: HashMap<&str, VecDeque<usize>> = HashMap::new();
        for (pos, content) in contents.iter().enumerate() {
            slots.entry(content.as_str()).or_default().push_back(pos);
        }
        let duplicates = slots.values().filter(|s| s.len() > 1).count();
        if duplicates > 0 {
            warn!(
                duplicates,
                "candidates share content strings; resolving labels by position"
            );
        }

        let mut hits = Vec::with_capacity(labels.len());
        for (label, score) in labels.into_iter().zip(scores) {
            let pos = slots
                .get_mut(label.as_str())
                .and_then(VecDeque::pop_front)
                .ok_or(Error::UnknownLabel(label))?;
            hits.push(Hit::new(documents[pos].clone(), score));
        }
        let hits = truncate(hits, self.k);
        debug!(
            model = self.classifier.model_name(),
            query,
            candidates = documents.len(),
            hits = hits.len(),
            "zero-shot rank"
        );
        Ok(hits)
    }
}

impl<C: ZeroShotClassifier> fmt::Display for ZeroShot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Zero Shot Classifier\n\t model: {}\n\t on: {}\n\t k: ",
            self.classifier.model_name(),
            self.on
        )?;
        match self.k {
            Some(k) => write!(f, "{k}")?,
            None => f.write_str("None")?,
        }
        write!(f, "\n\t multi class: {}", self.multi_class)
    }
}

impl<C: ZeroShotClassifier + 'static> Stage for ZeroShot<C> {
    fn add(&mut self, _: &[Arc<Document>]) -> Result<(), Error> {
        Ok(())
    }

    fn search(&self, query: &str, candidates: Option<&[Hit]>) -> Result<Vec<Hit>, Error> {
        let documents: Vec<Arc<Document>> = candidates
            .unwrap_or_default()
            .iter()
            .map(|h| h.document.clone())
            .collect();
        self.rank(query, &documents)
    }

    fn flatten(self: Box<Self>, _: Combinator) -> Vec<Box<dyn Stage>> {
        vec![self]
    }
}
