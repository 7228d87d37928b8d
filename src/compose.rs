//! Composition of retrievers and rankers: sequential pipelines, unions and intersections.
//!
//! Every retriever, ranker and composite implements [`Stage`], so composites nest freely.
//! Combining a composite with another stage of the same kind extends its child list instead of
//! wrapping it again: `sequential(sequential(a, b), c)` has three stages, not two.
//!
//! Documents are compared by identity (`Arc::ptr_eq`), never by field contents.

use crate::document::{Document, Hit};
use crate::Error;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How a composite combines its children; used by [`Stage::flatten`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Output of one stage feeds the next.
    Sequential,
    /// Merge branch outputs, first occurrence wins.
    Union,
    /// Keep documents every branch returned.
    Intersection,
}

/// A pipeline stage: retriever, ranker, or composite.
pub trait Stage: fmt::Display + Send + Sync {
    /// Check that [`Stage::add`] would accept `documents`, without changing anything.
    fn validate(&self, _documents: &[Arc<Document>]) -> Result<(), Error> {
        Ok(())
    }

    /// Grow the stage's corpus. Stateless stages ignore this.
    fn add(&mut self, documents: &[Arc<Document>]) -> Result<(), Error>;

    /// Run the stage.
    ///
    /// `candidates` is the upstream output when the stage is not first in a pipeline:
    /// rankers re-score it, retrievers restrict their own ranking to it.
    fn search(&self, query: &str, candidates: Option<&[Hit]>) -> Result<Vec<Hit>, Error>;

    /// Children to splice into a composite of kind `into`; leaves return themselves.
    fn flatten(self: Box<Self>, into: Combinator) -> Vec<Box<dyn Stage>>;
}

/// Keep the hits whose document is among `candidates`, preserving `hits` order.
pub(crate) fn restrict(hits: Vec<Hit>, candidates: &[Hit]) -> Vec<Hit> {
    let allowed: HashSet<*const Document> = candidates.iter().map(Hit::key).collect();
    hits.into_iter()
        .filter(|h| allowed.contains(&h.key()))
        .collect()
}

fn splice(stages: Vec<Box<dyn Stage>>, into: Combinator) -> Vec<Box<dyn Stage>> {
    stages.into_iter().flat_map(|s| s.flatten(into)).collect()
}

/// Validate the batch against every child before any child changes.
fn add_to_all(children: &mut [Box<dyn Stage>], documents: &[Arc<Document>]) -> Result<(), Error> {
    validate_all(children, documents)?;
    for child in children {
        child.add(documents)?;
    }
    Ok(())
}

fn validate_all(children: &[Box<dyn Stage>], documents: &[Arc<Document>]) -> Result<(), Error> {
    children.iter().try_for_each(|c| c.validate(documents))
}

fn wrap_documents<I>(documents: I) -> Vec<Arc<Document>>
where
    I: IntoIterator,
    I::Item: Into<Arc<Document>>,
{
    documents.into_iter().map(Into::into).collect()
}

fn write_children(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    children: &[Box<dyn Stage>],
) -> fmt::Result {
    write!(f, "{title}")?;
    for child in children {
        write!(f, "\n-----\n{child}")?;
    }
    Ok(())
}

fn debug_children(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    children: &[Box<dyn Stage>],
) -> fmt::Result {
    let described: Vec<String> = children.iter().map(ToString::to_string).collect();
    f.debug_struct(name)
        .field("len", &children.len())
        .field("children", &described)
        .finish()
}

/// Sequential composition: each stage consumes the previous stage's output.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Pipeline over `stages`, splicing nested pipelines in place.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages: splice(stages, Combinator::Sequential),
        }
    }

    /// Append a stage (a pipeline's stages are appended individually).
    pub fn then(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.extend(Box::new(stage).flatten(Combinator::Sequential));
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Add documents to every stage that keeps a corpus.
    ///
    /// Every stage validates the batch first; if any rejects it, no stage changes.
    pub fn add<I>(&mut self, documents: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arc<Document>>,
    {
        Stage::add(self, &wrap_documents(documents))?;
        Ok(self)
    }

    /// Run the pipeline from scratch.
    pub fn retrieve(&self, query: &str) -> Result<Vec<Hit>, Error> {
        self.search(query, None)
    }
}

impl Stage for Pipeline {
    fn validate(&self, documents: &[Arc<Document>]) -> Result<(), Error> {
        validate_all(&self.stages, documents)
    }

    fn add(&mut self, documents: &[Arc<Document>]) -> Result<(), Error> {
        add_to_all(&mut self.stages, documents)
    }

    fn search(&self, query: &str, candidates: Option<&[Hit]>) -> Result<Vec<Hit>, Error> {
        let mut current: Option<Vec<Hit>> = candidates.map(<[Hit]>::to_vec);
        for stage in &self.stages {
            current = Some(stage.search(query, current.as_deref())?);
        }
        let hits = current.unwrap_or_default();
        debug!(stages = self.stages.len(), hits = hits.len(), "pipeline search");
        Ok(hits)
    }

    fn flatten(self: Box<Self>, into: Combinator) -> Vec<Box<dyn Stage>> {
        match into {
            Combinator::Sequential => self.stages,
            _ => vec![self],
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_children(f, "Pipeline", &self.stages)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_children(f, "Pipeline", &self.stages)
    }
}

/// Union: every branch runs on the same input; outputs are merged, first occurrence wins.
#[derive(Default)]
pub struct Union {
    branches: Vec<Box<dyn Stage>>,
}

impl Union {
    /// Union over `branches`, splicing nested unions in place.
    pub fn new(branches: Vec<Box<dyn Stage>>) -> Self {
        Self {
            branches: splice(branches, Combinator::Union),
        }
    }

    /// Add a branch (a union's branches are added individually).
    pub fn or(mut self, branch: impl Stage + 'static) -> Self {
        self.branches.extend(Box::new(branch).flatten(Combinator::Union));
        self
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Whether the union has no branches.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Add documents to every branch that keeps a corpus.
    ///
    /// Every branch validates the batch first; if any rejects it, no branch changes.
    pub fn add<I>(&mut self, documents: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arc<Document>>,
    {
        Stage::add(self, &wrap_documents(documents))?;
        Ok(self)
    }

    /// Run every branch from scratch and merge.
    pub fn retrieve(&self, query: &str) -> Result<Vec<Hit>, Error> {
        self.search(query, None)
    }
}

impl Stage for Union {
    fn validate(&self, documents: &[Arc<Document>]) -> Result<(), Error> {
        validate_all(&self.branches, documents)
    }

    fn add(&mut self, documents: &[Arc<Document>]) -> Result<(), Error> {
        add_to_all(&mut self.branches, documents)
    }

    fn search(&self, query: &str, candidates: Option<&[Hit]>) -> Result<Vec<Hit>, Error> {
        let mut seen: HashSet<*const Document> = HashSet::new();
        let mut merged = Vec::new();
        for branch in &self.branches {
            for hit in branch.search(query, candidates)? {
                if seen.insert(hit.key()) {
                    merged.push(hit);
                }
            }
        }
        debug!(branches = self.branches.len(), hits = merged.len(), "union search");
        Ok(merged)
    }

    fn flatten(self: Box<Self>, into: Combinator) -> Vec<Box<dyn Stage>> {
        match into {
            Combinator::Union => self.branches,
            _ => vec![self],
        }
    }
}

impl fmt::Display for Union {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_children(f, "Union", &self.branches)
    }
}

impl fmt::Debug for Union {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_children(f, "Union", &self.branches)
    }
}

/// Intersection: documents returned by every branch, in the first branch's order.
#[derive(Default)]
pub struct Intersection {
    branches: Vec<Box<dyn Stage>>,
}

impl Intersection {
    /// Intersection over `branches`, splicing nested intersections in place.
    pub fn new(branches: Vec<Box<dyn Stage>>) -> Self {
        Self {
            branches: splice(branches, Combinator::Intersection),
        }
    }

    /// Add a branch (an intersection's branches are added individually).
    pub fn and(mut self, branch: impl Stage + 'static) -> Self {
        self.branches
            .extend(Box::new(branch).flatten(Combinator::Intersection));
        self
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// Whether the intersection has no branches.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Add documents to every branch that keeps a corpus.
    ///
    /// Every branch validates the batch first; if any rejects it, no branch changes.
    pub fn add<I>(&mut self, documents: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arc<Document>>,
    {
        Stage::add(self, &wrap_documents(documents))?;
        Ok(self)
    }

    /// Run every branch from scratch and intersect.
    pub fn retrieve(&self, query: &str) -> Result<Vec<Hit>, Error> {
        self.search(query, None)
    }
}

impl Stage for Intersection {
    fn validate(&self, documents: &[Arc<Document>]) -> Result<(), Error> {
        validate_all(&self.branches, documents)
    }

    fn add(&mut self, documents: &[Arc<Document>]) -> Result<(), Error> {
        add_to_all(&mut self.branches, documents)
    }

    fn search(&self, query: &str, candidates: Option<&[Hit]>) -> Result<Vec<Hit>, Error> {
        let Some((first, rest)) = self.branches.split_first() else {
            return Ok(Vec::new());
        };
        let mut hits = first.search(query, candidates)?;
        for branch in rest {
            let keep: HashSet<*const Document> = branch
                .search(query, candidates)?
                .iter()
                .map(Hit::key)
                .collect();
            hits.retain(|h| keep.contains(&h.key()));
        }
        // A document repeated in the first branch is reported once.
        let mut seen: HashSet<*const Document> = HashSet::new();
        hits.retain(|h| seen.insert(h.key()));
        debug!(branches = self.branches.len(), hits = hits.len(), "intersection search");
        Ok(hits)
    }

    fn flatten(self: Box<Self>, into: Combinator) -> Vec<Box<dyn Stage>> {
        match into {
            Combinator::Intersection => self.branches,
            _ => vec![self],
        }
    }
}

impl fmt::Display for Intersection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_children(f, "Intersection", &self.branches)
    }
}

impl fmt::Debug for Intersection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_children(f, "Intersection", &self.branches)
    }
}

/// `a` then `b`: `b` consumes `a`'s output.
pub fn sequential(a: impl Stage + 'static, b: impl Stage + 'static) -> Pipeline {
    Pipeline::new(vec![Box::new(a), Box::new(b)])
}

/// Documents from `a` or `b`, deduplicated, `a`'s first.
pub fn union(a: impl Stage + 'static, b: impl Stage + 'static) -> Union {
    Union::new(vec![Box::new(a), Box::new(b)])
}

/// Documents from both `a` and `b`, in `a`'s order.
pub fn intersect(a: impl Stage + 'static, b: impl Stage + 'static) -> Intersection {
    Intersection::new(vec![Box::new(a), Box::new(b)])
}
