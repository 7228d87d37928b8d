//! End-to-end scenarios: retrievers, rankers and their compositions on small corpora.

use lexpipe::bm25::{Bm25, Bm25Params, Bm25Variant};
use lexpipe::tfidf::{IdfVariant, TfIdf, TfIdfConfig, TfVariant};
use lexpipe::zero_shot::ZeroShot;
use lexpipe::{intersect, sequential, union, Document, Error, Hit, Stage};
use std::sync::Arc;

fn wiki() -> Vec<Document> {
    vec![
        Document::from([
            ("title", "Paris"),
            ("article", "This town is the capital of France"),
            ("author", "Wiki"),
        ]),
        Document::from([
            ("title", "Eiffel tower"),
            ("article", "Eiffel tower is based in Paris"),
            ("author", "Wiki"),
        ]),
        Document::from([
            ("title", "Montreal"),
            ("article", "Montreal is in Canada."),
            ("author", "Wiki"),
        ]),
    ]
}

fn titles(hits: &[Hit]) -> Vec<&str> {
    hits.iter().map(|h| h.document.get("title").unwrap()).collect()
}

#[test]
fn bm25_okapi_ranks_eiffel_then_paris_then_montreal() {
    let mut retriever = Bm25::okapi(["title", "article"]).with_k(3);
    retriever.add(wiki()).unwrap();
    assert_eq!(
        retriever.to_string(),
        "BM25Okapi retriever\n\t on: title, article\n\t documents: 3"
    );

    let hits = retriever.retrieve("Paris");
    assert_eq!(titles(&hits), vec!["Eiffel tower", "Paris", "Montreal"]);
    assert!(hits[1].score > hits[2].score);
    assert_eq!(hits[2].score, 0.0);

    retriever.add(wiki()).unwrap();
    assert_eq!(
        retriever.to_string(),
        "BM25Okapi retriever\n\t on: title, article\n\t documents: 6"
    );
}

#[test]
fn bm25l_ranks_matches_above_delta_only_documents() {
    let mut retriever = Bm25::new(["title", "article"], Bm25Params::bm25l(1.5, 0.75, 0.5));
    retriever.add(wiki()).unwrap();

    let hits = retriever.retrieve("Paris");
    assert_eq!(titles(&hits), vec!["Eiffel tower", "Paris", "Montreal"]);
    assert!(hits[2].score > 0.0);
    assert!(hits[1].score > hits[2].score);
}

#[test]
fn bm25_unmatched_query_returns_whole_corpus() {
    let mut retriever = Bm25::okapi(["title", "article"]);
    retriever.add(wiki()).unwrap();
    let hits = retriever.retrieve("Tokyo");
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|h| h.score == 0.0));
}

#[test]
fn bm25_empty_corpus_is_empty_not_an_error() {
    let retriever = Bm25::bm25plus("title");
    assert!(retriever.retrieve("anything").is_empty());
    assert!(Stage::search(&retriever, "anything", None).unwrap().is_empty());
}

#[test]
fn bm25_keeps_first_batch_scoreable_after_second_add() {
    let mut retriever = Bm25::okapi(["title", "article"]);
    retriever.add(wiki()).unwrap();
    retriever
        .add([Document::from([("title", "Lyon"), ("article", "Lyon is a city in France")])])
        .unwrap();
    assert_eq!(retriever.documents().len(), 4);
    assert_eq!(retriever.retrieve("Canada.")[0].document.get("title"), Some("Montreal"));
}

#[test]
fn tfidf_before_add_is_unfitted() {
    let retriever = TfIdf::new("title");
    assert_eq!(retriever.retrieve("anything").unwrap_err(), Error::NotFitted);
}

#[test]
fn pipeline_reranks_retriever_output() {
    let retriever = Bm25::okapi(["title", "article"]);
    let ranker = ZeroShot::lexical(["title", "article"]).with_k(2);
    let mut pipeline = sequential(retriever, ranker);
    pipeline.add(wiki()).unwrap();

    let hits = pipeline.retrieve("Paris").unwrap();
    assert_eq!(titles(&hits), vec!["Eiffel tower", "Paris"]);
    assert!(hits.iter().all(|h| h.score > 0.5));
    assert_eq!(
        pipeline.to_string(),
        "Pipeline\n-----\nBM25Okapi retriever\n\t on: title, article\n\t documents: 3\n-----\n\
         Zero Shot Classifier\n\t model: lexical-overlap\n\t on: title, article\n\t k: 2\n\t multi class: true"
    );
}

#[test]
fn retriever_after_retriever_narrows_candidates() {
    let first = TfIdf::new("article");
    let second = Bm25::okapi("title");
    let mut pipeline = sequential(first, second);
    pipeline.add(wiki()).unwrap();

    // tfidf matches only the Eiffel article; bm25 over titles keeps it.
    let hits = pipeline.retrieve("Paris").unwrap();
    assert_eq!(titles(&hits), vec!["Eiffel tower"]);
}

#[test]
fn union_of_retrievers_dedups_shared_documents() {
    let mut u = union(TfIdf::new("title"), TfIdf::new("article"));
    u.add(wiki()).unwrap();

    let hits = u.retrieve("Paris").unwrap();
    assert_eq!(titles(&hits), vec!["Paris", "Eiffel tower"]);
}

#[test]
fn intersection_keeps_documents_all_branches_return() {
    let mut i = intersect(TfIdf::new("article"), Bm25::okapi(["title", "article"]));
    i.add(wiki()).unwrap();

    let hits = i.retrieve("Canada").unwrap();
    assert_eq!(titles(&hits), vec!["Montreal"]);
}

#[test]
fn documents_shared_across_stages_keep_identity() {
    let docs: Vec<Arc<Document>> = wiki().into_iter().map(Arc::new).collect();
    let mut a = Bm25::okapi("title");
    let mut b = TfIdf::new("title");
    a.add(docs.iter().cloned()).unwrap();
    b.add(docs.iter().cloned()).unwrap();

    let u = union(a, b);
    let hits = u.retrieve("Montreal").unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().any(|h| Arc::ptr_eq(&h.document, &docs[2])));
}

#[test]
fn failing_add_propagates_through_composites() {
    let mut pipeline = sequential(Bm25::okapi(["title", "article"]), ZeroShot::lexical("title"));
    let err = pipeline
        .add([Document::from([("title", "no article")])])
        .unwrap_err();
    assert_eq!(
        err,
        Error::MissingField {
            field: "article".into()
        }
    );
    assert!(pipeline.retrieve("article").unwrap().is_empty());
}

#[test]
fn rejected_batch_reaches_no_branch() {
    let mut u = union(TfIdf::new("title"), Bm25::okapi(["title", "article"]));
    let err = u.add([Document::from([("title", "paris")])]).unwrap_err();
    assert_eq!(
        err,
        Error::MissingField {
            field: "article".into()
        }
    );
    assert_eq!(u.to_string(), "Union\n-----\nTfIdf retriever\n\t on: title\n\t documents: 0\n-----\n\
         BM25Okapi retriever\n\t on: title, article\n\t documents: 0");
    assert_eq!(u.retrieve("paris").unwrap_err(), Error::NotFitted);

    u.add(wiki()).unwrap();
    assert_eq!(
        titles(&u.retrieve("Paris").unwrap()),
        vec!["Paris", "Eiffel tower", "Montreal"]
    );
}

#[test]
fn composites_debug_their_children() {
    let p = sequential(Bm25::okapi("title"), ZeroShot::lexical("title"));
    let debug = format!("{p:?}");
    assert!(debug.starts_with("Pipeline { len: 2"), "{debug}");
    assert!(debug.contains("BM25Okapi retriever"), "{debug}");
}

#[test]
fn params_and_documents_deserialize_from_json() {
    let params: Bm25Params =
        serde_json::from_str(r#"{"k1": 1.2, "variant": {"kind": "l", "delta": 0.3}}"#).unwrap();
    assert_eq!(params.k1, 1.2);
    assert_eq!(params.b, 0.75);
    assert_eq!(params.variant, Bm25Variant::L { delta: 0.3 });

    let config: TfIdfConfig = serde_json::from_str(r#"{"tf_variant": "log_scaled"}"#).unwrap();
    assert_eq!(config.tf_variant, TfVariant::LogScaled);
    assert_eq!(config.idf_variant, IdfVariant::Smoothed);

    let docs: Vec<Document> =
        serde_json::from_str(r#"[{"title": "Paris", "article": "capital"}]"#).unwrap();
    let mut retriever = Bm25::new("title", params);
    retriever.add(docs).unwrap();
    assert_eq!(retriever.to_string(), "BM25L retriever\n\t on: title\n\t documents: 1");
}
