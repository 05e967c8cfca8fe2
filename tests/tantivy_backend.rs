mod util;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use obo_term_index::connectors::SourceLocation;
use obo_term_index::connectors::obo::parse_str;
use obo_term_index::indexer::closure::propagate_ancestors;
use obo_term_index::indexer::fields::FieldSelection;
use obo_term_index::model::types::TermCollection;
use obo_term_index::search::backend::{SearchBackend, SearchRequest};
use obo_term_index::search::query::FieldValues;
use obo_term_index::search::tantivy::TantivyBackend;
use obo_term_index::vocabulary::{SearchOptions, Vocabulary};
use util::{HPO_SAMPLE, write_fixture};

fn sample_terms(extra: &str) -> TermCollection {
    let mut parsed = parse_str(&format!("{HPO_SAMPLE}{extra}"), &FieldSelection::all());
    propagate_ancestors(&mut parsed.terms);
    parsed.terms
}

fn loaded_vocabulary() -> (Arc<TantivyBackend>, Vocabulary) {
    let backend = Arc::new(TantivyBackend::in_ram());
    backend.replace_all(&sample_terms("")).unwrap();
    let vocab = Vocabulary::new("hpo", backend.clone());
    (backend, vocab)
}

#[test]
fn misspelled_search_falls_back_to_collation() {
    let (_, vocab) = loaded_vocabulary();
    let mut values = FieldValues::new();
    values.insert("name".into(), "catarct".into());

    let found = vocab.search(&values);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), "HP:0000518");

    let literal = vocab.search_with(
        &values,
        SearchOptions {
            spellcheck: Some(false),
            ..SearchOptions::default()
        },
    );
    assert!(literal.is_empty());
}

#[test]
fn bare_terms_search_every_text_field() {
    let (_, vocab) = loaded_vocabulary();
    let hits = vocab.search_query("lens", SearchOptions::default());
    let ids: Vec<&str> = hits.iter().map(|t| t.id()).collect();
    assert_eq!(ids, vec!["HP:0000518"]);
}

#[test]
fn descendants_by_closure_and_parent() {
    let (_, vocab) = loaded_vocabulary();
    let mut under_eye = FieldValues::new();
    under_eye.insert("term_category".into(), "HP:0000478".into());
    assert_eq!(vocab.count(&under_eye), Some(2));

    let mut children = FieldValues::new();
    children.insert("is_a".into(), "HP:0000118".into());
    let mut ids: Vec<String> = vocab
        .search(&children)
        .iter()
        .map(|t| t.id().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["HP:0000152", "HP:0000478"]);
}

#[test]
fn alt_id_and_header_lookups() {
    let (_, vocab) = loaded_vocabulary();
    assert_eq!(vocab.get_term("HP:0001105").unwrap().id(), "HP:0000478");
    assert_eq!(vocab.version().as_deref(), Some("hp/releases/2024-04-26"));
    assert_eq!(vocab.distance("HP:0000518", "HP:0000234"), Some(4));
}

#[test]
fn boosts_reorder_full_text_hits() {
    let terms = sample_terms(
        "\n[Term]\nid: HP:0000600\nname: Lens opacity\ndef: \"Something else.\" []\nis_a: HP:0000478\n",
    );
    let plain = TantivyBackend::in_ram();
    plain.replace_all(&terms).unwrap();
    let boosted = TantivyBackend::in_ram().with_boosts(FieldSelection::parse("name:10,def:0.1"));
    boosted.replace_all(&terms).unwrap();

    let request = SearchRequest::new("lens").rows(5);
    let by_name = boosted.query(&request).unwrap();
    assert_eq!(by_name.num_found, 2);
    assert_eq!(by_name.documents[0].id(), "HP:0000600");
    assert!(by_name.max_score > plain.query(&request).unwrap().max_score);
}

#[test]
fn readers_never_observe_a_partial_rebuild() {
    let backend = Arc::new(TantivyBackend::in_ram());
    let small = sample_terms("");
    let large = sample_terms("\n[Term]\nid: HP:0000999\nname: Late addition\nis_a: HP:0000001\n");
    backend.replace_all(&small).unwrap();

    let done = AtomicBool::new(false);
    std::thread::scope(|scope| {
        for _ in 0..3 {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let n = backend.count("*:*").expect("index stays available");
                    assert!(n == 7 || n == 8, "saw {n} documents");
                }
            });
        }
        for round in 0..6 {
            let terms = if round % 2 == 0 { &large } else { &small };
            backend.replace_all(terms).unwrap();
        }
        done.store(true, Ordering::SeqCst);
    });
    assert_eq!(backend.count("*:*").unwrap(), 7);
}

#[test]
fn vocabulary_reindexes_from_disk_index() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = write_fixture(dir.path(), "hp.obo", HPO_SAMPLE);
    let index = dir.path().join("index");
    let backend = Arc::new(TantivyBackend::open(&index).unwrap());
    let vocab = Vocabulary::new("hpo", backend.clone())
        .with_selection(FieldSelection::parse("name,term_category,alt_id"));
    assert_eq!(vocab.reindex(&SourceLocation::Local(source)).unwrap(), 7);
    assert_eq!(backend.generation().as_deref(), Some("gen-000001"));

    let reopened = Vocabulary::new("hpo", Arc::new(TantivyBackend::open(&index).unwrap()));
    let cataract = reopened.get_term("HP:0000518").unwrap();
    assert_eq!(cataract.name(), Some("Cataract"));
    assert!(cataract.first("def").is_none());
    assert!(cataract.first("is_a").is_none(), "unselected is_a is not stored");
    assert_eq!(reopened.version().as_deref(), Some("hp/releases/2024-04-26"));
    assert!(cataract.values("term_category").any(|v| v == "HP:0000118"));
}
