//! Properties of the `is_a` ancestor closure over random graphs, including
//! cycles, self-loops and dangling parents.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use obo_term_index::connectors::obo::parse_str;
use obo_term_index::indexer::closure::propagate_ancestors;
use obo_term_index::indexer::fields::FieldSelection;
use obo_term_index::model::types::{TERM_CATEGORY_FIELD, TermCollection};
use proptest::prelude::*;

fn id(n: usize) -> String {
    format!("T:{n:04}")
}

/// OBO text for `nodes` terms; edges pointing at `nodes..` are dangling.
fn ontology(nodes: usize, edges: &[(usize, usize)]) -> String {
    let mut text = String::from("format-version: 1.2\n");
    for n in 0..nodes {
        text.push_str(&format!("\n[Term]\nid: {}\nname: term {n}\n", id(n)));
        for (_, parent) in edges.iter().filter(|(child, _)| *child == n) {
            text.push_str(&format!("is_a: {} ! parent\n", id(*parent)));
        }
    }
    text
}

fn closed(nodes: usize, edges: &[(usize, usize)]) -> TermCollection {
    let mut parsed = parse_str(&ontology(nodes, edges), &FieldSelection::all());
    propagate_ancestors(&mut parsed.terms);
    parsed.terms
}

fn closure(terms: &TermCollection, n: usize) -> BTreeSet<String> {
    terms
        .get(&id(n))
        .map(|t| t.values(TERM_CATEGORY_FIELD).map(str::to_string).collect())
        .unwrap_or_default()
}

fn reachable(nodes: usize, edges: &[(usize, usize)], start: usize) -> BTreeSet<String> {
    let mut parents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (child, parent) in edges {
        parents.entry(*child).or_default().push(*parent);
    }
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(n) = queue.pop_front() {
        if n >= nodes {
            continue;
        }
        for p in parents.get(&n).into_iter().flatten() {
            if seen.insert(*p) {
                queue.push_back(*p);
            }
        }
    }
    seen.into_iter().map(id).collect()
}

fn graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..12).prop_flat_map(|nodes| {
        let edge = (0..nodes, 0..nodes + 2);
        (Just(nodes), prop::collection::vec(edge, 0..30))
    })
}

proptest! {
    #[test]
    fn closure_is_reachability((nodes, edges) in graph()) {
        let terms = closed(nodes, &edges);
        for n in 0..nodes {
            prop_assert_eq!(closure(&terms, n), reachable(nodes, &edges, n));
        }
    }

    #[test]
    fn closure_is_reflexive_and_transitive((nodes, edges) in graph()) {
        let terms = closed(nodes, &edges);
        for n in 0..nodes {
            let own = closure(&terms, n);
            prop_assert!(own.contains(&id(n)));
            for ancestor in &own {
                if let Some(term) = terms.get(ancestor) {
                    for up in term.values(TERM_CATEGORY_FIELD) {
                        prop_assert!(own.contains(up), "{} reaches {} but not {}", id(n), ancestor, up);
                    }
                }
            }
        }
    }

    #[test]
    fn closure_is_idempotent((nodes, edges) in graph()) {
        let mut terms = closed(nodes, &edges);
        let before: Vec<_> = (0..nodes).map(|n| closure(&terms, n)).collect();
        propagate_ancestors(&mut terms);
        let after: Vec<_> = (0..nodes).map(|n| closure(&terms, n)).collect();
        prop_assert_eq!(before, after);
    }
}

#[test]
fn long_chain_reaches_root() {
    let edges: Vec<(usize, usize)> = (1..500).map(|n| (n, n - 1)).collect();
    let terms = closed(500, &edges);
    assert_eq!(closure(&terms, 499).len(), 500);
    assert_eq!(closure(&terms, 0).len(), 1);
}
