//! Ancestor closure over `is_a` edges.
//!
//! For every term the closure is its own id plus every id reachable through
//! `is_a`. The result replaces the term's `term_category` field. Dangling
//! parents end a path and cycles are cut by the result set itself.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::model::types::{IS_A_FIELD, TERM_CATEGORY_FIELD, TermCollection, strip_parent_label};

/// Compute the closure of `id` against `collection`.
///
/// The walk starts from the term's current `term_category` values (the direct
/// parents seeded by the parser). A term absent from the collection yields
/// just `{id}`.
pub fn ancestor_closure(collection: &TermCollection, id: &str) -> BTreeSet<String> {
    let mut result = BTreeSet::new();
    result.insert(id.to_string());

    let Some(term) = collection.get(id) else {
        return result;
    };

    let mut queue: VecDeque<String> = term
        .values(TERM_CATEGORY_FIELD)
        .map(str::to_string)
        .collect();
    let mut queued: HashSet<String> = queue.iter().cloned().collect();

    while let Some(next) = queue.pop_front() {
        result.insert(next.clone());
        let Some(ancestor) = collection.get(&next) else {
            tracing::debug!(term = id, parent = %next, "dangling is_a reference");
            continue;
        };
        for raw in ancestor.values(IS_A_FIELD) {
            let parent = strip_parent_label(raw);
            if parent.is_empty() || result.contains(parent) || queued.contains(parent) {
                continue;
            }
            queued.insert(parent.to_string());
            queue.push_back(parent.to_string());
        }
    }
    result
}

/// Replace `term_category` on every term with its full ancestor closure.
///
/// All closures are computed against the graph as parsed and written back
/// afterwards, so the order terms are visited in does not matter.
pub fn propagate_ancestors(collection: &mut TermCollection) {
    let closures: Vec<(String, BTreeSet<String>)> = collection
        .ids()
        .map(|id| (id.to_string(), ancestor_closure(collection, id)))
        .collect();

    let mut total = 0usize;
    for (id, closure) in closures {
        total += closure.len();
        if let Some(term) = collection.get_mut(&id) {
            term.set(TERM_CATEGORY_FIELD, closure);
        }
    }
    tracing::debug!(terms = collection.len(), links = total, "ancestor_closure_complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::obo::parse_str;
    use crate::indexer::fields::FieldSelection;
    use crate::model::types::Term;

    fn closure_of(c: &TermCollection, id: &str) -> Vec<String> {
        c.get(id)
            .unwrap()
            .values(TERM_CATEGORY_FIELD)
            .map(str::to_string)
            .collect()
    }

    fn collection(text: &str) -> TermCollection {
        parse_str(text, &FieldSelection::all()).terms
    }

    #[test]
    fn two_level_example() {
        let mut c = collection(
            "[Term]\nid: HP:0000002\nis_a: HP:0000001 ! root term\n[Term]\nid: HP:0000001\n",
        );
        propagate_ancestors(&mut c);
        assert_eq!(closure_of(&c, "HP:0000002"), vec!["HP:0000001", "HP:0000002"]);
        assert_eq!(closure_of(&c, "HP:0000001"), vec!["HP:0000001"]);
    }

    #[test]
    fn diamond_and_deep_chain() {
        let mut c = collection(
            "[Term]\nid: X:5\nis_a: X:3\nis_a: X:4\n\
             [Term]\nid: X:3\nis_a: X:2 ! two\n\
             [Term]\nid: X:4\nis_a: X:2\n\
             [Term]\nid: X:2\nis_a: X:1\n\
             [Term]\nid: X:1\n\
             [Term]\nid: Y:1\n",
        );
        propagate_ancestors(&mut c);
        assert_eq!(closure_of(&c, "X:5"), vec!["X:1", "X:2", "X:3", "X:4", "X:5"]);
        assert_eq!(closure_of(&c, "X:4"), vec!["X:1", "X:2", "X:4"]);
        assert_eq!(closure_of(&c, "Y:1"), vec!["Y:1"]);
    }

    #[test]
    fn cycle_terminates() {
        let mut c = collection("[Term]\nid: A:1\nis_a: B:1\n[Term]\nid: B:1\nis_a: A:1\n");
        propagate_ancestors(&mut c);
        assert_eq!(closure_of(&c, "A:1"), vec!["A:1", "B:1"]);
        assert_eq!(closure_of(&c, "B:1"), vec!["A:1", "B:1"]);
    }

    #[test]
    fn dangling_parent_is_a_dead_end() {
        let mut c = collection("[Term]\nid: A:1\nis_a: MISSING:1 ! gone\n");
        propagate_ancestors(&mut c);
        assert_eq!(closure_of(&c, "A:1"), vec!["A:1", "MISSING:1"]);
    }

    #[test]
    fn closure_is_idempotent() {
        let mut c = collection(
            "[Term]\nid: A:3\nis_a: A:2\n[Term]\nid: A:2\nis_a: A:1\n[Term]\nid: A:1\n",
        );
        propagate_ancestors(&mut c);
        let first: Vec<_> = c.iter().map(|t| closure_of(&c, t.id())).collect();
        propagate_ancestors(&mut c);
        let second: Vec<_> = c.iter().map(|t| closure_of(&c, t.id())).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_id_closes_over_itself() {
        let c = TermCollection::from_iter(std::iter::empty::<Term>());
        let closure = ancestor_closure(&c, "Q:1");
        assert_eq!(closure.into_iter().collect::<Vec<_>>(), vec!["Q:1"]);
    }
}
