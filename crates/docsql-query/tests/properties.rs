mod common;
use common::*;

use bson::{Bson, Document};
use docsql_proto::ErrorCode;
use docsql_query::{SortDirection, add_sort_stage};
use proptest::prelude::*;

// ── Filter values follow placeholders ───────────────────────────

#[derive(Debug, Clone)]
enum Clause {
    Leaf(&'static str),
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Nor(Vec<Clause>),
}

fn clause() -> impl Strategy<Value = Clause> {
    let leaf = prop_oneof![Just("$eq"), Just("$ne"), Just("$gt"), Just("$lte")].prop_map(Clause::Leaf);
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Clause::And),
            prop::collection::vec(inner.clone(), 1..4).prop_map(Clause::Or),
            prop::collection::vec(inner, 1..4).prop_map(Clause::Nor),
        ]
    })
}

/// Each leaf compares a fresh field `fN` with the string `"fN"`.
fn build(clause: &Clause, next: &mut usize) -> Document {
    let mut doc = Document::new();
    let (key, children) = match clause {
        Clause::Leaf(op) => {
            let name = format!("f{next}");
            *next += 1;
            let mut cond = Document::new();
            cond.insert(*op, name.clone());
            doc.insert(name, cond);
            return doc;
        }
        Clause::And(c) => ("$and", c),
        Clause::Or(c) => ("$or", c),
        Clause::Nor(c) => ("$nor", c),
    };
    let items: Vec<Bson> = children
        .iter()
        .map(|c| Bson::Document(build(c, next)))
        .collect();
    doc.insert(key, items);
    doc
}

proptest! {
    #[test]
    fn values_line_up_with_placeholders(clauses in prop::collection::vec(clause(), 1..4)) {
        let mut next = 0;
        let filter = Document::from_iter([(
            "$and".to_string(),
            Bson::Array(clauses.iter().map(|c| Bson::Document(build(c, &mut next))).collect()),
        )]);
        let (sql, values) = filter_sql(&filter);

        let expected: Vec<usize> = (1..=values.len()).collect();
        prop_assert_eq!(placeholders(&sql), expected);

        let leaves = text_leaves(&sql);
        prop_assert_eq!(leaves.len(), next);
        for (field, index) in leaves {
            prop_assert_eq!(&values[index - 1], &text(&field));
        }
    }
}

// ── Sort keeps key order ────────────────────────────────────────

fn direction_value(asc: bool, kind: u8) -> Bson {
    let n = if asc { 1 } else { -1 };
    match kind {
        0 => Bson::Int32(n),
        1 => Bson::Int64(i64::from(n)),
        _ => Bson::Double(f64::from(n)),
    }
}

proptest! {
    #[test]
    fn sort_preserves_key_order(keys in prop::collection::vec(("[a-z]{1,8}", any::<bool>(), 0u8..3), 1..8)) {
        let mut spec = Document::new();
        let mut expected = Vec::new();
        for (name, asc, kind) in keys {
            if spec.contains_key(&name) {
                continue;
            }
            spec.insert(name.clone(), direction_value(asc, kind));
            let dir = if asc { SortDirection::Asc } else { SortDirection::Desc };
            expected.push((name, dir));
        }

        let sorts = add_sort_stage(&spec).unwrap();
        let actual: Vec<(String, SortDirection)> =
            sorts.into_iter().map(|s| (s.field, s.direction)).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn sort_rejects_anything_but_one(n in any::<i32>().prop_filter("not ±1", |n| *n != 1 && *n != -1)) {
        let mut spec = Document::new();
        spec.insert("a", n);
        let err = add_sort_stage(&spec).unwrap_err();
        prop_assert_eq!(err.code(), ErrorCode::SortBadOrder);
        prop_assert_eq!(err.message(), format!("invalid sort order: {n}"));
    }
}
