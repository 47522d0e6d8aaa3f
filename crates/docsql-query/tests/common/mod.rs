#![allow(dead_code)]

use bson::{Bson, Document};
use docsql_query::{Input, Query, SqlParam, parse_filter};
use regex::Regex;

pub const TABLE: &str = "\"test\".\"values\"";

/// Compiles `filter` over stored documents.
pub fn filter_sql(filter: &Document) -> (String, Vec<SqlParam>) {
    let tree = parse_filter(filter, Input::Document).unwrap();
    (tree.to_sql(Input::Document), tree.values())
}

/// Placeholder numbers in the order they appear in `sql`.
pub fn placeholders(sql: &str) -> Vec<usize> {
    let re = Regex::new(r"\$(\d+)").unwrap();
    re.captures_iter(sql)
        .map(|c| c[1].parse().unwrap())
        .collect()
}

/// `(field, placeholder)` for every text comparison against a top-level
/// field, e.g. `_jsonb->'f3' #>> '{}' END) = $2`.
pub fn text_leaves(sql: &str) -> Vec<(String, usize)> {
    let re = Regex::new(r"_jsonb->'(f\d+)' #>> '\{\}' END\) \S+ \$(\d+)").unwrap();
    re.captures_iter(sql)
        .map(|c| (c[1].to_string(), c[2].parse().unwrap()))
        .collect()
}

pub fn text(s: &str) -> SqlParam {
    SqlParam::Text(s.to_string())
}

pub fn stage(name: &str, value: impl Into<Bson>) -> Bson {
    let mut doc = Document::new();
    doc.insert(name, value.into());
    Bson::Document(doc)
}

pub fn assert_ordered(query: &Query) {
    let expected: Vec<usize> = (1..=query.params.len()).collect();
    assert_eq!(placeholders(&query.sql), expected, "{}", query.sql);
}
