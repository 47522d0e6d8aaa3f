use crate::filter::FilterTree;
use crate::param::SqlParam;
use crate::path::{Input, quote_ident, quote_literal};
use crate::sort::{Sort, SortDirection};

/// How an output column is folded back into a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Already a jsonb value or a plain number.
    Plain,
    /// A numeric result that must come back as a double.
    Float,
}

/// Named output column of a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageField {
    pub name: String,
    pub kind: FieldType,
    pub sql: String,
}

/// One `SELECT` of a compiled query.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub input: Input,
    pub fields: Vec<StageField>,
    pub filter: Option<FilterTree>,
    pub groups: Vec<String>,
    pub having: Option<String>,
    pub sort: Vec<Sort>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

impl Stage {
    pub fn new(input: Input) -> Self {
        Stage {
            input,
            fields: Vec::new(),
            filter: None,
            groups: Vec::new(),
            having: None,
            sort: Vec::new(),
            limit: None,
            skip: None,
        }
    }

    /// Nothing but the input rows.
    pub fn is_passthrough(&self) -> bool {
        self.fields.is_empty()
            && self.filter.as_ref().is_none_or(FilterTree::is_empty)
            && self.groups.is_empty()
            && self.sort.is_empty()
            && self.limit.is_none()
            && self.skip.is_none()
    }

    pub fn to_sql(&self, from: &str) -> String {
        let mut sql = String::from("SELECT ");
        if self.fields.is_empty() {
            sql.push('*');
        } else {
            let fields: Vec<String> = self
                .fields
                .iter()
                .map(|f| format!("{} AS {}", f.sql, quote_ident(&f.name)))
                .collect();
            sql.push_str(&fields.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(from);

        if let Some(filter) = self.filter.as_ref().filter(|f| !f.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.to_sql(self.input));
        }
        if !self.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.groups.join(", "));
        }
        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(having);
        }
        if !self.sort.is_empty() {
            let keys: Vec<String> = self.sort.iter().map(|s| self.sort_to_sql(s)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(skip) = self.skip {
            sql.push_str(&format!(" OFFSET {skip}"));
        }
        sql
    }

    fn sort_to_sql(&self, sort: &Sort) -> String {
        let key = match self.input {
            Input::Columns if !sort.field.contains('.') => quote_ident(&sort.field),
            input => input.path(&sort.field, false),
        };
        match sort.direction {
            SortDirection::Asc => key,
            SortDirection::Desc => format!("{key} DESC"),
        }
    }

    pub fn values(&self) -> Vec<SqlParam> {
        self.filter.as_ref().map(FilterTree::values).unwrap_or_default()
    }
}

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Chains stages over `table`, each reading the previous one as a subquery
/// `queryN`. Placeholders start at `first`.
///
/// When a stage declares output fields, the result of the last such stage is
/// folded back into a single `_jsonb` document column.
pub fn wrap(table: &str, stages: &mut [Stage], first: usize) -> Query {
    let mut sql = String::new();
    let mut params = Vec::new();
    let mut next = first;

    for (i, stage) in stages.iter_mut().enumerate() {
        if let Some(filter) = &mut stage.filter {
            next = filter.renumber(next);
        }
        let from = if i == 0 {
            table.to_string()
        } else {
            format!("({sql}) AS query{i}")
        };
        sql = stage.to_sql(&from);
        params.extend(stage.values());
    }

    if stages.is_empty() {
        sql = format!("SELECT * FROM {table}");
    }

    if let Some(last) = stages.iter().rev().find(|s| !s.fields.is_empty()) {
        sql = format!(
            "SELECT {} AS _jsonb FROM ({sql}) AS wrapped",
            build_document(&last.fields)
        );
    }

    Query { sql, params }
}

/// `jsonb_build_object` reassembling a document from flat columns, keeping
/// field order in `$k`.
fn build_document(fields: &[StageField]) -> String {
    let keys: Vec<String> = fields.iter().map(|f| quote_literal(&f.name)).collect();
    let mut sql = format!(
        "jsonb_build_object('$k', jsonb_build_array({})",
        keys.join(", ")
    );
    for field in fields {
        let column = quote_ident(&field.name);
        let value = match field.kind {
            FieldType::Plain => column,
            // AVG over no numbers is NULL
            FieldType::Float => format!(
                "CASE WHEN {column} IS NULL THEN 'null'::jsonb \
                 ELSE jsonb_build_object('$f', {column}) END"
            ),
        };
        sql.push_str(&format!(", {}, {value}", quote_literal(&field.name)));
    }
    sql.push(')');
    sql
}

#[cfg(test)]
mod tests {
    use bson::Bson;

    use super::*;

    fn filtered(field: &str, value: Bson) -> Stage {
        let mut tree = FilterTree::new();
        tree.add_filter(tree.root(), "", field, "=", &value).unwrap();
        Stage {
            filter: Some(tree),
            ..Stage::new(Input::Document)
        }
    }

    #[test]
    fn plain_select() {
        let mut stage = filtered("a", Bson::Boolean(true));
        stage.sort.push(Sort {
            field: "my field".into(),
            direction: SortDirection::Desc,
        });
        stage.limit = Some(5);
        stage.skip = Some(2);

        assert_eq!(
            stage.to_sql("\"db\".\"coll\""),
            "SELECT * FROM \"db\".\"coll\" WHERE (_jsonb->'a' = $1::jsonb) \
             ORDER BY _jsonb->'my field' DESC LIMIT 5 OFFSET 2"
        );
    }

    #[test]
    fn column_sort_quotes_identifiers() {
        let mut stage = Stage::new(Input::Columns);
        stage.sort.push(Sort {
            field: "my total".into(),
            direction: SortDirection::Asc,
        });
        assert_eq!(stage.to_sql("t"), "SELECT * FROM t ORDER BY \"my total\"");
    }

    #[test]
    fn no_stages_selects_everything() {
        assert_eq!(wrap("t", &mut [], 1).sql, "SELECT * FROM t");
    }

    #[test]
    fn chained_stages_number_placeholders_globally() {
        let mut stages = vec![
            filtered("a", Bson::Boolean(true)),
            filtered("b", Bson::Boolean(false)),
        ];
        let query = wrap("t", &mut stages, 1);
        assert_eq!(
            query.sql,
            "SELECT * FROM (SELECT * FROM t WHERE (_jsonb->'a' = $1::jsonb)) AS query1 \
             WHERE (_jsonb->'b' = $2::jsonb)"
        );
        assert_eq!(
            query.params,
            vec![
                SqlParam::Json(serde_json::json!(true)),
                SqlParam::Json(serde_json::json!(false)),
            ]
        );
    }

    #[test]
    fn fields_are_folded_into_document() {
        let mut group = Stage::new(Input::Document);
        group.fields = vec![
            StageField {
                name: "_id".into(),
                kind: FieldType::Plain,
                sql: "_jsonb->'a'".into(),
            },
            StageField {
                name: "avg".into(),
                kind: FieldType::Float,
                sql: "AVG(1)".into(),
            },
        ];
        group.groups.push("_jsonb->'a'".into());
        let mut sort = Stage::new(Input::Columns);
        sort.sort.push(Sort {
            field: "avg".into(),
            direction: SortDirection::Asc,
        });

        let query = wrap("t", &mut [group, sort], 1);
        assert_eq!(
            query.sql,
            "SELECT jsonb_build_object('$k', jsonb_build_array('_id', 'avg'), '_id', \"_id\", \
             'avg', CASE WHEN \"avg\" IS NULL THEN 'null'::jsonb \
             ELSE jsonb_build_object('$f', \"avg\") END) AS _jsonb FROM (SELECT * FROM \
             (SELECT _jsonb->'a' AS \"_id\", AVG(1) AS \"avg\" FROM t GROUP BY _jsonb->'a') \
             AS query1 ORDER BY \"avg\") AS wrapped"
        );
        assert!(query.params.is_empty());
    }
}
