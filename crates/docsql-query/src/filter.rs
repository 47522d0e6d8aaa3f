use bson::Bson;
use docsql_codec::fjson;
use docsql_proto::{CommandError, ErrorCode};

use crate::param::SqlParam;
use crate::path::{Input, numeric_value, string_value};

/// Index of a node inside a [`FilterTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Right-hand side of a comparison, already in its bound form.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Compared through the float/int resolving expression on both sides.
    Numeric(serde_json::Value),
    /// Compared as text against fields holding strings.
    Text(String),
    /// Compared as jsonb.
    Json(serde_json::Value),
}

impl Operand {
    pub fn from_value(value: &Bson) -> Result<Operand, CommandError> {
        let encode = |v: &Bson| {
            fjson::to_json(v).map_err(|e| CommandError::wrap(ErrorCode::NotImplemented, e))
        };
        Ok(match value {
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Operand::Numeric(encode(value)?),
            Bson::String(s) => Operand::Text(s.clone()),
            v => Operand::Json(encode(v)?),
        })
    }

    fn param(&self) -> SqlParam {
        match self {
            Operand::Numeric(v) | Operand::Json(v) => SqlParam::Json(v.clone()),
            Operand::Text(s) => SqlParam::Text(s.clone()),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self {
            Operand::Numeric(_) => format!(
                "(SELECT {} FROM (VALUES (${index}::jsonb)) AS p(v))",
                numeric_value("v")
            ),
            Operand::Text(_) => format!("${index}"),
            Operand::Json(_) => format!("${index}::jsonb"),
        }
    }
}

/// A single comparison.
///
/// `op` is either a binary SQL operator rendered as `lhs op rhs`, or a
/// template containing `%s`. With an operand the template receives the
/// placeholder and is appended to the left-hand side; without one it
/// receives the left-hand side and forms the whole predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub field: String,
    /// `field` is a finished SQL expression, not a document path.
    pub raw: bool,
    pub op: String,
    pub operand: Option<Operand>,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeKind {
    Leaf(Leaf),
    Logical(LogicalOp),
    Not,
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    kind: NodeKind,
    children: Vec<NodeId>,
}

/// Boolean filter expression stored as an arena of nodes.
///
/// The root is always an AND node. Placeholders are numbered in pre-order,
/// which is also the order [`FilterTree::values`] returns parameters in.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTree {
    nodes: Vec<Node>,
    first: usize,
}

impl Default for FilterTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterTree {
    pub fn new() -> Self {
        FilterTree {
            nodes: vec![Node {
                kind: NodeKind::Logical(LogicalOp::And),
                children: Vec::new(),
            }],
            first: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// True when the root has no children and no WHERE clause is needed.
    pub fn is_empty(&self) -> bool {
        self.nodes[0].children.is_empty()
    }

    // ── Construction ────────────────────────────────────────────

    /// Adds a comparison on a document path. `prefix` is the path of the
    /// enclosing document, if any.
    pub fn add_filter(
        &mut self,
        parent: NodeId,
        prefix: &str,
        field: &str,
        op: &str,
        value: &Bson,
    ) -> Result<NodeId, CommandError> {
        let field = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        let operand = Operand::from_value(value)?;
        self.push_leaf(parent, field, false, op, Some(operand))
    }

    /// Adds a comparison whose left-hand side is already SQL.
    pub fn add_raw_filter(
        &mut self,
        parent: NodeId,
        sql: &str,
        op: &str,
        operand: Option<Operand>,
    ) -> Result<NodeId, CommandError> {
        self.push_leaf(parent, sql.to_string(), true, op, operand)
    }

    pub fn add_op(&mut self, parent: NodeId, op: LogicalOp) -> Result<NodeId, CommandError> {
        self.push(parent, NodeKind::Logical(op))
    }

    /// Adds a negation; it accepts exactly one child.
    pub fn add_unary_op(&mut self, parent: NodeId) -> Result<NodeId, CommandError> {
        self.push(parent, NodeKind::Not)
    }

    fn push_leaf(
        &mut self,
        parent: NodeId,
        field: String,
        raw: bool,
        op: &str,
        operand: Option<Operand>,
    ) -> Result<NodeId, CommandError> {
        let id = self.push(
            parent,
            NodeKind::Leaf(Leaf {
                field,
                raw,
                op: op.to_string(),
                operand,
                index: 0,
            }),
        )?;
        self.renumber(self.first);
        Ok(id)
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> Result<NodeId, CommandError> {
        let node = self
            .nodes
            .get(parent.0)
            .ok_or_else(|| CommandError::internal(format!("unknown filter node {}", parent.0)))?;
        match node.kind {
            NodeKind::Leaf(_) => {
                return Err(CommandError::internal("filter leaf cannot have children"));
            }
            NodeKind::Not if !node.children.is_empty() => {
                return Err(CommandError::internal("negation takes a single operand"));
            }
            _ => {}
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    // ── Rendering ───────────────────────────────────────────────

    /// Numbers placeholders in pre-order starting at `first` and returns the
    /// next free number. Later insertions keep the same starting number.
    pub fn renumber(&mut self, first: usize) -> usize {
        self.first = first;
        let order = self.pre_order();
        let mut next = first;
        for id in order {
            if let NodeKind::Leaf(leaf) = &mut self.nodes[id.0].kind {
                if leaf.operand.is_some() {
                    leaf.index = next;
                    next += 1;
                }
            }
        }
        next
    }

    /// Parameter values in placeholder order.
    pub fn values(&self) -> Vec<SqlParam> {
        self.pre_order()
            .into_iter()
            .filter_map(|id| match &self.nodes[id.0].kind {
                NodeKind::Leaf(leaf) => leaf.operand.as_ref().map(Operand::param),
                _ => None,
            })
            .collect()
    }

    pub fn to_sql(&self, input: Input) -> String {
        self.render(self.root(), input)
    }

    fn render(&self, id: NodeId, input: Input) -> String {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::Leaf(leaf) => render_leaf(leaf, input),
            NodeKind::Logical(op) => {
                if node.children.is_empty() {
                    return match op {
                        LogicalOp::And => "TRUE".to_string(),
                        LogicalOp::Or => "FALSE".to_string(),
                    };
                }
                let sep = match op {
                    LogicalOp::And => " AND ",
                    LogicalOp::Or => " OR ",
                };
                let parts: Vec<String> =
                    node.children.iter().map(|c| self.render(*c, input)).collect();
                format!("({})", parts.join(sep))
            }
            NodeKind::Not => {
                let inner = node
                    .children
                    .first()
                    .map(|c| self.render(*c, input))
                    .unwrap_or_else(|| "TRUE".to_string());
                format!("NOT ({inner})")
            }
        }
    }

    fn pre_order(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        out
    }
}

fn render_leaf(leaf: &Leaf, input: Input) -> String {
    let lhs = if leaf.raw {
        leaf.field.clone()
    } else {
        match &leaf.operand {
            Some(Operand::Numeric(_)) => numeric_value(&input.path(&leaf.field, false)),
            Some(Operand::Text(_)) => string_value(&input.path(&leaf.field, false)),
            Some(Operand::Json(_)) | None => input.path(&leaf.field, false),
        }
    };

    let Some(operand) = &leaf.operand else {
        return leaf.op.replace("%s", &lhs);
    };
    let rhs = operand.placeholder(leaf.index);
    if leaf.op.contains("%s") {
        format!("{lhs} {}", leaf.op.replacen("%s", &rhs, 1))
    } else {
        format!("{lhs} {} {rhs}", leaf.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_renders_true() {
        let tree = FilterTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.to_sql(Input::Document), "TRUE");
        assert!(tree.values().is_empty());
    }

    #[test]
    fn single_leaf_is_still_conjunction() {
        let mut tree = FilterTree::new();
        tree.add_filter(tree.root(), "", "a", "=", &Bson::String("x".into()))
            .unwrap();
        assert_eq!(
            tree.to_sql(Input::Document),
            "((CASE WHEN jsonb_typeof(_jsonb->'a') = 'string' THEN _jsonb->'a' #>> '{}' END) = $1)"
        );
        assert_eq!(tree.values(), vec![SqlParam::Text("x".into())]);
    }

    #[test]
    fn prefix_joins_paths() {
        let mut tree = FilterTree::new();
        tree.add_filter(tree.root(), "a.b", "c", "=", &Bson::Boolean(true))
            .unwrap();
        assert_eq!(tree.to_sql(Input::Document), "(_jsonb->'a'->'b'->'c' = $1::jsonb)");
    }

    #[test]
    fn numeric_operands_use_resolving_expression() {
        let mut tree = FilterTree::new();
        tree.add_filter(tree.root(), "", "n", ">", &Bson::Int32(5)).unwrap();
        let sql = tree.to_sql(Input::Document);
        assert!(sql.contains("(_jsonb->'n'->>'$f')::numeric"), "{sql}");
        assert!(sql.contains("FROM (VALUES ($1::jsonb)) AS p(v)"), "{sql}");
        assert_eq!(tree.values(), vec![SqlParam::Json(serde_json::json!(5))]);
    }

    #[test]
    fn negation_and_disjunction() {
        let mut tree = FilterTree::new();
        let not = tree.add_unary_op(tree.root()).unwrap();
        let or = tree.add_op(not, LogicalOp::Or).unwrap();
        tree.add_filter(or, "", "a", "=", &Bson::Null).unwrap();
        tree.add_filter(or, "", "b", "=", &Bson::Null).unwrap();

        assert_eq!(
            tree.to_sql(Input::Document),
            "(NOT ((_jsonb->'a' = $1::jsonb OR _jsonb->'b' = $2::jsonb)))"
        );
    }

    #[test]
    fn empty_disjunction_is_false() {
        let mut tree = FilterTree::new();
        tree.add_op(tree.root(), LogicalOp::Or).unwrap();
        assert_eq!(tree.to_sql(Input::Document), "(FALSE)");
    }

    #[test]
    fn template_without_operand_wraps_field() {
        let mut tree = FilterTree::new();
        tree.add_raw_filter(tree.root(), "_jsonb->'a'", "jsonb_typeof(%s) = 'array'", None)
            .unwrap();
        assert_eq!(tree.to_sql(Input::Document), "(jsonb_typeof(_jsonb->'a') = 'array')");
        assert!(tree.values().is_empty());
    }

    #[test]
    fn raw_leaf_with_operand() {
        let mut tree = FilterTree::new();
        tree.add_raw_filter(tree.root(), "_jsonb", "?", Some(Operand::Text("a".into())))
            .unwrap();
        assert_eq!(tree.to_sql(Input::Document), "(_jsonb ? $1)");
    }

    #[test]
    fn leaves_cannot_have_children() {
        let mut tree = FilterTree::new();
        let leaf = tree.add_filter(tree.root(), "", "a", "=", &Bson::Null).unwrap();
        let err = tree.add_op(leaf, LogicalOp::And).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[test]
    fn negation_takes_one_child() {
        let mut tree = FilterTree::new();
        let not = tree.add_unary_op(tree.root()).unwrap();
        tree.add_filter(not, "", "a", "=", &Bson::Null).unwrap();
        assert!(tree.add_filter(not, "", "b", "=", &Bson::Null).is_err());
    }

    #[test]
    fn renumber_follows_pre_order() {
        let mut tree = FilterTree::new();
        let or = tree.add_op(tree.root(), LogicalOp::Or).unwrap();
        tree.add_filter(tree.root(), "", "late", "=", &Bson::Null).unwrap();
        tree.add_filter(or, "", "early", "=", &Bson::Null).unwrap();
        assert_eq!(
            tree.to_sql(Input::Document),
            "((_jsonb->'early' = $1::jsonb) AND _jsonb->'late' = $2::jsonb)"
        );

        let next = tree.renumber(3);
        assert_eq!(next, 5);
        assert_eq!(
            tree.to_sql(Input::Document),
            "((_jsonb->'early' = $3::jsonb) AND _jsonb->'late' = $4::jsonb)"
        );
    }
}
