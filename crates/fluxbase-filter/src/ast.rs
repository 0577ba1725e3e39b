//! The typed filter AST.

use serde::{Deserialize, Serialize};

/// Comparison operators. `not` from the grammar is a negation modifier
/// carried on the comparison, not an operator of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    In,
    Is,
}

impl Op {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => Op::Eq,
            "neq" => Op::Neq,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "like" => Op::Like,
            "ilike" => Op::Ilike,
            "in" => Op::In,
            "is" => Op::Is,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Neq => "neq",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::Like => "like",
            Op::Ilike => "ilike",
            Op::In => "in",
            Op::Is => "is",
        }
    }
}

/// A comparison's right-hand side, kept as written on the wire.
/// `*` wildcards in like/ilike patterns are translated to `%` by the
/// planner, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterValue {
    Literal(String),
    List(Vec<String>),
    Null,
    Bool(bool),
}

/// A predicate tree. Leaves are comparisons; internal nodes are
/// conjunctions and disjunctions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    Cmp {
        column: String,
        op: Op,
        value: FilterValue,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn cmp(column: impl Into<String>, op: Op, value: FilterValue) -> Self {
        Predicate::Cmp {
            column: column.into(),
            op,
            value,
            negated: false,
        }
    }

    /// Structural equality that ignores the ordering of `and`/`or`
    /// children, for the grammar round-trip property.
    pub fn equivalent(&self, other: &Predicate) -> bool {
        match (self, other) {
            (Predicate::Cmp { .. }, Predicate::Cmp { .. }) => self == other,
            (Predicate::And(a), Predicate::And(b)) | (Predicate::Or(a), Predicate::Or(b)) => {
                a.len() == b.len()
                    && a.iter().all(|pa| b.iter().any(|pb| pa.equivalent(pb)))
            }
            _ => false,
        }
    }

    /// Columns referenced anywhere in the tree.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Cmp { column, .. } => out.push(column),
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTerm {
    pub column: String,
    pub descending: bool,
    pub nulls: Option<NullsOrder>,
}

/// An embedded relation in a projection, e.g. `author(id,name)` or
/// `comments!comments_post_id_fkey(body)` with an explicit FK hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedSelect {
    pub relation: String,
    pub fk_hint: Option<String>,
    pub items: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectItem {
    Column(String),
    Embed(EmbedSelect),
}

/// Everything one request's query string parses into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// Empty means all columns.
    pub select: Vec<SelectItem>,
    /// Implicitly conjoined.
    pub filters: Vec<Predicate>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Client asked for exactly one row: object response, 404 on zero.
    pub single: bool,
    /// Client asked for the total count (`Content-Range` header).
    pub count_exact: bool,
    /// Mutations skip `RETURNING` when set.
    pub returning_minimal: bool,
    /// Insert becomes `ON CONFLICT ... DO UPDATE` when set.
    pub upsert: bool,
    /// Explicit upsert conflict target columns; primary key when absent.
    pub on_conflict: Option<Vec<String>>,
}

impl ParsedQuery {
    /// The filters joined into one predicate, if any.
    pub fn combined_filter(&self) -> Option<Predicate> {
        match self.filters.len() {
            0 => None,
            1 => Some(self.filters[0].clone()),
            _ => Some(Predicate::And(self.filters.clone())),
        }
    }
}
