//! Typed descriptors for tables, columns, and callable functions.
//!
//! Descriptors are created by one introspection pass, shared immutably
//! behind `Arc`, and replaced wholesale on the next refresh. They are never
//! mutated in place.

use serde::{Deserialize, Serialize};

/// Postgres column types Fluxbase reasons about. Anything it does not
/// need to special-case stays as `Other` with the reported udt name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Varchar,
    Char,
    Uuid,
    Date,
    Time,
    Timestamp,
    Timestamptz,
    Json,
    Jsonb,
    Bytea,
    Other(String),
}

impl SqlType {
    /// Map a `udt_name` from `information_schema.columns`.
    pub fn from_udt(udt: &str) -> Self {
        match udt {
            "bool" => SqlType::Bool,
            "int2" => SqlType::Int2,
            "int4" => SqlType::Int4,
            "int8" => SqlType::Int8,
            "float4" => SqlType::Float4,
            "float8" => SqlType::Float8,
            "numeric" => SqlType::Numeric,
            "text" => SqlType::Text,
            "varchar" => SqlType::Varchar,
            "bpchar" => SqlType::Char,
            "uuid" => SqlType::Uuid,
            "date" => SqlType::Date,
            "time" | "timetz" => SqlType::Time,
            "timestamp" => SqlType::Timestamp,
            "timestamptz" => SqlType::Timestamptz,
            "json" => SqlType::Json,
            "jsonb" => SqlType::Jsonb,
            "bytea" => SqlType::Bytea,
            other => SqlType::Other(other.to_string()),
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, SqlType::Text | SqlType::Varchar | SqlType::Char)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::Int2
                | SqlType::Int4
                | SqlType::Int8
                | SqlType::Float4
                | SqlType::Float8
                | SqlType::Numeric
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, SqlType::Bool)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            SqlType::Date | SqlType::Time | SqlType::Timestamp | SqlType::Timestamptz
        )
    }

    pub fn is_json(&self) -> bool {
        matches!(self, SqlType::Json | SqlType::Jsonb)
    }

    /// Whether `<`/`>` comparisons make sense for the type.
    pub fn is_orderable(&self) -> bool {
        self.is_numeric() || self.is_textual() || self.is_temporal() || matches!(self, SqlType::Uuid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub has_default: bool,
    pub identity_generated: bool,
}

/// Referential action on delete, from
/// `information_schema.referential_constraints.delete_rule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FkAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl FkAction {
    pub fn from_rule(rule: &str) -> Self {
        match rule {
            "CASCADE" => FkAction::Cascade,
            "SET NULL" => FkAction::SetNull,
            "SET DEFAULT" => FkAction::SetDefault,
            "RESTRICT" => FkAction::Restrict,
            _ => FkAction::NoAction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub constraint_name: String,
    /// Referencing columns on this table, in constraint order.
    pub columns: Vec<String>,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: FkAction,
}

/// One table or view, as of one cache generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    /// Columns in `ordinal_position` order; stable across a generation.
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub unique_constraints: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKey>,
    pub rls_enabled: bool,
    pub is_view: bool,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Foreign keys pointing at `schema.table`.
    pub fn foreign_keys_to(&self, schema: &str, table: &str) -> Vec<&ForeignKey> {
        self.foreign_keys
            .iter()
            .filter(|fk| fk.referenced_schema == schema && fk.referenced_table == table)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionArg {
    pub name: String,
    pub sql_type: SqlType,
    pub has_default: bool,
}

/// A callable function exposed through `/rpc/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub schema: String,
    pub name: String,
    pub args: Vec<FunctionArg>,
    pub returns_set: bool,
}

impl FunctionDescriptor {
    pub fn arg(&self, name: &str) -> Option<&FunctionArg> {
        self.args.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udt_mapping_covers_common_types() {
        assert_eq!(SqlType::from_udt("int8"), SqlType::Int8);
        assert_eq!(SqlType::from_udt("timestamptz"), SqlType::Timestamptz);
        assert_eq!(
            SqlType::from_udt("tsvector"),
            SqlType::Other("tsvector".into())
        );
    }

    #[test]
    fn type_categories() {
        assert!(SqlType::Varchar.is_textual());
        assert!(SqlType::Numeric.is_numeric());
        assert!(SqlType::Uuid.is_orderable());
        assert!(!SqlType::Jsonb.is_orderable());
    }

    #[test]
    fn fk_action_parses_delete_rules() {
        assert_eq!(FkAction::from_rule("CASCADE"), FkAction::Cascade);
        assert_eq!(FkAction::from_rule("NO ACTION"), FkAction::NoAction);
    }
}
