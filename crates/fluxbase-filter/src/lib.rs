//! # fluxbase-filter
//!
//! Parser for the compact URL filter grammar:
//!
//! ```text
//! filter    := column "=" op "." value
//!            | "or" "=" "(" filter {"," filter} ")"
//!            | "and" "=" "(" filter {"," filter} ")"
//! op        := "eq"|"neq"|"gt"|"gte"|"lt"|"lte"|"like"|"ilike"|"in"|"is"|"not"
//! value     := literal | "(" literal {"," literal} ")" | "null" | "true" | "false"
//! select    := column {"," column | column "(" select ")"}
//! order     := column "." ("asc"|"desc") ["." ("nullsfirst"|"nullslast")]
//! ```
//!
//! The parser is pure: no I/O, no SQL, no schema access. Identifier and
//! type validation against the schema happens in the planner.

pub mod ast;
pub mod parser;
pub mod render;

pub use ast::{
    EmbedSelect, FilterValue, NullsOrder, Op, OrderTerm, ParsedQuery, Predicate, SelectItem,
};
pub use parser::{parse_filter_expr, parse_query};
pub use render::render_query;
