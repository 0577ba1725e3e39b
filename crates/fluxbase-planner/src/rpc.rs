//! RPC planning: `POST /rpc/{name}` becomes
//! `SELECT * FROM schema.fn(arg => $n, ...)` with argument names and
//! types resolved from the catalog.

use crate::bind::coerce_json;
use crate::quote::{quote_ident, quote_qualified};
use crate::{Planner, SqlWriter, Statement};
use fluxbase_core::Error;
use serde_json::{Map, Value};

impl Planner<'_> {
    pub fn rpc(
        &self,
        schema: &str,
        fn_name: &str,
        args: &Map<String, Value>,
    ) -> Result<Statement, Error> {
        let function = self
            .snapshot()
            .function(schema, fn_name)
            .ok_or_else(|| Error::NotFound(format!("no such function: {schema}.{fn_name}")))?;

        for provided in args.keys() {
            if function.arg(provided).is_none() {
                return Err(Error::BadRequest(format!(
                    "unknown argument {provided} for {schema}.{fn_name}"
                )));
            }
        }
        for arg in &function.args {
            if !arg.has_default && !args.contains_key(&arg.name) {
                return Err(Error::BadRequest(format!(
                    "missing argument {} for {schema}.{fn_name}",
                    arg.name
                )));
            }
        }

        let mut w = SqlWriter::new();
        w.push("SELECT coalesce(json_agg(row_to_json(_r)), '[]'::json) FROM (SELECT * FROM ");
        w.push(&quote_qualified(&function.schema, &function.name));
        w.push("(");
        let mut first = true;
        for arg in &function.args {
            let Some(value) = args.get(&arg.name) else {
                continue;
            };
            if !first {
                w.push(", ");
            }
            first = false;
            w.push(&quote_ident(&arg.name));
            w.push(" => ");
            w.push_bind(coerce_json(&arg.sql_type, value)?);
        }
        w.push(")) _r");

        Ok(w.finish())
    }
}
