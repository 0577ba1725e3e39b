//! Catalog introspection.
//!
//! Reads `information_schema` and `pg_catalog` on the admin pool and
//! produces the descriptors for one cache generation. System schemas and
//! the internal `_fluxbase` schema are excluded.

use crate::descriptor::{
    Column, FkAction, ForeignKey, FunctionArg, FunctionDescriptor, SqlType, TableDescriptor,
};
use fluxbase_core::Error;
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashMap};

const HIDDEN_SCHEMAS: &str = "('pg_catalog', 'information_schema', '_fluxbase')";

/// Introspect every user table, view, and function.
pub async fn introspect(pool: &PgPool) -> Result<(Vec<TableDescriptor>, Vec<FunctionDescriptor>), Error> {
    let tables = introspect_relations(pool).await?;
    let functions = introspect_functions(pool).await?;
    Ok((tables, functions))
}

async fn introspect_relations(pool: &PgPool) -> Result<Vec<TableDescriptor>, Error> {
    let relation_rows = sqlx::query(&format!(
        r#"
        select table_schema, table_name, table_type
        from information_schema.tables
        where table_type in ('BASE TABLE', 'VIEW')
          and table_schema not in {HIDDEN_SCHEMAS}
        order by table_schema, table_name
        "#,
    ))
    .fetch_all(pool)
    .await
    .map_err(Error::internal)?;

    // Row-security flags come from pg_class, one pass for all tables.
    let rls_rows = sqlx::query(
        r#"
        select n.nspname as table_schema, c.relname as table_name, c.relrowsecurity
        from pg_class c
        join pg_namespace n on n.oid = c.relnamespace
        where c.relkind = 'r'
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(Error::internal)?;

    let mut rls: HashMap<(String, String), bool> = HashMap::new();
    for row in rls_rows {
        rls.insert(
            (row.get("table_schema"), row.get("table_name")),
            row.get("relrowsecurity"),
        );
    }

    let mut descriptors = Vec::new();

    for relation in relation_rows {
        let table_schema: String = relation.get("table_schema");
        let table_name: String = relation.get("table_name");
        let table_type: String = relation.get("table_type");
        let is_view = table_type == "VIEW";

        let col_rows = sqlx::query(
            r#"
            select column_name, udt_name, is_nullable, column_default, is_identity
            from information_schema.columns
            where table_schema = $1 and table_name = $2
            order by ordinal_position
            "#,
        )
        .bind(&table_schema)
        .bind(&table_name)
        .fetch_all(pool)
        .await
        .map_err(Error::internal)?;

        let columns = col_rows
            .into_iter()
            .map(|c| {
                let is_nullable: String = c.get("is_nullable");
                let is_identity: String = c.get("is_identity");
                let column_default: Option<String> = c.get("column_default");
                Column {
                    name: c.get("column_name"),
                    sql_type: SqlType::from_udt(c.get::<String, _>("udt_name").as_str()),
                    nullable: is_nullable == "YES",
                    has_default: column_default.is_some(),
                    identity_generated: is_identity == "YES",
                }
            })
            .collect();

        let pk_rows = sqlx::query(
            r#"
            select kcu.column_name
            from information_schema.table_constraints tc
            join information_schema.key_column_usage kcu
              on tc.constraint_name = kcu.constraint_name
             and tc.table_schema = kcu.table_schema
            where tc.constraint_type = 'PRIMARY KEY'
              and tc.table_schema = $1
              and tc.table_name = $2
            order by kcu.ordinal_position
            "#,
        )
        .bind(&table_schema)
        .bind(&table_name)
        .fetch_all(pool)
        .await
        .map_err(Error::internal)?;

        let primary_key: Vec<String> = pk_rows
            .into_iter()
            .map(|r| r.get::<String, _>("column_name"))
            .collect();

        let uniq_rows = sqlx::query(
            r#"
            select tc.constraint_name, kcu.column_name
            from information_schema.table_constraints tc
            join information_schema.key_column_usage kcu
              on tc.constraint_name = kcu.constraint_name
             and tc.table_schema = kcu.table_schema
            where tc.constraint_type = 'UNIQUE'
              and tc.table_schema = $1
              and tc.table_name = $2
            order by tc.constraint_name, kcu.ordinal_position
            "#,
        )
        .bind(&table_schema)
        .bind(&table_name)
        .fetch_all(pool)
        .await
        .map_err(Error::internal)?;

        let mut uniq_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in uniq_rows {
            uniq_map
                .entry(row.get("constraint_name"))
                .or_default()
                .push(row.get("column_name"));
        }
        let unique_constraints: Vec<Vec<String>> = uniq_map.into_values().collect();

        // Foreign keys, grouped by constraint_name for stability.
        let fk_rows = sqlx::query(
            r#"
            select
              tc.constraint_name,
              kcu.column_name as column_name,
              ccu.table_schema as foreign_table_schema,
              ccu.table_name as foreign_table_name,
              ccu.column_name as foreign_column_name,
              rc.delete_rule
            from information_schema.table_constraints tc
            join information_schema.key_column_usage kcu
              on tc.constraint_name = kcu.constraint_name
             and tc.table_schema = kcu.table_schema
            join information_schema.constraint_column_usage ccu
              on ccu.constraint_name = tc.constraint_name
             and ccu.table_schema = tc.table_schema
            join information_schema.referential_constraints rc
              on rc.constraint_name = tc.constraint_name
             and rc.constraint_schema = tc.table_schema
            where tc.constraint_type = 'FOREIGN KEY'
              and tc.table_schema = $1
              and tc.table_name = $2
            order by tc.constraint_name, kcu.ordinal_position
            "#,
        )
        .bind(&table_schema)
        .bind(&table_name)
        .fetch_all(pool)
        .await
        .map_err(Error::internal)?;

        let mut fk_map: BTreeMap<String, ForeignKey> = BTreeMap::new();
        for fk in fk_rows {
            let constraint_name: String = fk.get("constraint_name");
            let entry = fk_map
                .entry(constraint_name.clone())
                .or_insert_with(|| ForeignKey {
                    constraint_name,
                    columns: Vec::new(),
                    referenced_schema: fk.get("foreign_table_schema"),
                    referenced_table: fk.get("foreign_table_name"),
                    referenced_columns: Vec::new(),
                    on_delete: FkAction::from_rule(fk.get::<String, _>("delete_rule").as_str()),
                });
            entry.columns.push(fk.get("column_name"));
            entry.referenced_columns.push(fk.get("foreign_column_name"));
        }
        let foreign_keys: Vec<ForeignKey> = fk_map.into_values().collect();

        descriptors.push(TableDescriptor {
            rls_enabled: *rls
                .get(&(table_schema.clone(), table_name.clone()))
                .unwrap_or(&false),
            schema: table_schema,
            name: table_name,
            columns,
            primary_key,
            unique_constraints,
            foreign_keys,
            is_view,
        });
    }

    Ok(descriptors)
}

async fn introspect_functions(pool: &PgPool) -> Result<Vec<FunctionDescriptor>, Error> {
    let rows = sqlx::query(&format!(
        r#"
        select
          n.nspname as schema,
          p.proname as name,
          p.proretset as returns_set,
          coalesce(p.proargnames, array[]::text[]) as arg_names,
          coalesce(
            array(select format_type(t, null) from unnest(p.proargtypes) as t),
            array[]::text[]
          ) as arg_types,
          p.pronargs::int4 as nargs,
          p.pronargdefaults::int4 as ndefaults
        from pg_proc p
        join pg_namespace n on n.oid = p.pronamespace
        where n.nspname not in {HIDDEN_SCHEMAS}
          and p.prokind = 'f'
        order by n.nspname, p.proname
        "#,
    ))
    .fetch_all(pool)
    .await
    .map_err(Error::internal)?;

    let mut functions = Vec::new();
    for row in rows {
        let arg_names: Vec<String> = row.get("arg_names");
        let arg_types: Vec<String> = row.get("arg_types");
        let nargs: i32 = row.get("nargs");
        let ndefaults: i32 = row.get("ndefaults");
        let first_defaulted = (nargs - ndefaults).max(0) as usize;

        // Unnamed arguments cannot be addressed by the RPC surface; skip
        // such functions rather than exposing a partially callable one.
        if arg_names.len() != arg_types.len() {
            continue;
        }

        let args = arg_names
            .into_iter()
            .zip(arg_types)
            .enumerate()
            .map(|(i, (name, type_name))| FunctionArg {
                name,
                sql_type: SqlType::from_udt(normalize_format_type(&type_name)),
                has_default: i >= first_defaulted,
            })
            .collect();

        functions.push(FunctionDescriptor {
            schema: row.get("schema"),
            name: row.get("name"),
            args,
            returns_set: row.get("returns_set"),
        });
    }

    Ok(functions)
}

/// `format_type` renders SQL names (`integer`, `character varying`);
/// collapse the common ones onto udt names.
fn normalize_format_type(type_name: &str) -> &str {
    match type_name {
        "integer" => "int4",
        "smallint" => "int2",
        "bigint" => "int8",
        "boolean" => "bool",
        "character varying" => "varchar",
        "character" => "bpchar",
        "double precision" => "float8",
        "real" => "float4",
        "timestamp with time zone" => "timestamptz",
        "timestamp without time zone" => "timestamp",
        "time with time zone" => "timetz",
        "time without time zone" => "time",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_type_normalization() {
        assert_eq!(
            SqlType::from_udt(normalize_format_type("integer")),
            SqlType::Int4
        );
        assert_eq!(
            SqlType::from_udt(normalize_format_type("timestamp with time zone")),
            SqlType::Timestamptz
        );
        assert_eq!(SqlType::from_udt(normalize_format_type("uuid")), SqlType::Uuid);
    }
}
