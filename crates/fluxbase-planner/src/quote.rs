//! Identifier quoting.
//!
//! Every identifier the planner renders passes through here after being
//! validated against the schema snapshot. Quoting doubles embedded
//! quotes, so even a hostile catalog name cannot break out of its
//! position.

/// Quote one identifier: `users` -> `"users"`.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a qualified relation name: `"schema"."name"`.
pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_plain_identifiers() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_qualified("public", "users"), "\"public\".\"users\"");
    }

    #[test]
    fn doubles_embedded_quotes() {
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }
}
