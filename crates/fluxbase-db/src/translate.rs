//! Translation of driver errors into the shared error kinds.
//!
//! This is the only place SQLSTATE codes are interpreted; everything
//! above the executor sees error kinds, never driver errors.

use fluxbase_core::Error;

pub fn translate_db_error(e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::PoolTimedOut => {
            Error::ResourceExhausted("connection pool exhausted".into())
        }
        sqlx::Error::PoolClosed => Error::ServiceUnavailable("connection pool closed".into()),
        sqlx::Error::RowNotFound => Error::NotFound("row not found".into()),
        sqlx::Error::Database(db) => {
            let constraint = db.constraint().map(str::to_string);
            match db.code().as_deref() {
                // unique_violation
                Some("23505") => Error::Conflict {
                    message: db.message().to_string(),
                    constraint,
                },
                // foreign_key_violation
                Some("23503") => Error::Conflict {
                    message: db.message().to_string(),
                    constraint,
                },
                // check_violation, not_null_violation, invalid_text_representation
                Some("23514") | Some("23502") | Some("22P02") => {
                    Error::BadRequest(db.message().to_string())
                }
                // query_canceled (statement timeout)
                Some("57014") => Error::Timeout,
                // insufficient_privilege
                Some("42501") => Error::Forbidden("insufficient privilege".into()),
                _ => Error::internal(sqlx::Error::Database(db)),
            }
        }
        other => Error::internal(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxbase_core::ErrorKind;

    #[test]
    fn pool_exhaustion_is_resource_exhausted() {
        assert_eq!(
            translate_db_error(sqlx::Error::PoolTimedOut).kind(),
            ErrorKind::ResourceExhausted
        );
    }

    #[test]
    fn missing_row_is_not_found() {
        assert_eq!(
            translate_db_error(sqlx::Error::RowNotFound).kind(),
            ErrorKind::NotFound
        );
    }
}
