use sqlx::error::DatabaseError;

use crate::application::repos::RepoError;

// Postgres SQLSTATE codes the repositories care about.
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const NOT_NULL_VIOLATION: &str = "23502";
const STRING_DATA_RIGHT_TRUNCATION: &str = "22001";
const INVALID_TEXT_REPRESENTATION: &str = "22P02";
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";
const QUERY_CANCELED: &str = "57014";

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => map_database_error(&*db),
        other => RepoError::from_persistence(other),
    }
}

fn map_database_error(db: &dyn DatabaseError) -> RepoError {
    let message = db.message().to_string();
    match db.code().as_deref() {
        Some(UNIQUE_VIOLATION) => RepoError::Duplicate {
            constraint: db.constraint().unwrap_or("unknown").to_string(),
        },
        Some(
            CHECK_VIOLATION
            | NOT_NULL_VIOLATION
            | STRING_DATA_RIGHT_TRUNCATION
            | INVALID_TEXT_REPRESENTATION
            | NUMERIC_VALUE_OUT_OF_RANGE,
        ) => RepoError::InvalidInput { message },
        Some(QUERY_CANCELED) => RepoError::Timeout,
        Some(code) if code.starts_with("23") => RepoError::Integrity { message },
        _ => RepoError::Persistence(message),
    }
}
