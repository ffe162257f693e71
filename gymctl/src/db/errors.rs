use thiserror::Error;

/// Store-level failures. Constraint violations are split out so callers can
/// map them onto business errors where that makes sense; everything else is
/// an internal failure.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("row not found")]
    NotFound,

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    #[error("foreign key constraint violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                match db_err.code().as_deref() {
                    Some("23505") => DbError::UniqueViolation { constraint },
                    Some("23514") => DbError::CheckViolation { constraint },
                    Some("23503") => DbError::ForeignKeyViolation { constraint },
                    _ => DbError::Sqlx(err),
                }
            }
            _ => DbError::Sqlx(err),
        }
    }
}
