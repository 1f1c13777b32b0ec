use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} `{name}` not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} `{name}` already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("corrupt {what} row: {message}")]
    CorruptRow { what: &'static str, message: String },
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn corrupt(what: &'static str, message: impl ToString) -> Self {
        Self::CorruptRow {
            what,
            message: message.to_string(),
        }
    }

    /// Translate a unique-constraint violation into `AlreadyExists`; pass
    /// every other database error through.
    pub(crate) fn on_insert(kind: &'static str, name: &str, err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db) if db.is_unique_violation() => Self::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            _ => Self::Database(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum PortError {
    #[error("no free port remains in the configured range")]
    Exhausted,
    #[error("service `{0}` holds no allocated port")]
    NotAllocated(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
