use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A storage operation failed. Carries the operation name and table so
    /// callers can tell which bucket broke without parsing SQLite messages.
    #[error("{op} failed on table {table}: {source}")]
    Database {
        op: &'static str,
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to open event database: {0}")]
    Open(#[source] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl Error {
    pub(crate) fn db(op: &'static str, table: &str, source: rusqlite::Error) -> Self {
        Error::Database {
            op,
            table: table.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
