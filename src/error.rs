use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid docset bundle at {path}: {reason}")]
    InvalidBundle { path: PathBuf, reason: String },

    #[error("a docset named '{0}' is already installed")]
    NameCollision(String),

    #[error("index {index} is out of bounds for {len} docsets")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("corrupt compressed data: {0}")]
    Corrupt(String),

    #[error("no docset matches {0}")]
    NoMatchingDocset(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}
