use std::io;
use thiserror::Error;

/// Result alias used throughout the storage engine.
pub type Result<T> = std::result::Result<T, DbError>;

/// Everything that can go wrong while executing a request against the store.
///
/// Schema and key errors are recoverable: they are turned into a one-line
/// message for the client and the connection stays open. `Io` is the only
/// variant whose detail is kept server-side; clients get a generic line and
/// the cause goes to the log.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("table '{0}' already exists")]
    AlreadyExists(String),

    #[error("table '{0}' does not exist")]
    NotFound(String),

    #[error("expected {expected} values, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("value {value} does not match the type of column '{column}'")]
    TypeMismatch { column: String, value: String },

    #[error("value \"{value}\" does not fit in column '{column}'")]
    ValueTooLarge { column: String, value: String },

    #[error("more than one PRIMARY KEY column")]
    DuplicatePrimaryKey,

    #[error("PRIMARY KEY is only supported on INT columns")]
    PrimaryKeyOnText,

    #[error("table '{0}' has no primary key")]
    NoPrimaryKey(String),

    #[error("VARCHAR contained faulty value '{0}'")]
    BadVarchar(usize),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("WHERE column '{0}' is not the primary key")]
    WhereNotKey(String),

    #[error("no row with primary key {0}")]
    KeyNotFound(i64),

    #[error("could not remove the data file for table '{0}'")]
    DataFileRemoval(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DbError {
    /// The exact line sent back to the client for this error.
    ///
    /// The wording (including its typos) is part of the wire protocol and
    /// must not be reformatted. `Io` deliberately maps to a generic line;
    /// the underlying cause is logged, never sent.
    pub fn client_message(&self) -> String {
        match self {
            DbError::AlreadyExists(t) => format!("error: table '{t}' already exists\n"),
            DbError::NotFound(t) => format!("error: '{t}' does not exist\n"),
            DbError::ArityMismatch { .. } => "syntax error, to many values.\n".to_string(),
            DbError::TypeMismatch { .. } => {
                "syntax error, value(s) are of wrong data type.\n".to_string()
            }
            DbError::ValueTooLarge { value, .. } => {
                format!("syntax error, VARCHAR value \"{value}\" is to big.\n")
            }
            DbError::DuplicatePrimaryKey => {
                "error: more than one PRIMARY KEY column\n".to_string()
            }
            DbError::PrimaryKeyOnText => {
                "error: PRIMARY KEY is only supported on INT columns\n".to_string()
            }
            DbError::NoPrimaryKey(t) => format!("error: table '{t}' has no primary key\n"),
            DbError::BadVarchar(n) => format!("error: VARCHAR contained faulty value '{n}'\n"),
            DbError::UnknownColumn(c) => format!("error: unknown column '{c}'\n"),
            DbError::WhereNotKey(c) => {
                format!("error: WHERE column '{c}' is not the primary key\n")
            }
            DbError::KeyNotFound(k) => {
                format!("error: couldn't find row with primary key {k}\n")
            }
            DbError::DataFileRemoval(t) => format!(
                "error: the server wasn't able to remove table '{t}' from the database\n"
            ),
            DbError::Io(_) => "error: server could not complete the request\n".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_matches_wire_format() {
        let e = DbError::NotFound("t".to_string());
        assert_eq!(e.client_message(), "error: 't' does not exist\n");
    }

    #[test]
    fn io_detail_is_not_leaked() {
        let e = DbError::Io(io::Error::new(io::ErrorKind::Other, "disk on fire"));
        assert_eq!(e.client_message(), "error: server could not complete the request\n");
    }
}
