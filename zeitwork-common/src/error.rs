use std::fmt;

/// The broad category a [`Error`] falls into.
///
/// Mirrors the taxonomy from spec §7: transient errors are retried locally,
/// the rest are translated into a status transition on the owning row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A database error that is safe to retry (serialization failure,
    /// deadlock, connection reset).
    Transient,
    /// A database error that is not expected to resolve itself.
    Database,
    /// The referenced row could not be found.
    NotFound,
    /// A unique constraint or invariant would be violated.
    Conflict,
    /// An external command (git, docker, the runtime API) failed.
    External,
    /// Anything else, including bugs and panics caught at a task boundary.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient error",
            ErrorKind::Database => "database error",
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::External => "external command failed",
            ErrorKind::Internal => "internal error",
        };
        write!(f, "{s}")
    }
}

/// The error type shared by every crate in the workspace.
///
/// Carries an [`ErrorKind`] used to decide retry/transition behaviour, and an
/// optional boxed source for diagnostics.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn source<E: std::error::Error + Send + Sync + 'static>(kind: ErrorKind, err: E) -> Self {
        Self {
            kind,
            source: Some(Box::new(err)),
        }
    }

    pub fn custom<S: AsRef<str>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            source: Some(message.as_ref().to_string().into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether this error is worth retrying a small, bounded number of times
    /// before giving up and transitioning the owning row.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(source) = self.source.as_ref() {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let kind = if is_transient_db_error(&err) {
            ErrorKind::Transient
        } else if matches!(err, sqlx::Error::RowNotFound) {
            ErrorKind::NotFound
        } else {
            ErrorKind::Database
        };
        Self::source(kind, err)
    }
}

/// Postgres error codes that are safe to retry: serialization failures and
/// deadlocks under our `SERIALIZABLE`/row-lock usage, plus connection blips.
fn is_transient_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some("40001") | Some("40P01") | Some("55P03")
        ),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        _ => false,
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
