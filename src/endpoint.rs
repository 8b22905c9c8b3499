//! The database endpoint seam.
//!
//! Scenarios only ever talk to a server through [`Endpoint`] and open one
//! through [`Connector`]. The MySQL implementation lives in
//! [`crate::mysql`]; [`crate::memory`] provides an in-process double.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::fixture::{ScalarQuery, Statement};
use crate::oracle::Oracle;
use crate::settings::EndpointConfig;

/// Classification of a failed statement, decided at the driver boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorKind {
    /// An insert omitted a NOT NULL column that has no default.
    MissingDefault,
    /// A statement referenced a column the table does not have.
    UnknownColumn,
    Connection,
    Timeout,
    Other,
}

impl fmt::Display for SqlErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SqlErrorKind::MissingDefault => "missing default",
            SqlErrorKind::UnknownColumn => "unknown column",
            SqlErrorKind::Connection => "connection",
            SqlErrorKind::Timeout => "timeout",
            SqlErrorKind::Other => "statement",
        };
        f.write_str(s)
    }
}

/// Error returned by an [`Endpoint`].
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct EndpointError {
    pub kind: SqlErrorKind,
    /// Server error code, when the server produced one.
    pub code: Option<u16>,
    pub message: String,
}

impl EndpointError {
    pub fn new(kind: SqlErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(SqlErrorKind::Other, message)
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }
}

/// A connection-pooled handle to one database.
///
/// Implementations must be safe to share between worker tasks; each call may
/// use a different pooled connection.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Label used in logs and error messages (e.g. `db1`).
    fn name(&self) -> &str;

    async fn execute(&self, statement: &Statement) -> Result<(), EndpointError>;

    async fn query_scalar(&self, query: &ScalarQuery) -> Result<i64, EndpointError>;

    /// Release pooled connections. Further calls on the endpoint are not expected.
    async fn close(&self);
}

/// Opens endpoints and builds oracles over pairs of them.
#[async_trait]
pub trait Connector: Send + Sync {
    type Endpoint: Endpoint + 'static;

    /// Open an endpoint and check it is reachable.
    async fn open(&self, config: &EndpointConfig) -> Result<Arc<Self::Endpoint>, EndpointError>;

    /// Equality oracle comparing the visible data of `a` and `b`.
    fn oracle(&self, a: &Arc<Self::Endpoint>, b: &Arc<Self::Endpoint>) -> Box<dyn Oracle>;
}
