use std::time::Duration;

use thiserror::Error;

use crate::endpoint::EndpointError;
use crate::fixture::SystemVariable;
use crate::oracle::OracleError;

/// Errors surfaced by scenarios and their building blocks.
///
/// Each variant carries enough context (endpoint label, operation) to be
/// reported to the user as-is.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{endpoint}: {variable} reads back as {actual} after being set to {expected}")]
    ConfigMismatch {
        endpoint: String,
        variable: SystemVariable,
        expected: i64,
        actual: i64,
    },

    #[error("{endpoint}: {context}")]
    Endpoint {
        endpoint: String,
        context: String,
        #[source]
        source: EndpointError,
    },

    #[error("check failed, expected {expected} but got {actual} (sql: {query})")]
    Verification {
        expected: i64,
        actual: i64,
        query: String,
    },

    #[error("data still not equal after {elapsed:?}")]
    ConvergenceTimeout { elapsed: Duration },

    #[error("equality check failed")]
    Oracle(#[from] OracleError),

    #[error("worker task failed: {0}")]
    WorkerJoin(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    pub fn endpoint(endpoint: &str, context: impl Into<String>, source: EndpointError) -> Self {
        HarnessError::Endpoint {
            endpoint: endpoint.to_string(),
            context: context.into(),
            source,
        }
    }
}
