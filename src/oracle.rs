use async_trait::async_trait;
use thiserror::Error;

use crate::endpoint::EndpointError;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{endpoint}: {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: EndpointError,
    },

    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// Decides whether two endpoints hold the same visible data.
///
/// The harness only schedules calls to [`Oracle::equal`]; how equality is
/// established is up to the implementation.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn equal(&self) -> Result<bool, OracleError>;
}
