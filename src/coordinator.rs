//! Auto-increment increment/offset setup.
//!
//! Session scope attaches the values to the endpoint config so every pooled
//! connection sets them when it connects. Global scope sets them server-wide
//! and verifies them from a fresh connection after a settle delay: the server
//! only guarantees new sessions see a changed global once it has propagated.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::info;

use crate::endpoint::{Connector, Endpoint};
use crate::error::HarnessError;
use crate::fixture::{AutoIncrementParams, ScalarQuery, Statement};
use crate::settings::{EndpointConfig, Timing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamScope {
    Session,
    Global,
}

impl ParamScope {
    pub fn from_session_flag(session: bool) -> Self {
        if session {
            ParamScope::Session
        } else {
            ParamScope::Global
        }
    }
}

/// Apply `params` for `config` and return the config to open endpoints with.
///
/// With [`ParamScope::Global`] this leaves the server's global variables
/// changed for every later session.
pub async fn configure<C: Connector>(
    connector: &C,
    config: &EndpointConfig,
    params: AutoIncrementParams,
    scope: ParamScope,
    timing: &Timing,
) -> Result<EndpointConfig, HarnessError> {
    params.validate().map_err(HarnessError::Config)?;
    match scope {
        ParamScope::Session => Ok(config.with_session_params(Some(params))),
        ParamScope::Global => {
            let config = config.with_session_params(None);
            set_global(connector, &config, params, timing).await?;
            info!(
                endpoint = %config.label,
                increment = params.increment,
                offset = params.offset,
                "set global var success"
            );
            Ok(config)
        }
    }
}

async fn set_global<C: Connector>(
    connector: &C,
    config: &EndpointConfig,
    params: AutoIncrementParams,
    timing: &Timing,
) -> Result<(), HarnessError> {
    let admin_config = config.with_max_connections(1);
    let admin = open(connector, &admin_config).await?;
    let set_result = async {
        for (variable, value) in params.pairs() {
            let statement = Statement::SetGlobal { variable, value };
            admin
                .execute(&statement)
                .await
                .map_err(|e| HarnessError::endpoint(admin.name(), statement.sql(), e))?;
        }
        Ok::<_, HarnessError>(())
    }
    .await;
    admin.close().await;
    set_result?;

    sleep(timing.global_settle()).await;

    // Read back from a connection opened after the change.
    let fresh = open(connector, &admin_config).await?;
    let verify_result = async {
        for (variable, expected) in params.pairs() {
            let query = ScalarQuery::Variable(variable);
            let actual = fresh
                .query_scalar(&query)
                .await
                .map_err(|e| HarnessError::endpoint(fresh.name(), query.sql(), e))?;
            if actual != expected {
                return Err(HarnessError::ConfigMismatch {
                    endpoint: config.label.clone(),
                    variable,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
    .await;
    fresh.close().await;
    verify_result
}

/// Open an endpoint, attaching the endpoint label to connection errors.
pub async fn open<C: Connector>(
    connector: &C,
    config: &EndpointConfig,
) -> Result<Arc<C::Endpoint>, HarnessError> {
    connector.open(config).await.map_err(|e| {
        HarnessError::endpoint(&config.label, format!("connect to {}", config.address()), e)
    })
}

/// Increment/offset convention for two endpoints written concurrently:
/// the first gets odd ids, the second even ids.
pub const PRIMARY_PARAMS: AutoIncrementParams = AutoIncrementParams::new(2, 1);
pub const SECONDARY_PARAMS: AutoIncrementParams = AutoIncrementParams::new(2, 2);

/// Configure both endpoints with [`PRIMARY_PARAMS`] / [`SECONDARY_PARAMS`]
/// and open them with a pool of `concurrency` connections each.
pub async fn configure_pair<C: Connector>(
    connector: &C,
    primary: &EndpointConfig,
    secondary: &EndpointConfig,
    scope: ParamScope,
    concurrency: usize,
    timing: &Timing,
) -> Result<(Arc<C::Endpoint>, Arc<C::Endpoint>), HarnessError> {
    let primary = configure(connector, primary, PRIMARY_PARAMS, scope, timing).await?;
    let secondary = configure(connector, secondary, SECONDARY_PARAMS, scope, timing).await?;

    let a = open(connector, &primary.with_max_connections(concurrency)).await?;
    let b = match open(connector, &secondary.with_max_connections(concurrency)).await {
        Ok(b) => b,
        Err(e) => {
            a.close().await;
            return Err(e);
        }
    };
    Ok((a, b))
}
