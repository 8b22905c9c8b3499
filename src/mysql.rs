//! MySQL-protocol endpoints backed by `mysql_async` pools.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};
use tracing::{debug, warn};

use crate::endpoint::{Connector, Endpoint, EndpointError, SqlErrorKind};
use crate::fixture::{ScalarQuery, Statement};
use crate::oracle::{Oracle, OracleError};
use crate::settings::EndpointConfig;

/// `Field '%s' doesn't have a default value`
const ER_NO_DEFAULT_FOR_FIELD: u16 = 1364;
/// `Unknown column '%s' in '%s'`
const ER_BAD_FIELD_ERROR: u16 = 1054;

/// Map a driver error onto the harness' error kinds by server error code.
pub fn classify(err: mysql_async::Error) -> EndpointError {
    match &err {
        mysql_async::Error::Server(server) => {
            let kind = match server.code {
                ER_NO_DEFAULT_FOR_FIELD => SqlErrorKind::MissingDefault,
                ER_BAD_FIELD_ERROR => SqlErrorKind::UnknownColumn,
                _ => SqlErrorKind::Other,
            };
            EndpointError::new(kind, err.to_string()).with_code(server.code)
        }
        mysql_async::Error::Io(_) => EndpointError::new(SqlErrorKind::Connection, err.to_string()),
        _ => EndpointError::other(err.to_string()),
    }
}

pub struct MySqlEndpoint {
    label: String,
    pool: Pool,
    read_timeout: Duration,
}

/// Driver options for `config`.
///
/// Session auto-increment params go in `setup`, which the driver runs on
/// every new connection and again after each pooled connection is reset on
/// its way back to the pool. `init` runs only once per physical connection.
fn connection_opts(config: &EndpointConfig) -> Result<Opts, EndpointError> {
    let max = config.max_connections.max(1);
    let constraints = PoolConstraints::new(0, max)
        .ok_or_else(|| EndpointError::other(format!("invalid pool size {max}")))?;
    let mut opts = OptsBuilder::default()
        .user(Some(config.user.clone()))
        .pass(Some(config.password.clone()))
        .ip_or_hostname(config.host.clone())
        .tcp_port(config.port)
        .db_name(Some(config.database.clone()))
        .pool_opts(PoolOpts::default().with_constraints(constraints));
    if let Some(params) = config.session_params {
        opts = opts.setup(params.session_setup_statements());
    }
    Ok(Opts::from(opts))
}

impl MySqlEndpoint {
    /// Build a pool for `config`. No connection is made until first use.
    pub fn new(config: &EndpointConfig) -> Result<Self, EndpointError> {
        Ok(Self {
            label: config.label.clone(),
            pool: Pool::new(connection_opts(config)?),
            read_timeout: config.read_timeout,
        })
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, EndpointError>
    where
        F: Future<Output = Result<T, mysql_async::Error>>,
    {
        match tokio::time::timeout(self.read_timeout, fut).await {
            Ok(result) => result.map_err(classify),
            Err(_) => Err(EndpointError::new(
                SqlErrorKind::Timeout,
                format!("no response within {:?}", self.read_timeout),
            )),
        }
    }

    async fn ping(&self) -> Result<(), EndpointError> {
        self.with_timeout(async {
            let mut conn = self.pool.get_conn().await?;
            conn.ping().await
        })
        .await
    }
}

#[async_trait]
impl Endpoint for MySqlEndpoint {
    fn name(&self) -> &str {
        &self.label
    }

    async fn execute(&self, statement: &Statement) -> Result<(), EndpointError> {
        // Text protocol only: a cached prepared statement re-executed across
        // the raced ALTER can fail with codes other than 1054/1364.
        let sql = statement.sql();
        self.with_timeout(async {
            let mut conn = self.pool.get_conn().await?;
            conn.query_drop(sql).await
        })
        .await
    }

    async fn query_scalar(&self, query: &ScalarQuery) -> Result<i64, EndpointError> {
        let sql = query.sql();
        let value = self
            .with_timeout(async {
                let mut conn = self.pool.get_conn().await?;
                conn.query_first::<i64, _>(sql.as_str()).await
            })
            .await?;
        value.ok_or_else(|| EndpointError::other(format!("no rows returned by `{sql}`")))
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            warn!(endpoint = %self.label, error = %e, "failed to disconnect pool");
        }
    }
}

/// Opens [`MySqlEndpoint`]s and pairs them with a [`ChecksumOracle`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

#[async_trait]
impl Connector for MySqlConnector {
    type Endpoint = MySqlEndpoint;

    async fn open(&self, config: &EndpointConfig) -> Result<Arc<MySqlEndpoint>, EndpointError> {
        let endpoint = MySqlEndpoint::new(config)?;
        endpoint.ping().await?;
        debug!(endpoint = %config.label, address = %config.address(), "connected");
        Ok(Arc::new(endpoint))
    }

    fn oracle(&self, a: &Arc<MySqlEndpoint>, b: &Arc<MySqlEndpoint>) -> Box<dyn Oracle> {
        Box::new(ChecksumOracle::new(Arc::clone(a), Arc::clone(b)))
    }
}

/// Equality by server-side table checksums.
///
/// Both schemas must hold the same set of base tables and every table must
/// report the same `CHECKSUM TABLE ... EXTENDED` value on both sides. The
/// checksum is computed by the servers; this type only compares the results.
pub struct ChecksumOracle {
    a: Arc<MySqlEndpoint>,
    b: Arc<MySqlEndpoint>,
}

impl ChecksumOracle {
    pub fn new(a: Arc<MySqlEndpoint>, b: Arc<MySqlEndpoint>) -> Self {
        Self { a, b }
    }
}

const LIST_TABLES: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name";

async fn table_checksums(
    endpoint: &MySqlEndpoint,
) -> Result<BTreeMap<String, Option<u64>>, OracleError> {
    let to_oracle = |source: EndpointError| OracleError::Endpoint {
        endpoint: endpoint.label.clone(),
        source,
    };
    endpoint
        .with_timeout(async {
            let mut conn = endpoint.pool.get_conn().await?;
            let tables: Vec<String> = conn.query(LIST_TABLES).await?;
            let mut sums = BTreeMap::new();
            for table in tables {
                let row: Option<(String, Option<u64>)> = conn
                    .query_first(format!("CHECKSUM TABLE `{table}` EXTENDED"))
                    .await?;
                sums.insert(table, row.and_then(|(_, sum)| sum));
            }
            Ok::<_, mysql_async::Error>(sums)
        })
        .await
        .map_err(to_oracle)
}

#[async_trait]
impl Oracle for ChecksumOracle {
    async fn equal(&self) -> Result<bool, OracleError> {
        let (a, b) = tokio::join!(table_checksums(&self.a), table_checksums(&self.b));
        let (a, b) = (a?, b?);
        if a != b {
            let differing: Vec<&String> = a
                .keys()
                .chain(b.keys())
                .filter(|t| a.get(*t) != b.get(*t))
                .collect();
            debug!(tables = ?differing, "checksums differ");
            return Ok(false);
        }
        Ok(true)
    }
}
