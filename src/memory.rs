//! In-process endpoints for tests and dry runs.
//!
//! A [`MemoryServer`] holds one fixture table plus global variables and
//! applies [`Statement`]s with MySQL's observable semantics for the handful of
//! statements the harness issues: auto-increment ids honour increment/offset,
//! `replace` deletes then re-inserts, and the raced extra column produces
//! missing-default and unknown-column failures at the same moments a real
//! server would.
//!
//! [`MemoryConnector`] maps `host:port` to servers. Linking two addresses to
//! one server models replication that is always caught up.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::endpoint::{Connector, Endpoint, EndpointError, SqlErrorKind};
use crate::fixture::{
    AutoIncrementParams, ColumnSpec, ScalarQuery, Statement, StatementKind, SystemVariable,
};
use crate::oracle::{Oracle, OracleError};
use crate::settings::EndpointConfig;

const ER_NO_DEFAULT_FOR_FIELD: u16 = 1364;
const ER_BAD_FIELD_ERROR: u16 = 1054;
const ER_DUP_ENTRY: u16 = 1062;
const ER_NO_SUCH_TABLE: u16 = 1146;
const ER_TABLE_EXISTS_ERROR: u16 = 1050;
const ER_DUP_FIELDNAME: u16 = 1060;
const ER_CANT_DROP_FIELD_OR_KEY: u16 = 1091;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub uk: Option<i64>,
    pub v: Option<i64>,
    /// Value of the raced extra column, when the table has one.
    pub extra: Option<i64>,
}

/// Visible contents of the fixture table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    pub extra: Option<ColumnSpec>,
    /// Rows keyed by `id`.
    pub rows: BTreeMap<i64, Row>,
}

impl TableSnapshot {
    /// All non-null `uk` values, ascending.
    pub fn unique_keys(&self) -> Vec<i64> {
        let mut keys: Vec<i64> = self.rows.values().filter_map(|r| r.uk).collect();
        keys.sort_unstable();
        keys
    }
}

#[derive(Debug, Default)]
struct Table {
    snapshot: TableSnapshot,
    by_uk: HashMap<i64, i64>,
    last_id: i64,
}

impl Table {
    fn next_id(&mut self, p: AutoIncrementParams) -> i64 {
        let id = if self.last_id < p.offset {
            p.offset
        } else {
            p.offset + ((self.last_id - p.offset) / p.increment + 1) * p.increment
        };
        self.last_id = id;
        id
    }

    fn omitted_extra(&self) -> Result<Option<i64>, EndpointError> {
        match &self.snapshot.extra {
            None => Ok(None),
            Some(col) => match col.ty.default_value() {
                Some(v) => Ok(Some(v)),
                None => Err(EndpointError::new(
                    SqlErrorKind::MissingDefault,
                    format!("Field '{}' doesn't have a default value", col.name),
                )
                .with_code(ER_NO_DEFAULT_FOR_FIELD)),
            },
        }
    }

    fn require_column(&self, name: &str) -> Result<(), EndpointError> {
        match &self.snapshot.extra {
            Some(col) if col.name == name => Ok(()),
            _ => Err(EndpointError::new(
                SqlErrorKind::UnknownColumn,
                format!("Unknown column '{name}' in 'field list'"),
            )
            .with_code(ER_BAD_FIELD_ERROR)),
        }
    }

    fn insert(
        &mut self,
        params: AutoIncrementParams,
        uk: Option<i64>,
        v: i64,
        extra: Option<i64>,
    ) -> Result<(), EndpointError> {
        if let Some(uk) = uk {
            if self.by_uk.contains_key(&uk) {
                return Err(EndpointError::other(format!(
                    "Duplicate entry '{uk}' for key 'uk'"
                ))
                .with_code(ER_DUP_ENTRY));
            }
        }
        let id = self.next_id(params);
        if let Some(uk) = uk {
            self.by_uk.insert(uk, id);
        }
        self.snapshot.rows.insert(
            id,
            Row {
                uk,
                v: Some(v),
                extra,
            },
        );
        Ok(())
    }

    fn delete_uk(&mut self, uk: i64) {
        if let Some(id) = self.by_uk.remove(&uk) {
            self.snapshot.rows.remove(&id);
        }
    }
}

/// A fault that fails matching statements once `after` of them have run.
#[derive(Debug, Clone)]
struct Fault {
    kind: StatementKind,
    after: u64,
    seen: u64,
}

#[derive(Debug)]
struct ServerState {
    globals: AutoIncrementParams,
    table: Option<Table>,
    ignore_global_writes: bool,
    faults: Vec<Fault>,
}

pub struct MemoryServer {
    state: Mutex<ServerState>,
    statements: AtomicU64,
    connections: AtomicU64,
}

impl MemoryServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState {
                globals: AutoIncrementParams::new(1, 1),
                table: None,
                ignore_global_writes: false,
                faults: Vec::new(),
            }),
            statements: AtomicU64::new(0),
            connections: AtomicU64::new(0),
        })
    }

    pub fn globals(&self) -> AutoIncrementParams {
        self.state.lock().unwrap().globals
    }

    /// Accept `SET @@GLOBAL` without changing anything, like a server whose
    /// globals never propagate.
    pub fn ignore_global_writes(&self) {
        self.state.lock().unwrap().ignore_global_writes = true;
    }

    /// Fail every statement of `kind` after the first `after` succeed.
    pub fn fail_after(&self, kind: StatementKind, after: u64) {
        self.state.lock().unwrap().faults.push(Fault {
            kind,
            after,
            seen: 0,
        });
    }

    /// Statements applied (or rejected) so far.
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::SeqCst)
    }

    /// Endpoints opened against this server so far.
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<TableSnapshot> {
        let state = self.state.lock().unwrap();
        state.table.as_ref().map(|t| t.snapshot.clone())
    }

    fn apply(&self, statement: &Statement, session: AutoIncrementParams) -> Result<(), EndpointError> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        let kind = statement.kind();
        for fault in state.faults.iter_mut().filter(|f| f.kind == kind) {
            fault.seen += 1;
            if fault.seen > fault.after {
                return Err(EndpointError::other(format!(
                    "injected fault on {kind:?} statement"
                )));
            }
        }

        match statement {
            Statement::DropFixture => {
                state.table = None;
                Ok(())
            }
            Statement::CreateFixture => {
                if state.table.is_some() {
                    return Err(EndpointError::other("Table 'auto1' already exists")
                        .with_code(ER_TABLE_EXISTS_ERROR));
                }
                state.table = Some(Table::default());
                Ok(())
            }
            Statement::SetGlobal { variable, value } => {
                if !state.ignore_global_writes {
                    match variable {
                        SystemVariable::AutoIncrementIncrement => state.globals.increment = *value,
                        SystemVariable::AutoIncrementOffset => state.globals.offset = *value,
                    }
                }
                Ok(())
            }
            other => {
                let table = state.table.as_mut().ok_or_else(|| {
                    EndpointError::other("Table 'auto1' doesn't exist").with_code(ER_NO_SUCH_TABLE)
                })?;
                apply_to_table(table, other, session)
            }
        }
    }

    fn count(&self, query: &ScalarQuery) -> Result<i64, EndpointError> {
        let state = self.state.lock().unwrap();
        let table = state.table.as_ref().ok_or_else(|| {
            EndpointError::other("Table 'auto1' doesn't exist").with_code(ER_NO_SUCH_TABLE)
        })?;
        let rows = &table.snapshot.rows;
        let n = match query {
            ScalarQuery::CountOnStride(p) => rows
                .keys()
                .filter(|id| (**id - p.offset) % p.increment == 0)
                .count(),
            _ => rows.len(),
        };
        Ok(n as i64)
    }
}

fn apply_to_table(
    table: &mut Table,
    statement: &Statement,
    session: AutoIncrementParams,
) -> Result<(), EndpointError> {
    match statement {
        Statement::InsertKeyed { uk, v } => {
            let extra = table.omitted_extra()?;
            table.insert(session, Some(*uk), *v, extra)
        }
        Statement::Upsert { uk, v } => {
            let extra = table.omitted_extra()?;
            table.delete_uk(*uk);
            table.insert(session, Some(*uk), *v, extra)
        }
        Statement::UpdateValue { uk, v } => {
            if let Some(id) = table.by_uk.get(uk) {
                if let Some(row) = table.snapshot.rows.get_mut(id) {
                    row.v = Some(*v);
                }
            }
            Ok(())
        }
        Statement::DeleteKey { uk } => {
            table.delete_uk(*uk);
            Ok(())
        }
        Statement::InsertPayload { v } => {
            let extra = table.omitted_extra()?;
            table.insert(session, None, *v, extra)
        }
        Statement::InsertWithColumn { column, v, c } => {
            table.require_column(column)?;
            table.insert(session, None, *v, Some(*c))
        }
        Statement::AddColumn { column } => {
            if table.snapshot.extra.is_some() {
                return Err(EndpointError::other(format!(
                    "Duplicate column name '{}'",
                    column.name
                ))
                .with_code(ER_DUP_FIELDNAME));
            }
            // Existing rows take the default, or the type's zero value.
            let fill = column.ty.default_value().unwrap_or(0);
            for row in table.snapshot.rows.values_mut() {
                row.extra = Some(fill);
            }
            table.snapshot.extra = Some(column.clone());
            Ok(())
        }
        Statement::ModifyColumn { column } => {
            table.require_column(&column.name)?;
            table.snapshot.extra = Some(column.clone());
            Ok(())
        }
        Statement::DropColumn { column } => {
            if table.require_column(column).is_err() {
                return Err(EndpointError::other(format!(
                    "Can't DROP '{column}'; check that column/key exists"
                ))
                .with_code(ER_CANT_DROP_FIELD_OR_KEY));
            }
            for row in table.snapshot.rows.values_mut() {
                row.extra = None;
            }
            table.snapshot.extra = None;
            Ok(())
        }
        Statement::DropFixture | Statement::CreateFixture | Statement::SetGlobal { .. } => {
            unreachable!("handled at the server level")
        }
    }
}

/// One "pool" against a [`MemoryServer`]. Session variables are captured when
/// the endpoint is opened, like a connection reading globals at connect time.
pub struct MemoryEndpoint {
    label: String,
    server: Arc<MemoryServer>,
    session: AutoIncrementParams,
    closed: AtomicBool,
}

impl MemoryEndpoint {
    pub fn server(&self) -> &Arc<MemoryServer> {
        &self.server
    }

    pub fn session(&self) -> AutoIncrementParams {
        self.session
    }

    fn check_open(&self) -> Result<(), EndpointError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EndpointError::new(
                SqlErrorKind::Connection,
                format!("{} is closed", self.label),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn name(&self) -> &str {
        &self.label
    }

    async fn execute(&self, statement: &Statement) -> Result<(), EndpointError> {
        // Stand in for network I/O so busy writers never starve the runtime.
        tokio::task::yield_now().await;
        self.check_open()?;
        self.server.apply(statement, self.session)
    }

    async fn query_scalar(&self, query: &ScalarQuery) -> Result<i64, EndpointError> {
        tokio::task::yield_now().await;
        self.check_open()?;
        match query {
            ScalarQuery::Variable(var) => Ok(self.session.get(*var)),
            other => self.server.count(other),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Resolves endpoint addresses to in-process servers, creating them on first
/// use.
#[derive(Default)]
pub struct MemoryConnector {
    servers: Mutex<HashMap<String, Arc<MemoryServer>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server behind `address` (`host:port`).
    pub fn server(&self, address: &str) -> Arc<MemoryServer> {
        let mut servers = self.servers.lock().unwrap();
        Arc::clone(
            servers
                .entry(address.to_string())
                .or_insert_with(MemoryServer::new),
        )
    }

    /// Make `replica` resolve to the same server as `primary`.
    pub fn link(&self, primary: &str, replica: &str) -> Arc<MemoryServer> {
        let server = self.server(primary);
        self.servers
            .lock()
            .unwrap()
            .insert(replica.to_string(), Arc::clone(&server));
        server
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Endpoint = MemoryEndpoint;

    async fn open(&self, config: &EndpointConfig) -> Result<Arc<MemoryEndpoint>, EndpointError> {
        let server = self.server(&config.address());
        server.connections.fetch_add(1, Ordering::SeqCst);
        let session = config.session_params.unwrap_or_else(|| server.globals());
        Ok(Arc::new(MemoryEndpoint {
            label: config.label.clone(),
            server,
            session,
            closed: AtomicBool::new(false),
        }))
    }

    fn oracle(&self, a: &Arc<MemoryEndpoint>, b: &Arc<MemoryEndpoint>) -> Box<dyn Oracle> {
        Box::new(MemoryOracle {
            a: Arc::clone(a.server()),
            b: Arc::clone(b.server()),
        })
    }
}

/// Compares the fixture tables of two memory servers row by row.
pub struct MemoryOracle {
    a: Arc<MemoryServer>,
    b: Arc<MemoryServer>,
}

impl MemoryOracle {
    pub fn new(a: Arc<MemoryServer>, b: Arc<MemoryServer>) -> Self {
        Self { a, b }
    }
}

#[async_trait]
impl Oracle for MemoryOracle {
    async fn equal(&self) -> Result<bool, OracleError> {
        Ok(self.a.snapshot() == self.b.snapshot())
    }
}
