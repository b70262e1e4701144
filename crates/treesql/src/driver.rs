//! Connections to datasets and prepared statements on them.
//!
//! A [`Driver`] keeps a registry of open datasets. Connections to the same
//! dataset share one registry entry and one dataset handle, the handle is
//! released when the last connection to it closes.
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};
use treestore::{Dataset, DatasetOpener};

use crate::config::DriverConfig;
use crate::errors::{Result, TreeSqlError, internal};
use crate::parser::parse_single_statement;
use crate::planner::{QueryPlan, plan_statement};
use crate::rows::Rows;
use crate::value::Value;

/// Entry point for opening connections.
///
/// Cheap to clone, clones share the same registry.
#[derive(Debug, Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

#[derive(Debug)]
struct DriverInner {
    opener: Arc<dyn DatasetOpener>,
    config: DriverConfig,
    registry: Mutex<HashMap<String, RegistryEntry>>,
    next_statement_id: AtomicU64,
}

#[derive(Debug)]
struct RegistryEntry {
    dataset: Arc<dyn Dataset>,
    /// Whether the driver opened the dataset, and so has to close it.
    owned: bool,
    refs: usize,
    statements: HashMap<u64, Arc<StatementState>>,
}

#[derive(Debug)]
struct StatementState {
    id: u64,
    sql: String,
    plan: Arc<QueryPlan>,
    closed: AtomicBool,
}

impl Driver {
    pub fn new(opener: Arc<dyn DatasetOpener>) -> Self {
        Self::with_config(opener, DriverConfig::default())
    }

    /// Create a driver, validating the config.
    pub fn try_new(opener: Arc<dyn DatasetOpener>, config: DriverConfig) -> Result<Self> {
        config.sql_dialect()?;
        Ok(Self::with_config(opener, config))
    }

    fn with_config(opener: Arc<dyn DatasetOpener>, config: DriverConfig) -> Self {
        Driver {
            inner: Arc::new(DriverInner {
                opener,
                config,
                registry: Mutex::new(HashMap::new()),
                next_statement_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Open a connection to a dataset by name.
    ///
    /// If the dataset is already open through this driver, the connection
    /// shares the open handle.
    pub fn open(&self, name: &str) -> Result<Connection> {
        if let Some(dataset) = self.inner.acquire(name) {
            return Ok(Connection::new(self.inner.clone(), name, dataset));
        }

        // Opening may be slow, don't hold the registry lock for it.
        let dataset = self
            .inner
            .opener
            .open(name)
            .map_err(|source| TreeSqlError::Open {
                name: name.to_string(),
                source,
            })?;

        let mut registry = self.inner.registry.lock();
        match registry.entry(name.to_string()) {
            Entry::Occupied(mut ent) => {
                // Lost a race with another open of the same name.
                let shared = {
                    let ent = ent.get_mut();
                    ent.refs += 1;
                    ent.dataset.clone()
                };
                drop(ent);
                drop(registry);
                if let Err(e) = dataset.close() {
                    warn!(%e, name, "failed to close duplicate dataset handle");
                }
                Ok(Connection::new(self.inner.clone(), name, shared))
            }
            Entry::Vacant(ent) => {
                ent.insert(RegistryEntry {
                    dataset: dataset.clone(),
                    owned: true,
                    refs: 1,
                    statements: HashMap::new(),
                });
                debug!(name, "opened dataset");
                Ok(Connection::new(self.inner.clone(), name, dataset))
            }
        }
    }

    /// Open a connection to a dataset the caller already holds.
    ///
    /// The caller keeps ownership, closing connections never closes the
    /// dataset.
    pub fn adopt(&self, dataset: Arc<dyn Dataset>) -> Connection {
        let name = dataset.name().to_string();
        let mut registry = self.inner.registry.lock();
        let ent = registry.entry(name.clone()).or_insert_with(|| {
            debug!(%name, "adopted dataset");
            RegistryEntry {
                dataset,
                owned: false,
                refs: 0,
                statements: HashMap::new(),
            }
        });
        ent.refs += 1;
        let dataset = ent.dataset.clone();
        drop(registry);

        Connection::new(self.inner.clone(), &name, dataset)
    }

    /// Number of datasets currently registered.
    pub fn open_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Number of open connections to a registered dataset.
    pub fn ref_count(&self, name: &str) -> Option<usize> {
        self.inner.registry.lock().get(name).map(|ent| ent.refs)
    }
}

impl DriverInner {
    /// Take another reference to an already registered dataset.
    fn acquire(&self, name: &str) -> Option<Arc<dyn Dataset>> {
        let mut registry = self.registry.lock();
        let ent = registry.get_mut(name)?;
        ent.refs += 1;
        debug!(name, refs = ent.refs, "reusing open dataset");
        Some(ent.dataset.clone())
    }

    /// Drop a reference to a dataset, tearing down its entry once nothing
    /// references it.
    fn release(&self, name: &str) -> Result<()> {
        let ent = {
            let mut registry = self.registry.lock();
            let Some(ent) = registry.get_mut(name) else {
                return Err(internal!("dataset {name:?} is not registered"));
            };
            if ent.refs > 1 {
                ent.refs -= 1;
                return Ok(());
            }
            // Removed even if closing below fails.
            match registry.remove(name) {
                Some(ent) => ent,
                None => return Err(internal!("dataset {name:?} is not registered")),
            }
        };

        for stmt in ent.statements.values() {
            stmt.closed.store(true, Ordering::SeqCst);
        }
        debug!(
            name,
            owned = ent.owned,
            statements = ent.statements.len(),
            "releasing dataset"
        );

        if ent.owned {
            ent.dataset.close().map_err(|source| TreeSqlError::Close {
                name: name.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    fn register_statement(&self, name: &str, stmt: Arc<StatementState>) -> Result<()> {
        let mut registry = self.registry.lock();
        let ent = registry
            .get_mut(name)
            .ok_or_else(|| internal!("dataset {name:?} is not registered"))?;
        ent.statements.insert(stmt.id, stmt);
        Ok(())
    }

    fn unregister_statement(&self, name: &str, id: u64) {
        // The entry is gone if the connection was closed first.
        if let Some(ent) = self.registry.lock().get_mut(name) {
            ent.statements.remove(&id);
        }
    }
}

/// A connection to a single dataset.
///
/// Closed on drop.
#[derive(Debug)]
pub struct Connection {
    driver: Arc<DriverInner>,
    name: String,
    dataset: Arc<dyn Dataset>,
    closed: bool,
}

impl Connection {
    fn new(driver: Arc<DriverInner>, name: &str, dataset: Arc<dyn Dataset>) -> Self {
        Connection {
            driver,
            name: name.to_string(),
            dataset,
            closed: false,
        }
    }

    /// Name of the dataset this connection is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Parse and compile a statement.
    pub fn prepare(&self, sql: &str) -> Result<Statement> {
        self.check_open()?;

        let dialect = self.driver.config.sql_dialect()?;
        let stmt = parse_single_statement(dialect.as_ref(), sql)?;
        let plan = plan_statement(self.dataset.as_ref(), stmt)?;

        let state = Arc::new(StatementState {
            id: self.driver.next_statement_id.fetch_add(1, Ordering::Relaxed),
            sql: sql.to_string(),
            plan: Arc::new(plan),
            closed: AtomicBool::new(false),
        });
        self.driver.register_statement(&self.name, state.clone())?;

        Ok(Statement {
            driver: self.driver.clone(),
            name: self.name.clone(),
            state,
        })
    }

    /// Prepare and run a query in one step.
    pub fn query(&self, sql: &str, args: &[Value]) -> Result<Rows> {
        let mut stmt = self.prepare(sql)?;
        let rows = stmt.query(args);
        stmt.close()?;
        rows
    }

    /// Statements that modify the dataset aren't supported.
    ///
    /// The sql is still parsed, so syntax errors are reported as such.
    pub fn exec(&self, sql: &str, _args: &[Value]) -> Result<()> {
        self.check_open()?;
        let dialect = self.driver.config.sql_dialect()?;
        parse_single_statement(dialect.as_ref(), sql)?;
        Err(TreeSqlError::NotImplemented("exec"))
    }

    pub fn begin(&self) -> Result<()> {
        Err(TreeSqlError::NotImplemented("begin"))
    }

    pub fn commit(&self) -> Result<()> {
        Err(TreeSqlError::NotImplemented("commit"))
    }

    pub fn rollback(&self) -> Result<()> {
        Err(TreeSqlError::NotImplemented("rollback"))
    }

    /// Close the connection. Closing more than once is fine.
    ///
    /// Closing the last connection to a dataset closes all statements
    /// prepared on it, and closes the dataset if the driver opened it.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.driver.release(&self.name)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(TreeSqlError::Closed("connection"));
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(%e, name = %self.name, "failed to close connection");
        }
    }
}

/// A compiled query.
///
/// Closed on drop, or when the last connection to its dataset closes.
#[derive(Debug)]
pub struct Statement {
    driver: Arc<DriverInner>,
    name: String,
    state: Arc<StatementState>,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.state.sql
    }

    /// Names of the output columns.
    pub fn columns(&self) -> &[String] {
        &self.state.plan.columns
    }

    /// Number of bound arguments the statement expects.
    pub fn num_input(&self) -> usize {
        self.state.plan.num_inputs
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Run the query with the given bound arguments.
    pub fn query(&self, args: &[Value]) -> Result<Rows> {
        if self.is_closed() {
            return Err(TreeSqlError::Closed("statement"));
        }
        self.state.plan.execute(args)
    }

    pub fn exec(&self, _args: &[Value]) -> Result<()> {
        Err(TreeSqlError::NotImplemented("exec"))
    }

    /// Close the statement. Closing more than once is fine.
    pub fn close(&mut self) -> Result<()> {
        if !self.state.closed.swap(true, Ordering::SeqCst) {
            self.driver.unregister_statement(&self.name, self.state.id);
        }
        Ok(())
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(%e, sql = %self.state.sql, "failed to close statement");
        }
    }
}
