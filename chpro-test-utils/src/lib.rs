//! CH.PRO Test Utilities
//!
//! Centralized test infrastructure for the CH.PRO workspace:
//! - Mock cluster hosts implementing the connection traits
//! - Proptest generators for table definitions
//! - Test fixtures for common scenarios
//! - Custom assertions for pool state

pub use chpro_core::{ClusterConfig, HostAddress, TableDefinitions};
pub use chpro_pool::{Connection, ConnectionOptions, Connector, Pool, Row, Transaction};

use async_trait::async_trait;
use chpro_core::{ConnectionError, DEFAULT_TCP_PORT};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// MOCK HOSTS
// ============================================================================

/// Transaction lifecycle event recorded by a mock host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug)]
struct HostState {
    up: AtomicBool,
    refuse_connect: AtomicBool,
    zookeeper: AtomicBool,
    fail_queries: AtomicBool,
    fail_commit: AtomicBool,
    pings: AtomicU64,
    clusters: Mutex<BTreeSet<String>>,
    failing_statements: Mutex<Vec<String>>,
    query_rows: Mutex<Vec<(String, Vec<Row>)>>,
    executed: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    events: Mutex<Vec<TxEvent>>,
    databases: Mutex<BTreeSet<String>>,
    tables: Mutex<BTreeSet<String>>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            up: AtomicBool::new(true),
            refuse_connect: AtomicBool::new(false),
            zookeeper: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            pings: AtomicU64::new(0),
            clusters: Mutex::new(BTreeSet::new()),
            failing_statements: Mutex::new(Vec::new()),
            query_rows: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            databases: Mutex::new(BTreeSet::new()),
            tables: Mutex::new(BTreeSet::new()),
        }
    }
}

impl HostState {
    fn check_up(&self, host: &HostAddress) -> Result<(), ConnectionError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::Transport {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn run_statement(&self, host: &HostAddress, sql: &str) -> Result<(), ConnectionError> {
        self.check_up(host)?;
        if lock(&self.failing_statements)
            .iter()
            .any(|pattern| sql.contains(pattern.as_str()))
        {
            return Err(ConnectionError::Server {
                host: host.to_string(),
                status: 500,
                body: "Code: 999. DB::Exception: injected failure".to_string(),
            });
        }

        lock(&self.executed).push(sql.to_string());

        let tokens: Vec<&str> = sql.split_whitespace().collect();
        match tokens.as_slice() {
            ["CREATE", "DATABASE", "IF", "NOT", "EXISTS", name, ..] => {
                lock(&self.databases).insert(name.to_string());
            }
            ["CREATE", "TABLE", "IF", "NOT", "EXISTS", name, ..] => {
                lock(&self.tables).insert(name.to_string());
            }
            ["CREATE", "TABLE", name, ..] => {
                if !lock(&self.tables).insert(name.to_string()) {
                    return Err(ConnectionError::Server {
                        host: host.to_string(),
                        status: 500,
                        body: format!("Code: 57. DB::Exception: Table {} already exists", name),
                    });
                }
            }
            ["DROP", "TABLE", "IF", "EXISTS", name, ..] => {
                lock(&self.tables).remove(*name);
            }
            _ => {}
        }
        Ok(())
    }

    fn run_query(
        &self,
        host: &HostAddress,
        sql: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<Row>, ConnectionError> {
        self.check_up(host)?;
        lock(&self.queries).push(sql.to_string());
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(ConnectionError::Server {
                host: host.to_string(),
                status: 500,
                body: "Code: 999. DB::Exception: query failed".to_string(),
            });
        }

        if let Some((_, rows)) = lock(&self.query_rows)
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Ok(rows.clone());
        }

        if sql.contains("system.tables") {
            if self.zookeeper.load(Ordering::SeqCst) {
                return Ok(vec![Row::from_strings(["zookeeper"])]);
            }
            return Ok(Vec::new());
        }

        if sql.contains("system.clusters") {
            let cluster = params
                .iter()
                .find(|(name, _)| *name == "cluster")
                .map(|(_, value)| *value)
                .unwrap_or_default();
            if lock(&self.clusters).contains(cluster) {
                return Ok(vec![Row::from_strings([cluster])]);
            }
            return Ok(Vec::new());
        }

        Ok(Vec::new())
    }
}

/// Handle on one simulated cluster member.
///
/// Clones share state, so a test can keep a handle while the pool owns the
/// connection.
#[derive(Debug, Clone)]
pub struct MockHost {
    address: HostAddress,
    state: Arc<HostState>,
}

impl MockHost {
    fn new(address: HostAddress) -> Self {
        Self {
            address,
            state: Arc::new(HostState::default()),
        }
    }

    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    /// Make pings and statements fail.
    pub fn kill(&self) {
        self.state.up.store(false, Ordering::SeqCst);
    }

    pub fn revive(&self) {
        self.state.up.store(true, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.state.up.load(Ordering::SeqCst)
    }

    /// Refuse new connections from the connector.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Whether `system.tables` lists ZooKeeper.
    pub fn set_zookeeper(&self, present: bool) {
        self.state.zookeeper.store(present, Ordering::SeqCst);
    }

    /// Add a cluster to `system.clusters`.
    pub fn add_cluster(&self, name: &str) {
        lock(&self.state.clusters).insert(name.to_string());
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_statements_containing(&self, pattern: &str) {
        lock(&self.state.failing_statements).push(pattern.to_string());
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.state.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Answer queries containing `pattern` with `rows`.
    pub fn set_query_rows(&self, pattern: &str, rows: Vec<Row>) {
        lock(&self.state.query_rows).push((pattern.to_string(), rows));
    }

    /// Statements applied so far, in order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state.executed).clone()
    }

    /// Read queries received so far, in order.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.state.queries).clone()
    }

    pub fn events(&self) -> Vec<TxEvent> {
        lock(&self.state.events).clone()
    }

    pub fn databases(&self) -> BTreeSet<String> {
        lock(&self.state.databases).clone()
    }

    /// Existing tables as `db.table`.
    pub fn tables(&self) -> BTreeSet<String> {
        lock(&self.state.tables).clone()
    }

    pub fn ping_count(&self) -> u64 {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Forget recorded statements, queries and events.
    pub fn clear_log(&self) {
        lock(&self.state.executed).clear();
        lock(&self.state.queries).clear();
        lock(&self.state.events).clear();
    }
}

/// Connection to a [`MockHost`].
#[derive(Debug)]
pub struct MockConnection {
    host: MockHost,
}

#[async_trait]
impl Connection for MockConnection {
    fn host(&self) -> &HostAddress {
        &self.host.address
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        self.host.state.pings.fetch_add(1, Ordering::SeqCst);
        self.host.state.check_up(&self.host.address)
    }

    async fn query(&self, sql: &str, params: &[(&str, &str)]) -> Result<Vec<Row>, ConnectionError> {
        self.host.state.run_query(&self.host.address, sql, params)
    }

    async fn execute(&self, sql: &str) -> Result<(), ConnectionError> {
        self.host.state.run_statement(&self.host.address, sql)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, ConnectionError> {
        self.host.state.check_up(&self.host.address)?;
        lock(&self.host.state.events).push(TxEvent::Begin);
        Ok(Box::new(MockTransaction {
            host: self.host.clone(),
            finished: false,
        }))
    }
}

/// Transaction on a [`MockHost`]. Statements apply immediately.
#[derive(Debug)]
pub struct MockTransaction {
    host: MockHost,
    finished: bool,
}

impl MockTransaction {
    fn finish(&mut self, event: TxEvent) -> Result<(), ConnectionError> {
        if self.finished {
            return Err(ConnectionError::TransactionFinished {
                host: self.host.address.to_string(),
            });
        }
        self.finished = true;
        lock(&self.host.state.events).push(event);
        Ok(())
    }
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn execute(&mut self, sql: &str) -> Result<(), ConnectionError> {
        if self.finished {
            return Err(ConnectionError::TransactionFinished {
                host: self.host.address.to_string(),
            });
        }
        self.host.state.run_statement(&self.host.address, sql)
    }

    async fn commit(&mut self) -> Result<(), ConnectionError> {
        if self.host.state.fail_commit.load(Ordering::SeqCst) {
            return Err(ConnectionError::Server {
                host: self.host.address.to_string(),
                status: 500,
                body: "Code: 999. DB::Exception: commit failed".to_string(),
            });
        }
        self.finish(TxEvent::Commit)
    }

    async fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.finish(TxEvent::Rollback)
    }
}

/// Simulated cluster; hands out [`MockConnection`]s as a [`Connector`].
#[derive(Debug, Default)]
pub struct MockCluster {
    hosts: Mutex<BTreeMap<HostAddress, MockHost>>,
    opened: Mutex<Vec<ConnectionOptions>>,
}

impl MockCluster {
    /// Cluster with the given members, all up.
    pub fn new(hosts: &[&str]) -> Self {
        let cluster = Self::default();
        for host in hosts {
            cluster.host(host);
        }
        cluster
    }

    /// Handle on a member, created (up) on first use.
    pub fn host(&self, raw: &str) -> MockHost {
        let address = HostAddress::new(raw, DEFAULT_TCP_PORT);
        lock(&self.hosts)
            .entry(address.clone())
            .or_insert_with(|| MockHost::new(address))
            .clone()
    }

    /// Member addresses in order.
    pub fn addresses(&self) -> Vec<HostAddress> {
        lock(&self.hosts).keys().cloned().collect()
    }

    /// Configuration pointing at every member.
    pub fn config(&self) -> ClusterConfig {
        fixtures::cluster_config(&self.addresses())
    }

    /// Options passed to every successful `connect` call.
    pub fn opened(&self) -> Vec<ConnectionOptions> {
        lock(&self.opened).clone()
    }
}

#[async_trait]
impl Connector for MockCluster {
    async fn connect(&self, options: ConnectionOptions) -> Result<Arc<dyn Connection>, ConnectionError> {
        let host = self.host(options.host.as_str());
        if host.state.refuse_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport {
                host: options.host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        lock(&self.opened).push(options);
        Ok(Arc::new(MockConnection { host }))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest generators for table definitions.

    use chpro_core::{FieldTypes, KeyDefinition, TableDefinition, TableDefinitions};
    use proptest::prelude::*;

    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    /// Field name, optionally in `raw:display` form.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        prop_oneof![
            arb_identifier(),
            (arb_identifier(), arb_identifier()).prop_map(|(raw, display)| format!("{}:{}", raw, display)),
        ]
    }

    pub fn arb_column_type() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["UInt8", "UInt32", "UInt64", "Int64", "Float64", "String", "Date", "DateTime"])
            .prop_map(str::to_string)
    }

    pub fn arb_field_types(max: usize) -> impl Strategy<Value = FieldTypes> {
        prop::collection::btree_map(arb_field_name(), arb_column_type(), 1..=max)
    }

    pub fn arb_table_definition() -> impl Strategy<Value = TableDefinition> {
        (
            arb_field_types(8),
            prop::option::of(arb_field_types(3)),
            arb_identifier(),
            prop::option::of(arb_identifier()),
            prop::collection::vec(arb_identifier(), 1..4),
        )
            .prop_map(|(fields, system, date_field, sampling, pk)| TableDefinition {
                field_types: Some(fields),
                system_field_types: system,
                key_definition: KeyDefinition {
                    date_field,
                    sampling_key: sampling.map(|s| format!("intHash32({})", s)),
                    primary_key_fields: pk,
                },
            })
    }

    pub fn arb_table_definitions() -> impl Strategy<Value = TableDefinitions> {
        prop::collection::btree_map(arb_identifier(), arb_table_definition(), 1..4)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and table definitions.

    use chpro_core::{
        ClusterConfig, FieldTypes, HostAddress, KeyDefinition, TableDefinition, TableDefinitions,
    };

    /// Configuration for `hosts` with a one-second health interval.
    pub fn cluster_config(hosts: &[HostAddress]) -> ClusterConfig {
        ClusterConfig {
            hosts: hosts.to_vec(),
            database: "stats".to_string(),
            username: "loader".to_string(),
            password: "s3cret".to_string(),
            table_prefix: "ym_".to_string(),
            health_check_interval_secs: 1,
            ..Default::default()
        }
    }

    fn fields(pairs: &[(&str, &str)]) -> FieldTypes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// `hits` and `visits` tables.
    pub fn web_analytics_definitions() -> TableDefinitions {
        let mut defs = TableDefinitions::new();
        defs.insert(
            "hits".to_string(),
            TableDefinition {
                field_types: Some(fields(&[
                    ("ym:pv:watchID", "UInt64"),
                    ("ym:pv:date", "Date"),
                    ("ym:pv:URL", "String"),
                ])),
                system_field_types: Some(fields(&[("counter_id", "UInt32")])),
                key_definition: KeyDefinition {
                    date_field: "Date".to_string(),
                    sampling_key: Some("intHash32(WatchID)".to_string()),
                    primary_key_fields: vec!["counter_id".to_string(), "Date".to_string()],
                },
            },
        );
        defs.insert(
            "visits".to_string(),
            TableDefinition {
                field_types: Some(fields(&[("ym:s:visitID", "UInt64"), ("ym:s:date", "Date")])),
                system_field_types: None,
                key_definition: KeyDefinition {
                    date_field: "Date".to_string(),
                    sampling_key: None,
                    primary_key_fields: vec!["Date".to_string(), "VisitID".to_string()],
                },
            },
        );
        defs
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on pool state.

    use chpro_pool::Pool;

    /// Assert the exact live and dead host sets, as `host:port` strings.
    #[track_caller]
    pub fn assert_partition_eq(live: &[String], dead: &[String], expected_live: &[&str], expected_dead: &[&str]) {
        let mut expected_live: Vec<&str> = expected_live.to_vec();
        let mut expected_dead: Vec<&str> = expected_dead.to_vec();
        expected_live.sort();
        expected_dead.sort();
        assert_eq!(live, expected_live.as_slice(), "live hosts");
        assert_eq!(dead, expected_dead.as_slice(), "dead hosts");
    }

    /// Live and dead hosts of `pool` as sorted strings.
    pub async fn partition(pool: &Pool) -> (Vec<String>, Vec<String>) {
        let live = pool.live_hosts().await.iter().map(|h| h.to_string()).collect();
        let dead = pool.dead_hosts().await.iter().map(|h| h.to_string()).collect();
        (live, dead)
    }

    /// Every configured host is in exactly one of the two maps.
    pub async fn assert_partition_complete(pool: &Pool) {
        let (live, dead) = partition(pool).await;
        let mut all: Vec<String> = live.iter().chain(dead.iter()).cloned().collect();
        all.sort();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len(), "host present in both maps");

        let mut configured: Vec<String> = pool.configured_hosts().iter().map(|h| h.to_string()).collect();
        configured.sort();
        assert_eq!(all, configured, "live ∪ dead differs from configured hosts");
    }
}
