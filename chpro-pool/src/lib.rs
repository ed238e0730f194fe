//! CH.PRO Pool - Multi-host ClickHouse Connection Pool
//!
//! Keeps one connection per cluster member, tracks which members answer
//! pings, and runs schema bootstrap and bulk loads against the live set:
//!
//! - [`pool`]: live/dead host maps, random selection, health cycles
//! - [`monitor`]: background health monitor task
//! - [`capability`]: replicated/distributed capability detection
//! - [`ddl`]: database and table creation on every live host
//! - [`loader`]: gzip file upload over the HTTP interface

pub mod capability;
pub mod connection;
pub mod ddl;
pub mod loader;
pub mod monitor;
pub mod pool;
pub mod telemetry;

// Re-export commonly used types
pub use capability::{detect_allow_distributed, detect_allow_replicated};
pub use connection::{
    Connection, ConnectionOptions, Connector, HttpConnection, HttpConnector, Row, Transaction,
};
pub use ddl::{
    create_database, create_tables, distributed_table_name, drop_table, engine_clause, table_statements,
};
pub use loader::{insert_statement, BulkLoader, LoadReport};
pub use monitor::{health_monitor_task, HealthMonitorMetrics, HealthMonitorSnapshot};
pub use pool::{Pool, PoolState};
pub use telemetry::{init_logging, LogFormat, LoggingConfig};
