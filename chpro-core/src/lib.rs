//! CH.PRO Core - Cluster Configuration and Schema Types
//!
//! Pure configuration, schema and error types shared by the connection pool
//! and its tooling. No I/O beyond reading configuration files.

pub mod config;
pub mod constants;
pub mod error;
pub mod health;
pub mod schema;
pub mod sql;

pub use config::{parse_host_list, ClusterConfig, HostAddress};
pub use constants::*;
pub use error::{
    ChproError, ChproResult, ConfigError, ConnectionError, DdlError, LoadError, PoolError,
    PoolResult, SchemaError,
};
pub use health::{HealthCycleReport, HealthStatus, HostHealth};
pub use schema::{
    column_name, create_table_sql, load_table_definitions, parse_table_definitions, FieldTypes,
    KeyDefinition, TableDefinition, TableDefinitions,
};
pub use sql::{format_sql_template, sql_context};
