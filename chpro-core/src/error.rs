//! Error types for CH.PRO cluster operations

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to parse {source_name}: {reason}")]
    ParseFailed { source_name: String, reason: String },
}

/// Errors raised by a single host connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Transport error talking to {host}: {reason}")]
    Transport { host: String, reason: String },

    #[error("Host {host} answered with status {status}: {body}")]
    Server {
        host: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {host}: {reason}")]
    Decode { host: String, reason: String },

    #[error("Transaction on {host} is already finished")]
    TransactionFinished { host: String },
}

impl ConnectionError {
    /// Host the error originated from.
    pub fn host(&self) -> &str {
        match self {
            ConnectionError::Transport { host, .. }
            | ConnectionError::Server { host, .. }
            | ConnectionError::Decode { host, .. }
            | ConnectionError::TransactionFinished { host } => host,
        }
    }
}

/// Connection pool errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Empty clickhouse.hosts in settings")]
    EmptyHostList,

    #[error("Failed to dial {host}: {source}")]
    Dial {
        host: String,
        #[source]
        source: ConnectionError,
    },

    #[error("All clickhouse hosts are down: {hosts:?}")]
    AllHostsDown { hosts: Vec<String> },

    #[error("No live hosts available in the pool")]
    NoLiveHosts,
}

/// Table schema builder errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Undefined table definition for {table}")]
    UnknownTable { table: String },

    #[error("Undefined field definition for {table}")]
    MissingFieldTypes { table: String },
}

/// Multi-host DDL errors.
///
/// Every variant names the host it failed on. Work committed on hosts
/// processed before that one is left in place.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DdlError {
    #[error("Failed to begin transaction on {host}: {source}")]
    Begin {
        host: String,
        #[source]
        source: ConnectionError,
    },

    #[error("Statement failed on {host}: {statement}: {source}")]
    Statement {
        host: String,
        statement: String,
        #[source]
        source: ConnectionError,
    },

    #[error("Failed to commit transaction on {host}: {source}")]
    Commit {
        host: String,
        #[source]
        source: ConnectionError,
    },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

/// Bulk loader errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("No host available for bulk load: {0}")]
    NoHost(#[from] PoolError),

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Upload to {host} failed before a response: {reason}")]
    Transport { host: String, reason: String },

    #[error("Upload to {host} rejected with status {status}: {body}")]
    Rejected {
        host: String,
        status: u16,
        body: String,
    },
}

/// Master error type for all CH.PRO errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChproError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("DDL error: {0}")]
    Ddl(#[from] DdlError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),
}

impl ChproError {
    /// Whether the error must terminate the process.
    ///
    /// Single ping failures never reach this type. A bulk upload that failed
    /// before the server answered, or a pool with no live host at selection
    /// time, is recoverable. Everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            ChproError::Load(LoadError::Rejected { .. }) => true,
            ChproError::Load(_) => false,
            ChproError::Pool(PoolError::NoLiveHosts) => false,
            ChproError::Connection(_) => false,
            _ => true,
        }
    }
}

/// Result type alias for CH.PRO operations.
pub type ChproResult<T> = Result<T, ChproError>;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

// =============================================================================
// TESTS
// =============================================================================
