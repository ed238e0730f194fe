//! Constants for CH.PRO cluster tooling
//!
//! Defaults mirror the stock ClickHouse server ports and the historical
//! command-line defaults of the tools built on this layer.

// ============================================================================
// CONNECTION
// ============================================================================

/// Native protocol port appended to bare host names
pub const DEFAULT_TCP_PORT: u16 = 9000;

/// HTTP interface port used for queries and bulk uploads
pub const DEFAULT_HTTP_PORT: u16 = 8123;

pub const DEFAULT_DATABASE: &str = "default";

pub const DEFAULT_USERNAME: &str = "default";

pub const DEFAULT_CLUSTER_NAME: &str = "default";

/// Maximum rows per block (server `max_block_size`)
pub const DEFAULT_BLOCK_SIZE: u64 = 100_000;

pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// HEALTH MONITOR
// ============================================================================

/// Interval between two health cycles (1 minute)
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

// ============================================================================
// SCHEMA
// ============================================================================

pub const DEFAULT_ZOOKEEPER_PATH: &str = "/clickhouse";

/// MergeTree index granularity
pub const INDEX_GRANULARITY: u32 = 8192;

/// Suffix used when every host has ZooKeeper configured
pub const REPLICATED_TABLE_SUFFIX: &str = "_replicated";

/// Suffix used when replication is unavailable
pub const LOCAL_TABLE_SUFFIX: &str = "_local";

/// Suffix of the Distributed facade table
pub const DISTRIBUTED_TABLE_SUFFIX: &str = "_distributed";
