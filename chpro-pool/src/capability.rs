//! Cluster capability detection
//!
//! Decides whether the cluster supports ReplicatedMergeTree (every live host
//! sees ZooKeeper) and Distributed tables (every live host knows the
//! configured cluster). Detection fails closed: a query error, an empty
//! result or an unexpected value on any host selects the fallback.

use crate::pool::{Pool, PoolState};
use chpro_core::{ClusterConfig, LOCAL_TABLE_SUFFIX, REPLICATED_TABLE_SUFFIX};
use tracing::{debug, info};

pub const REPLICATED_PROBE_SQL: &str =
    "SELECT name FROM system.tables WHERE database = 'system' AND name = 'zookeeper'";

pub const DISTRIBUTED_PROBE_SQL: &str =
    "SELECT cluster FROM system.clusters WHERE cluster = {cluster:String}";

/// Set `use_replicated` and `table_suffix` from what the live hosts report.
///
/// Returns the decision.
pub async fn detect_allow_replicated(pool: &Pool, config: &mut ClusterConfig) -> bool {
    let state = pool.lock().await;
    let allowed = match probe_all(&state, REPLICATED_PROBE_SQL, &[], "zookeeper").await {
        Ok(()) => true,
        Err((host, reason)) => {
            debug!(host = %host, reason = %reason, "ReplicatedMergeTree not available, using local tables");
            false
        }
    };
    drop(state);

    config.use_replicated = allowed;
    config.table_suffix = if allowed {
        REPLICATED_TABLE_SUFFIX
    } else {
        LOCAL_TABLE_SUFFIX
    }
    .to_string();

    info!(use_replicated = allowed, table_suffix = %config.table_suffix, "Replication capability detected");
    allowed
}

/// Set `use_distributed` from what the live hosts report.
///
/// An empty `cluster_name` disables Distributed tables without probing.
pub async fn detect_allow_distributed(pool: &Pool, config: &mut ClusterConfig) -> bool {
    let allowed = if config.cluster_name.is_empty() {
        debug!("No cluster name configured, Distributed tables disabled");
        false
    } else {
        let state = pool.lock().await;
        let params = [("cluster", config.cluster_name.as_str())];
        match probe_all(&state, DISTRIBUTED_PROBE_SQL, &params, &config.cluster_name).await {
            Ok(()) => true,
            Err((host, reason)) => {
                debug!(
                    host = %host,
                    cluster = %config.cluster_name,
                    reason = %reason,
                    "Cluster not known to every host, Distributed tables disabled"
                );
                false
            }
        }
    };

    config.use_distributed = allowed;
    info!(use_distributed = allowed, cluster = %config.cluster_name, "Distribution capability detected");
    allowed
}

/// Check that every live host returns at least one row and only rows whose
/// first column equals `expected`. Stops at the first disagreeing host.
async fn probe_all(
    state: &PoolState,
    sql: &str,
    params: &[(&str, &str)],
    expected: &str,
) -> Result<(), (String, String)> {
    if state.live_count() == 0 {
        return Err(("-".to_string(), "no live hosts".to_string()));
    }

    for (host, connection) in state.live() {
        let rows = connection
            .query(sql, params)
            .await
            .map_err(|e| (host.to_string(), e.to_string()))?;

        if rows.is_empty() {
            return Err((host.to_string(), "no matching rows".to_string()));
        }

        for row in &rows {
            match row.get_str(0) {
                Some(value) if value == expected => {}
                Some(value) => {
                    return Err((host.to_string(), format!("unexpected value {:?}", value)));
                }
                None => return Err((host.to_string(), "value is not a string".to_string())),
            }
        }
    }

    Ok(())
}
