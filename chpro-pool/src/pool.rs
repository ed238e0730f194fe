//! Multi-host connection pool
//!
//! Every configured host is in exactly one of two maps: `live` (answering
//! pings) or `dead`. Both maps sit behind one mutex. Health cycles ping
//! outside the lock and swap both maps in one step, so readers never see a
//! half-updated pool.

use crate::connection::{Connection, ConnectionOptions, Connector};
use crate::monitor::{health_monitor_task, HealthMonitorSnapshot};
use chpro_core::{ClusterConfig, HealthCycleReport, HostAddress, HostHealth, PoolError, PoolResult};
use futures_util::future::join_all;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type ConnectionMap = BTreeMap<HostAddress, Arc<dyn Connection>>;

/// Live/dead partition of the configured hosts.
#[derive(Default)]
pub struct PoolState {
    live: ConnectionMap,
    dead: ConnectionMap,
}

impl PoolState {
    /// Live connections in host order.
    pub fn live(&self) -> impl Iterator<Item = (&HostAddress, &Arc<dyn Connection>)> {
        self.live.iter()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }
}

/// Connection pool over all hosts of a cluster.
pub struct Pool {
    hosts: Vec<HostAddress>,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("hosts", &self.hosts).finish()
    }
}

impl Pool {
    /// Open and ping one connection per configured host.
    ///
    /// Every host must answer: a single failure aborts with
    /// [`PoolError::Dial`]. All hosts start in the live map.
    pub async fn connect(config: &ClusterConfig, connector: &dyn Connector) -> PoolResult<Self> {
        if config.hosts.is_empty() {
            return Err(PoolError::EmptyHostList);
        }

        let mut hosts: Vec<HostAddress> = Vec::with_capacity(config.hosts.len());
        let mut live = ConnectionMap::new();

        for index in 0..config.hosts.len() {
            let Some(options) = ConnectionOptions::for_host(config, index) else {
                continue;
            };
            let host = options.host.clone();
            if live.contains_key(&host) {
                warn!(host = %host, "Duplicate host in configuration, ignoring");
                continue;
            }

            debug!(host = %host, dsn = %options.connection_string(), "Connecting");
            let connection = connector
                .connect(options)
                .await
                .map_err(|source| PoolError::Dial {
                    host: host.to_string(),
                    source,
                })?;
            connection.ping().await.map_err(|source| PoolError::Dial {
                host: host.to_string(),
                source,
            })?;

            hosts.push(host.clone());
            live.insert(host, connection);
        }

        info!(hosts = hosts.len(), "Connection pool initialized");

        Ok(Self {
            hosts,
            state: Mutex::new(PoolState {
                live,
                dead: ConnectionMap::new(),
            }),
        })
    }

    /// Connect and start the background health monitor.
    ///
    /// The monitor stops when `shutdown_rx` flips to `true`, or resolves to
    /// `Err(PoolError::AllHostsDown)` when no host answers. Callers own the
    /// returned handle and decide how to terminate.
    pub async fn init(
        config: &ClusterConfig,
        connector: &dyn Connector,
        shutdown_rx: watch::Receiver<bool>,
    ) -> PoolResult<(Arc<Self>, JoinHandle<PoolResult<HealthMonitorSnapshot>>)> {
        let pool = Arc::new(Self::connect(config, connector).await?);
        let handle = tokio::spawn(health_monitor_task(
            Arc::clone(&pool),
            config.health_check_interval(),
            shutdown_rx,
        ));
        Ok((pool, handle))
    }

    /// Hosts the pool was built with, in configuration order.
    pub fn configured_hosts(&self) -> &[HostAddress] {
        &self.hosts
    }

    pub async fn live_hosts(&self) -> Vec<HostAddress> {
        self.state.lock().await.live.keys().cloned().collect()
    }

    pub async fn dead_hosts(&self) -> Vec<HostAddress> {
        self.state.lock().await.dead.keys().cloned().collect()
    }

    /// Uniformly random live connection.
    pub async fn random_connection(&self) -> PoolResult<Arc<dyn Connection>> {
        let state = self.state.lock().await;
        let connections: Vec<&Arc<dyn Connection>> = state.live.values().collect();
        if connections.is_empty() {
            return Err(PoolError::NoLiveHosts);
        }
        let idx = rand::rng().random_range(0..connections.len());
        Ok(Arc::clone(connections[idx]))
    }

    /// Uniformly random live host address.
    pub async fn random_host(&self) -> PoolResult<HostAddress> {
        let state = self.state.lock().await;
        let hosts: Vec<&HostAddress> = state.live.keys().collect();
        if hosts.is_empty() {
            return Err(PoolError::NoLiveHosts);
        }
        let idx = rand::rng().random_range(0..hosts.len());
        Ok(hosts[idx].clone())
    }

    /// Exclusive access to the live/dead maps.
    ///
    /// Held for the whole duration of capability probes and DDL so health
    /// cycles cannot reshuffle hosts underneath them.
    pub async fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().await
    }

    /// Run one health cycle.
    ///
    /// Pings every host concurrently without holding the lock, then commits
    /// the new partition atomically. If no host answers, nothing is
    /// committed and [`PoolError::AllHostsDown`] is returned.
    pub async fn check_health(&self) -> PoolResult<HealthCycleReport> {
        let snapshot: Vec<(HostAddress, Arc<dyn Connection>, bool)> = {
            let state = self.state.lock().await;
            state
                .live
                .iter()
                .map(|(h, c)| (h.clone(), Arc::clone(c), true))
                .chain(state.dead.iter().map(|(h, c)| (h.clone(), Arc::clone(c), false)))
                .collect()
        };

        let results = join_all(snapshot.iter().map(|(_, connection, _)| async move {
            let started = Instant::now();
            let result = connection.ping().await;
            (result, started.elapsed().as_millis() as i64)
        }))
        .await;

        let mut live = ConnectionMap::new();
        let mut dead = ConnectionMap::new();
        let mut report = HealthCycleReport {
            checks: Vec::with_capacity(snapshot.len()),
            went_down: Vec::new(),
            came_up: Vec::new(),
        };

        for ((host, connection, was_live), (result, elapsed_ms)) in snapshot.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    if !was_live {
                        info!(host = %host, "Host is back up");
                        report.came_up.push(host.clone());
                    }
                    report
                        .checks
                        .push(HostHealth::healthy(host.clone()).with_response_time(elapsed_ms));
                    live.insert(host, connection);
                }
                Err(e) => {
                    warn!(host = %host, error = %e, "Host is down");
                    if was_live {
                        report.went_down.push(host.clone());
                    }
                    report.checks.push(
                        HostHealth::unhealthy(host.clone(), e.to_string()).with_response_time(elapsed_ms),
                    );
                    dead.insert(host, connection);
                }
            }
        }

        if live.is_empty() {
            let hosts: Vec<String> = dead.keys().map(HostAddress::to_string).collect();
            error!(hosts = ?hosts, "All clickhouse hosts are down");
            return Err(PoolError::AllHostsDown { hosts });
        }

        {
            let mut state = self.state.lock().await;
            state.live = live;
            state.dead = dead;
        }

        debug!(
            live = report.live_count(),
            dead = report.dead_count(),
            "Health cycle complete"
        );
        Ok(report)
    }
}
