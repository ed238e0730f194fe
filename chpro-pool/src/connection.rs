//! Per-host connections
//!
//! The pool talks to every cluster member through the [`Connection`] trait.
//! [`HttpConnection`] is the production implementation over the ClickHouse
//! HTTP interface; tests plug in mocks through the [`Connector`] seam.
//!
//! Statements fail over to the alternative hosts of a connection, in order,
//! when the primary refuses the TCP connection. Pings never fail over: a ping
//! reports the health of the primary host only.

use async_trait::async_trait;
use chpro_core::{ClusterConfig, ConnectionError, HostAddress};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// TRAITS
// ============================================================================

/// One open connection to a cluster member.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Primary host of this connection.
    fn host(&self) -> &HostAddress;

    /// Liveness check against the primary host.
    async fn ping(&self) -> Result<(), ConnectionError>;

    /// Run a read query. `params` are bound server side as `{name:Type}`.
    async fn query(&self, sql: &str, params: &[(&str, &str)]) -> Result<Vec<Row>, ConnectionError>;

    /// Run a statement that returns no rows.
    async fn execute(&self, sql: &str) -> Result<(), ConnectionError>;

    /// Open a transaction on this connection.
    async fn begin(&self) -> Result<Box<dyn Transaction>, ConnectionError>;
}

/// Transaction scope on one host.
///
/// Finishing a transaction twice returns
/// [`ConnectionError::TransactionFinished`].
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, sql: &str) -> Result<(), ConnectionError>;

    async fn commit(&mut self) -> Result<(), ConnectionError>;

    async fn rollback(&mut self) -> Result<(), ConnectionError>;
}

/// Factory for connections, one call per configured host.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: ConnectionOptions) -> Result<Arc<dyn Connection>, ConnectionError>;
}

// ============================================================================
// ROWS
// ============================================================================

/// One result row, values in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(Vec<serde_json::Value>);

impl Row {
    pub fn new(values: Vec<serde_json::Value>) -> Self {
        Self(values)
    }

    /// Row of string values.
    pub fn from_strings<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            values
                .into_iter()
                .map(|v| serde_json::Value::String(v.into()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&serde_json::Value> {
        self.0.get(idx)
    }

    /// Column `idx` as a string, `None` when absent or not a string.
    pub fn get_str(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).and_then(|v| v.as_str())
    }
}

// ============================================================================
// CONNECTION OPTIONS
// ============================================================================

/// Everything needed to open one connection.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub host: HostAddress,
    /// Tried in order when `host` refuses the connection
    pub alt_hosts: Vec<HostAddress>,
    pub http_port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub block_size: u64,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub debug: bool,
}

impl ConnectionOptions {
    /// Options for the `index`-th configured host.
    ///
    /// With more than one host, every other host becomes an alternative in
    /// configuration order.
    pub fn for_host(config: &ClusterConfig, index: usize) -> Option<Self> {
        let host = config.hosts.get(index)?.clone();
        let alt_hosts = if config.hosts.len() > 1 {
            config
                .hosts
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != index)
                .map(|(_, h)| h.clone())
                .collect()
        } else {
            Vec::new()
        };

        Some(Self {
            host,
            alt_hosts,
            http_port: config.http_port,
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            block_size: config.block_size,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            debug: config.debug,
        })
    }

    /// Connection string for logs. The password is never included.
    pub fn connection_string(&self) -> String {
        let mut dsn = format!(
            "tcp://{}?username={}&password=[REDACTED]&database={}&block_size={}&read_timeout={}&write_timeout={}&debug={}",
            self.host,
            self.username,
            self.database,
            self.block_size,
            self.read_timeout.as_secs(),
            self.write_timeout.as_secs(),
            self.debug,
        );
        if !self.alt_hosts.is_empty() {
            let alts: Vec<&str> = self.alt_hosts.iter().map(HostAddress::as_str).collect();
            dsn.push_str("&connection_open_strategy=in_order&alt_hosts=");
            dsn.push_str(&alts.join(","));
        }
        dsn
    }

    /// HTTP endpoints in failover order, primary first.
    pub fn endpoints(&self) -> Vec<HostAddress> {
        std::iter::once(&self.host)
            .chain(self.alt_hosts.iter())
            .map(|h| h.with_port(self.http_port))
            .collect()
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("dsn", &self.connection_string())
            .field("http_port", &self.http_port)
            .finish()
    }
}

// ============================================================================
// HTTP CONNECTION
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonCompactResponse {
    data: Vec<Vec<serde_json::Value>>,
}

/// Connection over the ClickHouse HTTP interface.
#[derive(Clone)]
pub struct HttpConnection {
    client: Client,
    options: Arc<ConnectionOptions>,
    endpoints: Arc<Vec<HostAddress>>,
}

impl fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("host", &self.options.host)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl HttpConnection {
    pub fn new(client: Client, options: ConnectionOptions) -> Self {
        let endpoints = options.endpoints();
        Self {
            client,
            options: Arc::new(options),
            endpoints: Arc::new(endpoints),
        }
    }

    fn primary_endpoint(&self) -> &HostAddress {
        // endpoints() always yields the primary first
        &self.endpoints[0]
    }

    /// Per-request URL settings.
    ///
    /// No `database` setting: the server rejects any request whose session
    /// database does not exist yet, including `CREATE DATABASE`. Statements
    /// qualify table names with the database instead.
    fn settings(&self) -> Vec<(String, String)> {
        vec![
            ("user".to_string(), self.options.username.clone()),
            ("password".to_string(), self.options.password.clone()),
            ("max_block_size".to_string(), self.options.block_size.to_string()),
        ]
    }

    /// POST `sql` to the first endpoint that accepts the connection.
    async fn post(&self, sql: &str, params: &[(&str, &str)]) -> Result<String, ConnectionError> {
        let mut query = self.settings();
        query.extend(
            params
                .iter()
                .map(|(name, value)| (format!("param_{}", name), value.to_string())),
        );

        let mut last_error = None;
        for endpoint in self.endpoints.iter() {
            let response = self
                .client
                .post(format!("http://{}/", endpoint))
                .query(&query)
                .body(sql.to_string())
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) if e.is_connect() => {
                    warn!(host = %endpoint, error = %e, "Connection refused, trying next host");
                    last_error = Some(ConnectionError::Transport {
                        host: endpoint.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => {
                    return Err(ConnectionError::Transport {
                        host: endpoint.to_string(),
                        reason: e.to_string(),
                    })
                }
            };

            let status = response.status();
            let body = response.text().await.map_err(|e| ConnectionError::Transport {
                host: endpoint.to_string(),
                reason: e.to_string(),
            })?;

            if !status.is_success() {
                return Err(ConnectionError::Server {
                    host: endpoint.to_string(),
                    status: status.as_u16(),
                    body: body.trim().to_string(),
                });
            }
            return Ok(body);
        }

        Err(last_error.unwrap_or_else(|| ConnectionError::Transport {
            host: self.options.host.to_string(),
            reason: "no endpoints configured".to_string(),
        }))
    }
}

#[async_trait]
impl Connection for HttpConnection {
    fn host(&self) -> &HostAddress {
        &self.options.host
    }

    async fn ping(&self) -> Result<(), ConnectionError> {
        let endpoint = self.primary_endpoint();
        let response = self
            .client
            .get(format!("http://{}/ping", endpoint))
            .send()
            .await
            .map_err(|e| ConnectionError::Transport {
                host: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ConnectionError::Server {
                host: endpoint.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn query(&self, sql: &str, params: &[(&str, &str)]) -> Result<Vec<Row>, ConnectionError> {
        let sql = format!("{} FORMAT JSONCompact", sql.trim_end().trim_end_matches(';'));
        let body = self.post(&sql, params).await?;
        let parsed: JsonCompactResponse =
            serde_json::from_str(&body).map_err(|e| ConnectionError::Decode {
                host: self.options.host.to_string(),
                reason: e.to_string(),
            })?;
        Ok(parsed.data.into_iter().map(Row::new).collect())
    }

    async fn execute(&self, sql: &str) -> Result<(), ConnectionError> {
        if self.options.debug {
            debug!(host = %self.options.host, statement = %sql, "Executing statement");
        }
        self.post(sql, &[]).await.map(|_| ())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, ConnectionError> {
        Ok(Box::new(HttpTransaction {
            connection: self.clone(),
            applied: 0,
            finished: false,
        }))
    }
}

/// Transaction scope over [`HttpConnection`].
///
/// ClickHouse applies DDL immediately, so statements run as they are
/// issued. Commit and rollback close the scope; rollback cannot undo
/// statements that already ran and logs how many there were.
pub struct HttpTransaction {
    connection: HttpConnection,
    applied: usize,
    finished: bool,
}

impl HttpTransaction {
    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if self.finished {
            Err(ConnectionError::TransactionFinished {
                host: self.connection.options.host.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transaction for HttpTransaction {
    async fn execute(&mut self, sql: &str) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.connection.execute(sql).await?;
        self.applied += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.finished = true;
        debug!(host = %self.connection.options.host, statements = self.applied, "Transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        self.finished = true;
        if self.applied > 0 {
            warn!(
                host = %self.connection.options.host,
                statements = self.applied,
                "Rolled back transaction; statements already applied by the server are kept"
            );
        }
        Ok(())
    }
}

/// [`Connector`] producing [`HttpConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector;

impl HttpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, options: ConnectionOptions) -> Result<Arc<dyn Connection>, ConnectionError> {
        let client = Client::builder()
            .connect_timeout(options.write_timeout)
            .timeout(options.read_timeout)
            .build()
            .map_err(|e| ConnectionError::Transport {
                host: options.host.to_string(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Arc::new(HttpConnection::new(client, options)))
    }
}
