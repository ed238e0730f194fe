//! Gzip bulk loader over the HTTP interface
//!
//! Streams a gzip-compressed file to a random live host as the body of an
//! `INSERT ... FORMAT <format>` request. The server decompresses it
//! (`Content-Encoding: gzip`). The source file is deleted once the server
//! accepts it.

use crate::pool::Pool;
use chpro_core::{format_sql_template, sql_context, ClusterConfig, HostAddress, LoadError};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Body, Client};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Outcome of an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// HTTP endpoint that accepted the data
    pub host: HostAddress,
    pub table: String,
    pub status: u16,
    /// Compressed size of the uploaded file
    pub bytes: u64,
    pub response: String,
    /// Whether the local file was deleted after the server accepted it
    pub removed: bool,
}

/// `INSERT INTO <db>.<prefix><table><suffix>(<fields>) FORMAT <format>`.
pub fn insert_statement(config: &ClusterConfig, table: &str, format: &str, fields: &str) -> String {
    let full_name = config.full_table_name(table);
    format_sql_template(
        "INSERT INTO {db}.{table}({fields}) FORMAT {format}",
        &sql_context([
            ("db", config.database.as_str()),
            ("table", full_name.as_str()),
            ("fields", fields),
            ("format", format),
        ]),
    )
}

/// Uploads gzip files into cluster tables.
#[derive(Debug, Clone)]
pub struct BulkLoader {
    client: Client,
}

impl BulkLoader {
    /// Loader with a connect timeout taken from `config`.
    ///
    /// Uploads themselves are not time-limited.
    pub fn new(config: &ClusterConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(config.write_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeouts, using defaults");
                Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Upload `gz_file` into `table` through a random live host.
    ///
    /// Local I/O and transport errors are returned as recoverable errors and
    /// leave the file in place. Once the server has accepted the data the
    /// upload succeeds even if the file cannot be deleted; see
    /// [`LoadReport::removed`]. A non-2xx answer is returned as
    /// [`LoadError::Rejected`], which is fatal to callers.
    pub async fn load_gzip_file_to_table(
        &self,
        pool: &Pool,
        config: &ClusterConfig,
        gz_file: impl AsRef<Path>,
        table: &str,
        format: &str,
        fields: &str,
    ) -> Result<LoadReport, LoadError> {
        let gz_file = gz_file.as_ref();
        let path = gz_file.display().to_string();

        let host = pool.random_host().await?.with_port(config.http_port);
        let query = insert_statement(config, table, format, fields);
        debug!(host = %host, file = %path, query = %query, "Uploading file");

        let file = tokio::fs::File::open(gz_file).await.map_err(|e| {
            error!(file = %path, error = %e, "Failed to open file for upload");
            LoadError::Io {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        let bytes = file.metadata().await.map(|m| m.len()).unwrap_or(0);

        let response = self
            .client
            .post(format!("http://{}/", host))
            .query(&[
                ("query", query.as_str()),
                ("user", config.username.as_str()),
                ("password", config.password.as_str()),
            ])
            .header(CONTENT_TYPE, "text/plain")
            .header(CONTENT_ENCODING, "gzip")
            .body(Body::from(file))
            .send()
            .await
            .map_err(|e| {
                error!(host = %host, file = %path, error = %e, "Upload failed");
                LoadError::Transport {
                    host: host.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!(host = %host, file = %path, error = %e, "Failed to read upload response");
            LoadError::Transport {
                host: host.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !status.is_success() {
            error!(
                host = %host,
                file = %path,
                status = status.as_u16(),
                response = %body,
                "Upload rejected"
            );
            return Err(LoadError::Rejected {
                host: host.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(host = %host, file = %path, response = %body, "Upload accepted");

        let removed = match tokio::fs::remove_file(gz_file).await {
            Ok(()) => true,
            Err(e) => {
                warn!(file = %path, error = %e, "Upload accepted but the file could not be removed, do not load it again");
                false
            }
        };

        info!(host = %host, table = %table, bytes, "File loaded");

        Ok(LoadReport {
            host,
            table: config.full_table_name(table),
            status: status.as_u16(),
            bytes,
            response: body,
            removed,
        })
    }
}
