//! CH.PRO schema bootstrap entry point
//!
//! Connects to every configured host, detects cluster capabilities, creates
//! the database and tables, then optionally uploads gzip files:
//!
//! ```text
//! chpro-schema [<table> <format> <file.gz>...]
//! ```
//!
//! Configuration comes from `CHPRO_CONFIG_FILE` (YAML) when set, otherwise
//! from `CHPRO_*` environment variables. Table definitions are read from
//! `CHPRO_TABLES_FILE`.

use std::process::ExitCode;

use chpro_core::{
    load_table_definitions, ChproError, ChproResult, ClusterConfig, SchemaError, TableDefinitions,
};
use chpro_pool::{
    create_database, create_tables, detect_allow_distributed, detect_allow_replicated,
    init_logging, BulkLoader, HttpConnector, LoggingConfig, Pool,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), "chpro-schema failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> ChproResult<ExitCode> {
    let loaded = load_config();
    init_logging(&logging_config(&loaded))?;
    let mut config = loaded?;
    tracing::debug!(config = ?config, "Configuration loaded");

    let definitions = match std::env::var("CHPRO_TABLES_FILE") {
        Ok(path) => load_table_definitions(path)?,
        Err(_) => TableDefinitions::new(),
    };
    let uploads: Vec<String> = std::env::args().skip(1).collect();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (pool, mut monitor) = Pool::init(&config, &HttpConnector::new(), shutdown_rx).await?;

    let work = async {
        bootstrap(&pool, &mut config, &definitions).await?;
        upload(&pool, &config, &definitions, &uploads).await
    };

    tokio::select! {
        result = work => result?,
        joined = &mut monitor => {
            return match joined {
                Ok(Ok(_)) => Ok(ExitCode::SUCCESS),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => {
                    tracing::error!(error = %e, "Health monitor task failed");
                    Ok(ExitCode::FAILURE)
                }
            };
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    match monitor.await {
        Ok(Ok(_)) => Ok(ExitCode::SUCCESS),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => {
            tracing::error!(error = %e, "Health monitor task failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn load_config() -> ChproResult<ClusterConfig> {
    let mut config = match std::env::var("CHPRO_CONFIG_FILE") {
        Ok(path) => ClusterConfig::from_yaml_file(path)?,
        Err(_) => ClusterConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

/// The cluster's debug flag raises log levels too; a config that failed to
/// load still gets logging from the environment so its error is reported.
fn logging_config(loaded: &ChproResult<ClusterConfig>) -> LoggingConfig {
    match loaded {
        Ok(config) => LoggingConfig::for_cluster(config),
        Err(_) => LoggingConfig::from_env(),
    }
}

async fn bootstrap(
    pool: &Pool,
    config: &mut ClusterConfig,
    definitions: &TableDefinitions,
) -> ChproResult<()> {
    detect_allow_replicated(pool, config).await;
    detect_allow_distributed(pool, config).await;

    create_database(pool, config).await?;
    create_tables(pool, config, definitions).await?;
    Ok(())
}

async fn upload(
    pool: &Pool,
    config: &ClusterConfig,
    definitions: &TableDefinitions,
    args: &[String],
) -> ChproResult<()> {
    let [table, format, files @ ..] = args else {
        return Ok(());
    };

    let definition = definitions.get(table).ok_or_else(|| SchemaError::UnknownTable {
        table: table.clone(),
    })?;
    let fields = definition.column_list();
    let loader = BulkLoader::new(config);

    for file in files {
        match loader
            .load_gzip_file_to_table(pool, config, file, table, format, &fields)
            .await
        {
            Ok(report) => {
                tracing::info!(
                    file = %file,
                    host = %report.host,
                    bytes = report.bytes,
                    removed = report.removed,
                    "Uploaded"
                );
            }
            Err(e) => {
                let e = ChproError::from(e);
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(file = %file, error = %e, "Skipping file");
            }
        }
    }
    Ok(())
}
