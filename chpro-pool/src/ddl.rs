//! Multi-host DDL orchestration
//!
//! Schema statements run on every live host, one transaction per host,
//! hosts in address order. The first failure rolls back that host's
//! transaction and aborts; hosts processed earlier keep their committed
//! work. Every failure is logged with a backtrace and returned as a
//! [`DdlError`], which callers treat as fatal.

use crate::connection::{Connection, Transaction};
use crate::pool::Pool;
use chpro_core::{
    create_table_sql, format_sql_template, sql_context, ClusterConfig, DdlError, HostAddress,
    SchemaError, TableDefinitions, DISTRIBUTED_TABLE_SUFFIX, INDEX_GRANULARITY,
};
use std::backtrace::Backtrace;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ============================================================================
// STATEMENT BUILDERS
// ============================================================================

/// Engine clause of the base table.
///
/// Replicated clusters get a ReplicatedMergeTree whose ZooKeeper path keeps
/// the `{layer}`, `{shard}` and `{replica}` server macros intact.
pub fn engine_clause(config: &ClusterConfig, table: &str, definitions: &TableDefinitions) -> Result<String, SchemaError> {
    let definition = definitions.get(table).ok_or_else(|| SchemaError::UnknownTable {
        table: table.to_string(),
    })?;
    let key = &definition.key_definition;
    let primary_key = key.primary_key();
    let full_name = config.full_table_name(table);

    let granularity = INDEX_GRANULARITY.to_string();
    let mut context = sql_context([
        ("zk_path", config.zookeeper_path.trim_end_matches('/')),
        ("db", config.database.as_str()),
        ("table", full_name.as_str()),
        ("date_field", key.date_field.as_str()),
        ("primary_key", primary_key.as_str()),
        ("granularity", granularity.as_str()),
    ]);

    if !config.use_replicated {
        return Ok(format_sql_template(
            "MergeTree({date_field}, ({primary_key}), {granularity})",
            &context,
        ));
    }

    let template = match key.sampling_key.as_deref() {
        Some(sampling) => {
            context.insert("sampling_key", sampling);
            "ReplicatedMergeTree('{zk_path}/tables/{layer}-{shard}/{db}/{table}', '{replica}', \
             {date_field}, {sampling_key}, ({primary_key}), {granularity})"
        }
        None => {
            "ReplicatedMergeTree('{zk_path}/tables/{layer}-{shard}/{db}/{table}', '{replica}', \
             {date_field}, ({primary_key}), {granularity})"
        }
    };
    Ok(format_sql_template(template, &context))
}

/// Engine clause of the Distributed facade over `full_name`.
pub fn distributed_engine_clause(config: &ClusterConfig, full_name: &str) -> String {
    format_sql_template(
        "Distributed({cluster}, {db}, {table}, rand())",
        &sql_context([
            ("cluster", config.cluster_name.as_str()),
            ("db", config.database.as_str()),
            ("table", full_name),
        ]),
    )
}

/// Ordered statements that (re)create one logical table.
pub fn table_statements(
    config: &ClusterConfig,
    table: &str,
    definitions: &TableDefinitions,
) -> Result<Vec<String>, DdlError> {
    let full_name = config.full_table_name(table);
    let distributed_name = distributed_table_name(config, table);
    let mut statements = Vec::new();

    if config.drop_table {
        statements.push(drop_table_sql(config, &full_name));
        if config.use_distributed {
            statements.push(drop_table_sql(config, &distributed_name));
        }
    }

    let engine = engine_clause(config, table, definitions)?;
    statements.push(create_table_sql(
        table,
        &config.table_prefix,
        &config.table_suffix,
        &engine,
        config,
        definitions,
    )?);

    if config.use_distributed {
        let engine = distributed_engine_clause(config, &full_name);
        statements.push(create_table_sql(
            table,
            &config.table_prefix,
            DISTRIBUTED_TABLE_SUFFIX,
            &engine,
            config,
            definitions,
        )?);
    }

    Ok(statements)
}

/// `<prefix><table>_distributed`, independent of the base table suffix.
pub fn distributed_table_name(config: &ClusterConfig, table: &str) -> String {
    format!("{}{}{}", config.table_prefix, table, DISTRIBUTED_TABLE_SUFFIX)
}

fn drop_table_sql(config: &ClusterConfig, full_name: &str) -> String {
    format_sql_template(
        "DROP TABLE IF EXISTS {db}.{table}",
        &sql_context([("db", config.database.as_str()), ("table", full_name)]),
    )
}

fn create_database_sql(config: &ClusterConfig) -> String {
    format_sql_template(
        "CREATE DATABASE IF NOT EXISTS {db}",
        &sql_context([("db", config.database.as_str())]),
    )
}

// ============================================================================
// ORCHESTRATION
// ============================================================================

/// Create the configured database on every live host.
pub async fn create_database(pool: &Pool, config: &ClusterConfig) -> Result<(), DdlError> {
    let statements = [create_database_sql(config)];
    let state = pool.lock().await;
    for (host, connection) in state.live() {
        apply_on_host(host, connection, &statements).await?;
    }
    info!(database = %config.database, hosts = state.live_count(), "Database ready");
    Ok(())
}

/// Create every table in `definitions` on every live host.
///
/// Tables are processed in name order. With `drop_table` set, existing
/// tables are dropped first.
pub async fn create_tables(
    pool: &Pool,
    config: &ClusterConfig,
    definitions: &TableDefinitions,
) -> Result<(), DdlError> {
    let state = pool.lock().await;
    for table in definitions.keys() {
        let statements = table_statements(config, table, definitions).map_err(|e| {
            report_failure(&e);
            e
        })?;
        for (host, connection) in state.live() {
            apply_on_host(host, connection, &statements).await?;
        }
        info!(
            table = %config.full_table_name(table),
            replicated = config.use_replicated,
            distributed = config.use_distributed,
            "Table ready"
        );
    }
    Ok(())
}

/// Drop one logical table, and its Distributed facade when enabled, on
/// every live host.
pub async fn drop_table(pool: &Pool, config: &ClusterConfig, table: &str) -> Result<(), DdlError> {
    let full_name = config.full_table_name(table);
    let mut statements = vec![drop_table_sql(config, &full_name)];
    if config.use_distributed {
        statements.push(drop_table_sql(config, &distributed_table_name(config, table)));
    }

    let state = pool.lock().await;
    for (host, connection) in state.live() {
        apply_on_host(host, connection, &statements).await?;
    }
    info!(table = %full_name, "Table dropped");
    Ok(())
}

/// Run `statements` in one transaction on one host.
async fn apply_on_host(
    host: &HostAddress,
    connection: &Arc<dyn Connection>,
    statements: &[String],
) -> Result<(), DdlError> {
    let mut tx = connection.begin().await.map_err(|source| {
        let err = DdlError::Begin {
            host: host.to_string(),
            source,
        };
        report_failure(&err);
        err
    })?;

    for statement in statements {
        debug!(host = %host, statement = %statement, "Executing DDL");
        if let Err(source) = tx.execute(statement).await {
            rollback(host, tx.as_mut()).await;
            let err = DdlError::Statement {
                host: host.to_string(),
                statement: statement.clone(),
                source,
            };
            report_failure(&err);
            return Err(err);
        }
    }

    if let Err(source) = tx.commit().await {
        rollback(host, tx.as_mut()).await;
        let err = DdlError::Commit {
            host: host.to_string(),
            source,
        };
        report_failure(&err);
        return Err(err);
    }

    Ok(())
}

async fn rollback(host: &HostAddress, tx: &mut dyn Transaction) {
    if let Err(e) = tx.rollback().await {
        warn!(host = %host, error = %e, "Rollback failed");
    }
}

fn report_failure(err: &DdlError) {
    let backtrace = Backtrace::force_capture();
    error!(error = %err, backtrace = %backtrace, "Schema operation failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chpro_core::{FieldTypes, KeyDefinition, TableDefinition};

    fn definitions(sampling: Option<&str>) -> TableDefinitions {
        let fields: FieldTypes = [("date", "Date"), ("id", "UInt64")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut defs = TableDefinitions::new();
        defs.insert(
            "hits".to_string(),
            TableDefinition {
                field_types: Some(fields),
                system_field_types: None,
                key_definition: KeyDefinition {
                    date_field: "date".to_string(),
                    sampling_key: sampling.map(str::to_string),
                    primary_key_fields: vec!["date".to_string(), "id".to_string()],
                },
            },
        );
        defs
    }

    fn config() -> ClusterConfig {
        ClusterConfig {
            database: "stats".to_string(),
            table_prefix: "ym_".to_string(),
            table_suffix: "_local".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_tree_engine() {
        let engine = engine_clause(&config(), "hits", &definitions(Some("intHash32(id)"))).unwrap();
        assert_eq!(engine, "MergeTree(date, (date, id), 8192)");
    }

    #[test]
    fn test_replicated_engine_keeps_server_macros() {
        let mut cfg = config();
        cfg.use_replicated = true;
        cfg.table_suffix = "_replicated".to_string();
        let engine = engine_clause(&cfg, "hits", &definitions(Some("intHash32(id)"))).unwrap();
        assert_eq!(
            engine,
            "ReplicatedMergeTree('/clickhouse/tables/{layer}-{shard}/stats/ym_hits_replicated', \
             '{replica}', date, intHash32(id), (date, id), 8192)"
        );
    }

    #[test]
    fn test_replicated_engine_without_sampling() {
        let mut cfg = config();
        cfg.use_replicated = true;
        cfg.zookeeper_path = "/ch/".to_string();
        let engine = engine_clause(&cfg, "hits", &definitions(None)).unwrap();
        assert_eq!(
            engine,
            "ReplicatedMergeTree('/ch/tables/{layer}-{shard}/stats/ym_hits_local', '{replica}', date, (date, id), 8192)"
        );
    }

    #[test]
    fn test_statements_local_only() {
        let statements = table_statements(&config(), "hits", &definitions(None)).unwrap();
        assert_eq!(
            statements,
            vec!["CREATE TABLE IF NOT EXISTS stats.ym_hits_local (date Date, id UInt64) \
                  ENGINE=MergeTree(date, (date, id), 8192)"
                .to_string()]
        );
    }

    #[test]
    fn test_statements_drop_and_distributed() {
        let mut cfg = config();
        cfg.drop_table = true;
        cfg.use_distributed = true;
        cfg.cluster_name = "metrika".to_string();
        let statements = table_statements(&cfg, "hits", &definitions(None)).unwrap();
        assert_eq!(statements.len(), 4);
        assert_eq!(statements[0], "DROP TABLE IF EXISTS stats.ym_hits_local");
        assert_eq!(statements[1], "DROP TABLE IF EXISTS stats.ym_hits_distributed");
        assert!(statements[2].starts_with("CREATE TABLE IF NOT EXISTS stats.ym_hits_local ("));
        assert_eq!(
            statements[3],
            "CREATE TABLE IF NOT EXISTS stats.ym_hits_distributed (date Date, id UInt64) \
             ENGINE=Distributed(metrika, stats, ym_hits_local, rand())"
        );
    }

    #[test]
    fn test_facade_name_ignores_base_suffix() {
        let mut cfg = config();
        cfg.use_replicated = true;
        cfg.use_distributed = true;
        cfg.table_suffix = "_replicated".to_string();
        cfg.cluster_name = "metrika".to_string();
        let statements = table_statements(&cfg, "hits", &definitions(Some("intHash32(id)"))).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS stats.ym_hits_distributed ("));
        assert!(statements[1].ends_with("ENGINE=Distributed(metrika, stats, ym_hits_replicated, rand())"));
        assert_eq!(distributed_table_name(&cfg, "hits"), "ym_hits_distributed");
    }

    #[test]
    fn test_unknown_table() {
        let err = table_statements(&config(), "visits", &definitions(None)).unwrap_err();
        assert!(matches!(err, DdlError::Schema(SchemaError::UnknownTable { .. })));
    }
}
