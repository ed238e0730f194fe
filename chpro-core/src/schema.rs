//! Table definitions and `CREATE TABLE` statement builder
//!
//! A table definition is the unit callers hand to the DDL orchestrator: its
//! columns, optional system columns and MergeTree key. Column order in the
//! emitted statement is always system fields first, then regular fields, each
//! group sorted by field name.

use crate::config::ClusterConfig;
use crate::error::{ConfigError, SchemaError};
use crate::sql::{format_sql_template, sql_context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Field name → ClickHouse type, sorted by field name.
pub type FieldTypes = BTreeMap<String, String>;

/// Logical table name → definition.
pub type TableDefinitions = BTreeMap<String, TableDefinition>;

/// MergeTree key of a table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyDefinition {
    /// Date column used for partitioning
    pub date_field: String,
    /// Sampling expression (replicated engine only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_key: Option<String>,
    pub primary_key_fields: Vec<String>,
}

impl KeyDefinition {
    /// Primary key columns joined for the engine clause.
    pub fn primary_key(&self) -> String {
        self.primary_key_fields.join(", ")
    }
}

/// Definition of one table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Regular columns. `raw:display` names emit `Display` as the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_types: Option<FieldTypes>,
    /// Columns emitted before the regular ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_field_types: Option<FieldTypes>,
    pub key_definition: KeyDefinition,
}

impl TableDefinition {
    /// Ordered `(column, type)` pairs as they appear in `CREATE TABLE`.
    pub fn columns(&self) -> Vec<(String, &str)> {
        self.system_field_types
            .iter()
            .chain(self.field_types.iter())
            .flat_map(|fields| fields.iter())
            .map(|(name, ty)| (column_name(name), ty.as_str()))
            .collect()
    }

    /// Comma-separated column names, suitable for an INSERT field list.
    pub fn column_list(&self) -> String {
        self.columns()
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Column identifier for a field name.
///
/// `raw:display` keeps the part after the last colon with its first
/// character upper-cased; other names are returned verbatim.
pub fn column_name(field: &str) -> String {
    match field.rfind(':') {
        Some(idx) => capitalize(&field[idx + 1..]),
        None => field.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Build `CREATE TABLE IF NOT EXISTS <db>.<prefix><name><suffix> (...) ENGINE=<engine>`.
pub fn create_table_sql(
    table_name: &str,
    prefix: &str,
    suffix: &str,
    engine: &str,
    config: &ClusterConfig,
    definitions: &TableDefinitions,
) -> Result<String, SchemaError> {
    let definition = definitions
        .get(table_name)
        .ok_or_else(|| SchemaError::UnknownTable {
            table: table_name.to_string(),
        })?;

    match &definition.field_types {
        Some(fields) if !fields.is_empty() => {}
        _ => {
            return Err(SchemaError::MissingFieldTypes {
                table: table_name.to_string(),
            })
        }
    }

    let full_name = format!("{}{}{}", prefix, table_name, suffix);
    let head = format_sql_template(
        "CREATE TABLE IF NOT EXISTS {db}.{table}",
        &sql_context([("db", config.database.as_str()), ("table", full_name.as_str())]),
    );

    let columns = definition
        .columns()
        .into_iter()
        .map(|(name, ty)| format!("{} {}", name, ty))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!("{} ({}) ENGINE={}", head, columns, engine))
}

/// Parse table definitions from YAML.
pub fn parse_table_definitions(yaml: &str) -> Result<TableDefinitions, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseFailed {
        source_name: "table definitions".to_string(),
        reason: e.to_string(),
    })
}

/// Load table definitions from a YAML file.
pub fn load_table_definitions(path: impl AsRef<Path>) -> Result<TableDefinitions, ConfigError> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_table_definitions(&yaml)
}
