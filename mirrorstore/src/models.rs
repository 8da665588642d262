use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::MirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Inherited,
    Selected,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Inherited => "inherited",
            Permission::Selected => "selected",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inherited" => Ok(Permission::Inherited),
            "selected" => Ok(Permission::Selected),
            other => Err(MirrorError::InvalidArg(format!(
                "unknown permission '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Database,
    Schema,
    Table,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Database => "database",
            NodeKind::Schema => "schema",
            NodeKind::Table => "table",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Warehouse flavours the engine knows mime types for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    BigQuery,
    Snowflake,
}

impl Provider {
    pub fn mime_types(&self) -> MimeTypes {
        match self {
            Provider::BigQuery => BIGQUERY_MIME_TYPES,
            Provider::Snowflake => SNOWFLAKE_MIME_TYPES,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::BigQuery => "bigquery",
            Provider::Snowflake => "snowflake",
        }
    }
}

impl FromStr for Provider {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bigquery" => Ok(Provider::BigQuery),
            "snowflake" => Ok(Provider::Snowflake),
            other => Err(MirrorError::InvalidArg(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MimeTypes {
    pub database: &'static str,
    pub schema: &'static str,
    pub table: &'static str,
}

pub const BIGQUERY_MIME_TYPES: MimeTypes = MimeTypes {
    database: "application/vnd.warehouse.bigquery.database",
    schema: "application/vnd.warehouse.bigquery.schema",
    table: "application/vnd.warehouse.bigquery.table",
};

pub const SNOWFLAKE_MIME_TYPES: MimeTypes = MimeTypes {
    database: "application/vnd.warehouse.snowflake.database",
    schema: "application/vnd.warehouse.snowflake.schema",
    table: "application/vnd.warehouse.snowflake.table",
};

/// Identity of the connector a sync runs for. Every mirror query is scoped by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    pub provider: Provider,
    /// Reference to the credentials the indexer uses to query the remote tables.
    pub secret_ref: String,
}

impl Connector {
    pub fn new(id: impl Into<String>, provider: Provider, secret_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider,
            secret_ref: secret_ref.into(),
        }
    }
}

// --- Mirror Store records ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseNode {
    pub connector_id: String,
    pub internal_id: String,
    pub name: String,
    pub permission: Permission,
    pub created_at: i64, // Unix millis
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaNode {
    pub connector_id: String,
    pub internal_id: String,
    pub name: String,
    pub database_name: String,
    pub permission: Permission,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableNode {
    pub connector_id: String,
    pub internal_id: String,
    pub name: String,
    pub schema_name: String,
    pub database_name: String,
    pub permission: Permission,
    pub created_at: i64,
    pub last_upserted_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewDatabase {
    pub internal_id: String,
    pub name: String,
    pub permission: Permission,
}

#[derive(Debug, Clone)]
pub struct NewSchema {
    pub internal_id: String,
    pub name: String,
    pub database_name: String,
    pub permission: Permission,
}

#[derive(Debug, Clone)]
pub struct NewTable {
    pub internal_id: String,
    pub name: String,
    pub schema_name: String,
    pub database_name: String,
    pub permission: Permission,
}

// --- Remote catalog snapshot ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteTree {
    #[serde(default)]
    pub databases: Vec<RemoteDatabase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDatabase {
    pub name: String,
    #[serde(default)]
    pub schemas: Vec<RemoteSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSchema {
    pub name: String,
    pub database_name: String,
    #[serde(default)]
    pub tables: Vec<RemoteTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTable {
    pub name: String,
    pub database_name: String,
    pub schema_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl RemoteTree {
    pub fn table_count(&self) -> usize {
        self.databases
            .iter()
            .flat_map(|db| db.schemas.iter())
            .map(|schema| schema.tables.len())
            .sum()
    }
}

// --- Sync run log ---

#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub run_id: String,
    pub connector_id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub details: String, // JSON string
}
