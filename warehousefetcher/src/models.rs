use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseDatabase {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSchema {
    pub name: String,
    pub database_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseTable {
    pub name: String,
    pub database_name: String,
    pub schema_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Flat listing of a warehouse catalog, as written by the capture tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub databases: Vec<WarehouseDatabase>,
    #[serde(default)]
    pub schemas: Vec<WarehouseSchema>,
    #[serde(default)]
    pub tables: Vec<WarehouseTable>,
}

/// One page of a REST catalog listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPage<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}
