use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WarehouseFetcherError};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnapshotParams {
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RestCatalogParams {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    500
}

impl RestCatalogParams {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(WarehouseFetcherError::MissingField("base_url"));
        }
        if self.page_size == 0 {
            return Err(WarehouseFetcherError::InvalidParam(
                "page_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FetcherParams {
    Snapshot(SnapshotParams),
    RestCatalog(RestCatalogParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Snapshot,
    RestCatalog,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Snapshot => "snapshot",
            SourceKind::RestCatalog => "rest_catalog",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FetcherParams {
    pub fn source(&self) -> SourceKind {
        match self {
            FetcherParams::Snapshot(_) => SourceKind::Snapshot,
            FetcherParams::RestCatalog(_) => SourceKind::RestCatalog,
        }
    }

    /// Copy safe to log or persist: the catalog token is blanked.
    pub fn redacted(&self) -> Self {
        match self {
            FetcherParams::RestCatalog(params) => FetcherParams::RestCatalog(RestCatalogParams {
                token: params.token.as_ref().map(|_| "***".to_string()),
                ..params.clone()
            }),
            other => other.clone(),
        }
    }
}
