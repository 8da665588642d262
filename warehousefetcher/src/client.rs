use std::{collections::HashSet, path::Path};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Result, WarehouseFetcherError};
use crate::models::{CatalogSnapshot, ListPage, WarehouseDatabase, WarehouseSchema, WarehouseTable};
use crate::params::RestCatalogParams;

/// Read-only listing of a warehouse catalog, one level at a time.
#[async_trait]
pub trait WarehouseService: Send + Sync {
    async fn list_databases(&self) -> Result<Vec<WarehouseDatabase>>;

    async fn list_schemas(&self, database: &str) -> Result<Vec<WarehouseSchema>>;

    async fn list_tables(&self, database: &str, schema: &str) -> Result<Vec<WarehouseTable>>;
}

/// Serves a catalog listing captured earlier to a JSON file.
pub struct SnapshotFileService {
    snapshot: CatalogSnapshot,
}

impl SnapshotFileService {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                WarehouseFetcherError::NotFound(format!("snapshot file {}", path.display()))
            } else {
                WarehouseFetcherError::Io(err)
            }
        })?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&raw)?;
        log::info!(
            "Loaded catalog snapshot {} ({} database(s), {} schema(s), {} table(s))",
            path.display(),
            snapshot.databases.len(),
            snapshot.schemas.len(),
            snapshot.tables.len()
        );
        Ok(Self { snapshot })
    }

    pub fn snapshot(&self) -> &CatalogSnapshot {
        &self.snapshot
    }
}

#[async_trait]
impl WarehouseService for SnapshotFileService {
    async fn list_databases(&self) -> Result<Vec<WarehouseDatabase>> {
        Ok(self.snapshot.databases.clone())
    }

    async fn list_schemas(&self, database: &str) -> Result<Vec<WarehouseSchema>> {
        Ok(self
            .snapshot
            .schemas
            .iter()
            .filter(|schema| schema.database_name == database)
            .cloned()
            .collect())
    }

    async fn list_tables(&self, database: &str, schema: &str) -> Result<Vec<WarehouseTable>> {
        Ok(self
            .snapshot
            .tables
            .iter()
            .filter(|table| table.database_name == database && table.schema_name == schema)
            .cloned()
            .collect())
    }
}

/// Lists a catalog over a paginated REST API:
/// `GET {base}/databases`, `GET {base}/databases/{db}/schemas`,
/// `GET {base}/databases/{db}/schemas/{schema}/tables`.
pub struct RestCatalogService {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    page_size: usize,
}

impl RestCatalogService {
    pub fn new(params: &RestCatalogParams) -> Result<Self> {
        params.validate()?;
        let base_url = Url::parse(params.base_url.trim())?;
        if base_url.cannot_be_a_base() {
            return Err(WarehouseFetcherError::InvalidParam(format!(
                "base_url '{}' cannot carry path segments",
                params.base_url
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token: params.token.clone(),
            page_size: params.page_size,
        })
    }

    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                WarehouseFetcherError::Internal(format!("base URL {} is not a base", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn list_all<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();
        loop {
            let mut request = self
                .client
                .get(url.clone())
                .query(&[("page_size", self.page_size.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("page_token", token)]);
            }
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(WarehouseFetcherError::NotFound(url.to_string()));
            }
            if !status.is_success() {
                return Err(WarehouseFetcherError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let page: ListPage<T> = response.json().await?;
            items.extend(page.items);
            page_token = next_page_token(&mut seen_tokens, page.next_page_token, &url)?;
            if page_token.is_none() {
                break;
            }
        }
        Ok(items)
    }
}

/// A token the server already handed out would page forever.
fn next_page_token(
    seen: &mut HashSet<String>,
    next: Option<String>,
    url: &Url,
) -> Result<Option<String>> {
    match next {
        Some(token) if !token.is_empty() => {
            if !seen.insert(token.clone()) {
                return Err(WarehouseFetcherError::Internal(format!(
                    "{url} returned page token {token} twice"
                )));
            }
            Ok(Some(token))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl WarehouseService for RestCatalogService {
    async fn list_databases(&self) -> Result<Vec<WarehouseDatabase>> {
        self.list_all(self.endpoint(&["databases"])?).await
    }

    async fn list_schemas(&self, database: &str) -> Result<Vec<WarehouseSchema>> {
        self.list_all(self.endpoint(&["databases", database, "schemas"])?)
            .await
    }

    async fn list_tables(&self, database: &str, schema: &str) -> Result<Vec<WarehouseTable>> {
        self.list_all(self.endpoint(&["databases", database, "schemas", schema, "tables"])?)
            .await
    }
}
