use std::sync::Arc;

use async_trait::async_trait;
use mirrorstore::{
    errors::{MirrorError, Result as MirrorResult},
    fetch::RemoteTreeProvider,
    models::{Connector, RemoteTree},
};

use crate::{
    client::{RestCatalogService, SnapshotFileService, WarehouseService},
    error::{Result, WarehouseFetcherError},
    mapper,
    params::FetcherParams,
};

pub const FETCHER_NAME: &str = "warehousefetcher";

/// Walks a warehouse catalog level by level and assembles the remote tree.
pub struct WarehouseFetcher {
    client: Arc<dyn WarehouseService>,
}

impl WarehouseFetcher {
    pub fn new(client: Arc<dyn WarehouseService>) -> Self {
        Self { client }
    }

    pub fn from_params(params: &FetcherParams) -> Result<Self> {
        let client: Arc<dyn WarehouseService> = match params {
            FetcherParams::Snapshot(snapshot) => {
                Arc::new(SnapshotFileService::from_path(&snapshot.path)?)
            }
            FetcherParams::RestCatalog(rest) => Arc::new(RestCatalogService::new(rest)?),
        };
        log::debug!("Warehouse fetcher backed by a {} source", params.source());
        Ok(Self { client })
    }

    pub fn parse_params(value: serde_json::Value) -> Result<FetcherParams> {
        serde_json::from_value::<FetcherParams>(value)
            .map_err(|err| WarehouseFetcherError::InvalidParam(format!("invalid fetch params: {err}")))
    }

    pub async fn fetch_remote_tree(&self) -> Result<RemoteTree> {
        let mut tree = RemoteTree::default();
        for database in self.client.list_databases().await? {
            let mut schemas = Vec::new();
            for schema in self.client.list_schemas(&database.name).await? {
                if schema.database_name != database.name {
                    log::warn!(
                        "Schema {} listed under database {} reports database {}",
                        schema.name,
                        database.name,
                        schema.database_name
                    );
                }
                let tables = self
                    .client
                    .list_tables(&database.name, &schema.name)
                    .await?;
                schemas.push(mapper::build_remote_schema(&schema, &tables));
            }
            tree.databases
                .push(mapper::build_remote_database(&database, schemas));
        }

        log::info!(
            "Fetched remote tree: {} database(s), {} table(s)",
            tree.databases.len(),
            tree.table_count()
        );
        Ok(tree)
    }
}

#[async_trait]
impl RemoteTreeProvider for WarehouseFetcher {
    fn name(&self) -> &'static str {
        FETCHER_NAME
    }

    async fn fetch_tree(&self, connector: &Connector) -> MirrorResult<RemoteTree> {
        self.fetch_remote_tree().await.map_err(|err| {
            MirrorError::SyncError(format!(
                "failed to fetch remote tree for connector {}: {err}",
                connector.id
            ))
        })
    }
}
