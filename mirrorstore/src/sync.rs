use crate::catalog::Catalog;
use crate::errors::{MirrorError, Result};
use crate::fetch::RemoteTreeProvider;
use crate::indexer::ExternalIndexer;
use crate::liveness::Liveness;
use crate::models::{Connector, MimeTypes, RemoteTree};
use crate::reconciler::{ReconcileOptions, Reconciler, SyncReport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// Scheduler-facing interface for mirroring a connector's remote catalog.
#[async_trait]
pub trait DataSynchronizer {
    /// Registers a remote tree provider under its own name.
    fn register_provider(&mut self, provider: Arc<dyn RemoteTreeProvider>);

    /// Fetches the remote tree through a named provider and reconciles it.
    async fn sync(
        &self,
        connector: &Connector,
        provider_name: &str,
        liveness: Liveness,
    ) -> Result<SyncReport>;

    /// Reconciles an already fetched remote tree.
    async fn sync_tree(
        &self,
        connector: &Connector,
        tree: &RemoteTree,
        liveness: Liveness,
    ) -> Result<SyncReport>;
}

pub struct MirrorSynchronizer {
    catalog: Arc<Catalog>,
    indexer: Arc<dyn ExternalIndexer>,
    providers: HashMap<&'static str, Arc<dyn RemoteTreeProvider>>,
    options: ReconcileOptions,
    mime_types: Option<MimeTypes>,
    leases: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MirrorSynchronizer {
    pub fn new(
        catalog: Arc<Catalog>,
        indexer: Arc<dyn ExternalIndexer>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            catalog,
            indexer,
            providers: HashMap::new(),
            options,
            mime_types: None,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the provider's mime-type table for every pass.
    pub fn with_mime_types(mut self, mime_types: MimeTypes) -> Self {
        self.mime_types = Some(mime_types);
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    fn acquire_lease(&self, connector_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lease = {
            let mut leases = self
                .leases
                .lock()
                .map_err(|_| MirrorError::SyncError("lease table poisoned".to_string()))?;
            Arc::clone(
                leases
                    .entry(connector_id.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lease.try_lock_owned().map_err(|_| {
            MirrorError::SyncError(format!(
                "sync already running for connector {}",
                connector_id
            ))
        })
    }

    async fn run_pass(
        &self,
        connector: &Connector,
        tree: &RemoteTree,
        liveness: Liveness,
    ) -> Result<SyncReport> {
        let run_id = Uuid::new_v4().to_string();
        self.catalog.create_sync_run(&run_id, &connector.id)?;

        let mut reconciler = Reconciler::new(
            self.catalog.as_ref(),
            self.indexer.as_ref(),
            connector,
            liveness,
            self.options.clone(),
        );
        if let Some(mime_types) = self.mime_types {
            reconciler = reconciler.with_mime_types(mime_types);
        }

        match reconciler.sync(tree).await {
            Ok(mut report) => {
                report.run_id = Some(run_id.clone());
                let details = serde_json::to_string(&report)?;
                self.catalog
                    .update_sync_run_status(&run_id, "SUCCESS", &details)?;
                Ok(report)
            }
            Err(err) => {
                let status = match err {
                    MirrorError::Cancelled(_) => "CANCELLED",
                    _ => "FAILED",
                };
                log::error!(
                    "Sync run {} for connector {} ended as {}: {}",
                    run_id,
                    connector.id,
                    status,
                    err
                );
                if let Err(log_err) =
                    self.catalog
                        .update_sync_run_status(&run_id, status, &err.to_string())
                {
                    log::warn!("Failed to record status of sync run {}: {}", run_id, log_err);
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl DataSynchronizer for MirrorSynchronizer {
    fn register_provider(&mut self, provider: Arc<dyn RemoteTreeProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    async fn sync(
        &self,
        connector: &Connector,
        provider_name: &str,
        liveness: Liveness,
    ) -> Result<SyncReport> {
        let provider = self.providers.get(provider_name).ok_or_else(|| {
            MirrorError::Config(format!("Provider '{}' not registered.", provider_name))
        })?;

        let _lease = self.acquire_lease(&connector.id)?;
        log::info!(
            "Fetching remote tree for connector {} via {}",
            connector.id,
            provider_name
        );
        let tree = provider.fetch_tree(connector).await?;
        liveness.check(&connector.id)?;
        self.run_pass(connector, &tree, liveness).await
    }

    async fn sync_tree(
        &self,
        connector: &Connector,
        tree: &RemoteTree,
        liveness: Liveness,
    ) -> Result<SyncReport> {
        let _lease = self.acquire_lease(&connector.id)?;
        self.run_pass(connector, tree, liveness).await
    }
}
