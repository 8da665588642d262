pub mod catalog;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod indexer;
pub mod liveness;
pub mod models;
pub mod permissions;
pub mod reconciler;
pub mod sync;
pub mod utils;

use crate::catalog::Catalog;
use crate::config::MirrorConfig;
use crate::errors::Result;
use crate::indexer::ExternalIndexer;
use crate::reconciler::ReconcileOptions;
use crate::sync::MirrorSynchronizer;
use std::sync::Arc;

/// The main entry point for the `mirrorstore` library.
///
/// `MirrorStorage` owns the local mirror of one or more warehouse connectors
/// and keeps an external search indexer in step with it:
/// - A SQLite catalog (`Catalog`) holding the mirrored databases, schemas and
///   tables with their read grants, plus a log of sync runs.
/// - A synchronizer (`MirrorSynchronizer`) that reconciles a remote catalog
///   tree against the mirror and pushes the result to the indexer.
///
/// # Example
///
/// ```rust,no_run
/// use mirrorstore::{MirrorStorage, config::MirrorConfig, indexer::RecordingIndexer};
/// use mirrorstore::liveness::Liveness;
/// use mirrorstore::models::{Connector, Provider, RemoteTree};
/// use mirrorstore::sync::DataSynchronizer;
/// use std::sync::Arc;
/// use tempfile::tempdir;
///
/// #[tokio::main]
/// async fn main() {
///     let dir = tempdir().unwrap();
///     let storage = MirrorStorage::new(MirrorConfig::new(dir.path()), Arc::new(RecordingIndexer::new())).unwrap();
///
///     let connector = Connector::new("c1", Provider::BigQuery, "secret");
///     let report = storage
///         .synchronizer
///         .sync_tree(&connector, &RemoteTree::default(), Liveness::default())
///         .await
///         .unwrap();
///     println!("{} table(s) seen", report.tables_seen);
/// }
/// ```
pub struct MirrorStorage {
    pub config: MirrorConfig,
    pub catalog: Arc<Catalog>,
    pub synchronizer: Arc<MirrorSynchronizer>,
}

impl MirrorStorage {
    /// Opens the catalog (creating its directory and tables if needed) and
    /// wires a synchronizer to the given indexer.
    pub fn new(config: MirrorConfig, indexer: Arc<dyn ExternalIndexer>) -> Result<Self> {
        Self::with_synchronizer(config, indexer, |sync| sync)
    }

    /// Like [`MirrorStorage::new`], letting the caller register providers or
    /// override mime types before the synchronizer is shared.
    pub fn with_synchronizer<F>(
        config: MirrorConfig,
        indexer: Arc<dyn ExternalIndexer>,
        setup: F,
    ) -> Result<Self>
    where
        F: FnOnce(MirrorSynchronizer) -> MirrorSynchronizer,
    {
        config.validate()?;
        let catalog = Arc::new(Catalog::new(&config)?);
        catalog.initialize_schema()?;

        let synchronizer = MirrorSynchronizer::new(
            Arc::clone(&catalog),
            indexer,
            ReconcileOptions::from(&config),
        );
        let synchronizer = Arc::new(setup(synchronizer));

        Ok(Self {
            config,
            catalog,
            synchronizer,
        })
    }
}
