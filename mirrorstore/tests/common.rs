use std::sync::Arc;

use mirrorstore::{
    catalog::{Catalog, MirrorStore},
    config::MirrorConfig,
    indexer::RecordingIndexer,
    models::{Connector, Provider, RemoteDatabase, RemoteSchema, RemoteTable, RemoteTree},
    reconciler::ReconcileOptions,
    sync::MirrorSynchronizer,
};
use tempfile::TempDir;

pub const CONNECTOR_ID: &str = "conn-1";

#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
    pub config: MirrorConfig,
    pub catalog: Arc<Catalog>,
    pub indexer: Arc<RecordingIndexer>,
    pub synchronizer: Arc<MirrorSynchronizer>,
    pub connector: Connector,
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Short indexer timeouts so stalled calls resolve quickly.
pub fn test_config(temp_dir: &TempDir) -> MirrorConfig {
    let mut config = MirrorConfig::new(temp_dir.path());
    config.indexer_timeout_ms = 100;
    config.indexer_max_attempts = 2;
    config.indexer_retry_backoff_ms = 1;
    config
}

pub fn init_test_context() -> anyhow::Result<TestContext> {
    init_logging();
    let temp_dir = tempfile::tempdir()?;
    let config = test_config(&temp_dir);

    let catalog = Arc::new(Catalog::new(&config)?);
    catalog.initialize_schema()?;

    let indexer = Arc::new(RecordingIndexer::new());
    let synchronizer = Arc::new(MirrorSynchronizer::new(
        Arc::clone(&catalog),
        indexer.clone(),
        ReconcileOptions::from(&config),
    ));

    Ok(TestContext {
        temp_dir,
        config,
        catalog,
        indexer,
        synchronizer,
        connector: Connector::new(CONNECTOR_ID, Provider::BigQuery, "secrets/conn-1"),
    })
}

/// Builds a remote tree from `(database, schema, table)` triples, keeping
/// first-seen order.
#[allow(dead_code)]
pub fn tree(entries: &[(&str, &str, &str)]) -> RemoteTree {
    let mut tree = RemoteTree::default();
    for (db, schema, table) in entries {
        if !tree.databases.iter().any(|d| d.name == *db) {
            tree.databases.push(RemoteDatabase {
                name: db.to_string(),
                schemas: vec![],
            });
        }
        let Some(database) = tree.databases.iter_mut().find(|d| d.name == *db) else {
            continue;
        };
        if !database.schemas.iter().any(|s| s.name == *schema) {
            database.schemas.push(RemoteSchema {
                name: schema.to_string(),
                database_name: db.to_string(),
                tables: vec![],
            });
        }
        let Some(remote_schema) = database.schemas.iter_mut().find(|s| s.name == *schema) else {
            continue;
        };
        remote_schema.tables.push(RemoteTable {
            name: table.to_string(),
            database_name: db.to_string(),
            schema_name: schema.to_string(),
            description: None,
        });
    }
    tree
}

/// `(internal_id, permission)` for every mirrored node of a connector, sorted.
#[allow(dead_code)]
pub fn mirror_state(store: &dyn MirrorStore, connector_id: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut state = Vec::new();
    for node in store.list_databases(connector_id)? {
        state.push((node.internal_id, node.permission.to_string()));
    }
    for node in store.list_schemas(connector_id)? {
        state.push((node.internal_id, node.permission.to_string()));
    }
    for node in store.list_tables(connector_id)? {
        state.push((node.internal_id, node.permission.to_string()));
    }
    state.sort();
    Ok(state)
}

#[allow(dead_code)]
pub fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}
