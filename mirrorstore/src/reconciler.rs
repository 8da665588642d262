//! Mirror reconciliation for one connector.
//!
//! A pass loads the connector's mirror, walks the remote tree and ensures every
//! granted node exists (ancestors first), marking it used. Tables go to the
//! indexer as soon as they are ensured. Once the walk is over, the sweep
//! upserts the used databases and schemas as folders and deletes every unused
//! node from the indexer and then from the mirror, tables before schemas
//! before databases. A folder whose children could not all be removed is kept
//! for the next pass.
//!
//! Callers must not run two passes for the same connector at once; see
//! [`crate::sync::MirrorSynchronizer`] for the lease that enforces it.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::catalog::MirrorStore;
use crate::config::MirrorConfig;
use crate::errors::{MirrorError, Result};
use crate::indexer::{ExternalIndexer, RetryPolicy, UpsertFolder, UpsertTable};
use crate::liveness::Liveness;
use crate::models::{
    Connector, DatabaseNode, MimeTypes, NewDatabase, NewSchema, NewTable, NodeKind, Permission,
    RemoteTable, RemoteTree, SchemaNode, TableNode,
};
use crate::permissions::PermissionResolver;
use crate::utils::id::{DatabaseId, SchemaId, TableId};

const INVARIANT_TARGET: &str = "mirrorstore::invariant";

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub heartbeat_every: usize,
    pub retry: RetryPolicy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            heartbeat_every: crate::config::DEFAULT_HEARTBEAT_EVERY,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&MirrorConfig> for ReconcileOptions {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            heartbeat_every: config.heartbeat_every.max(1),
            retry: RetryPolicy {
                timeout: config.indexer_timeout(),
                max_attempts: config.indexer_max_attempts,
                backoff: config.indexer_retry_backoff(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexerFailure {
    pub operation: &'static str,
    pub internal_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub run_id: Option<String>,
    pub connector_id: String,
    pub tables_seen: usize,
    pub databases_created: usize,
    pub schemas_created: usize,
    pub tables_created: usize,
    pub tables_upserted: usize,
    pub folders_upserted: usize,
    pub databases_deleted: usize,
    pub schemas_deleted: usize,
    pub tables_deleted: usize,
    /// Selected nodes that the pass found unused and removed anyway.
    pub invariant_violations: Vec<String>,
    pub indexer_failures: Vec<IndexerFailure>,
    /// Unused folders kept because a child deletion failed.
    pub retained: Vec<String>,
}

impl SyncReport {
    pub fn deleted(&self) -> usize {
        self.databases_deleted + self.schemas_deleted + self.tables_deleted
    }

    pub fn is_clean(&self) -> bool {
        self.invariant_violations.is_empty() && self.indexer_failures.is_empty()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct Reconciler<'a> {
    store: &'a dyn MirrorStore,
    indexer: &'a dyn ExternalIndexer,
    connector: &'a Connector,
    mime_types: MimeTypes,
    liveness: Liveness,
    options: ReconcileOptions,
    resolver: PermissionResolver,
    databases: BTreeMap<String, DatabaseNode>,
    schemas: BTreeMap<String, SchemaNode>,
    tables: BTreeMap<String, TableNode>,
    used: HashSet<String>,
    report: SyncReport,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn MirrorStore,
        indexer: &'a dyn ExternalIndexer,
        connector: &'a Connector,
        liveness: Liveness,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            indexer,
            connector,
            mime_types: connector.provider.mime_types(),
            liveness,
            options,
            resolver: PermissionResolver::default(),
            databases: BTreeMap::new(),
            schemas: BTreeMap::new(),
            tables: BTreeMap::new(),
            used: HashSet::new(),
            report: SyncReport {
                connector_id: connector.id.clone(),
                ..SyncReport::default()
            },
        }
    }

    pub fn with_mime_types(mut self, mime_types: MimeTypes) -> Self {
        self.mime_types = mime_types;
        self
    }

    /// Runs one full pass. Fails without sweeping on malformed ids, store
    /// errors and cancellation; indexer failures are recorded in the report.
    pub async fn sync(mut self, tree: &RemoteTree) -> Result<SyncReport> {
        self.load_snapshot()?;
        self.walk(tree).await?;
        self.liveness.check(&self.connector.id)?;
        self.sweep().await?;

        let report = self.report;
        log::info!(
            "Sync for connector {} finished: {} table(s) seen, created {}/{}/{} database/schema/table node(s), \
             upserted {} table(s) and {} folder(s), deleted {} node(s), {} indexer failure(s)",
            report.connector_id,
            report.tables_seen,
            report.databases_created,
            report.schemas_created,
            report.tables_created,
            report.tables_upserted,
            report.folders_upserted,
            report.deleted(),
            report.indexer_failures.len()
        );
        Ok(report)
    }

    fn load_snapshot(&mut self) -> Result<()> {
        let connector_id = &self.connector.id;
        let databases = self.store.list_databases(connector_id)?;
        let schemas = self.store.list_schemas(connector_id)?;
        let tables = self.store.list_tables(connector_id)?;

        self.resolver = PermissionResolver::from_snapshot(&databases, &schemas, &tables);
        log::info!(
            "Starting sync for connector {}: {} database(s), {} schema(s), {} table(s) mirrored, {} granted id(s)",
            connector_id,
            databases.len(),
            schemas.len(),
            tables.len(),
            self.resolver.granted_ids().len()
        );

        self.databases = databases
            .into_iter()
            .map(|node| (node.internal_id.clone(), node))
            .collect();
        self.schemas = schemas
            .into_iter()
            .map(|node| (node.internal_id.clone(), node))
            .collect();
        self.tables = tables
            .into_iter()
            .map(|node| (node.internal_id.clone(), node))
            .collect();
        Ok(())
    }

    async fn walk(&mut self, tree: &RemoteTree) -> Result<()> {
        let heartbeat_every = self.options.heartbeat_every.max(1);
        for database in &tree.databases {
            let database_id = DatabaseId::new(database.name.as_str())?.to_string();
            if self.resolver.is_database_granted(&database_id) {
                self.ensure_database(&database_id)?;
            }

            for schema in &database.schemas {
                let schema_id = SchemaId::new(database.name.as_str(), schema.name.as_str())?.to_string();
                if self.resolver.is_schema_granted(&schema_id)? {
                    self.ensure_schema(&schema_id)?;
                }

                for table in &schema.tables {
                    let table_id = TableId::new(
                        table.database_name.as_str(),
                        table.schema_name.as_str(),
                        table.name.as_str(),
                    )?
                    .to_string();
                    if self.resolver.is_table_granted(&table_id)? {
                        self.ensure_table(&table_id, table).await?;
                    }

                    self.report.tables_seen += 1;
                    if self.report.tables_seen % heartbeat_every == 0 {
                        self.liveness
                            .heartbeat(&self.connector.id, self.report.tables_seen)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn ensure_database(&mut self, database_id: &str) -> Result<()> {
        let id = DatabaseId::parse(database_id)?;
        self.used.insert(database_id.to_string());
        if self.databases.contains_key(database_id) {
            return Ok(());
        }

        let node = self.store.create_database(
            &self.connector.id,
            &NewDatabase {
                internal_id: database_id.to_string(),
                name: id.database().to_string(),
                permission: Permission::Inherited,
            },
        )?;
        log::info!(
            "Created database {} for connector {}",
            database_id,
            self.connector.id
        );
        self.report.databases_created += 1;
        self.databases.insert(database_id.to_string(), node);
        Ok(())
    }

    fn ensure_schema(&mut self, schema_id: &str) -> Result<()> {
        let id = SchemaId::parse(schema_id)?;
        self.ensure_database(id.database())?;

        self.used.insert(schema_id.to_string());
        if self.schemas.contains_key(schema_id) {
            return Ok(());
        }

        let node = self.store.create_schema(
            &self.connector.id,
            &NewSchema {
                internal_id: schema_id.to_string(),
                name: id.schema().to_string(),
                database_name: id.database().to_string(),
                permission: Permission::Inherited,
            },
        )?;
        log::info!(
            "Created schema {} for connector {}",
            schema_id,
            self.connector.id
        );
        self.report.schemas_created += 1;
        self.schemas.insert(schema_id.to_string(), node);
        Ok(())
    }

    async fn ensure_table(&mut self, table_id: &str, remote: &RemoteTable) -> Result<()> {
        let id = TableId::parse(table_id)?;
        let schema_id = id.schema_id().to_string();
        self.ensure_schema(&schema_id)?;

        self.used.insert(table_id.to_string());
        if !self.tables.contains_key(table_id) {
            let node = self.store.create_table(
                &self.connector.id,
                &NewTable {
                    internal_id: table_id.to_string(),
                    name: id.table().to_string(),
                    schema_name: id.schema().to_string(),
                    database_name: id.database().to_string(),
                    permission: Permission::Inherited,
                },
            )?;
            log::info!(
                "Created table {} for connector {}",
                table_id,
                self.connector.id
            );
            self.report.tables_created += 1;
            self.tables.insert(table_id.to_string(), node);
        }

        let upsert = UpsertTable {
            table_id: table_id.to_string(),
            table_name: id.table().to_string(),
            remote_table_ref: table_id.to_string(),
            remote_secret_ref: self.connector.secret_ref.clone(),
            description: remote.description.clone(),
            parents: id.parents(),
            parent_id: Some(schema_id),
            title: id.table().to_string(),
            mime_type: self.mime_types.table.to_string(),
        };
        let indexer = self.indexer;
        let request = &upsert;
        let outcome = self
            .options
            .retry
            .run("upsert_table", table_id, move || indexer.upsert_table(request))
            .await;

        match outcome {
            Ok(()) => {
                let timestamp = now_millis();
                if let Some(node) = self.tables.get_mut(table_id) {
                    self.store.touch_table(node, timestamp)?;
                    node.last_upserted_at = Some(timestamp);
                }
                self.report.tables_upserted += 1;
            }
            Err(err) => self.record_indexer_failure("upsert_table", table_id, err),
        }
        Ok(())
    }

    async fn sweep(&mut self) -> Result<()> {
        log::debug!(
            "Sweeping connector {}: {} used id(s)",
            self.connector.id,
            self.used.len()
        );

        let databases: Vec<DatabaseNode> = self.databases.values().cloned().collect();
        for node in &databases {
            if !self.used.contains(&node.internal_id) {
                continue;
            }
            let folder = UpsertFolder {
                folder_id: node.internal_id.clone(),
                title: node.name.clone(),
                parents: vec![node.internal_id.clone()],
                parent_id: None,
                mime_type: self.mime_types.database.to_string(),
            };
            self.upsert_folder(&folder).await;
        }

        let schemas: Vec<SchemaNode> = self.schemas.values().cloned().collect();
        for node in &schemas {
            if !self.used.contains(&node.internal_id) {
                continue;
            }
            let folder = UpsertFolder {
                folder_id: node.internal_id.clone(),
                title: node.name.clone(),
                parents: vec![node.internal_id.clone(), node.database_name.clone()],
                parent_id: Some(node.database_name.clone()),
                mime_type: self.mime_types.schema.to_string(),
            };
            self.upsert_folder(&folder).await;
        }

        // Deletions run bottom-up: a folder whose children are still mirrored
        // stays until a later pass removes them.
        let unused_tables: Vec<TableNode> = self
            .tables
            .values()
            .filter(|node| !self.used.contains(&node.internal_id))
            .cloned()
            .collect();
        for node in unused_tables {
            self.flag_unused_selected(NodeKind::Table, &node.internal_id, node.permission);
            if self.delete_from_indexer(NodeKind::Table, &node.internal_id).await {
                self.store.destroy_table(&node)?;
                self.tables.remove(&node.internal_id);
                self.report.tables_deleted += 1;
            }
        }

        for node in &schemas {
            if self.used.contains(&node.internal_id) {
                continue;
            }
            if self.schema_has_children(node) {
                self.keep_parent(NodeKind::Schema, &node.internal_id);
                continue;
            }
            self.flag_unused_selected(NodeKind::Schema, &node.internal_id, node.permission);
            if self.delete_from_indexer(NodeKind::Schema, &node.internal_id).await {
                self.store.destroy_schema(node)?;
                self.schemas.remove(&node.internal_id);
                self.report.schemas_deleted += 1;
            }
        }

        for node in &databases {
            if self.used.contains(&node.internal_id) {
                continue;
            }
            if self.database_has_children(node) {
                self.keep_parent(NodeKind::Database, &node.internal_id);
                continue;
            }
            self.flag_unused_selected(NodeKind::Database, &node.internal_id, node.permission);
            if self.delete_from_indexer(NodeKind::Database, &node.internal_id).await {
                self.store.destroy_database(node)?;
                self.databases.remove(&node.internal_id);
                self.report.databases_deleted += 1;
            }
        }
        Ok(())
    }

    fn schema_has_children(&self, schema: &SchemaNode) -> bool {
        self.tables.values().any(|t| {
            t.database_name == schema.database_name && t.schema_name == schema.name
        })
    }

    fn database_has_children(&self, database: &DatabaseNode) -> bool {
        self.schemas
            .values()
            .any(|s| s.database_name == database.internal_id)
            || self
                .tables
                .values()
                .any(|t| t.database_name == database.internal_id)
    }

    fn keep_parent(&mut self, kind: NodeKind, internal_id: &str) {
        log::warn!(
            "Keeping unused {} {} of connector {}: it still has mirrored children",
            kind,
            internal_id,
            self.connector.id
        );
        self.report.retained.push(internal_id.to_string());
    }

    async fn upsert_folder(&mut self, folder: &UpsertFolder) {
        let indexer = self.indexer;
        let outcome = self
            .options
            .retry
            .run("upsert_folder", &folder.folder_id, move || {
                indexer.upsert_folder(folder)
            })
            .await;
        match outcome {
            Ok(()) => self.report.folders_upserted += 1,
            Err(err) => self.record_indexer_failure("upsert_folder", &folder.folder_id, err),
        }
    }

    /// Returns whether the indexer entry is gone. On failure the mirror row is
    /// kept so that the next pass finds the node unused again and retries.
    async fn delete_from_indexer(&mut self, kind: NodeKind, internal_id: &str) -> bool {
        let indexer = self.indexer;
        let (operation, outcome) = match kind {
            NodeKind::Table => (
                "delete_table",
                self.options
                    .retry
                    .run("delete_table", internal_id, move || {
                        indexer.delete_table(internal_id)
                    })
                    .await,
            ),
            NodeKind::Database | NodeKind::Schema => (
                "delete_folder",
                self.options
                    .retry
                    .run("delete_folder", internal_id, move || {
                        indexer.delete_folder(internal_id)
                    })
                    .await,
            ),
        };

        match outcome {
            Ok(()) => {
                log::info!(
                    "Deleted {} {} for connector {}",
                    kind,
                    internal_id,
                    self.connector.id
                );
                true
            }
            Err(err) => {
                self.record_indexer_failure(operation, internal_id, err);
                log::warn!(
                    "Keeping mirror row for {} {} of connector {} until the indexer deletion succeeds",
                    kind,
                    internal_id,
                    self.connector.id
                );
                false
            }
        }
    }

    fn flag_unused_selected(&mut self, kind: NodeKind, internal_id: &str, permission: Permission) {
        if permission != Permission::Selected {
            return;
        }
        log::error!(
            target: INVARIANT_TARGET,
            "Selected {} {} of connector {} was not used during the sync pass; deleting it",
            kind,
            internal_id,
            self.connector.id
        );
        self.report
            .invariant_violations
            .push(internal_id.to_string());
    }

    fn record_indexer_failure(&mut self, operation: &'static str, internal_id: &str, err: MirrorError) {
        log::error!(
            "Indexer {} failed for {} of connector {}: {}",
            operation,
            internal_id,
            self.connector.id,
            err
        );
        self.report.indexer_failures.push(IndexerFailure {
            operation,
            internal_id: internal_id.to_string(),
            message: err.to_string(),
        });
    }
}
