use std::sync::Mutex;

use mirrorstore::{
    catalog::{Catalog, MirrorStore},
    errors::{MirrorError, Result},
    indexer::{IndexerCall, RecordingIndexer},
    liveness::Liveness,
    models::{
        DatabaseNode, NewDatabase, NewSchema, NewTable, Permission, Provider, SchemaNode,
        TableNode,
    },
    reconciler::{ReconcileOptions, Reconciler},
    sync::DataSynchronizer,
};

mod common;

use common::{CONNECTOR_ID, mirror_state, sorted, tree};

fn pair(id: &str, permission: &str) -> (String, String) {
    (id.to_string(), permission.to_string())
}

/// Scenario A: a database grant mirrors everything beneath it and nothing else.
#[tokio::test]
async fn database_grant_mirrors_whole_subtree() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    ctx.catalog
        .set_permission(CONNECTOR_ID, "sales", Permission::Selected)?;

    let remote = tree(&[
        ("sales", "public", "orders"),
        ("sales", "public", "customers"),
        ("sales", "staging", "raw_orders"),
        ("hr", "public", "employees"),
    ]);
    let report = ctx
        .synchronizer
        .sync_tree(&ctx.connector, &remote, Liveness::default())
        .await?;

    assert_eq!(
        mirror_state(ctx.catalog.as_ref(), CONNECTOR_ID)?,
        vec![
            pair("sales", "selected"),
            pair("sales.public", "inherited"),
            pair("sales.public.customers", "inherited"),
            pair("sales.public.orders", "inherited"),
            pair("sales.staging", "inherited"),
            pair("sales.staging.raw_orders", "inherited"),
        ]
    );
    assert_eq!(report.tables_seen, 4);
    assert_eq!(report.databases_created, 0);
    assert_eq!(report.schemas_created, 2);
    assert_eq!(report.tables_created, 3);
    assert_eq!(report.tables_upserted, 3);
    assert_eq!(report.folders_upserted, 3);
    assert!(report.is_clean());

    assert_eq!(
        sorted(ctx.indexer.upserted_tables()),
        vec![
            "sales.public.customers",
            "sales.public.orders",
            "sales.staging.raw_orders"
        ]
    );
    assert_eq!(
        sorted(ctx.indexer.upserted_folders()),
        vec!["sales", "sales.public", "sales.staging"]
    );
    assert!(ctx.indexer.deleted_folders().is_empty());
    assert!(ctx.indexer.deleted_tables().is_empty());

    for table in ctx.catalog.list_tables(CONNECTOR_ID)? {
        assert!(table.last_upserted_at.is_some(), "{} not touched", table.internal_id);
    }
    Ok(())
}

/// Scenario B: without any grant, pre-existing nodes are removed and a
/// selected node that the walk never reaches is reported.
#[tokio::test]
async fn ungranted_nodes_are_removed_and_unused_selection_reported() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    ctx.catalog.create_database(
        CONNECTOR_ID,
        &NewDatabase {
            internal_id: "sales".into(),
            name: "sales".into(),
            permission: Permission::Inherited,
        },
    )?;
    ctx.catalog.create_schema(
        CONNECTOR_ID,
        &NewSchema {
            internal_id: "sales.public".into(),
            name: "public".into(),
            database_name: "sales".into(),
            permission: Permission::Inherited,
        },
    )?;
    ctx.catalog.create_table(
        CONNECTOR_ID,
        &NewTable {
            internal_id: "sales.public.orders".into(),
            name: "orders".into(),
            schema_name: "public".into(),
            database_name: "sales".into(),
            permission: Permission::Inherited,
        },
    )?;
    ctx.catalog.create_table(
        CONNECTOR_ID,
        &NewTable {
            internal_id: "sales.public.dropped".into(),
            name: "dropped".into(),
            schema_name: "public".into(),
            database_name: "sales".into(),
            permission: Permission::Selected,
        },
    )?;

    let report = ctx
        .synchronizer
        .sync_tree(
            &ctx.connector,
            &tree(&[("sales", "public", "orders")]),
            Liveness::default(),
        )
        .await?;

    assert!(mirror_state(ctx.catalog.as_ref(), CONNECTOR_ID)?.is_empty());
    assert_eq!(report.invariant_violations, vec!["sales.public.dropped"]);
    assert_eq!(report.deleted(), 4);
    assert_eq!(
        sorted(ctx.indexer.deleted_tables()),
        vec!["sales.public.dropped", "sales.public.orders"]
    );
    assert_eq!(
        sorted(ctx.indexer.deleted_folders()),
        vec!["sales", "sales.public"]
    );
    assert!(ctx.indexer.upserted_tables().is_empty());
    assert!(ctx.indexer.upserted_folders().is_empty());
    Ok(())
}

/// Scenario C: a schema grant creates the missing ancestor database.
#[tokio::test]
async fn schema_grant_creates_ancestor_database() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    ctx.catalog.create_schema(
        CONNECTOR_ID,
        &NewSchema {
            internal_id: "sales.public".into(),
            name: "public".into(),
            database_name: "sales".into(),
            permission: Permission::Selected,
        },
    )?;

    let report = ctx
        .synchronizer
        .sync_tree(
            &ctx.connector,
            &tree(&[
                ("sales", "public", "orders"),
                ("sales", "staging", "raw_orders"),
            ]),
            Liveness::default(),
        )
        .await?;

    assert_eq!(report.databases_created, 1);
    assert_eq!(
        mirror_state(ctx.catalog.as_ref(), CONNECTOR_ID)?,
        vec![
            pair("sales", "inherited"),
            pair("sales.public", "selected"),
            pair("sales.public.orders", "inherited"),
        ]
    );

    let folders: Vec<_> = ctx
        .indexer
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            IndexerCall::UpsertFolder(folder) => Some(folder),
            _ => None,
        })
        .collect();
    assert_eq!(folders.len(), 2);
    assert_eq!(folders[0].folder_id, "sales");
    assert_eq!(folders[0].parents, vec!["sales"]);
    assert_eq!(folders[0].parent_id, None);
    assert_eq!(folders[0].mime_type, Provider::BigQuery.mime_types().database);
    assert_eq!(folders[1].folder_id, "sales.public");
    assert_eq!(folders[1].title, "public");
    assert_eq!(folders[1].parents, vec!["sales.public", "sales"]);
    assert_eq!(folders[1].parent_id.as_deref(), Some("sales"));
    assert_eq!(folders[1].mime_type, Provider::BigQuery.mime_types().schema);
    Ok(())
}

/// Scenario D: revoking a schema grant removes its table exactly once.
#[tokio::test]
async fn revoked_schema_table_is_deleted_exactly_once() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    let remote = tree(&[("sales", "public", "orders")]);
    ctx.catalog
        .set_permission(CONNECTOR_ID, "sales.public", Permission::Selected)?;
    ctx.synchronizer
        .sync_tree(&ctx.connector, &remote, Liveness::default())
        .await?;
    assert_eq!(ctx.catalog.list_tables(CONNECTOR_ID)?.len(), 1);

    ctx.catalog
        .set_permission(CONNECTOR_ID, "sales.public", Permission::Inherited)?;
    ctx.indexer.take_calls();
    let report = ctx
        .synchronizer
        .sync_tree(&ctx.connector, &remote, Liveness::default())
        .await?;

    assert_eq!(report.tables_deleted, 1);
    assert_eq!(ctx.indexer.deleted_tables(), vec!["sales.public.orders"]);
    assert!(report.invariant_violations.is_empty());
    assert!(mirror_state(ctx.catalog.as_ref(), CONNECTOR_ID)?.is_empty());

    ctx.indexer.take_calls();
    let report = ctx
        .synchronizer
        .sync_tree(&ctx.connector, &remote, Liveness::default())
        .await?;
    assert_eq!(report.deleted(), 0);
    assert!(ctx.indexer.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn second_pass_on_unchanged_tree_is_idempotent() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    ctx.catalog
        .set_permission(CONNECTOR_ID, "sales", Permission::Selected)?;
    ctx.catalog
        .set_permission(CONNECTOR_ID, "hr.public.employees", Permission::Selected)?;
    let remote = tree(&[
        ("sales", "public", "orders"),
        ("hr", "public", "employees"),
        ("hr", "public", "salaries"),
    ]);

    ctx.synchronizer
        .sync_tree(&ctx.connector, &remote, Liveness::default())
        .await?;
    let first_state = mirror_state(ctx.catalog.as_ref(), CONNECTOR_ID)?;
    let first_created: Vec<i64> = ctx
        .catalog
        .list_tables(CONNECTOR_ID)?
        .into_iter()
        .map(|t| t.created_at)
        .collect();

    let report = ctx
        .synchronizer
        .sync_tree(&ctx.connector, &remote, Liveness::default())
        .await?;

    assert_eq!(mirror_state(ctx.catalog.as_ref(), CONNECTOR_ID)?, first_state);
    let second_created: Vec<i64> = ctx
        .catalog
        .list_tables(CONNECTOR_ID)?
        .into_iter()
        .map(|t| t.created_at)
        .collect();
    assert_eq!(first_created, second_created);
    assert_eq!(
        report.databases_created + report.schemas_created + report.tables_created,
        0
    );
    assert_eq!(report.deleted(), 0);
    assert_eq!(report.tables_upserted, 2);
    Ok(())
}

#[tokio::test]
async fn grants_are_inherited_top_down_only() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    ctx.catalog
        .set_permission(CONNECTOR_ID, "hr.public.employees", Permission::Selected)?;

    ctx.synchronizer
        .sync_tree(
            &ctx.connector,
            &tree(&[
                ("hr", "public", "employees"),
                ("hr", "public", "salaries"),
                ("hr", "private", "reviews"),
            ]),
            Liveness::default(),
        )
        .await?;

    assert_eq!(
        mirror_state(ctx.catalog.as_ref(), CONNECTOR_ID)?,
        vec![
            pair("hr", "inherited"),
            pair("hr.public", "inherited"),
            pair("hr.public.employees", "selected"),
        ]
    );
    assert_eq!(ctx.indexer.upserted_tables(), vec!["hr.public.employees"]);
    Ok(())
}

#[tokio::test]
async fn connectors_are_mirrored_independently() -> anyhow::Result<()> {
    let ctx = common::init_test_context()?;
    ctx.catalog
        .set_permission(CONNECTOR_ID, "sales", Permission::Selected)?;
    ctx.catalog
        .set_permission("conn-2", "sales.public.orders", Permission::Selected)?;

    ctx.synchronizer
        .sync_tree(
            &ctx.connector,
            &tree(&[("sales", "public", "orders")]),
            Liveness::default(),
        )
        .await?;

    // The other connector's selection stays untouched by this pass.
    assert_eq!(
        mirror_state(ctx.catalog.as_ref(), "conn-2")?,
        vec![
            pair("sales", "inherited"),
            pair("sales.public", "inherited"),
            pair("sales.public.orders", "selected"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn snowflake_connector_uses_its_mime_types() -> anyhow::Result<()> {
    let mut ctx = common::init_test_context()?;
    ctx.connector.provider = Provider::Snowflake;
    ctx.catalog
        .set_permission(CONNECTOR_ID, "sales", Permission::Selected)?;

    ctx.synchronizer
        .sync_tree(
            &ctx.connector,
            &tree(&[("sales", "public", "orders")]),
            Liveness::default(),
        )
        .await?;

    let mime_types = Provider::Snowflake.mime_types();
    for call in ctx.indexer.calls() {
        match call {
            IndexerCall::UpsertTable(table) => assert_eq!(table.mime_type, mime_types.table),
            IndexerCall::UpsertFolder(folder) if folder.parent_id.is_none() => {
                assert_eq!(folder.mime_type, mime_types.database)
            }
            IndexerCall::UpsertFolder(folder) => assert_eq!(folder.mime_type, mime_types.schema),
            other => panic!("unexpected call {other:?}"),
        }
    }
    Ok(())
}

/// Store wrapper that records the order of mirror mutations.
struct OrderedStore {
    inner: Catalog,
    ops: Mutex<Vec<String>>,
}

impl OrderedStore {
    fn new() -> anyhow::Result<Self> {
        let inner = Catalog::in_memory()?;
        inner.initialize_schema()?;
        Ok(Self {
            inner,
            ops: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

impl MirrorStore for OrderedStore {
    fn list_databases(&self, connector_id: &str) -> Result<Vec<DatabaseNode>> {
        self.inner.list_databases(connector_id)
    }

    fn list_schemas(&self, connector_id: &str) -> Result<Vec<SchemaNode>> {
        self.inner.list_schemas(connector_id)
    }

    fn list_tables(&self, connector_id: &str) -> Result<Vec<TableNode>> {
        self.inner.list_tables(connector_id)
    }

    fn create_database(&self, connector_id: &str, new: &NewDatabase) -> Result<DatabaseNode> {
        self.push(format!("create {}", new.internal_id));
        self.inner.create_database(connector_id, new)
    }

    fn create_schema(&self, connector_id: &str, new: &NewSchema) -> Result<SchemaNode> {
        self.push(format!("create {}", new.internal_id));
        self.inner.create_schema(connector_id, new)
    }

    fn create_table(&self, connector_id: &str, new: &NewTable) -> Result<TableNode> {
        if new.name == "poison" {
            return Err(MirrorError::Store("disk full".to_string()));
        }
        self.push(format!("create {}", new.internal_id));
        self.inner.create_table(connector_id, new)
    }

    fn touch_table(&self, node: &TableNode, timestamp: i64) -> Result<()> {
        self.inner.touch_table(node, timestamp)
    }

    fn destroy_database(&self, node: &DatabaseNode) -> Result<()> {
        self.push(format!("destroy {}", node.internal_id));
        self.inner.destroy_database(node)
    }

    fn destroy_schema(&self, node: &SchemaNode) -> Result<()> {
        self.push(format!("destroy {}", node.internal_id));
        self.inner.destroy_schema(node)
    }

    fn destroy_table(&self, node: &TableNode) -> Result<()> {
        self.push(format!("destroy {}", node.internal_id));
        self.inner.destroy_table(node)
    }

    fn set_permission(
        &self,
        connector_id: &str,
        internal_id: &str,
        permission: Permission,
    ) -> Result<()> {
        self.inner.set_permission(connector_id, internal_id, permission)
    }
}

#[tokio::test]
async fn ancestors_are_created_before_descendants_and_folders_follow_tables()
-> anyhow::Result<()> {
    common::init_logging();
    let store = OrderedStore::new()?;
    store.set_permission(CONNECTOR_ID, "sales.public.orders", Permission::Selected)?;
    store.set_permission(CONNECTOR_ID, "hr", Permission::Selected)?;
    store.ops.lock().unwrap().clear();

    let indexer = RecordingIndexer::new();
    let ctx = common::init_test_context()?;
    Reconciler::new(
        &store,
        &indexer,
        &ctx.connector,
        Liveness::default(),
        ReconcileOptions::from(&ctx.config),
    )
    .sync(&tree(&[
        ("hr", "public", "employees"),
        ("hr", "private", "reviews"),
        ("sales", "public", "orders"),
    ]))
    .await?;

    let ops = store.ops();
    let position = |op: &str| ops.iter().position(|o| o == op);
    assert!(position("create hr.public").is_some());
    assert!(position("create hr.public") < position("create hr.public.employees"));
    assert!(position("create hr.private") < position("create hr.private.reviews"));
    // Pre-existing ancestors are not created again.
    assert_eq!(position("create hr"), None);
    assert_eq!(position("create sales.public.orders"), None);

    let calls = indexer.calls();
    let last_table = calls
        .iter()
        .rposition(|c| matches!(c, IndexerCall::UpsertTable(_)))
        .unwrap();
    let first_folder = calls
        .iter()
        .position(|c| matches!(c, IndexerCall::UpsertFolder(_)))
        .unwrap();
    assert!(last_table < first_folder);
    assert_eq!(indexer.upserted_folders().len(), 5);
    Ok(())
}

#[tokio::test]
async fn store_failure_aborts_before_sweep() -> anyhow::Result<()> {
    common::init_logging();
    let store = OrderedStore::new()?;
    store.set_permission(CONNECTOR_ID, "sales", Permission::Selected)?;
    store.set_permission(CONNECTOR_ID, "old", Permission::Selected)?;
    store.set_permission(CONNECTOR_ID, "old", Permission::Inherited)?;

    let indexer = RecordingIndexer::new();
    let ctx = common::init_test_context()?;
    let err = Reconciler::new(
        &store,
        &indexer,
        &ctx.connector,
        Liveness::default(),
        ReconcileOptions::from(&ctx.config),
    )
    .sync(&tree(&[("sales", "public", "poison")]))
    .await
    .unwrap_err();

    assert!(matches!(err, MirrorError::Store(_)));
    assert!(store.ops().iter().all(|op| !op.starts_with("destroy")));
    assert!(indexer.deleted_folders().is_empty());
    assert_eq!(store.list_databases(CONNECTOR_ID)?.len(), 2);
    Ok(())
}
