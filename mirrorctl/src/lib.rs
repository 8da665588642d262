use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use mirrorstore::{
    catalog::{Catalog, MirrorStore},
    config::MirrorConfig,
    errors::MirrorError,
    indexer::{ExternalIndexer, HttpIndexer, IndexerCall, RecordingIndexer},
    liveness::{LogHeartbeat, Liveness},
    models::{Connector, NewDatabase, NewSchema, NewTable, Permission, Provider},
    reconciler::{ReconcileOptions, SyncReport},
    sync::{DataSynchronizer, MirrorSynchronizer},
    MirrorStorage,
};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use warehousefetcher::{FetcherParams, RestCatalogParams, SnapshotParams, WarehouseFetcher};

/// Runs the command line interface for the warehouse mirror.
pub async fn run_cli() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the running sync");
            watcher.cancel();
        }
    });

    let stdout = std::io::stdout();
    execute(cli, cancel, &mut stdout.lock()).await
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Mirror warehouse catalogs into a search indexer")]
pub struct Cli {
    /// Base directory holding the mirror catalog
    #[arg(long, env = "MIRROR_BASE_PATH", global = true)]
    pub base_path: Option<PathBuf>,
    /// JSON config file; overrides --base-path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconciles one connector's mirror against its remote catalog
    Sync(SyncArgs),
    /// Selects a database, schema or table for mirroring
    Grant(PermissionArgs),
    /// Drops an explicit selection back to inherited
    Revoke(PermissionArgs),
    /// Lists the mirrored nodes of a connector
    Nodes(NodesArgs),
    /// Lists recent sync runs of a connector
    Runs(RunsArgs),
}

#[derive(Args, Debug)]
pub struct ConnectorArgs {
    /// Connector id every mirror row is scoped by
    #[arg(long)]
    pub connector: String,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub connector: ConnectorArgs,
    /// Warehouse flavour, selects the indexer mime types
    #[arg(long, default_value = "bigquery")]
    pub provider: Provider,
    /// Secret reference the indexer uses to query remote tables
    #[arg(long)]
    pub secret_ref: String,
    /// Catalog snapshot JSON written by the capture tool
    #[arg(long, conflicts_with = "catalog_url")]
    pub snapshot: Option<PathBuf>,
    /// Base URL of a REST catalog listing API
    #[arg(long)]
    pub catalog_url: Option<String>,
    #[arg(long, env = "MIRROR_CATALOG_TOKEN")]
    pub catalog_token: Option<String>,
    /// Base URL of the external indexer
    #[arg(long, env = "MIRROR_INDEXER_URL")]
    pub indexer_url: Option<String>,
    #[arg(long, env = "MIRROR_INDEXER_TOKEN")]
    pub indexer_token: Option<String>,
    /// Reconcile against a scratch copy of the mirror and print the indexer calls
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    /// Print the sync report as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PermissionArgs {
    #[command(flatten)]
    pub connector: ConnectorArgs,
    /// Internal id: `db`, `db.schema` or `db.schema.table`
    pub internal_id: String,
}

#[derive(Args, Debug)]
pub struct NodesArgs {
    #[command(flatten)]
    pub connector: ConnectorArgs,
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RunsArgs {
    #[command(flatten)]
    pub connector: ConnectorArgs,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

fn load_config(cli: &Cli) -> anyhow::Result<MirrorConfig> {
    if let Some(path) = &cli.config {
        return MirrorConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {:?}", path));
    }
    match &cli.base_path {
        Some(base_path) => Ok(MirrorConfig::new(base_path)),
        None => bail!("either --base-path (or MIRROR_BASE_PATH) or --config is required"),
    }
}

/// Executes a parsed command, writing human-readable output to `out`.
pub async fn execute<W: Write>(
    cli: Cli,
    cancel: CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Sync(args) => run_sync(config, args, cancel, out).await,
        Command::Grant(args) => set_permission(config, args, Permission::Selected, out),
        Command::Revoke(args) => set_permission(config, args, Permission::Inherited, out),
        Command::Nodes(args) => list_nodes(config, args, out),
        Command::Runs(args) => list_runs(config, args, out),
    }
}

fn open_catalog(config: &MirrorConfig) -> anyhow::Result<Catalog> {
    let catalog = Catalog::new(config).context("failed to open mirror catalog")?;
    catalog.initialize_schema()?;
    Ok(catalog)
}

fn fetcher_params(args: &SyncArgs) -> anyhow::Result<FetcherParams> {
    if let Some(path) = &args.snapshot {
        return Ok(FetcherParams::Snapshot(SnapshotParams { path: path.clone() }));
    }
    if let Some(base_url) = &args.catalog_url {
        return Ok(FetcherParams::RestCatalog(RestCatalogParams {
            base_url: base_url.clone(),
            token: args.catalog_token.clone(),
            page_size: 500,
        }));
    }
    bail!("sync needs a remote catalog: pass --snapshot or --catalog-url")
}

/// Copies one connector's mirror rows into another store, keeping grants.
pub fn copy_mirror(
    source: &dyn MirrorStore,
    target: &dyn MirrorStore,
    connector_id: &str,
) -> mirrorstore::errors::Result<()> {
    for node in source.list_databases(connector_id)? {
        target.create_database(
            connector_id,
            &NewDatabase {
                internal_id: node.internal_id,
                name: node.name,
                permission: node.permission,
            },
        )?;
    }
    for node in source.list_schemas(connector_id)? {
        target.create_schema(
            connector_id,
            &NewSchema {
                internal_id: node.internal_id,
                name: node.name,
                database_name: node.database_name,
                permission: node.permission,
            },
        )?;
    }
    for node in source.list_tables(connector_id)? {
        target.create_table(
            connector_id,
            &NewTable {
                internal_id: node.internal_id,
                name: node.name,
                schema_name: node.schema_name,
                database_name: node.database_name,
                permission: node.permission,
            },
        )?;
    }
    Ok(())
}

async fn run_sync<W: Write>(
    config: MirrorConfig,
    args: SyncArgs,
    cancel: CancellationToken,
    out: &mut W,
) -> anyhow::Result<()> {
    let connector = Connector::new(
        args.connector.connector.clone(),
        args.provider,
        args.secret_ref.clone(),
    );
    let params = fetcher_params(&args)?;
    let fetcher = WarehouseFetcher::from_params(&params)
        .context("failed to initialize warehouse fetcher")?;
    let liveness = Liveness::new(cancel).with_sink(Arc::new(LogHeartbeat));

    let report = if args.dry_run {
        let live = open_catalog(&config)?;
        let scratch = Arc::new(Catalog::in_memory()?);
        scratch.initialize_schema()?;
        copy_mirror(&live, scratch.as_ref(), &connector.id)?;

        let recorder = Arc::new(RecordingIndexer::new());
        let mut synchronizer = MirrorSynchronizer::new(
            scratch,
            recorder.clone(),
            ReconcileOptions::from(&config),
        );
        synchronizer.register_provider(Arc::new(fetcher));
        let outcome = synchronizer
            .sync(&connector, warehousefetcher::fetcher::FETCHER_NAME, liveness)
            .await;
        let Some(report) = completed(outcome, out)? else {
            return Ok(());
        };

        writeln!(out, "Dry run for connector {}; the mirror was not modified.", connector.id)?;
        for call in recorder.calls() {
            writeln!(out, "  {}", describe_call(&call))?;
        }
        report
    } else {
        let indexer_url = args
            .indexer_url
            .as_deref()
            .context("--indexer-url (or MIRROR_INDEXER_URL) is required unless --dry-run is set")?;
        let indexer: Arc<dyn ExternalIndexer> =
            Arc::new(HttpIndexer::new(indexer_url, args.indexer_token.clone())?);
        let storage = MirrorStorage::with_synchronizer(config, indexer, |mut sync| {
            sync.register_provider(Arc::new(fetcher));
            sync
        })?;
        info!("Mirror catalog at {:?}", storage.config.catalog_path);

        let outcome = storage
            .synchronizer
            .sync(&connector, warehousefetcher::fetcher::FETCHER_NAME, liveness)
            .await;
        match completed(outcome, out)? {
            Some(report) => report,
            None => return Ok(()),
        }
    };

    print_report(&report, args.json, out)
}

/// A cancelled pass is reported, not treated as a failure.
fn completed<W: Write>(
    outcome: Result<SyncReport, MirrorError>,
    out: &mut W,
) -> anyhow::Result<Option<SyncReport>> {
    match outcome {
        Ok(report) => Ok(Some(report)),
        Err(MirrorError::Cancelled(connector_id)) => {
            writeln!(out, "Sync for connector {} cancelled before cleanup.", connector_id)?;
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn describe_call(call: &IndexerCall) -> String {
    match call {
        IndexerCall::UpsertFolder(folder) => format!("upsert folder {}", folder.folder_id),
        IndexerCall::DeleteFolder(id) => format!("delete folder {}", id),
        IndexerCall::UpsertTable(table) => format!("upsert table  {}", table.table_id),
        IndexerCall::DeleteTable(id) => format!("delete table  {}", id),
    }
}

fn print_report<W: Write>(report: &SyncReport, json: bool, out: &mut W) -> anyhow::Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
        return Ok(());
    }
    writeln!(
        out,
        "connector {}: {} table(s) seen, {} created, {} table upsert(s), {} folder upsert(s), {} deleted",
        report.connector_id,
        report.tables_seen,
        report.databases_created + report.schemas_created + report.tables_created,
        report.tables_upserted,
        report.folders_upserted,
        report.deleted()
    )?;
    for id in &report.invariant_violations {
        writeln!(out, "  warning: selected node {} was not found remotely and was removed", id)?;
    }
    for failure in &report.indexer_failures {
        writeln!(
            out,
            "  error: {} {} failed: {}",
            failure.operation, failure.internal_id, failure.message
        )?;
    }
    for id in &report.retained {
        writeln!(out, "  kept {} until its children are removed", id)?;
    }
    Ok(())
}

fn set_permission<W: Write>(
    config: MirrorConfig,
    args: PermissionArgs,
    permission: Permission,
    out: &mut W,
) -> anyhow::Result<()> {
    let catalog = open_catalog(&config)?;
    catalog
        .set_permission(&args.connector.connector, &args.internal_id, permission)
        .with_context(|| format!("failed to set {} on {}", permission, args.internal_id))?;
    writeln!(
        out,
        "{} is now {} for connector {}",
        args.internal_id, permission, args.connector.connector
    )?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct NodeRow {
    kind: &'static str,
    internal_id: String,
    permission: Permission,
    last_upserted_at: Option<i64>,
}

fn collect_nodes(store: &dyn MirrorStore, connector_id: &str) -> mirrorstore::errors::Result<Vec<NodeRow>> {
    let mut rows = Vec::new();
    for node in store.list_databases(connector_id)? {
        rows.push(NodeRow {
            kind: "database",
            internal_id: node.internal_id,
            permission: node.permission,
            last_upserted_at: None,
        });
    }
    for node in store.list_schemas(connector_id)? {
        rows.push(NodeRow {
            kind: "schema",
            internal_id: node.internal_id,
            permission: node.permission,
            last_upserted_at: None,
        });
    }
    for node in store.list_tables(connector_id)? {
        rows.push(NodeRow {
            kind: "table",
            internal_id: node.internal_id,
            permission: node.permission,
            last_upserted_at: node.last_upserted_at,
        });
    }
    rows.sort_by(|a, b| a.internal_id.cmp(&b.internal_id));
    Ok(rows)
}

fn list_nodes<W: Write>(config: MirrorConfig, args: NodesArgs, out: &mut W) -> anyhow::Result<()> {
    let catalog = open_catalog(&config)?;
    let rows = collect_nodes(&catalog, &args.connector.connector)?;
    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }
    for row in rows {
        writeln!(out, "{:<9} {:<10} {}", row.kind, row.permission, row.internal_id)?;
    }
    Ok(())
}

fn list_runs<W: Write>(config: MirrorConfig, args: RunsArgs, out: &mut W) -> anyhow::Result<()> {
    let catalog = open_catalog(&config)?;
    for run in catalog.list_sync_runs(&args.connector.connector, args.limit)? {
        writeln!(
            out,
            "{} {:<9} started {} ended {}",
            run.run_id,
            run.status,
            run.start_time,
            run.end_time
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string())
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_sync_flags() {
        let cli = Cli::try_parse_from([
            "mirrorctl",
            "--base-path",
            "/tmp/mirror",
            "sync",
            "--connector",
            "c1",
            "--provider",
            "snowflake",
            "--secret-ref",
            "vault/c1",
            "--snapshot",
            "catalog.json",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Command::Sync(args) => {
                assert_eq!(args.provider, Provider::Snowflake);
                assert!(args.dry_run);
                assert!(matches!(
                    fetcher_params(&args).unwrap(),
                    FetcherParams::Snapshot(_)
                ));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_and_catalog_url_conflict() {
        let result = Cli::try_parse_from([
            "mirrorctl",
            "sync",
            "--connector",
            "c1",
            "--secret-ref",
            "s",
            "--snapshot",
            "a.json",
            "--catalog-url",
            "https://catalog.local",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_copy_mirror_keeps_grants() {
        let source = Catalog::in_memory().unwrap();
        source.initialize_schema().unwrap();
        source
            .set_permission("c1", "d1.s1.t1", Permission::Selected)
            .unwrap();
        let target = Catalog::in_memory().unwrap();
        target.initialize_schema().unwrap();

        copy_mirror(&source, &target, "c1").unwrap();

        let rows = collect_nodes(&target, "c1").unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.internal_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d1.s1", "d1.s1.t1"]);
        assert_eq!(rows[2].permission, Permission::Selected);
    }
}
