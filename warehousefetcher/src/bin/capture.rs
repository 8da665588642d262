use std::{
    fs::{create_dir_all, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::{json, Value as JsonValue};
use warehousefetcher::{mapper, FetcherParams, WarehouseFetcher};

#[derive(Parser, Debug)]
#[command(
    name = "warehousefetcher-capture",
    about = "Capture a warehouse catalog listing and persist it as a reusable snapshot",
    after_help = "Example:\n  cargo run -p warehousefetcher --bin capture -- \\\n    --params '{\"source\":\"rest_catalog\",\"base_url\":\"https://catalog.internal/v1\"}' \\\n    --output-dir captures/sales"
)]
struct Args {
    /// JSON string describing fetch parameters.
    #[arg(long, conflicts_with = "params_file")]
    params: Option<String>,

    /// Path to a JSON file containing fetch parameters.
    #[arg(long)]
    params_file: Option<PathBuf>,

    /// Output directory to store the snapshot and its metadata.
    #[arg(long, default_value = "captures")]
    output_dir: PathBuf,

    /// Catalog token; if omitted the WAREHOUSE_CATALOG_TOKEN environment variable is used.
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let args = Args::parse();
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let params_value = load_params(&args)?;
    let mut params = WarehouseFetcher::parse_params(params_value)
        .context("params do not conform to warehousefetcher schema")?;

    if let FetcherParams::RestCatalog(rest) = &mut params {
        if rest.token.is_none() {
            rest.token = args
                .token
                .clone()
                .or_else(|| std::env::var("WAREHOUSE_CATALOG_TOKEN").ok());
        }
    }

    let redacted = serde_json::to_value(params.redacted())?;
    log::info!(
        "Starting {} capture with params: {}",
        params.source(),
        redacted
    );

    let fetcher =
        WarehouseFetcher::from_params(&params).context("failed to initialize WarehouseFetcher")?;
    let tree = fetcher
        .fetch_remote_tree()
        .await
        .context("catalog listing failed")?;

    let mut snapshot = mapper::flatten_tree(&tree);
    snapshot.captured_at = Some(Utc::now());

    log::info!("Fetch completed, persisting snapshot to {:?}", args.output_dir);
    create_dir_all(&args.output_dir).context("failed to create output directory")?;
    write_json(&args.output_dir.join("snapshot.json"), &serde_json::to_value(&snapshot)?)?;
    write_json(
        &args.output_dir.join("metadata.json"),
        &json!({
            "fetcher": warehousefetcher::fetcher::FETCHER_NAME,
            "source": params.source().as_str(),
            "params": redacted,
            "captured_at": snapshot.captured_at,
            "databases": snapshot.databases.len(),
            "schemas": snapshot.schemas.len(),
            "tables": snapshot.tables.len(),
        }),
    )?;
    log::info!("Capture finished successfully");
    Ok(())
}

fn load_params(args: &Args) -> Result<JsonValue> {
    if let Some(ref raw) = args.params {
        let value: JsonValue =
            serde_json::from_str(raw).context("failed to parse --params JSON string")?;
        return Ok(value);
    }

    if let Some(ref path) = args.params_file {
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        let value: JsonValue =
            serde_json::from_reader(file).context("failed to parse params file")?;
        return Ok(value);
    }

    anyhow::bail!("fetch params must be supplied via --params or --params-file");
}

fn write_json(path: &Path, value: &JsonValue) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("failed to write {:?}", path))?;
    writer.flush()?;
    Ok(())
}
