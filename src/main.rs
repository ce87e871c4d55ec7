//! X-Ray Creator CLI - builds X-Ray files for Kindle books.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use xray_creator::catalog::Catalog;
use xray_creator::config::Config;
use xray_creator::console::Console;
use xray_creator::device::DeviceLocator;
use xray_creator::pipeline::{CancelFlag, Pipeline};
use xray_creator::remote::Connections;
use xray_creator::xray::BasicIndexBuilder;

/// Builds X-Ray files for the books in a catalog and sends them to a Kindle.
#[derive(Parser, Debug)]
#[command(name = "xray-creator")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Catalog file listing the books as [[book]] tables.
    catalog: PathBuf,

    /// Use this config file instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only send existing X-Rays to the device, building missing ones.
    #[arg(long)]
    send_only: bool,

    /// Do not send X-Rays to the device after building them.
    #[arg(long, conflicts_with = "send_only")]
    no_device: bool,

    /// Do not build missing X-Rays while sending.
    #[arg(long)]
    no_create: bool,

    /// Include spoiler terms.
    #[arg(long)]
    spoilers: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Priority: RUST_LOG env var > verbose flag > default (warn)
    let default_level = match args.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    debug!(?args, "CLI arguments parsed");

    let console = Console::new();
    console.section("X-Ray Creator");

    // Load configuration
    console.step("Loading configuration...");
    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if args.spoilers {
        config.pipeline.spoilers = true;
    }
    if args.no_device {
        config.pipeline.send_to_device = false;
    }
    if args.no_create {
        config.pipeline.create_missing_index = false;
    }
    config.validate().context("Invalid configuration")?;
    console.success("Configuration loaded");

    console.step("Reading catalog...");
    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("Failed to read catalog {}", args.catalog.display()))?;
    console.success(&format!("Found {} books", catalog.books.len()));

    let builder = BasicIndexBuilder::new(config.xray.clone());
    let locator = DeviceLocator::from_config(&config.device);
    let mut connections =
        Connections::open(&config.remote).context("Failed to open remote connections")?;

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut pipeline = Pipeline::new(&builder, &catalog, &mut connections, config.pipeline.clone())
        .with_device(&locator)
        .with_cancel(cancel);
    pipeline.add_books(&catalog.books, &config.device.documents_dir);

    let report = if args.send_only {
        console.step("Sending X-Rays to device...");
        pipeline.send_indexes(&console).await?
    } else {
        console.step("Creating X-Rays...");
        pipeline.create_indexes(&console).await
    };
    info!(
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        "Run finished"
    );

    console.summary(&report);
    console.section("Done!");
    Ok(())
}
