//! KDVH to LARD migration tool.
//!
//! `dump` copies legacy tables to per-unit files, `import` loads those
//! files into LARD. Connection strings are read from the environment (or
//! a `.env` file).

mod config;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::{DumpArgs, DumpConfig, ImportArgs, ImportConfig, RunConfig};
use migration::{
    install_panic_hook, run_guarded, settle, Dumper, IdentityResolver, Importer, Notifier,
    ReferenceCache, TableCatalog, TableSpec,
};
use storage::{ParameterCatalog, SourceArchive, TargetArchive};

/// Connections per pool. Import units of one station share them.
const MAX_CONNECTIONS: u32 = 16;

#[derive(Parser, Debug)]
#[command(name = "kdvh-migrator")]
#[command(about = "Migrate observations from KDVH to LARD")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump KDVH tables to files
    Dump(DumpArgs),
    /// Import dumped files into LARD
    Import(ImportArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    install_panic_hook();

    match cli.command {
        Command::Dump(args) => run_dump(DumpConfig::from_args(args)?).await,
        Command::Import(args) => run_import(ImportConfig::from_args(args)?).await,
    }
}

/// Tables picked by `--table`, unknown names reported and skipped.
fn selected_tables<'a>(catalog: &'a TableCatalog, names: Option<&[String]>) -> Vec<&'a TableSpec> {
    let (tables, unknown) = catalog.select(names);
    for e in unknown {
        warn!(error = %e, "Skipping table");
    }
    tables
}

fn notifier(run: &RunConfig) -> Notifier {
    Notifier::new(run.notify_url.clone(), run.recipients.clone())
}

async fn run_dump(config: DumpConfig) -> Result<()> {
    info!(dir = %config.options.base_dir.display(), "Starting KDVH dump");

    let catalog = TableCatalog::standard();
    let tables = selected_tables(&catalog, config.options.selection.tables.as_deref());

    let source = Arc::new(SourceArchive::connect(&config.run.kdvh_conn, MAX_CONNECTIONS).await?);
    let notifier = notifier(&config.run);
    let dumper = Dumper::new(source, config.options.clone());

    for table in tables {
        let context = format!("{} dump", table.table_name);
        let outcome = run_guarded(&context, &notifier, config.run.on_panic, dumper.dump_table(table))
            .await
            .and_then(|result| result);

        if let Some(report) = settle(&context, outcome)?.filter(|r| !r.skipped) {
            info!(
                table = %table.table_name,
                units = report.units.len(),
                failed = report.failed.len(),
                rows = report.rows(),
                "Table dumped"
            );
        }
    }

    info!("KDVH dump finished");
    Ok(())
}

async fn run_import(config: ImportConfig) -> Result<()> {
    info!(dir = %config.options.base_dir.display(), "Starting LARD import");

    let catalog = TableCatalog::standard();
    let tables: Vec<&TableSpec> = selected_tables(&catalog, config.options.selection.tables.as_deref())
        .into_iter()
        .filter(|t| t.is_importable())
        .collect();

    let source = SourceArchive::connect(&config.run.kdvh_conn, MAX_CONNECTIONS).await?;
    let params = ParameterCatalog::connect(&config.stinfo_conn).await?;
    let target = Arc::new(TargetArchive::connect(&config.lard_conn, MAX_CONNECTIONS).await?);
    target.migrate().await?;

    let cache = ReferenceCache::load(
        &tables,
        &params,
        &source,
        &config.offsets,
        &config.options.selection,
    )
    .await?;

    let resolver = Arc::new(IdentityResolver::new(target.clone(), Arc::new(cache)));
    let importer = Importer::new(resolver, target, config.options.clone());
    let notifier = notifier(&config.run);

    for table in tables {
        let context = format!("{} import", table.table_name);
        let outcome = run_guarded(&context, &notifier, config.run.on_panic, importer.import_table(table))
            .await
            .and_then(|result| result);

        if let Some(report) = settle(&context, outcome)? {
            info!(
                table = %table.table_name,
                units = report.units.len(),
                failed = report.failed.len(),
                rows = report.rows_converted(),
                "Table imported"
            );
        }
    }

    info!("LARD import finished");
    Ok(())
}
