use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pln_core::clamav::ClamdConnector;
use pln_core::config::PlnConfig;
use pln_core::db;
use pln_core::extract::extract_embeds;
use pln_core::paths::FilePaths;
use pln_core::restore::Restorer;
use pln_core::stages::{RunOptions, StageContext, StageKind, StageRunner};
use pln_core::storage::{DepositStore, PgStore, ReadOnlyStore};
use pln_core::sword::SwordClient;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "PLN staging server deposit pipeline", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $PLN_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the embedded database migrations
    Migrate,
    /// Run one processing stage over the deposits waiting for it
    Run(RunArgs),
    /// Download the archived deposits of one or more journals
    Fetch(FetchArgs),
    /// Write the files embedded in an export XML document to a directory
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    stage: StageArg,
    /// Reprocess deposits sitting in the stage's error state
    #[arg(long)]
    retry: bool,
    /// Process deposits without saving changes or removing files
    #[arg(long)]
    dry_run: bool,
    /// Process at most this many deposits
    #[arg(long)]
    limit: Option<i64>,
    /// Only process these deposit ids
    ids: Vec<i64>,
}

#[derive(Args, Debug)]
struct FetchArgs {
    #[arg(required = true)]
    journals: Vec<Uuid>,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    file: PathBuf,
    /// Destination directory (defaults to the current directory)
    path: Option<PathBuf>,
    /// Name extracted files after the names recorded in the export
    #[arg(long)]
    source_names: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StageArg {
    Harvest,
    Payload,
    Bag,
    Xml,
    Scan,
    Reserialize,
    Deposit,
    Status,
}

impl From<StageArg> for StageKind {
    fn from(value: StageArg) -> Self {
        match value {
            StageArg::Harvest => StageKind::Harvest,
            StageArg::Payload => StageKind::Payload,
            StageArg::Bag => StageKind::Bag,
            StageArg::Xml => StageKind::Xml,
            StageArg::Scan => StageKind::Scan,
            StageArg::Reserialize => StageKind::Reserialize,
            StageArg::Deposit => StageKind::Deposit,
            StageArg::Status => StageKind::Status,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Migrate => handle_migrate(cli.config.as_deref()).await,
        Command::Run(args) => handle_run(cli.config.as_deref(), args).await,
        Command::Fetch(args) => handle_fetch(cli.config.as_deref(), args).await,
        Command::Extract(args) => handle_extract(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<PlnConfig> {
    PlnConfig::load(path).context("failed to load configuration")
}

async fn connect_store(config: &PlnConfig) -> Result<PgStore> {
    let pool = db::connect(config.database_url()?).await?;
    Ok(PgStore::new(pool))
}

fn file_paths(config: &PlnConfig) -> FilePaths {
    FilePaths::new(&config.data_dir, &config.project_dir)
}

async fn handle_migrate(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = connect_store(&config).await?;
    db::run_migrations(store.pool()).await?;
    info!("migrations applied");
    Ok(())
}

async fn handle_run(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let config = Arc::new(load_config(config_path)?);
    let paths = file_paths(&config);

    let mut store: Arc<dyn DepositStore> = Arc::new(connect_store(&config).await?);
    if args.dry_run {
        store = Arc::new(ReadOnlyStore::new(store));
    }

    let sword = SwordClient::new(config.sword.clone(), paths.clone())
        .context("failed to build deposit protocol client")?;
    let scanner = ClamdConnector::new(
        config.clamav.socket_path.clone(),
        config.clamav.timeout(),
    );

    let context = StageContext {
        store: store.clone(),
        paths,
        config: config.clone(),
        sword: Arc::new(sword),
        scanner: Arc::new(scanner),
    };

    let kind = StageKind::from(args.stage);
    let stage = kind
        .build(&context)
        .with_context(|| format!("failed to set up the {kind} stage"))?;

    let options = RunOptions {
        retry: args.retry,
        dry_run: args.dry_run,
        limit: args.limit,
        ids: args.ids,
    };
    let report = StageRunner::new(store)
        .run(&stage, &options)
        .await
        .with_context(|| format!("{kind} stage failed"))?;

    info!(
        stage = %kind,
        selected = report.selected,
        succeeded = report.succeeded,
        failed = report.failed,
        held = report.held,
        deferred = report.deferred,
        "run complete"
    );
    Ok(())
}

async fn handle_fetch(config_path: Option<&Path>, args: FetchArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let paths = file_paths(&config);
    let store = connect_store(&config).await?;
    let sword = SwordClient::new(config.sword.clone(), paths.clone())
        .context("failed to build deposit protocol client")?;

    let restorer = Restorer::new(&store, &sword, &paths);
    for journal in args.journals {
        let report = restorer
            .restore_journal(journal)
            .await
            .with_context(|| format!("failed to restore journal {journal}"))?;
        info!(
            journal = %journal,
            restored = report.restored.len(),
            checksum_failures = report.restored.iter().filter(|file| !file.checksum_ok).count(),
            failures = report.failures,
            "journal restore finished"
        );
    }
    Ok(())
}

fn handle_extract(args: ExtractArgs) -> Result<()> {
    let destination = match args.path {
        Some(path) => path,
        None => std::env::current_dir().context("failed to resolve the current directory")?,
    };
    let files = extract_embeds(&args.file, &destination, args.source_names)
        .with_context(|| format!("failed to extract {}", args.file.display()))?;
    for file in &files {
        info!(
            source = %file.source_name,
            path = %file.path.display(),
            bytes = file.bytes,
            "extracted"
        );
    }
    Ok(())
}
