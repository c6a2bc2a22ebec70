use std::io;
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ods_booster::app::{App, BatchResult, DEFAULT_PREVIEW_ROWS, ProgressSink, QuerySource};
use ods_booster::catalog::OdsHttpClient;
use ods_booster::config::ConfigLoader;
use ods_booster::domain::DatasetId;
use ods_booster::error::{BoosterError, ErrorClass};
use ods_booster::output::{JsonOutput, OutputMode, TextOutput};
use ods_booster::remote::{BlobStore, ObjectStoreClient};
use ods_booster::store::Store;
use ods_booster::sync::SyncStatus;
use ods_booster::warehouse::{
    ColumnDef, DuckDbWarehouse, QueryResult, WarehouseStore, WarehouseTable,
};

#[derive(Parser)]
#[command(name = "ods-booster")]
#[command(
    about = "Cache open-data catalog datasets as Parquet and push them to a blob store or warehouse"
)]
#[command(version)]
struct Cli {
    /// Print JSON documents instead of tables.
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Config file (default: ./ods-booster.json if present).
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Compare the catalog with the local ledger")]
    Status(StatusArgs),
    #[command(about = "Show catalog metadata and local state of one dataset")]
    Info(InfoArgs),
    #[command(about = "Download datasets into the local cache")]
    Download(DownloadArgs),
    #[command(about = "Local Parquet artifacts")]
    Local(LocalArgs),
    #[command(about = "Objects in the blob store")]
    Remote(RemoteArgs),
    #[command(about = "Warehouse tables and queries")]
    Warehouse(WarehouseArgs),
}

#[derive(Args)]
struct StatusArgs {
    /// Bypass the cached catalog listing.
    #[arg(long)]
    refresh: bool,

    #[arg(long, value_enum)]
    only: Option<SyncStatus>,
}

#[derive(Args)]
struct InfoArgs {
    id: DatasetId,

    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(required = true)]
    ids: Vec<DatasetId>,

    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct IdsArgs {
    #[arg(required = true)]
    ids: Vec<DatasetId>,
}

#[derive(Args)]
struct LocalArgs {
    #[command(subcommand)]
    command: LocalCommand,
}

#[derive(Subcommand)]
enum LocalCommand {
    List,
    Preview {
        id: DatasetId,
        #[arg(long, default_value_t = DEFAULT_PREVIEW_ROWS)]
        limit: usize,
    },
}

#[derive(Args)]
struct RemoteArgs {
    #[command(subcommand)]
    command: RemoteCommand,
}

#[derive(Subcommand)]
enum RemoteCommand {
    List,
    Upload(IdsArgs),
    Show {
        name: String,
        #[arg(long, default_value_t = DEFAULT_PREVIEW_ROWS)]
        limit: usize,
    },
}

#[derive(Args)]
struct WarehouseArgs {
    #[command(subcommand)]
    command: WarehouseCommand,
}

#[derive(Subcommand)]
enum WarehouseCommand {
    Tables,
    Upload(IdsArgs),
    Query {
        /// Sample the first rows of this table.
        #[arg(long, conflicts_with = "sql", required_unless_present = "sql")]
        table: Option<String>,
        #[arg(long)]
        sql: Option<String>,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<BoosterError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &BoosterError) -> u8 {
    match error.class() {
        ErrorClass::Input => 2,
        ErrorClass::RemoteFetch | ErrorClass::ObjectStore | ErrorClass::Warehouse => 3,
        ErrorClass::LedgerCorrupt => 4,
        ErrorClass::Local => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = Store::new(config.data_dir.clone(), config.ledger_path.clone())?;
    let catalog = OdsHttpClient::new(
        &config.base_url,
        config.metadata_dataset.clone(),
        config.timeout,
    )?;

    match cli.command {
        Commands::Remote(args) => {
            let objects = BlobStore::from_url(&config.object_store_url)?;
            let app = App::new(&config, store, catalog, objects, NopWarehouse);
            run_remote(args.command, &app, output_mode)
        }
        Commands::Warehouse(args) => {
            let warehouse =
                DuckDbWarehouse::open(&config.warehouse_database, config.stage_path())?;
            let app = App::new(&config, store, catalog, NopObjects, warehouse);
            run_warehouse(args.command, &app, output_mode)
        }
        command => {
            let app = App::new(&config, store, catalog, NopObjects, NopWarehouse);
            run_local(command, &app, output_mode)
        }
    }
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &TextOutput,
    }
}

fn emit<T: Serialize>(
    output_mode: OutputMode,
    value: &T,
    text: impl FnOnce(&T) -> io::Result<()>,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(value).into_diagnostic(),
        OutputMode::Interactive => text(value).into_diagnostic(),
    }
}

fn emit_batch(
    operation: &str,
    output_mode: OutputMode,
    result: &BatchResult,
) -> miette::Result<ExitCode> {
    emit(output_mode, result, |r| TextOutput::print_batch(operation, r))?;
    if result.summary.failed > 0 {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_local(
    command: Commands,
    app: &App<OdsHttpClient, NopObjects, NopWarehouse>,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let sink = sink(output_mode);
    match command {
        Commands::Status(args) => {
            let result = app.status(args.refresh, args.only, sink)?;
            emit(output_mode, &result, TextOutput::print_status)?;
        }
        Commands::Info(args) => {
            let result = app.info(&args.id, args.refresh, sink)?;
            emit(output_mode, &result, TextOutput::print_info)?;
        }
        Commands::Download(args) => {
            let result = app.download(&args.ids, args.refresh, sink)?;
            return emit_batch("download", output_mode, &result);
        }
        Commands::Local(args) => match args.command {
            LocalCommand::List => {
                let result = app.list_local(sink)?;
                emit(output_mode, &result, |r| TextOutput::print_local(r))?;
            }
            LocalCommand::Preview { id, limit } => {
                let result = app.preview_local(&id, limit)?;
                emit(output_mode, &result, TextOutput::print_preview)?;
            }
        },
        Commands::Remote(_) | Commands::Warehouse(_) => {
            return Err(miette::Report::msg("command needs a store backend"));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_remote(
    command: RemoteCommand,
    app: &App<OdsHttpClient, BlobStore, NopWarehouse>,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let sink = sink(output_mode);
    match command {
        RemoteCommand::List => {
            let result = app.list_remote(sink)?;
            emit(output_mode, &result, |r| TextOutput::print_remote(r))?;
        }
        RemoteCommand::Upload(args) => {
            let result = app.upload_objects(&args.ids, sink)?;
            return emit_batch("upload", output_mode, &result);
        }
        RemoteCommand::Show { name, limit } => {
            let result = app.show_remote(&name, limit, sink)?;
            emit(output_mode, &result, TextOutput::print_preview)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_warehouse(
    command: WarehouseCommand,
    app: &App<OdsHttpClient, NopObjects, DuckDbWarehouse>,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let sink = sink(output_mode);
    match command {
        WarehouseCommand::Tables => {
            let result = app.list_tables(sink)?;
            emit(output_mode, &result, |r| TextOutput::print_tables(r))?;
        }
        WarehouseCommand::Upload(args) => {
            let result = app.upload_warehouse(&args.ids, sink)?;
            return emit_batch("warehouse upload", output_mode, &result);
        }
        WarehouseCommand::Query { table, sql } => {
            let source = match (table, sql) {
                (_, Some(sql)) => QuerySource::Sql(sql),
                (Some(table), None) => QuerySource::Table(table),
                (None, None) => {
                    return Err(miette::Report::msg("--table or --sql is required"));
                }
            };
            let result: QueryResult = app.query(&source, sink)?;
            emit(output_mode, &result, TextOutput::print_query)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

struct NopObjects;

impl ObjectStoreClient for NopObjects {
    fn list(&self) -> Result<Vec<String>, BoosterError> {
        Err(BoosterError::ObjectStore("object store not configured".to_string()))
    }

    fn upload(&self, _local_path: &Utf8Path) -> Result<String, BoosterError> {
        Err(BoosterError::ObjectStore("object store not configured".to_string()))
    }

    fn download(&self, _object_name: &str, _destination: &Utf8Path) -> Result<(), BoosterError> {
        Err(BoosterError::ObjectStore("object store not configured".to_string()))
    }
}

struct NopWarehouse;

impl NopWarehouse {
    fn unavailable<T>() -> Result<T, BoosterError> {
        Err(BoosterError::Warehouse("warehouse not configured".to_string()))
    }
}

impl WarehouseStore for NopWarehouse {
    fn list_tables(&self) -> Result<Vec<WarehouseTable>, BoosterError> {
        Self::unavailable()
    }

    fn table_exists(&self, _name: &str) -> Result<bool, BoosterError> {
        Self::unavailable()
    }

    fn table_columns(&self, _name: &str) -> Result<Vec<ColumnDef>, BoosterError> {
        Self::unavailable()
    }

    fn infer_schema(&self) -> Result<Vec<ColumnDef>, BoosterError> {
        Self::unavailable()
    }

    fn create_table_if_absent(
        &self,
        _name: &str,
        _schema: &[ColumnDef],
    ) -> Result<bool, BoosterError> {
        Self::unavailable()
    }

    fn clear_stage(&self) -> Result<(), BoosterError> {
        Self::unavailable()
    }

    fn stage_file(&self, _path: &Utf8Path) -> Result<(), BoosterError> {
        Self::unavailable()
    }

    fn load_stage(&self, _table: &str) -> Result<u64, BoosterError> {
        Self::unavailable()
    }

    fn query(&self, _sql: &str) -> Result<QueryResult, BoosterError> {
        Self::unavailable()
    }
}
