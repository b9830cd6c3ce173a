use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use rtags_lite::commands::{CompletionItem, LocationQuery};
use rtags_lite::config::IndexerConfig;
use rtags_lite::diagnostics::FileDiagnostics;
use rtags_lite::navigation::LocationList;
use rtags_lite::scheduler::JobResult;
use rtags_lite::session::{NavigationOutcome, Session};
use rtags_lite::shutdown::install_shutdown_handler;
use rtags_lite::stream::{MonitorEvents, StreamDecoder, StreamEvent};

#[derive(Parser, Debug)]
#[command(name = "rtags-lite")]
#[command(version)]
#[command(about = "Drive the RTags indexer from the command line")]
#[command(propagate_version = true)]
struct Args {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

// =============================================================================
// Global Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Path to the `rc` client executable
    #[arg(long, global = true, default_value = "/usr/local/bin/rc")]
    rc_path: PathBuf,

    /// Timeout for short queries, in milliseconds
    #[arg(long, global = true, default_value = "500")]
    timeout_ms: u64,

    /// Number of queries allowed to run concurrently
    #[arg(long, global = true, default_value = "4")]
    pool_size: usize,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

/// `file:line:column`, one-based
#[derive(Debug, Clone)]
struct Position {
    file: String,
    line: u32,
    column: u32,
}

impl Position {
    fn row(&self) -> u32 {
        self.line.saturating_sub(1)
    }

    fn col(&self) -> u32 {
        self.column.saturating_sub(1)
    }
}

fn parse_position(value: &str) -> Result<Position, String> {
    let mut parts = value.rsplitn(3, ':');
    let column = parts.next();
    let line = parts.next();
    let file = parts.next();
    match (file, line, column) {
        (Some(file), Some(line), Some(column)) if !file.is_empty() => {
            let line: u32 = line.parse().map_err(|_| format!("invalid line in {:?}", value))?;
            let column: u32 = column
                .parse()
                .map_err(|_| format!("invalid column in {:?}", value))?;
            if line == 0 || column == 0 {
                return Err("line and column are one-based".to_string());
            }
            Ok(Position {
                file: file.to_string(),
                line,
                column,
            })
        }
        _ => Err(format!("expected file:line:column, got {:?}", value)),
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Stream indexing progress and diagnostics until interrupted
    Monitor,

    /// Decode a captured monitor feed from stdin
    Decode,

    /// Reindex a file and report its diagnostics
    Reindex {
        file: String,

        /// Use this file's contents as the unsaved buffer
        #[arg(long)]
        unsaved: Option<PathBuf>,

        /// How long to wait for diagnostics after indexing, in milliseconds
        #[arg(long, default_value = "2000")]
        wait_ms: u64,
    },

    /// Jump to the definition of the symbol at a position
    Follow {
        #[arg(value_parser = parse_position)]
        position: Position,
    },

    /// List references to the symbol at a position
    References {
        #[arg(value_parser = parse_position)]
        position: Position,
    },

    /// Show what the index knows about the symbol at a position
    SymbolInfo {
        #[arg(value_parser = parse_position)]
        position: Position,
    },

    /// List include directives that provide a symbol to a file
    Include { file: String, symbol: String },

    /// Complete at a position, using the file on disk as the buffer
    Complete {
        #[arg(value_parser = parse_position)]
        position: Position,
    },

    /// Rename the symbol at a position in every file that references it
    Rename {
        #[arg(value_parser = parse_position)]
        position: Position,

        old_name: String,

        new_name: String,

        /// Only print the planned changes
        #[arg(long)]
        dry_run: bool,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct ReindexOutput<'a> {
    result: &'a JobResult,
    diagnostics: Option<&'a FileDiagnostics>,
}

#[derive(Serialize)]
struct RenameOutput {
    files: usize,
    occurrences: usize,
    replaced: Option<usize>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &GlobalArgs) -> IndexerConfig {
    IndexerConfig::new(&args.rc_path)
        .with_rc_timeout(Duration::from_millis(args.timeout_ms))
        .with_pool_size(args.pool_size)
}

/// Byte offset of a zero-based row/column in `text`.
fn byte_offset(text: &str, row: u32, col: u32) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(row as usize)
        .map(str::len)
        .sum();
    line_start + col as usize
}

fn print_event(event: &StreamEvent, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Table => match event {
            StreamEvent::ProgressUpdate { index, total } => {
                println!("Indexed {}/{}", index, total);
            }
            StreamEvent::DiagnosticBatch(diagnostics) => print_diagnostics(diagnostics),
            StreamEvent::ConnectionError { message } => {
                eprintln!("Error: {}", message);
            }
        },
    }
    Ok(())
}

fn print_diagnostics(diagnostics: &FileDiagnostics) {
    println!("{}  {}", diagnostics.filename, diagnostics.summary());
    for item in diagnostics.navigation_items() {
        println!("  {:>5}:{:<4} {}", item.line, item.column, item.message);
    }
}

fn print_locations(locations: &LocationList) {
    if locations.is_empty() {
        println!("No results.");
        return;
    }
    for (index, location) in locations.locations.iter().enumerate() {
        let marker = if Some(index) == locations.preferred { "*" } else { " " };
        println!(
            "{} {:<40} {}",
            marker,
            format!("{}:{}:{}", location.short_name(), location.line, location.column),
            location.usage
        );
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_monitor(
    session: &Session,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = session.scheduler().event_stream();
    session.start_monitor().await;

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                print_event(&event, output)?;
                if matches!(event, StreamEvent::ConnectionError { .. }) {
                    std::process::exit(1);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Monitor output lagged"),
        }
    }
    Ok(())
}

async fn handle_decode(output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = MonitorEvents::new(BufReader::new(tokio::io::stdin()), StreamDecoder::new());
    while let Some(event) = events.next_event().await {
        print_event(&event, output)?;
    }
    Ok(())
}

async fn handle_reindex(
    session: &Session,
    file: String,
    unsaved: Option<PathBuf>,
    wait: Duration,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = match unsaved {
        Some(path) => tokio::fs::read(path).await?,
        None => Vec::new(),
    };

    let mut diagnostics = session.diagnostics();
    let Some(done) = session.reindex(&file, &text).await else {
        eprintln!("Error: a reindex is already running");
        std::process::exit(1);
    };
    let result = done.await?;

    if result.success() {
        let _ = tokio::time::timeout(wait, diagnostics.wait_for(|d| d.is_some())).await;
    }
    let current = session.current_diagnostics().await;

    match output {
        OutputFormat::Json => {
            let out = ReindexOutput {
                result: &result,
                diagnostics: current.as_ref(),
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            println!("Reindex:   {}", result.status);
            if let Some(exit_code) = result.exit_code {
                println!("Exit Code: {}", exit_code);
            }
            if let Some(error) = &result.error {
                println!("Error:     {}", error);
            }
            match &current {
                Some(diagnostics) => print_diagnostics(diagnostics),
                None => println!("No diagnostics received."),
            }
        }
    }

    if !result.success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_location(
    session: &Session,
    query: LocationQuery,
    position: Position,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = session
        .navigate(query, &position.file, position.row(), position.col(), None)
        .await?;
    let NavigationOutcome::Ready(result) = outcome else {
        return Err("navigation was deferred".into());
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result.locations)?),
        OutputFormat::Table => print_locations(&result.locations),
    }
    Ok(())
}

async fn handle_symbol_info(
    session: &Session,
    position: Position,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = session
        .symbol_info(&position.file, position.row(), position.col())
        .await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            for field in &report.info.fields {
                if field.key == "kind" && !report.info.kind_extensions.is_empty() {
                    let title = format!("{} ({})", field.title, report.info.kind_extensions.join(", "));
                    println!("{:<30} {}", title, field.value);
                } else {
                    println!("{:<30} {}", field.title, field.value);
                }
            }
            if let Some(definition) = &report.definition {
                println!("{:<30} {}:{}:{}", "defined at", definition.file, definition.line, definition.column);
            }
        }
    }
    Ok(())
}

async fn handle_include(
    session: &Session,
    file: String,
    symbol: String,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let includes = session.include_for(&file, &symbol).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&includes)?),
        OutputFormat::Table => {
            if includes.is_empty() {
                println!("No includes found for {}.", symbol);
            }
            for include in &includes {
                println!("{}", include);
            }
        }
    }
    Ok(())
}

async fn handle_complete(
    session: &Session,
    position: Position,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = tokio::fs::read_to_string(&position.file).await?;
    let offset = byte_offset(&text, position.row(), position.col());
    let items: Vec<CompletionItem> = session
        .complete_at(&position.file, text.as_bytes(), offset, position.row(), position.col())
        .await?
        .unwrap_or_default();

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No completions.");
            }
            for item in &items {
                let (signature, kind) = item.label.split_once('\t').unwrap_or((item.label.as_str(), ""));
                println!("{:<20} {}", kind, signature);
            }
        }
    }
    Ok(())
}

async fn handle_rename(
    session: &Session,
    position: Position,
    old_name: String,
    new_name: String,
    dry_run: bool,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan = session
        .rename_plan(&position.file, position.row(), position.col())
        .await?;

    let replaced = if dry_run {
        None
    } else {
        Some(plan.apply(&old_name, &new_name).await?)
    };

    match output {
        OutputFormat::Json => {
            let out = RenameOutput {
                files: plan.file_count(),
                occurrences: plan.occurrence_count(),
                replaced,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Table => {
            println!(
                "Rename {} occurrence(s) of {} in {} file(s) to {}",
                plan.occurrence_count(),
                old_name,
                plan.file_count(),
                new_name
            );
            for (file, lines) in &plan.mutations {
                println!("  {}", file);
                for (line, columns) in lines {
                    println!("    line {:<6} columns {:?}", line, columns);
                }
            }
            if let Some(replaced) = replaced {
                println!("Replaced {} occurrence(s).", replaced);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.global.verbose);

    let output = args.global.output.clone();
    let session = Session::new(build_config(&args.global));
    let shutdown = install_shutdown_handler();

    let run = async {
        match args.command {
            Commands::Monitor => handle_monitor(&session, &output).await,
            Commands::Decode => handle_decode(&output).await,
            Commands::Reindex {
                file,
                unsaved,
                wait_ms,
            } => {
                handle_reindex(&session, file, unsaved, Duration::from_millis(wait_ms), &output).await
            }
            Commands::Follow { position } => {
                handle_location(&session, LocationQuery::FollowSymbol, position, &output).await
            }
            Commands::References { position } => {
                handle_location(&session, LocationQuery::References, position, &output).await
            }
            Commands::SymbolInfo { position } => {
                handle_symbol_info(&session, position, &output).await
            }
            Commands::Include { file, symbol } => {
                handle_include(&session, file, symbol, &output).await
            }
            Commands::Complete { position } => handle_complete(&session, position, &output).await,
            Commands::Rename {
                position,
                old_name,
                new_name,
                dry_run,
            } => handle_rename(&session, position, old_name, new_name, dry_run, &output).await,
        }
    };

    let result = tokio::select! {
        result = run => result,
        _ = shutdown.cancelled() => Ok(()),
    };

    session.shutdown().await;
    result
}
