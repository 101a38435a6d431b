//! CLI binary for idscan-ingest.
//!
//! A thin shim over the library crate that maps CLI flags to `IngestConfig`
//! and prints records as JSON.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use idscan_ingest::{
    get_record, ingest_from_input, latest_record, set_verification_status, IngestConfig,
    IngestContext, IngestProgressCallback, LocalObjectStorage, ObjectStorage, PipelineState,
    ProgressCallback, RestObjectStorage, SqliteRecordStore, StageError, VerificationStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that follows the pipeline state and prints warnings
/// above itself.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Ingesting");
        bar.set_message("reading capture…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_state_change(&self, state: PipelineState) {
        if state.is_terminal() {
            self.bar.finish_and_clear();
        } else {
            self.bar.set_message(format!("{state}…"));
        }
    }

    fn on_warning(&self, warning: &StageError) {
        self.bar.println(format!("  {} {}", yellow("⚠"), warning));
    }

    fn on_complete(&self, record_id: i64) {
        self.bar
            .println(format!("{} record {} stored", green("✔"), bold(&record_id.to_string())));
    }

    fn on_failed(&self, error: &str) {
        let first_line = error.lines().next().unwrap_or(error);
        self.bar.println(format!("{} {}", red("✘"), red(first_line)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest a passport photo with a selfie
  idscan ingest passport.jpg --selfie me.jpg --submitted-by guest-17

  # Ingest from a URL, storing assets in a REST bucket
  idscan ingest https://example.com/id.png \
      --storage-url https://project.example.co --bucket identity-documents

  # Show the latest record, then approve it
  idscan latest
  idscan set-status 12 verified

ENVIRONMENT VARIABLES:
  IDSCAN_API_KEY        Extraction provider API key
  IDSCAN_MODEL_ID       Extraction model identifier
  IDSCAN_ACCOUNT        Account for the account-scoped product route
  IDSCAN_PRODUCT        Product for the account-scoped product route
  IDSCAN_BASE_URL       Extraction service origin
  IDSCAN_DB             SQLite record store path
  IDSCAN_STORAGE_DIR    Local asset directory
  IDSCAN_PUBLIC_URL     Base URL serving the local asset directory
  IDSCAN_STORAGE_URL    REST object storage origin (overrides the local directory)
  IDSCAN_BUCKET         REST storage bucket
  IDSCAN_STORAGE_KEY    REST storage API key
"#;

/// Ingest identity-document photos and manage the resulting records.
#[derive(Parser, Debug)]
#[command(
    name = "idscan",
    version,
    about = "Ingest identity-document photos into verifiable identity records",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite record store.
    #[arg(long, global = true, env = "IDSCAN_DB", default_value = "idscan.db")]
    db: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "IDSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON result.
    #[arg(short, long, global = true, env = "IDSCAN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ingestion pipeline on one document capture.
    Ingest(IngestArgs),
    /// Print one record.
    Show {
        id: i64,
    },
    /// Print the most recently inserted record.
    Latest,
    /// Set a record's verification status.
    SetStatus {
        id: i64,
        /// pending, verified or rejected.
        #[arg(value_parser = parse_status)]
        status: VerificationStatus,
    },
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Document capture: local path, HTTP(S) URL or data URL.
    document: String,

    /// Companion selfie capture.
    #[arg(long)]
    selfie: Option<String>,

    /// Recorded as `submitted_by` on the record.
    #[arg(long, env = "IDSCAN_SUBMITTED_BY")]
    submitted_by: Option<String>,

    /// Extraction model identifier.
    #[arg(long, env = "IDSCAN_MODEL_ID")]
    model_id: Option<String>,

    /// Face crop padding in pixels.
    #[arg(long, default_value_t = 10)]
    face_padding: u32,

    /// Signature crop padding in pixels.
    #[arg(long, default_value_t = 5)]
    signature_padding: u32,

    /// JPEG quality for crops (1–100).
    #[arg(long, default_value_t = 92,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Per-endpoint extraction timeout in seconds.
    #[arg(long, env = "IDSCAN_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds for URL captures.
    #[arg(long, env = "IDSCAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Local directory receiving uploaded assets.
    #[arg(long, env = "IDSCAN_STORAGE_DIR", default_value = "idscan-assets")]
    storage_dir: PathBuf,

    /// Base URL under which the local asset directory is served.
    #[arg(long, env = "IDSCAN_PUBLIC_URL", default_value = "http://localhost:8080")]
    public_url: String,

    /// REST object storage origin; replaces the local directory when set.
    #[arg(long, env = "IDSCAN_STORAGE_URL")]
    storage_url: Option<String>,

    /// REST storage bucket.
    #[arg(long, env = "IDSCAN_BUCKET", default_value = "identity-documents")]
    bucket: String,

    /// REST storage API key.
    #[arg(long, env = "IDSCAN_STORAGE_KEY", hide_env_values = true)]
    storage_key: Option<String>,

    /// Disable the spinner.
    #[arg(long, env = "IDSCAN_NO_PROGRESS")]
    no_progress: bool,
}

fn parse_status(s: &str) -> Result<VerificationStatus, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters during `ingest`, so
    // library INFO logs are only shown when it is off.
    let spinner = matches!(cli.command, Command::Ingest(ref a) if !a.no_progress) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinner {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store = SqliteRecordStore::open(&cli.db)
        .await
        .with_context(|| format!("Failed to open record store {:?}", cli.db))?;

    match cli.command {
        Command::Ingest(ref args) => {
            let progress: Option<ProgressCallback> = if spinner {
                Some(CliProgressCallback::new() as Arc<dyn IngestProgressCallback>)
            } else {
                None
            };
            let config = build_config(args, Arc::new(store), progress)?;

            let mut ctx = IngestContext::new();
            if let Some(ref who) = args.submitted_by {
                ctx = ctx.submitted_by(who.clone());
            }

            // Ctrl-C cancels the run; nothing is persisted after that.
            let token = ctx.cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            });

            let output = ingest_from_input(&args.document, args.selfie.as_deref(), &ctx, &config)
                .await
                .context("Ingestion failed")?;
            print_json(&output)?;

            if !cli.quiet {
                eprintln!(
                    "{}  record {}  via {}  {} fields  face {}  signature {}  {}ms",
                    if output.warnings.is_empty() {
                        green("✔")
                    } else {
                        yellow("⚠")
                    },
                    output.record.id,
                    output.stats.endpoint,
                    output.stats.populated_fields,
                    if output.has_face() { "✓" } else { "–" },
                    if output.has_signature() { "✓" } else { "–" },
                    output.stats.total_duration_ms,
                );
            }
        }
        Command::Show { id } => {
            let config = store_only_config(store)?;
            let record = get_record(&config, id)
                .await?
                .with_context(|| format!("Record {id} not found"))?;
            print_json(&record)?;
        }
        Command::Latest => {
            let config = store_only_config(store)?;
            match latest_record(&config).await? {
                Some(record) => print_json(&record)?,
                None => {
                    if !cli.quiet {
                        eprintln!("No identity record yet");
                    }
                    println!("null");
                }
            }
        }
        Command::SetStatus { id, status } => {
            let config = store_only_config(store)?;
            let record = set_verification_status(&config, id, status)
                .await
                .context("Status update failed")?;
            print_json(&record)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

fn store_only_config(store: SqliteRecordStore) -> Result<IngestConfig> {
    IngestConfig::builder()
        .store(Arc::new(store))
        .build()
        .context("Invalid configuration")
}

/// Map CLI args to `IngestConfig`.
fn build_config(
    args: &IngestArgs,
    store: Arc<SqliteRecordStore>,
    progress: Option<ProgressCallback>,
) -> Result<IngestConfig> {
    let storage: Arc<dyn ObjectStorage> = match args.storage_url {
        Some(ref url) => {
            let key = args
                .storage_key
                .clone()
                .context("--storage-key (or IDSCAN_STORAGE_KEY) is required with --storage-url")?;
            Arc::new(RestObjectStorage::new(url.clone(), args.bucket.clone(), key)?)
        }
        None => Arc::new(LocalObjectStorage::new(
            args.storage_dir.clone(),
            args.public_url.clone(),
        )),
    };

    let mut builder = IngestConfig::from_env()
        .face_padding(args.face_padding)
        .signature_padding(args.signature_padding)
        .jpeg_quality(args.jpeg_quality)
        .extraction_timeout_secs(args.api_timeout)
        .download_timeout_secs(args.download_timeout)
        .storage(storage)
        .store(store);

    if let Some(ref model) = args.model_id {
        builder = builder.model_id(model.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
