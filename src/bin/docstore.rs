//! CLI binary for docstore.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DocstoreConfig`, wires a backend and a SQLite metadata store, and prints
//! results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docstore::{
    BackendConfig, DocstoreConfig, DocstoreError, DocumentPatch, DocumentService, IngestObserver,
    IngestionPipeline, Locator, RemoteConfig, SqliteMetadataStore, Stage, Upload,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Stage printer ────────────────────────────────────────────────────────────

/// Prints each ingest stage to stderr as it is reached.
struct StagePrinter;

impl IngestObserver for StagePrinter {
    fn on_stage(&self, _key: Option<&str>, stage: Stage) {
        eprintln!("  {} {}", dim("→"), dim(stage.as_str()));
    }

    fn on_failure(&self, _key: Option<&str>, stage: Stage, error: &DocstoreError) {
        eprintln!("  {} {} {}", red("✗"), stage, dim(&error.to_string()));
    }

    fn on_cleanup_failed(&self, key: &str, what: &str, detail: &str) {
        eprintln!("  {} cleanup of {what} for {key} failed: {detail}", red("!"));
    }
}

// ── CLI definition ───────────────────────────────────────────────────────────

/// Validate, sanitize and store documents; read them back page by page.
#[derive(Parser, Debug)]
#[command(
    name = "docstore",
    version,
    about = "Validate, sanitize and store documents; read them back page by page",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory documents are committed to (local backend).
    #[arg(long, global = true, env = "DOCSTORE_UPLOAD_ROOT", default_value = "uploads")]
    upload_root: PathBuf,

    /// Directory for per-request staging. Default: <upload-root>/.staging.
    #[arg(long, global = true, env = "DOCSTORE_STAGING_ROOT")]
    staging_root: Option<PathBuf>,

    /// SQLite metadata database. Default: <upload-root>/documents.db.
    #[arg(long, global = true, env = "DOCSTORE_DATABASE")]
    database: Option<PathBuf>,

    /// Storage backend.
    #[arg(long, global = true, env = "DOCSTORE_BACKEND", value_enum, default_value = "local")]
    backend: BackendArg,

    /// S3-compatible endpoint URL (remote backend).
    #[arg(long, global = true, env = "DOCSTORE_S3_ENDPOINT")]
    endpoint: Option<String>,

    /// Access key (remote backend).
    #[arg(long, global = true, env = "DOCSTORE_S3_ACCESS_KEY", default_value = "")]
    access_key: String,

    /// Secret key (remote backend).
    #[arg(long, global = true, env = "DOCSTORE_S3_SECRET_KEY", default_value = "", hide_env_values = true)]
    secret_key: String,

    /// Region (remote backend).
    #[arg(long, global = true, env = "DOCSTORE_S3_REGION", default_value = "us-east-1")]
    region: String,

    /// Bucket (remote backend).
    #[arg(long, global = true, env = "DOCSTORE_S3_BUCKET", default_value = "")]
    bucket: String,

    /// Key prefix inside the bucket, e.g. `documents/`.
    #[arg(long, global = true, env = "DOCSTORE_S3_PREFIX", default_value = "")]
    prefix: String,

    /// Maximum upload size in MiB.
    #[arg(long, global = true, env = "DOCSTORE_MAX_UPLOAD_MB", default_value_t = 4)]
    max_upload_mb: u64,

    /// Store uploads without sanitizing them.
    #[arg(long, global = true, env = "DOCSTORE_NO_SANITIZE")]
    no_sanitize: bool,

    /// Allowed extensions (comma-separated).
    #[arg(long, global = true, env = "DOCSTORE_ALLOW", value_delimiter = ',', default_value = "pdf")]
    allow: Vec<String>,

    /// Timeout for a single backend call, in seconds.
    #[arg(long, global = true, env = "DOCSTORE_IO_TIMEOUT", default_value_t = 30)]
    io_timeout: u64,

    /// Print results and errors as JSON.
    #[arg(long, global = true, env = "DOCSTORE_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs and per-stage output.
    #[arg(short, long, global = true, env = "DOCSTORE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCSTORE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a local file.
    Ingest {
        path: PathBuf,
        /// Filename to record instead of the file's own name.
        #[arg(long)]
        name: Option<String>,
    },
    /// List all documents.
    List,
    /// Show one document.
    Get { id: i64 },
    /// Update a document's name, storage key or locator.
    Patch {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        storage_key: Option<String>,
        /// `file:///abs/path` or `s3://bucket/key`.
        #[arg(long)]
        locator: Option<Locator>,
    },
    /// Delete a document and its stored object.
    Delete { id: i64 },
    /// Print the text of one page.
    Extract {
        id: i64,
        #[arg(long)]
        page: i64,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Local,
    Remote,
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || cli.json {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&cli, &err);
            ExitCode::FAILURE
        }
    }
}

fn report_error(cli: &Cli, err: &anyhow::Error) {
    match err.downcast_ref::<DocstoreError>() {
        Some(e) if cli.json => {
            let body = serde_json::to_string_pretty(&e.to_body())
                .unwrap_or_else(|_| format!(r#"{{"status":"error","result":"{e}"}}"#));
            println!("{body}");
        }
        Some(e) => {
            eprintln!("{} [{}] {:#}", red("error:"), e.status_code(), err);
        }
        None => eprintln!("{} {:#}", red("error:"), err),
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;
    let database = cli
        .database
        .clone()
        .unwrap_or_else(|| config.upload_root.join("documents.db"));
    if let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let backend = docstore::storage::connect(&config)
        .await
        .context("Failed to connect storage backend")?;
    let metadata = SqliteMetadataStore::open(&database)
        .await
        .with_context(|| format!("Failed to open metadata database {}", database.display()))?;

    let mut pipeline = IngestionPipeline::new(config, backend, Arc::new(metadata))
        .context("Failed to prepare staging directory")?;
    if cli.verbose && !cli.json {
        pipeline = pipeline.with_observer(Arc::new(StagePrinter));
    }
    let service = DocumentService::new(pipeline);

    match cli.command {
        Command::Ingest { ref path, ref name } => {
            let filename = match name {
                Some(n) => n.clone(),
                None => file_name(path)?,
            };
            let upload = Upload::from_path(filename, path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let doc = service
                .ingest(upload)
                .await
                .map_err(DocstoreError::from)
                .context("Ingest failed")?;
            emit(cli, &doc, || {
                format!(
                    "{} {} {}",
                    green("✓"),
                    bold(&format!("#{} {}", doc.id, doc.display_name)),
                    dim(&doc.locator.to_string())
                )
            })
        }
        Command::List => {
            let docs = service.list().await?;
            emit(cli, &docs, || {
                docs.iter()
                    .map(|d| format!("{:>5}  {}  {}", d.id, d.display_name, dim(&d.storage_key)))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        Command::Get { id } => {
            let doc = service.get(id).await?;
            emit(cli, &doc, || {
                format!(
                    "id:          {}\nname:        {}\nstorage key: {}\nlocator:     {}\ncreated:     {}\nupdated:     {}",
                    doc.id, doc.display_name, doc.storage_key, doc.locator, doc.created_at, doc.updated_at
                )
            })
        }
        Command::Patch {
            id,
            ref name,
            ref storage_key,
            ref locator,
        } => {
            let patch = DocumentPatch {
                display_name: name.clone(),
                storage_key: storage_key.clone(),
                locator: locator.clone(),
            };
            let doc = service.patch(id, patch).await?;
            emit(cli, &doc, || {
                format!("{} updated #{} {}", green("✓"), doc.id, doc.display_name)
            })
        }
        Command::Delete { id } => {
            let doc = service.delete(id).await?;
            emit(cli, &doc, || {
                format!("{} deleted #{} {}", green("✓"), doc.id, doc.display_name)
            })
        }
        Command::Extract { id, page } => {
            let extract = service.extract_page(id, page).await?;
            emit(cli, &extract, || {
                format!(
                    "{}\n{}",
                    dim(&format!(
                        "{} page {}/{}",
                        extract.document_name, extract.page, extract.number_of_pages
                    )),
                    extract.text
                )
            })
        }
    }
}

fn build_config(cli: &Cli) -> Result<DocstoreConfig> {
    let backend = match cli.backend {
        BackendArg::Local => BackendConfig::Local,
        BackendArg::Remote => BackendConfig::Remote(RemoteConfig {
            endpoint: cli.endpoint.clone(),
            access_key: cli.access_key.clone(),
            secret_key: cli.secret_key.clone(),
            region: cli.region.clone(),
            bucket: cli.bucket.clone(),
            prefix: cli.prefix.clone(),
        }),
    };

    let mut builder = DocstoreConfig::builder()
        .upload_root(&cli.upload_root)
        .allowed_extensions(&cli.allow)
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
        .sanitize_on_ingest(!cli.no_sanitize)
        .backend(backend)
        .io_timeout_secs(cli.io_timeout);
    if let Some(ref staging) = cli.staging_root {
        builder = builder.staging_root(staging);
    }
    Ok(builder.build()?)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

/// Print `value` as JSON, or the human rendering unless `--quiet`.
fn emit<T: Serialize>(cli: &Cli, value: &T, human: impl FnOnce() -> String) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to serialize output")?
        );
    } else if !cli.quiet {
        println!("{}", human());
    }
    Ok(())
}
