//! CLI binary for case-intake.
//!
//! A thin shim over the library crate: each subcommand maps flags onto
//! `IntakeConfig` and calls one library stage, printing JSON to stdout.

use anyhow::{bail, Context, Result};
use case_intake::fields::autofix::auto_fix;
use case_intake::fields::validate::{check_rules, validate};
use case_intake::ocr::parse_ocr_response;
use case_intake::pipeline::flatten::{PageRasterizer, PdfiumRasterizer};
use case_intake::pipeline::input::SourceFormat;
use case_intake::pipeline::split::{split_to_dir, SplitOptions};
use case_intake::{
    merge_to_pdf, BlobLocation, FieldMap, HttpObjectStore, IntakeConfig, IntakeProgressCallback,
    IntakeService, MemoryObjectStore, MemoryRepository, MergeInput, MergeOptions, ObjectStore,
    PartType, ProgressCallback,
};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Intake");
        bar.set_message("Fetching sources…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl IntakeProgressCallback for CliProgressCallback {
    fn on_intake_start(&self, document_id: &str, total_sources: usize) {
        self.bar.println(format!(
            "{} {}",
            bold("◆"),
            bold(&format!("{document_id}: {total_sources} source document(s)"))
        ));
    }

    fn on_source_fetched(&self, index: usize, total_sources: usize, size_bytes: usize) {
        self.bar.println(format!(
            "  {} Source {index}/{total_sources}  {}",
            green("✓"),
            dim(&format!("{size_bytes} bytes"))
        ));
    }

    fn on_merge_complete(&self, page_count: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        self.bar.set_length(page_count as u64);
        self.bar.set_prefix("Storing");
    }

    fn on_page_stored(&self, _page_number: usize, _total_pages: usize) {
        self.bar.inc(1);
    }

    fn on_intake_complete(&self, document_id: &str, page_count: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {document_id}: {page_count} page(s) stored", green("✔"));
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Check a payload and print the resolved source URLs
  intake parse payload.json

  # Merge local files into one PDF
  intake normalize scan.tiff note.txt form.pdf -o merged.pdf

  # Split a PDF (or multi-frame TIFF) into per-page PDFs
  intake split merged.pdf --out-dir pages/

  # Clean and validate extracted fields
  intake autofix fields.json
  intake validate fields.json --part-type A

  # Dry-run a full ingest against a local directory laid out as <container>/<path>
  intake ingest payload.json --local-root ./blobs --dump ./processed

ENVIRONMENT VARIABLES:
  INTAKE_STORAGE_BASE_URL   Blob service base URL
  INTAKE_STORAGE_TOKEN      SAS query string or bearer token
  INTAKE_SOURCE_CONTAINER   Read-only container; uploads into it are refused
  INTAKE_PDFIUM_LIBRARY     Directory holding libpdfium for form flattening
  RUST_LOG                  Overrides --verbose / --quiet log filtering
"#;

/// Inbound case document intake tools.
#[derive(Parser, Debug)]
#[command(
    name = "intake",
    version,
    about = "Parse, normalise, split, fix and validate inbound case documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "INTAKE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "INTAKE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a payload and print the parsed form.
    Parse {
        payload: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Merge local sources into one PDF.
    Normalize {
        /// Sources, merged in the order given.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        /// Scan resolution assumed for image pages.
        #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u32).range(72..=600))]
        dpi: u32,
    },
    /// Split a document into one PDF per page.
    Split {
        input: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        /// Declared MIME type; guessed from the extension when absent.
        #[arg(long)]
        mime_type: Option<String>,
        /// Prefix recorded in each page's storage path.
        #[arg(long, default_value = "")]
        relative_dir: String,
        /// Copy form pages as-is instead of rasterising them.
        #[arg(long)]
        no_flatten: bool,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Apply auto-fix to a field map and print the result.
    Autofix { fields: PathBuf },
    /// Validate a field map.
    Validate {
        fields: PathBuf,
        /// A / institutional or B / professional.
        #[arg(long, default_value = "unknown")]
        part_type: String,
        /// Check the values exactly as given.
        #[arg(long)]
        no_autofix: bool,
    },
    /// Run the full ingest for a payload.
    Ingest {
        payload: PathBuf,
        /// Serve blobs from this directory (`<container>/<path>`) instead of
        /// the remote blob service.
        #[arg(long)]
        local_root: Option<PathBuf>,
        /// With --local-root: write the target container's blobs here.
        #[arg(long, requires = "local_root")]
        dump: Option<PathBuf>,
        /// Disable progress bar.
        #[arg(long, env = "INTAKE_NO_PROGRESS")]
        no_progress: bool,
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    #[arg(long, env = "INTAKE_STORAGE_BASE_URL")]
    storage_base_url: Option<String>,

    #[arg(long, env = "INTAKE_BLOB_PREFIX")]
    blob_prefix: Option<String>,

    #[arg(long, env = "INTAKE_DEFAULT_CONTAINER")]
    default_container: Option<String>,

    /// Containers recognised as a leading path segment (comma-separated).
    #[arg(long, env = "INTAKE_CHANNEL_CONTAINERS", value_delimiter = ',')]
    channel_containers: Vec<String>,

    #[arg(long, env = "INTAKE_SOURCE_CONTAINER")]
    source_container: Option<String>,

    #[arg(long, env = "INTAKE_TARGET_CONTAINER")]
    target_container: Option<String>,

    #[arg(long, env = "INTAKE_STORAGE_TOKEN", hide_env_values = true)]
    storage_token: Option<String>,

    #[arg(long, env = "INTAKE_STORAGE_MAX_RETRIES")]
    storage_max_retries: Option<u32>,

    #[arg(long, env = "INTAKE_IMAGE_DPI")]
    image_dpi: Option<u32>,

    #[arg(long, env = "INTAKE_PDFIUM_LIBRARY")]
    pdfium_library_path: Option<PathBuf>,

    #[arg(long, env = "INTAKE_UPLOAD_CONCURRENCY")]
    upload_concurrency: Option<usize>,
}

impl ConfigArgs {
    fn build(&self) -> Result<IntakeConfig> {
        let mut b = IntakeConfig::builder();
        if let Some(v) = &self.storage_base_url {
            b = b.storage_base_url(v);
        }
        if let Some(v) = &self.blob_prefix {
            b = b.blob_prefix(v);
        }
        if let Some(v) = &self.default_container {
            b = b.default_container(v);
        }
        b = b.channel_containers(self.channel_containers.iter().cloned());
        if let Some(v) = &self.source_container {
            b = b.source_container(v);
        }
        if let Some(v) = &self.target_container {
            b = b.target_container(v);
        }
        if let Some(v) = &self.storage_token {
            b = b.storage_token(v);
        }
        if let Some(v) = self.storage_max_retries {
            b = b.storage_max_retries(v);
        }
        if let Some(v) = self.image_dpi {
            b = b.image_dpi(v);
        }
        if let Some(v) = &self.pdfium_library_path {
            b = b.pdfium_library_path(v);
        }
        if let Some(v) = self.upload_concurrency {
            b = b.upload_concurrency(v);
        }
        b.build().context("Invalid configuration")
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Parse { payload, config } => {
            let config = config.build()?;
            let raw = read_json(&payload)?;
            let service = IntakeService::new(
                config,
                Arc::new(MemoryObjectStore::default()),
                Arc::new(MemoryRepository::new()),
            );
            let parsed = service.parse(&raw)?;
            print_json(&serde_json::to_value(&parsed)?)?;
        }

        Command::Normalize { inputs, output, dpi } => {
            let inputs = inputs
                .iter()
                .map(|p| {
                    let format = SourceFormat::from_path(p)
                        .with_context(|| format!("Cannot infer a format for {}", p.display()))?;
                    Ok(MergeInput::new(p, format.mime_type()))
                })
                .collect::<Result<Vec<_>>>()?;
            let artifact = merge_to_pdf(&inputs, &output, &MergeOptions { image_dpi: dpi })
                .context("Merge failed")?;
            print_json(&json!({
                "path": artifact.path,
                "page_count": artifact.page_count,
                "contributions": artifact.contributions,
                "size_bytes": artifact.size_bytes,
                "sha256": artifact.sha256,
            }))?;
        }

        Command::Split {
            input,
            out_dir,
            mime_type,
            relative_dir,
            no_flatten,
            config,
        } => {
            let config = config.build()?;
            let mime_type = match mime_type {
                Some(m) => m,
                None => SourceFormat::from_path(&input)
                    .map(|f| f.mime_type().to_string())
                    .with_context(|| format!("Cannot infer a format for {}; pass --mime-type", input.display()))?,
            };
            let options = SplitOptions {
                relative_dir,
                image_dpi: config.image_dpi,
                flatten_forms: !no_flatten,
            };
            let rasterizer = PdfiumRasterizer::from_config(&config);
            let rasterizer: Option<&dyn PageRasterizer> = (!no_flatten).then_some(&rasterizer as &dyn PageRasterizer);
            let pages = tokio::task::block_in_place(|| split_to_dir(&input, &mime_type, &out_dir, &options, rasterizer))
                .context("Split failed")?;
            let metadata = case_intake::PageMetadata::from_artifacts(&pages);
            print_json(&serde_json::to_value(&metadata)?)?;
        }

        Command::Autofix { fields } => {
            let fields = read_fields(&fields)?;
            let report = auto_fix(&fields);
            print_json(&json!({
                "fields": report.fields,
                "auto_fix_applied": report.applied,
            }))?;
        }

        Command::Validate {
            fields,
            part_type,
            no_autofix,
        } => {
            let fields = read_fields(&fields)?;
            let part_type = PartType::parse(&part_type);
            let value = if no_autofix {
                let errors = check_rules(&fields, part_type);
                json!({ "has_errors": !errors.is_empty(), "field_errors": errors })
            } else {
                serde_json::to_value(validate(&fields, part_type).stamped("cli"))?
            };
            print_json(&value)?;
        }

        Command::Ingest {
            payload,
            local_root,
            dump,
            no_progress,
            config,
        } => {
            let mut config = config.build()?;
            let show_progress = !cli.quiet && !no_progress;
            if show_progress {
                config.progress_callback = Some(CliProgressCallback::new() as ProgressCallback);
            }
            let raw = read_json(&payload)?;

            let memory = match &local_root {
                Some(root) => Some(Arc::new(load_local_root(root, &config.storage_base_url)?)),
                None => None,
            };
            let store: Arc<dyn ObjectStore> = match &memory {
                Some(m) => m.clone() as Arc<dyn ObjectStore>,
                None => Arc::new(HttpObjectStore::new(&config)?),
            };
            let target = config.target_container.clone();
            let service = IntakeService::new(config, store, Arc::new(MemoryRepository::new()));
            let output = service.ingest_package(&raw).await.context("Ingest failed")?;

            if let (Some(memory), Some(dir)) = (&memory, &dump) {
                dump_container(memory, &target, dir).await?;
            }
            print_json(&json!({
                "document_id": output.document_id,
                "consolidated": output.consolidated.map(|l| l.to_string()),
                "pages": output.pages,
                "duration_ms": output.duration_ms,
            }))?;
        }
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Accepts either an OCR response (`{"fields": {...}}`) or a bare field map.
fn read_fields(path: &Path) -> Result<FieldMap> {
    let raw = read_json(path)?;
    let body = match raw {
        Value::Object(ref map) if map.contains_key("fields") => raw,
        Value::Object(_) => json!({ "fields": raw }),
        _ => bail!("{} must contain a JSON object", path.display()),
    };
    Ok(parse_ocr_response(body)?.fields)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Seed an in-memory store from `<root>/<container>/<path…>`.
fn load_local_root(root: &Path, base_url: &str) -> Result<MemoryObjectStore> {
    let store = MemoryObjectStore::new(base_url);
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).with_context(|| format!("Cannot list {}", dir.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let rel = path.strip_prefix(root)?;
            let mut parts = rel.iter().map(|p| p.to_string_lossy().into_owned());
            let Some(container) = parts.next() else { continue };
            let blob_path: Vec<String> = parts.collect();
            if blob_path.is_empty() {
                continue;
            }
            let bytes = std::fs::read(&path).with_context(|| format!("Cannot read {}", path.display()))?;
            let content_type = SourceFormat::from_path(&path)
                .map(|f| f.mime_type())
                .unwrap_or("application/octet-stream");
            store.insert(BlobLocation::new(container, blob_path.join("/")), bytes, content_type);
        }
    }
    Ok(store)
}

async fn dump_container(store: &MemoryObjectStore, container: &str, dir: &Path) -> Result<()> {
    for location in store.locations().into_iter().filter(|l| l.container == container) {
        let bytes = store.get(&location).await?;
        let dest = dir.join(&location.path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        std::fs::write(&dest, bytes).with_context(|| format!("Cannot write {}", dest.display()))?;
    }
    Ok(())
}
