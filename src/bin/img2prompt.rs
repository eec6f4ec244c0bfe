//! CLI binary for edgequake-img2prompt.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`,
//! walks a session through validate → confirm → run, and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_img2prompt::{
    render_json, render_markdown, render_prompts, resolve_client, write_atomic, BatchConfig,
    BatchPipeline, BatchProgressCallback, BatchSession, BatchSummary, CostExposure, Notice,
    ProgressCallback, PromptKind, UploadedFile,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a step-based bar plus one log line per file.
struct CliProgressCallback {
    bar: ProgressBar,
    file_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    /// The bar stays hidden until the run starts so it never draws over the
    /// confirmation prompt.
    fn new() -> Arc<Self> {
        let bar = ProgressBar::hidden();
        Arc::new(Self {
            bar,
            file_started: Mutex::new(None),
        })
    }

    fn elapsed(&self) -> String {
        let secs = self
            .file_started
            .lock()
            .unwrap()
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {percent:>3}%  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_draw_target(ProgressDrawTarget::stderr());
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_files} file(s)…"))
        ));
    }

    fn on_file_start(&self, file_index: usize, total_files: usize, file_name: &str) {
        *self.file_started.lock().unwrap() = Some(Instant::now());
        self.bar
            .set_message(format!("{file_index}/{total_files} {file_name}"));
    }

    fn on_progress(&self, completed_steps: usize, total_steps: usize) {
        self.bar.set_length(total_steps as u64);
        self.bar.set_position(completed_steps as u64);
    }

    fn on_notice(&self, notice: &Notice) {
        self.bar
            .println(format!("  {} {}", yellow("!"), yellow(&notice.to_string())));
    }

    fn on_file_complete(&self, file_name: &str, prompt_count: usize) {
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            green("✓"),
            file_name,
            dim(&format!("{prompt_count} prompt set(s)")),
            self.elapsed(),
        ));
    }

    fn on_file_error(&self, file_name: &str, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            red("✗"),
            file_name,
            red(&msg),
            self.elapsed(),
        ));
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Prompts for every image in a folder, Markdown report on stdout
  img2prompt photos/*.jpg

  # Skip the confirmation prompt and save the report
  img2prompt --yes shots/*.png -o prompts.md

  # Only the video prompts, one per line (pipe into pbcopy / xclip)
  img2prompt --yes --only video clip-stills/*.webp | pbcopy

  # Full JSON summary
  img2prompt --yes --json *.jpg > prompts.json

  # Just check the API key
  img2prompt --validate-only

  # Another provider via edgequake-llm
  img2prompt --provider anthropic --model claude-sonnet-4-20250514 photo.jpg

INPUT:
  JPEG, PNG, GIF and WEBP images up to 50 MB each. PDFs are accepted but
  their content is not analysed yet; they are reported and skipped.

COST:
  Estimated as  qualifying images × $0.00765  +  tokens × $0.00003.
  Each image costs at most two API calls (classify, then generate).

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (same as --api-key)
  IMG2PROMPT_MODEL        Override model ID
  IMG2PROMPT_PROVIDER     Use an edgequake-llm provider instead of OpenAI REST
  IMG2PROMPT_BASE_URL     OpenAI-compatible endpoint root
  RUST_LOG                Fine-grained log filter
"#;

/// Generate image and video prompts from pictures using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "img2prompt",
    version,
    about = "Generate image, video and creative prompts from pictures using Vision LLMs",
    long_about = "Classify each image with a Vision Language Model, skip the ones that are not \
meaningful content, and generate a detailed image prompt, a video prompt and a creative \
variant for the rest. Uses the OpenAI API by default; any edgequake-llm provider works too.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image files to process (JPEG, PNG, GIF, WEBP; PDF accepted).
    files: Vec<PathBuf>,

    /// API key for the OpenAI REST client.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// edgequake-llm provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "IMG2PROMPT_PROVIDER")]
    provider: Option<String>,

    /// Vision model ID.
    #[arg(long, env = "IMG2PROMPT_MODEL", default_value = "gpt-4o")]
    model: String,

    /// Root of an OpenAI-compatible API.
    #[arg(long, env = "IMG2PROMPT_BASE_URL", default_value = "https://api.openai.com/v1")]
    base_url: String,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "IMG2PROMPT_OUTPUT")]
    output: Option<PathBuf>,

    /// Output only one prompt kind, one per line.
    #[arg(long, value_enum, conflicts_with = "json")]
    only: Option<OnlyArg>,

    /// Output the full summary as JSON.
    #[arg(long, env = "IMG2PROMPT_JSON")]
    json: bool,

    /// Accept the cost estimate without asking.
    #[arg(short, long)]
    yes: bool,

    /// Check the credential and exit.
    #[arg(long)]
    validate_only: bool,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "IMG2PROMPT_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Retries per call on rate limits, 5xx and network errors.
    #[arg(long, env = "IMG2PROMPT_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-call API timeout in seconds.
    #[arg(long, env = "IMG2PROMPT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Initial retry delay in milliseconds, doubled per attempt.
    #[arg(long, env = "IMG2PROMPT_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Max output tokens for the classification call.
    #[arg(long, env = "IMG2PROMPT_CLASSIFY_MAX_TOKENS", default_value_t = 500)]
    classify_max_tokens: usize,

    /// Max output tokens for the prompt-generation call.
    #[arg(long, env = "IMG2PROMPT_GENERATE_MAX_TOKENS", default_value_t = 800)]
    generate_max_tokens: usize,

    /// Per-file upload limit in bytes.
    #[arg(long, env = "IMG2PROMPT_MAX_UPLOAD_BYTES", default_value_t = 50 * 1024 * 1024)]
    max_upload_bytes: u64,

    /// Disable progress bar.
    #[arg(long, env = "IMG2PROMPT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMG2PROMPT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMG2PROMPT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OnlyArg {
    Image,
    Video,
    Creative,
}

impl From<OnlyArg> for PromptKind {
    fn from(v: OnlyArg) -> Self {
        match v {
            OnlyArg::Image => PromptKind::Image,
            OnlyArg::Video => PromptKind::Video,
            OnlyArg::Creative => PromptKind::Creative,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose mode always wins.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    let progress_cb: Option<ProgressCallback> = if show_progress && !cli.validate_only {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let client = resolve_client(&config, cli.api_key.as_deref())
        .context("Could not configure a vision provider")?;
    let pipeline = BatchPipeline::new(client, config);
    let mut session = BatchSession::new();

    // ── Credential ───────────────────────────────────────────────────────
    if let Err(e) = pipeline.validate_credential(&mut session).await {
        anyhow::bail!("{}", e.user_hint());
    }
    if !cli.quiet {
        eprintln!("{} API credential valid", green("✔"));
    }
    if cli.validate_only {
        return Ok(());
    }

    // ── Intake ───────────────────────────────────────────────────────────
    let limit = pipeline.config().max_upload_bytes;
    for path in &cli.files {
        match UploadedFile::from_path(path, limit).await {
            Ok(file) => {
                session.enqueue(file);
            }
            Err(e) => eprintln!("{} {}", red("✗"), e),
        }
    }

    // ── Cost confirmation ────────────────────────────────────────────────
    let exposure = pipeline
        .request_run(&session)
        .context("Nothing to process")?;
    if !cli.yes && !confirm(&exposure)? {
        eprintln!("Aborted.");
        return Ok(());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = pipeline
        .run(&mut session, exposure.confirm())
        .await
        .context("Batch run failed")?;

    let rendered = if cli.json {
        render_json(&summary)?
    } else if let Some(kind) = cli.only {
        render_prompts(&summary.results, kind.into())
    } else {
        render_markdown(&summary)
    };

    if let Some(ref path) = cli.output {
        write_atomic(path, &rendered)
            .await
            .context("Failed to write output")?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?;
        if !rendered.is_empty() && !rendered.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet {
        print_summary(&summary, cli.output.as_ref());
    }

    Ok(())
}

/// Map CLI args to `BatchConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .api_base_url(&cli.base_url)
        .model(&cli.model)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .classify_max_tokens(cli.classify_max_tokens)
        .generate_max_tokens(cli.generate_max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .max_upload_bytes(cli.max_upload_bytes);

    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Show the cost exposure and ask for a y/N answer on stdin.
fn confirm(exposure: &CostExposure) -> Result<bool> {
    eprintln!(
        "{} {} file(s), {} image(s) to analyse, up to {} API call(s)",
        cyan("◆"),
        bold(&exposure.file_count.to_string()),
        exposure.raster_files,
        exposure.max_api_calls,
    );
    eprintln!(
        "   up to ${:.4} for images, plus ${} per output token",
        exposure.max_image_cost, exposure.per_output_token
    );
    eprint!("Proceed? [y/N] ");
    io::stderr().flush().ok();

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_summary(summary: &BatchSummary, output: Option<&PathBuf>) {
    let failed = summary.failed.len();
    let mark = if failed == 0 { green("✔") } else { cyan("⚠") };
    let target = output
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();

    eprintln!(
        "{}  {} prompt set(s) from {} image(s){}{}",
        mark,
        summary.prompt_count(),
        summary.qualifying_images(),
        if failed > 0 {
            format!("  ({} file(s) failed)", red(&failed.to_string()))
        } else {
            String::new()
        },
        target,
    );
    eprintln!(
        "   {} tokens  ·  estimated cost ${:.4}",
        dim(&summary.usage.tokens.to_string()),
        summary.usage.estimated_cost,
    );
}
