//! CLI binary for pdf2csv.
//!
//! A thin shim over the library crate: maps flags to `ConversionConfig`,
//! follows the converter's state on a spinner, and reports each result.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2csv::config::DEFAULT_MODEL;
use pdf2csv::{
    convert_each, status_stream, ConversionConfig, ConversionOutput, ConversionStatus, Converter,
    ErrorKind, FileSource, OutputTarget, Pdf2CsvError, PipelineState, RowLayout,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
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
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER_TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a statement; writes ./statement_converted.csv
  pdf2csv statement.pdf

  # Several files into one directory
  pdf2csv scans/*.png -o out/

  # Print the CSV instead of writing a file
  pdf2csv invoice.jpg --stdout > invoice.csv

  # Convert from URL
  pdf2csv https://example.com/reports/q3.pdf

  # Use another provider through edgequake-llm
  pdf2csv --provider openai --model gpt-4.1 report.pdf

  # Keep rows ragged instead of padding them to the widest row
  pdf2csv --layout ragged report.pdf

OUTPUT:
  Each section the model finds (a page, a table) becomes a block of rows.
  With more than one section, blocks are separated by two empty rows and
  start with a "--- SECTION: <NAME> ---" banner row.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (API_KEY is also read)
  PDF2CSV_MODEL           Model ID
  PDF2CSV_PROVIDER        edgequake-llm provider (openai, anthropic, ollama, ...)
  PDF2CSV_ENDPOINT        Gemini API base URL
  OPENAI_API_KEY, ANTHROPIC_API_KEY, ...
                          Read by the provider named with --provider
  RUST_LOG                Override the log filter
"#;

/// Convert PDF documents and images to CSV using a multimodal model.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2csv",
    version,
    about = "Convert PDF documents and images to CSV using a multimodal model",
    long_about = "Convert PDF documents and images (local files or URLs) to CSV. The whole \
document is sent to a multimodal model (Gemini by default, or any edgequake-llm provider), \
which returns one grid of cells per page or logical section.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/image paths or HTTP/HTTPS URLs, converted one at a time.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Directory for the `<name>_converted.csv` files.
    #[arg(short, long, env = "PDF2CSV_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Print the CSV to stdout instead of writing files.
    #[arg(long)]
    stdout: bool,

    /// Model ID.
    #[arg(long, env = "PDF2CSV_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Analyze through an edgequake-llm provider instead of the Gemini API.
    #[arg(
        long,
        env = "PDF2CSV_PROVIDER",
        long_help = "LLM provider name: openai, anthropic, ollama, azure, ...\n\
          The provider reads its own API key variable. Set --model to a model of that provider."
    )]
    provider: Option<String>,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Gemini API base URL.
    #[arg(long, env = "PDF2CSV_ENDPOINT")]
    endpoint: Option<String>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDF2CSV_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max output tokens for the model's answer.
    #[arg(long, env = "PDF2CSV_MAX_TOKENS", default_value_t = 32_768)]
    max_tokens: u32,

    /// Analysis timeout in seconds.
    #[arg(long, env = "PDF2CSV_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// HTTP download timeout in seconds, for URL inputs.
    #[arg(long, env = "PDF2CSV_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Path to a text file replacing the built-in instructions.
    #[arg(long, env = "PDF2CSV_INSTRUCTIONS")]
    instructions: Option<PathBuf>,

    /// Row layout of the CSV.
    #[arg(long, env = "PDF2CSV_LAYOUT", value_enum, default_value = "rectangular")]
    layout: LayoutArg,

    /// Print the conversion results as JSON on stdout.
    #[arg(long, env = "PDF2CSV_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PDF2CSV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2CSV_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LayoutArg {
    /// Pad rows to the widest row.
    Rectangular,
    /// Keep each row's own width.
    Ragged,
}

impl From<LayoutArg> for RowLayout {
    fn from(v: LayoutArg) -> Self {
        match v {
            LayoutArg::Rectangular => RowLayout::Rectangular,
            LayoutArg::Ragged => RowLayout::Ragged,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters; keep library INFO
    // logs from tearing it apart.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build converter ──────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let converter =
        Arc::new(Converter::new(config).context("Failed to initialise the document analyzer")?);

    // Ctrl-C abandons the running attempt and stops the batch.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let converter = Arc::clone(&converter);
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
                converter.reset();
            }
        });
    }

    // ── Progress display ─────────────────────────────────────────────────
    let bar = show_progress.then(new_spinner);
    let watcher = bar.clone().map(|bar| {
        let mut states = status_stream(&converter);
        tokio::spawn(async move {
            while let Some(state) = states.next().await {
                render_state(&bar, &state);
            }
        })
    });

    // ── Run conversions ──────────────────────────────────────────────────
    let total = cli.inputs.len();
    let sources: Vec<FileSource> = cli.inputs.iter().map(|s| FileSource::parse(s)).collect();
    let mut batch = convert_each(Arc::clone(&converter), sources);

    let mut outputs: Vec<ConversionOutput> = Vec::with_capacity(total);
    let mut failed = 0usize;

    while let Some(item) = batch.next().await {
        match item.result {
            Ok(output) => {
                report(bar.as_ref(), cli.quiet, &success_line(&output));
                if cli.stdout {
                    write_stdout(&output.csv)?;
                }
                outputs.push(output);
            }
            Err(e) => {
                failed += 1;
                report(bar.as_ref(), false, &failure_line(&item.input, &e));
            }
        }
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
    }

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&outputs).context("Failed to serialise output")?;
        println!("{json}");
    }

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet && total > 1 {
        let done = outputs.len();
        eprintln!(
            "{} {}/{} files converted",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&done.to_string()),
            total
        );
    }

    if interrupted.load(Ordering::SeqCst) {
        anyhow::bail!("Interrupted");
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {total} inputs failed");
    }
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
async fn build_config(cli: &Cli) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .model(&cli.model)
        .temperature(cli.temperature)
        .max_output_tokens(cli.max_tokens)
        .analysis_timeout_secs(cli.timeout)
        .download_timeout_secs(cli.download_timeout)
        .row_layout(cli.layout.into());

    builder = if cli.stdout {
        builder.output(OutputTarget::Memory)
    } else {
        builder.output_dir(&cli.output_dir)
    };

    if let Some(ref path) = cli.instructions {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instructions from {:?}", path))?;
        builder = builder.instructions(text);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint);
    }

    builder.build().context("Invalid configuration")
}

fn new_spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&SPINNER_TICKS),
    );
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Show one state on the spinner: `[2/4] AI Analysis  report.pdf`.
fn render_state(bar: &ProgressBar, state: &PipelineState) {
    let file = state.file().map(|f| f.name.as_str()).unwrap_or("");
    match state.status().step() {
        Some((step, steps)) => {
            bar.set_prefix(format!("[{step}/{steps}]"));
            bar.set_message(format!("{}  {}", state.status().label(), dim(file)));
        }
        None => {
            bar.set_prefix("");
            let label = match state.status() {
                ConversionStatus::Error => red(state.status().label()),
                _ => state.status().label().to_string(),
            };
            bar.set_message(label);
        }
    }
}

fn success_line(output: &ConversionOutput) -> String {
    let target = output
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| output.file_name.clone());
    format!(
        "  {} {}  {}  {}",
        green("✓"),
        bold(&target),
        dim(&format!(
            "{} sections, {} rows",
            output.section_count, output.row_count
        )),
        dim(&format!(
            "{:.1}s, {} tokens in / {} out",
            output.stats.total_duration_ms as f64 / 1000.0,
            output.stats.input_tokens,
            output.stats.output_tokens
        )),
    )
}

fn failure_line(input: &str, e: &Pdf2CsvError) -> String {
    let hint = match e.kind() {
        ErrorKind::Analysis => format!("  {}", dim("(run with -v for details)")),
        _ => String::new(),
    };
    format!("  {} {}  {}{}", red("✗"), input, red(&e.user_message()), hint)
}

/// Print above the spinner if there is one, else to stderr.
fn report(bar: Option<&ProgressBar>, quiet: bool, line: &str) {
    if quiet {
        return;
    }
    match bar {
        Some(bar) => bar.println(line),
        None => eprintln!("{line}"),
    }
}

fn write_stdout(csv: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(csv.as_bytes())
        .context("Failed to write to stdout")?;
    handle.flush().context("Failed to write to stdout")
}
