//! Conversion orchestration: the [`Converter`] owns the state machine and
//! sequences the pipeline stages for one attempt at a time.
//!
//! ## Single flight
//!
//! A converter runs at most one attempt. A file offered while an attempt is
//! in flight (or after one completed, until [`Converter::reset`]) is refused
//! with [`Pdf2CsvError::Busy`] and changes nothing. After an error a new file
//! may be offered directly.
//!
//! ## Cancellation
//!
//! [`Converter::reset`] aborts the in-flight attempt and returns to `Idle`.
//! Every attempt carries an id, so a stage that finishes after the reset
//! (e.g. an Analyzer response already on the wire) is recognised as stale:
//! its result is discarded and the caller gets [`Pdf2CsvError::Cancelled`].

use crate::config::ConversionConfig;
use crate::error::Pdf2CsvError;
use crate::model::{ConversionOutput, ConversionStats, FileDescriptor};
use crate::pipeline::analyze::{resolve_analyzer, Analyzer};
use crate::pipeline::input::{self, FileSource};
use crate::pipeline::{encode, serialize};
use crate::prompts::DEFAULT_INSTRUCTIONS;
use crate::state::{AttemptId, ConversionStatus, Event, PipelineState, TransitionError};
use futures::future::{AbortHandle, Abortable};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Drives conversions and publishes their progress.
///
/// # Example
/// ```rust,no_run
/// use pdf2csv::{ConversionConfig, Converter, FileSource};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let converter = Converter::new(ConversionConfig::default())?;
/// let output = converter.convert(FileSource::parse("statement.pdf")).await?;
/// println!("wrote {}", output.file_name);
/// # Ok(())
/// # }
/// ```
pub struct Converter {
    analyzer: Arc<dyn Analyzer>,
    config: ConversionConfig,
    state: watch::Sender<PipelineState>,
    next_attempt: AtomicU64,
    in_flight: Mutex<Option<(AttemptId, AbortHandle)>>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("analyzer", &self.analyzer.name())
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Converter {
    /// Build a converter, resolving the Analyzer from `config`.
    ///
    /// # Errors
    /// Configuration errors (missing API key, unknown provider). No network
    /// request is made.
    pub fn new(config: ConversionConfig) -> Result<Self, Pdf2CsvError> {
        let analyzer = resolve_analyzer(&config)?;
        Ok(Self::with_analyzer(analyzer, config))
    }

    /// Build a converter around an existing Analyzer.
    pub fn with_analyzer(analyzer: Arc<dyn Analyzer>, config: ConversionConfig) -> Self {
        let (state, _) = watch::channel(PipelineState::new());
        Self {
            analyzer,
            config,
            state,
            next_attempt: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Name of the Analyzer in use.
    pub fn analyzer_name(&self) -> &str {
        self.analyzer.name()
    }

    pub fn status(&self) -> ConversionStatus {
        self.state.borrow().status()
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Observe state changes. Receivers are read-only.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Convert one selected file and deliver the CSV.
    ///
    /// # Errors
    /// * [`Pdf2CsvError::Busy`]: an attempt is in flight or completed; the
    ///   state is unchanged
    /// * Validation errors: the file type is refused; the state is unchanged,
    ///   except for a URL whose served type is refused after download starts,
    ///   which ends in `Error`
    /// * Acquisition / Analysis / Serialization errors: the attempt ended in
    ///   `Error`
    /// * [`Pdf2CsvError::Cancelled`]: [`Converter::reset`] was called while
    ///   the attempt ran
    pub async fn convert(&self, source: FileSource) -> Result<ConversionOutput, Pdf2CsvError> {
        let status = self.status();
        if !status.accepts_files() {
            warn!(
                "Ignoring {}: converter is {}",
                source.display_name(),
                status
            );
            return Err(Pdf2CsvError::Busy { status });
        }

        let descriptor = input::inspect(&source).map_err(|e| {
            warn!("Rejected {}: {}", source.display_name(), e);
            e
        })?;

        let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let (handle, registration) = AbortHandle::new_pair();
        {
            // Accepting and registering the handle happen under one lock, so
            // a concurrent reset sees both or neither.
            let mut in_flight = self.lock_in_flight();
            self.apply(Event::FileAccepted {
                attempt,
                file: descriptor.clone(),
            })?;
            *in_flight = Some((attempt, handle));
        }
        info!(
            "Attempt {}: converting {} ({})",
            attempt, descriptor.name, descriptor.declared_type
        );

        let outcome = Abortable::new(self.run(attempt, source, descriptor), registration).await;

        {
            let mut in_flight = self.lock_in_flight();
            if matches!(*in_flight, Some((id, _)) if id == attempt) {
                *in_flight = None;
            }
        }

        match outcome {
            Ok(result) => result,
            Err(_aborted) => {
                info!("Attempt {} cancelled", attempt);
                Err(Pdf2CsvError::Cancelled)
            }
        }
    }

    /// Abandon the current attempt, if any, and return to `Idle`.
    ///
    /// Valid from every state; from `Idle` it does nothing.
    pub fn reset(&self) {
        let mut in_flight = self.lock_in_flight();
        if let Some((attempt, handle)) = in_flight.take() {
            debug!("Aborting attempt {}", attempt);
            handle.abort();
        }
        if self.apply(Event::Reset).is_ok() {
            debug!("Converter reset to idle");
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    async fn run(
        &self,
        attempt: AttemptId,
        source: FileSource,
        descriptor: FileDescriptor,
    ) -> Result<ConversionOutput, Pdf2CsvError> {
        let total_start = Instant::now();

        // ── Step 1: Read ─────────────────────────────────────────────────
        let read_start = Instant::now();
        let file = match input::read_content(source, &descriptor, self.config.download_timeout_secs)
            .await
        {
            Ok(file) => file,
            Err(e) => return Err(self.fail(attempt, e)),
        };
        let read_duration_ms = read_start.elapsed().as_millis() as u64;
        debug!(
            "Attempt {}: read {} bytes in {}ms",
            attempt,
            file.content().len(),
            read_duration_ms
        );
        self.apply(Event::ReadComplete { attempt })?;

        // ── Step 2: Analyze ──────────────────────────────────────────────
        let document = encode::encode_document(&file);
        let instructions = self
            .config
            .instructions
            .as_deref()
            .unwrap_or(DEFAULT_INSTRUCTIONS);
        let timeout_secs = self.config.analysis_timeout_secs;

        let analysis_start = Instant::now();
        let analysis = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.analyzer.analyze(&document, instructions),
        )
        .await
        {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => return Err(self.fail(attempt, e)),
            Err(_elapsed) => {
                return Err(self.fail(attempt, Pdf2CsvError::AnalysisTimeout { secs: timeout_secs }))
            }
        };
        let analysis_duration_ms = analysis_start.elapsed().as_millis() as u64;
        if analysis.result.is_empty() {
            return Err(self.fail(attempt, Pdf2CsvError::EmptyResult));
        }
        info!(
            "Attempt {}: {} returned {} sections in {}ms",
            attempt,
            self.analyzer.name(),
            analysis.result.sections.len(),
            analysis_duration_ms
        );
        self.apply(Event::AnalysisComplete { attempt })?;

        // ── Step 3: Generate ─────────────────────────────────────────────
        let generate_start = Instant::now();
        let csv = match serialize::serialize(&analysis.result, file.name(), self.config.row_layout)
        {
            Ok(csv) => csv,
            Err(e) => return Err(self.fail(attempt, e)),
        };
        let staged = match serialize::stage(&csv, &self.config.output).await {
            Ok(staged) => staged,
            Err(e) => return Err(self.fail(attempt, e)),
        };
        // No await from here on: the file lands in place and the state
        // reaches Completed together, or not at all.
        let path = match staged.map(serialize::StagedCsv::commit).transpose() {
            Ok(path) => path,
            Err(e) => return Err(self.fail(attempt, e)),
        };
        let generate_duration_ms = generate_start.elapsed().as_millis() as u64;
        if let Err(e) = self.apply(Event::Delivered {
            attempt,
            file_name: csv.file_name.clone(),
        }) {
            if let Some(ref path) = path {
                if let Err(rm) = std::fs::remove_file(path) {
                    warn!("Could not withdraw {}: {}", path.display(), rm);
                }
            }
            return Err(e.into());
        }

        let stats = ConversionStats {
            input_bytes: file.content().len(),
            input_tokens: analysis.usage.input_tokens,
            output_tokens: analysis.usage.output_tokens,
            read_duration_ms,
            analysis_duration_ms,
            generate_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "Attempt {}: wrote {} ({} rows) in {}ms",
            attempt, csv.file_name, csv.row_count, stats.total_duration_ms
        );

        Ok(ConversionOutput {
            file_name: csv.file_name,
            path,
            content_type: serialize::CSV_CONTENT_TYPE.to_string(),
            csv: csv.csv,
            section_count: analysis.result.sections.len(),
            row_count: csv.row_count,
            stats,
        })
    }

    /// Record a stage failure and hand back the error for the caller.
    ///
    /// If the attempt was reset meanwhile the failure is dropped and the
    /// caller sees `Cancelled` instead.
    fn fail(&self, attempt: AttemptId, cause: Pdf2CsvError) -> Pdf2CsvError {
        error!("Attempt {} failed: {}", attempt, cause);
        match self.apply(Event::Failed {
            attempt,
            message: cause.user_message(),
        }) {
            Ok(()) => cause,
            Err(e) => e.into(),
        }
    }

    /// Apply one event to the shared state.
    fn apply(&self, event: Event) -> Result<(), TransitionError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| match state.next(event) {
            Ok(next) => {
                let changed = *state != next;
                if changed {
                    debug!("{} → {}", state.status(), next.status());
                }
                *state = next;
                changed
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        if let Err(ref e) = outcome {
            warn!("State transition refused: {}", e);
        }
        outcome
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<(AttemptId, AbortHandle)>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Convert a file path or URL with a one-off converter.
///
/// This is the simplest entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use pdf2csv::{convert, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::builder().output_dir("out").build()?;
/// let output = convert("invoice.png", &config).await?;
/// println!("{}", output.csv);
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    input: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2CsvError> {
    let converter = Converter::new(config.clone())?;
    converter.convert(FileSource::parse(input.as_ref())).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2CsvError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2CsvError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputTarget;
    use crate::model::{ConversionResult, Section, TokenUsage};
    use crate::pipeline::analyze::Analysis;
    use crate::pipeline::encode::InlineDocument;
    use async_trait::async_trait;

    struct Fixed;

    #[async_trait]
    impl Analyzer for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn analyze(
            &self,
            _document: &InlineDocument,
            _instructions: &str,
        ) -> Result<Analysis, Pdf2CsvError> {
            Ok(Analysis {
                result: ConversionResult::new(vec![Section::new(
                    "Totals",
                    vec![vec!["Total".into(), "$1,200.00".into()]],
                )]),
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            })
        }
    }

    fn converter() -> Converter {
        let config = ConversionConfig::builder()
            .output(OutputTarget::Memory)
            .build()
            .unwrap();
        Converter::with_analyzer(Arc::new(Fixed), config)
    }

    fn png() -> FileSource {
        FileSource::Bytes {
            name: "scan.png".into(),
            mime_type: "image/png".into(),
            data: vec![0x89, b'P', b'N', b'G'],
        }
    }

    #[tokio::test]
    async fn converts_and_completes() {
        let c = converter();
        let out = c.convert(png()).await.unwrap();
        assert_eq!(out.file_name, "scan_converted.csv");
        assert_eq!(out.csv, "Total,\"$1,200.00\"\n");
        assert_eq!(out.content_type, "text/csv; charset=utf-8");
        assert_eq!(out.path, None);
        assert_eq!(out.stats.input_tokens, 10);
        assert_eq!(out.stats.input_bytes, 4);

        let state = c.snapshot();
        assert_eq!(state.status(), ConversionStatus::Completed);
        assert_eq!(state.output(), Some("scan_converted.csv"));
    }

    #[tokio::test]
    async fn completed_refuses_until_reset() {
        let c = converter();
        c.convert(png()).await.unwrap();
        let err = c.convert(png()).await.unwrap_err();
        assert!(matches!(
            err,
            Pdf2CsvError::Busy {
                status: ConversionStatus::Completed
            }
        ));

        c.reset();
        assert_eq!(c.status(), ConversionStatus::Idle);
        assert!(c.convert(png()).await.is_ok());
    }

    #[tokio::test]
    async fn unsupported_type_stays_idle() {
        let c = converter();
        let err = c
            .convert(FileSource::Bytes {
                name: "notes.txt".into(),
                mime_type: "text/plain".into(),
                data: b"hi".to_vec(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2CsvError::UnsupportedType { .. }));
        assert_eq!(c.snapshot(), PipelineState::new());
    }

    struct Stalled;

    #[async_trait]
    impl Analyzer for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn analyze(
            &self,
            _document: &InlineDocument,
            _instructions: &str,
        ) -> Result<Analysis, Pdf2CsvError> {
            std::future::pending().await
        }
    }

    async fn start_and_reset(c: &Arc<Converter>) {
        let mut rx = c.subscribe();
        let task = tokio::spawn({
            let c = Arc::clone(c);
            async move { c.convert(png()).await }
        });
        rx.wait_for(|s| s.status() == ConversionStatus::Analyzing)
            .await
            .unwrap();
        c.reset();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("attempt still running after reset")
            .unwrap();
        assert!(matches!(result, Err(Pdf2CsvError::Cancelled)));
        assert!(c.lock_in_flight().is_none());
    }

    #[tokio::test]
    async fn each_reset_aborts_the_attempt_it_interrupts() {
        let config = ConversionConfig::builder()
            .output(OutputTarget::Memory)
            .build()
            .unwrap();
        let c = Arc::new(Converter::with_analyzer(Arc::new(Stalled), config));

        start_and_reset(&c).await;
        start_and_reset(&c).await;
        assert_eq!(c.status(), ConversionStatus::Idle);
    }

    #[test]
    fn reset_from_idle_is_a_no_op() {
        let c = converter();
        let mut rx = c.subscribe();
        c.reset();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(c.status(), ConversionStatus::Idle);
    }
}
