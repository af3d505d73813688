//! # pdf2csv
//!
//! Convert PDF documents and images into CSV using a multimodal AI model.
//!
//! ## Why this crate?
//!
//! Statements, invoices and scanned reports keep their data in tables that
//! text extractors flatten into a stream of words. This crate sends the whole
//! document to a multimodal model, asks for labelled grids of literal cell
//! text (one per page or logical section), and writes them out as a single
//! CSV file that opens in any spreadsheet.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input     validate the type, read the file or download the URL
//!  ├─ 2. Encode    bytes → base64 inline data
//!  ├─ 3. Analyze   one call to Gemini (or any edgequake-llm provider)
//!  ├─ 4. Parse     JSON → sections of rows of cells
//!  └─ 5. Serialize merge sections, write `<name>_converted.csv`
//! ```
//!
//! Progress is a small state machine (`Idle → Uploading → Analyzing →
//! Generating → Completed`, or `Error`), published by the [`Converter`]
//! through a watch channel; see [`state`] and [`status_stream`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2csv::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key from GEMINI_API_KEY (or API_KEY)
//!     let config = ConversionConfig::default();
//!     let output = convert("statement.pdf", &config).await?;
//!     println!("{} rows → {}", output.row_count, output.file_name);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2csv` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2csv = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod state;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, OutputTarget, RowLayout};
pub use convert::{convert, convert_sync, Converter};
pub use error::{ErrorKind, Pdf2CsvError};
pub use model::{
    ConversionOutput, ConversionResult, ConversionStats, FileDescriptor, FileState, Section,
    TokenUsage,
};
pub use pipeline::analyze::{Analysis, Analyzer, GeminiAnalyzer, ProviderAnalyzer};
pub use pipeline::encode::InlineDocument;
pub use pipeline::input::FileSource;
pub use state::{AttemptId, ConversionStatus, Event, PipelineState, TransitionError};
pub use stream::{convert_each, status_stream, BatchItem};
