//! Error types for the pdf2csv library.
//!
//! Every failure in the pipeline is a [`Pdf2CsvError`]. The variants are
//! grouped by the stage that produces them, and [`Pdf2CsvError::kind`] maps
//! each one onto a coarse [`ErrorKind`]:
//!
//! * **Validation**: the selected file has an unsupported type. Recovered
//!   locally: the pipeline never leaves `Idle`.
//! * **Acquisition**: the file could not be read or downloaded.
//! * **Analysis**: the Analyzer call failed, timed out, or returned an
//!   empty/malformed result.
//! * **Serialization**: the CSV could not be built or delivered.
//! * **Configuration**: the converter cannot be constructed (missing API key,
//!   unknown provider, invalid builder values).
//! * **Pipeline**: the request was refused or overtaken by a reset.
//!
//! Acquisition, Analysis and Serialization errors move the state machine to
//! `Error`; the message stored there comes from [`Pdf2CsvError::user_message`].

use std::path::PathBuf;
use thiserror::Error;

/// Generic message shown for every analysis failure.
///
/// The underlying cause is logged, never displayed, so service internals do
/// not leak into the UI.
pub const ANALYSIS_FAILED_MESSAGE: &str =
    "Failed to analyze the document with high fidelity. Please try again.";

/// All errors returned by the pdf2csv library.
#[derive(Debug, Error)]
pub enum Pdf2CsvError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The declared type is neither `application/pdf` nor `image/*`.
    #[error("Please upload a PDF or image file. '{name}' has type '{mime_type}'.")]
    UnsupportedType { name: String, mime_type: String },

    // ── Acquisition errors ────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the file content failed part-way.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input string is not a usable file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Analysis errors ───────────────────────────────────────────────────
    /// The Analyzer call failed (transport error, non-success status, blocked prompt).
    #[error("Document analysis failed: {reason}")]
    AnalysisFailed { reason: String },

    /// The Analyzer did not answer within the configured bound.
    #[error("Document analysis timed out after {secs}s")]
    AnalysisTimeout { secs: u64 },

    /// The Analyzer rejected the credential (401/403).
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    /// The Analyzer returned HTTP 429.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimitExceeded {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// The Analyzer answered, but not with the expected JSON structure.
    #[error("Malformed analyzer response: {detail}")]
    MalformedResponse { detail: String },

    /// The Analyzer answered with no sections at all.
    #[error("The analyzer returned no sections for this document")]
    EmptyResult,

    // ── Serialization errors ──────────────────────────────────────────────
    /// The serializer was handed a result without sections.
    #[error("No data found to generate CSV file.")]
    NoSections,

    /// The CSV writer failed.
    #[error("CSV encoding failed: {0}")]
    CsvEncoding(String),

    /// Could not create or write the output CSV file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// No API key is available for the Analyzer.
    #[error("No API key configured.\nSet {var} (or pass --api-key) before converting.")]
    MissingApiKey { var: &'static str },

    /// The configured provider is not initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// A conversion is already in flight (or finished and not yet reset).
    #[error("Cannot accept a new file while the converter is {status}")]
    Busy { status: crate::state::ConversionStatus },

    /// The attempt was reset before it finished; its result was discarded.
    #[error("Conversion was cancelled")]
    Cancelled,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`Pdf2CsvError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Acquisition,
    Analysis,
    Serialization,
    Configuration,
    Pipeline,
}

impl Pdf2CsvError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        use Pdf2CsvError::*;
        match self {
            UnsupportedType { .. } => ErrorKind::Validation,
            FileNotFound { .. }
            | PermissionDenied { .. }
            | ReadFailed { .. }
            | InvalidInput { .. }
            | DownloadFailed { .. }
            | DownloadTimeout { .. } => ErrorKind::Acquisition,
            AnalysisFailed { .. }
            | AnalysisTimeout { .. }
            | AuthError { .. }
            | RateLimitExceeded { .. }
            | MalformedResponse { .. }
            | EmptyResult => ErrorKind::Analysis,
            NoSections | CsvEncoding(_) | OutputWriteFailed { .. } => ErrorKind::Serialization,
            MissingApiKey { .. } | ProviderNotConfigured { .. } | InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            Busy { .. } | Cancelled | Internal(_) => ErrorKind::Pipeline,
        }
    }

    /// The message shown to the user when this error ends an attempt.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Analysis => ANALYSIS_FAILED_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<crate::state::TransitionError> for Pdf2CsvError {
    fn from(e: crate::state::TransitionError) -> Self {
        use crate::state::TransitionError;
        match e {
            TransitionError::Busy(status) => Pdf2CsvError::Busy { status },
            TransitionError::Stale { .. } => Pdf2CsvError::Cancelled,
            TransitionError::Invalid(_) => Pdf2CsvError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_errors_hide_their_cause() {
        let e = Pdf2CsvError::AuthError {
            provider: "gemini".into(),
            detail: "API key not valid. key=AIza-secret".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Analysis);
        let msg = e.user_message();
        assert_eq!(msg, ANALYSIS_FAILED_MESSAGE);
        assert!(!msg.contains("AIza"));
    }

    #[test]
    fn empty_result_is_an_analysis_error() {
        assert_eq!(Pdf2CsvError::EmptyResult.kind(), ErrorKind::Analysis);
        assert_eq!(
            Pdf2CsvError::AnalysisTimeout { secs: 5 }.user_message(),
            ANALYSIS_FAILED_MESSAGE
        );
    }

    #[test]
    fn acquisition_errors_show_their_display_text() {
        let e = Pdf2CsvError::FileNotFound {
            path: PathBuf::from("/tmp/missing.pdf"),
        };
        assert_eq!(e.kind(), ErrorKind::Acquisition);
        assert!(e.user_message().contains("missing.pdf"));
    }

    #[test]
    fn unsupported_type_display() {
        let e = Pdf2CsvError::UnsupportedType {
            name: "notes.txt".into(),
            mime_type: "text/plain".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Validation);
        assert!(e.to_string().contains("PDF or image"));
        assert!(e.to_string().contains("text/plain"));
    }

    #[test]
    fn serialization_and_config_kinds() {
        assert_eq!(Pdf2CsvError::NoSections.kind(), ErrorKind::Serialization);
        assert_eq!(
            Pdf2CsvError::NoSections.user_message(),
            "No data found to generate CSV file."
        );
        let e = Pdf2CsvError::MissingApiKey {
            var: "GEMINI_API_KEY",
        };
        assert_eq!(e.kind(), ErrorKind::Configuration);
        assert!(e.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn stale_transition_means_cancelled() {
        use crate::state::{ConversionStatus, TransitionError};
        let e: Pdf2CsvError = TransitionError::Stale {
            event: 1,
            active: Some(2),
        }
        .into();
        assert!(matches!(e, Pdf2CsvError::Cancelled));
        let e: Pdf2CsvError = TransitionError::Busy(ConversionStatus::Analyzing).into();
        assert_eq!(e.kind(), ErrorKind::Pipeline);
        assert!(e.to_string().contains("analyzing"));
    }

    #[test]
    fn rate_limit_display() {
        let e = Pdf2CsvError::RateLimitExceeded {
            provider: "gemini".into(),
            retry_after_secs: Some(30),
        };
        assert!(e.to_string().contains("gemini"));
    }
}
