//! Configuration types for document-to-CSV conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across tasks and to log the settings of a run
//! (the API key is redacted from `Debug`).

use crate::error::Pdf2CsvError;
use crate::pipeline::analyze::Analyzer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

/// Default Gemini REST endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Environment variables consulted for the API key, in order.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Configuration for a document-to-CSV conversion.
///
/// # Example
/// ```rust
/// use pdf2csv::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .model("gemini-2.5-flash")
///     .analysis_timeout_secs(90)
///     .build()
///     .unwrap();
/// assert_eq!(config.analysis_timeout_secs, 90);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Analyzer credential. If None, read from [`API_KEY_VARS`] when the
    /// converter is built.
    pub api_key: Option<String>,

    /// Gemini API base URL. Default: [`DEFAULT_ENDPOINT`].
    pub endpoint: String,

    /// Generic LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// When set, the document is analysed through that provider instead of
    /// the Gemini REST API.
    pub provider_name: Option<String>,

    /// Pre-constructed analyzer. Takes precedence over everything else.
    pub analyzer: Option<Arc<dyn Analyzer>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription wants the model to copy what it sees, not to improvise.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 32768.
    ///
    /// A dense multi-page statement easily runs to several thousand cells;
    /// a truncated answer is unparseable JSON.
    pub max_output_tokens: u32,

    /// Upper bound on one Analyzer call, in seconds. Default: 120.
    pub analysis_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Custom instruction text. If None, uses the built-in prompt.
    pub instructions: Option<String>,

    /// Where the CSV goes. Default: the current directory.
    pub output: OutputTarget,

    /// Row layout of the CSV text. Default: [`RowLayout::Rectangular`].
    pub row_layout: RowLayout,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            provider_name: None,
            analyzer: None,
            temperature: 0.1,
            max_output_tokens: 32_768,
            analysis_timeout_secs: 120,
            download_timeout_secs: 120,
            instructions: None,
            output: OutputTarget::default(),
            row_layout: RowLayout::default(),
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("provider_name", &self.provider_name)
            .field("analyzer", &self.analyzer.as_ref().map(|a| a.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("analysis_timeout_secs", &self.analysis_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("output", &self.output)
            .field("row_layout", &self.row_layout)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The configured API key, falling back to the environment.
    ///
    /// Blank values count as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|var| std::env::var(var).ok())
    }

    fn resolve_api_key_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        match self.api_key {
            Some(ref key) => non_blank(key),
            None => API_KEY_VARS
                .iter()
                .find_map(|var| lookup(var).as_deref().and_then(non_blank)),
        }
    }
}

fn non_blank(key: &str) -> Option<String> {
    let key = key.trim();
    (!key.is_empty()).then(|| key.to_string())
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.config.analyzer = Some(analyzer);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn analysis_timeout_secs(mut self, secs: u64) -> Self {
        self.config.analysis_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.config.instructions = Some(text.into());
        self
    }

    pub fn output(mut self, target: OutputTarget) -> Self {
        self.config.output = target;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output = OutputTarget::Directory(dir.into());
        self
    }

    pub fn row_layout(mut self, layout: RowLayout) -> Self {
        self.config.row_layout = layout;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2CsvError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(Pdf2CsvError::InvalidConfig("model must not be empty".into()));
        }
        if c.analysis_timeout_secs == 0 {
            return Err(Pdf2CsvError::InvalidConfig(
                "analysis timeout must be ≥ 1s".into(),
            ));
        }
        if c.max_output_tokens == 0 {
            return Err(Pdf2CsvError::InvalidConfig(
                "max output tokens must be ≥ 1".into(),
            ));
        }
        if !(c.endpoint.starts_with("http://") || c.endpoint.starts_with("https://")) {
            return Err(Pdf2CsvError::InvalidConfig(format!(
                "endpoint must be an HTTP(S) URL, got '{}'",
                c.endpoint
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Where the finished CSV is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputTarget {
    /// Write `<dir>/<name>_converted.csv`.
    Directory(PathBuf),
    /// Keep the CSV in memory only; it is returned in the output value.
    Memory,
}

impl Default for OutputTarget {
    fn default() -> Self {
        OutputTarget::Directory(PathBuf::from("."))
    }
}

/// How rows of differing length are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RowLayout {
    /// Pad every row with empty cells to the widest row, as spreadsheet CSV
    /// export does. (default)
    #[default]
    Rectangular,
    /// Write each row with exactly the cells it has.
    Ragged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ConversionConfig::default();
        assert_eq!(c.model, DEFAULT_MODEL);
        assert_eq!(c.temperature, 0.1);
        assert_eq!(c.analysis_timeout_secs, 120);
        assert_eq!(c.output, OutputTarget::Directory(PathBuf::from(".")));
        assert_eq!(c.row_layout, RowLayout::Rectangular);
    }

    #[test]
    fn builder_clamps_temperature() {
        let c = ConversionConfig::builder().temperature(9.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ConversionConfig::builder()
            .analysis_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Pdf2CsvError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_non_http_endpoint() {
        assert!(ConversionConfig::builder()
            .endpoint("ftp://example.com")
            .build()
            .is_err());
    }

    #[test]
    fn explicit_api_key_wins_and_is_trimmed() {
        let c = ConversionConfig::builder()
            .api_key("  AIza-test  ")
            .build()
            .unwrap();
        assert_eq!(c.resolve_api_key().as_deref(), Some("AIza-test"));
    }

    #[test]
    fn blank_env_key_falls_through_to_the_next_variable() {
        let c = ConversionConfig::default();
        let env = |var: &str| match var {
            "GEMINI_API_KEY" => Some("  ".to_string()),
            "API_KEY" => Some("AIza-fallback".to_string()),
            _ => None,
        };
        assert_eq!(c.resolve_api_key_with(env).as_deref(), Some("AIza-fallback"));
        assert_eq!(c.resolve_api_key_with(|_| Some(String::new())), None);
    }

    #[test]
    fn blank_explicit_key_does_not_read_env() {
        let c = ConversionConfig::builder().api_key(" ").build().unwrap();
        assert_eq!(c.resolve_api_key_with(|_| Some("AIza-env".into())), None);
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ConversionConfig::builder()
            .api_key("AIza-very-secret")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("very-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
