//! Data carried through the pipeline: the acquired file, the Analyzer's
//! structured result, and the final conversion output.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// A user-selected source document, fully read into memory.
///
/// Created once by input acquisition and never mutated afterwards; a new
/// selection produces a new `FileState`.
#[derive(Clone, PartialEq, Eq)]
pub struct FileState {
    name: String,
    declared_type: String,
    content: Vec<u8>,
}

impl FileState {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            content,
        }
    }

    /// Original filename, used to derive the output filename.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MIME type: `application/pdf` or `image/*`.
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    /// Raw file bytes.
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

impl std::fmt::Debug for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileState")
            .field("name", &self.name)
            .field("declared_type", &self.declared_type)
            .field("content", &format_args!("<{} bytes>", self.content.len()))
            .finish()
    }
}

/// What is known about a selection before its content is read: enough to
/// validate the type and to name the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Original filename (no directory components).
    pub name: String,
    /// Declared MIME type.
    pub declared_type: String,
}

/// The Analyzer's structured output: sections in document reading order.
///
/// Also accepts the legacy `sheets` key so responses produced with older
/// prompts still parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    #[serde(default, alias = "sheets")]
    pub sections: Vec<Section>,
}

impl ConversionResult {
    pub fn new(sections: Vec<Section>) -> Self {
        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Total number of grid rows across all sections.
    pub fn row_count(&self) -> usize {
        self.sections.iter().map(|s| s.grid.len()).sum()
    }
}

/// One logical division of the source document (a page or a distinct table).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    #[serde(alias = "name")]
    pub label: String,

    /// Ragged rows of text cells. Empty strings are intentional blank cells.
    #[serde(alias = "rows", deserialize_with = "deserialize_grid")]
    pub grid: Vec<Vec<String>>,
}

impl Section {
    pub fn new(label: impl Into<String>, grid: Vec<Vec<String>>) -> Self {
        Self {
            label: label.into(),
            grid,
        }
    }
}

/// Read a grid whose cells should be strings but may arrive as other JSON
/// scalars when the model ignores the schema.
fn deserialize_grid<'de, D>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<Value>> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|row| row.into_iter().map(cell_text).collect())
        .collect())
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Token usage reported by the Analyzer, when the service reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of one successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Derived output filename, e.g. `report_converted.csv`.
    pub file_name: String,
    /// Where the CSV was written; `None` for in-memory delivery.
    pub path: Option<PathBuf>,
    /// Always `text/csv; charset=utf-8`.
    pub content_type: String,
    /// The CSV text.
    pub csv: String,
    /// Number of sections returned by the Analyzer.
    pub section_count: usize,
    /// Number of rows written, banners and separators included.
    pub row_count: usize,
    pub stats: ConversionStats,
}

/// Timing and usage figures for one conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub input_bytes: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub read_duration_ms: u64,
    pub analysis_duration_ms: u64,
    pub generate_duration_ms: u64,
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_section_grid() {
        let json = r#"{"sections":[{"label":"Page 1","grid":[["a","b"],["c"]]}]}"#;
        let r: ConversionResult = serde_json::from_str(json).unwrap();
        assert_eq!(r.sections.len(), 1);
        assert_eq!(r.sections[0].label, "Page 1");
        assert_eq!(r.sections[0].grid[1], vec!["c".to_string()]);
        assert_eq!(r.row_count(), 2);
    }

    #[test]
    fn accepts_legacy_sheet_names() {
        let json = r#"{"sheets":[{"name":"Summary","rows":[["Total","$1,200.00"]]}]}"#;
        let r: ConversionResult = serde_json::from_str(json).unwrap();
        assert_eq!(r.sections[0].label, "Summary");
        assert_eq!(r.sections[0].grid[0][1], "$1,200.00");
    }

    #[test]
    fn coerces_non_string_cells() {
        let json = r#"{"sections":[{"label":"x","grid":[[1, 2.5, null, true, "t"]]}]}"#;
        let r: ConversionResult = serde_json::from_str(json).unwrap();
        assert_eq!(r.sections[0].grid[0], vec!["1", "2.5", "", "true", "t"]);
    }

    #[test]
    fn missing_sections_is_empty() {
        let r: ConversionResult = serde_json::from_str("{}").unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn section_requires_label_and_grid() {
        assert!(serde_json::from_str::<Section>("{}").is_err());
        assert!(serde_json::from_str::<Section>(r#"{"label":"x"}"#).is_err());
        assert!(serde_json::from_str::<Section>(r#"{"grid":[["1"]]}"#).is_err());
    }

    #[test]
    fn file_state_debug_hides_content() {
        let f = FileState::new("a.pdf", "application/pdf", vec![0u8; 2048]);
        let dbg = format!("{f:?}");
        assert!(dbg.contains("2048 bytes"));
        assert_eq!(f.content().len(), 2048);
    }
}
