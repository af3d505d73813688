//! Tabular serialization: sections → one flat CSV file.
//!
//! CSV has no notion of sheets, so a multi-section result is merged into a
//! single row sequence: two blank rows between sections and a one-cell banner
//! row (`--- SECTION: <LABEL> ---`) in front of each. A single-section result
//! is written as-is, without a banner. The banner text is not escaped; a
//! label that itself looks like a banner is indistinguishable from one.

use crate::config::{OutputTarget, RowLayout};
use crate::error::Pdf2CsvError;
use crate::model::ConversionResult;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Content type of the delivered file.
pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

/// Appended to the input's base name to form the output name.
pub const OUTPUT_SUFFIX: &str = "_converted.csv";

/// A serialized CSV, not yet delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvDocument {
    pub file_name: String,
    pub csv: String,
    /// Rows written, banners and separators included.
    pub row_count: usize,
}

/// Banner row text for a section.
pub fn section_banner(label: &str) -> String {
    format!("--- SECTION: {} ---", label.to_uppercase())
}

/// Merge all sections into one row buffer, in order.
///
/// Rows are copied unmodified; ragged rows stay ragged.
pub fn merge_sections(result: &ConversionResult) -> Result<Vec<Vec<String>>, Pdf2CsvError> {
    if result.sections.is_empty() {
        return Err(Pdf2CsvError::NoSections);
    }

    let multi = result.sections.len() > 1;
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(result.row_count() + 3 * result.sections.len());

    for section in &result.sections {
        if multi {
            if !rows.is_empty() {
                rows.push(Vec::new());
                rows.push(Vec::new());
            }
            rows.push(vec![section_banner(&section.label)]);
        }
        rows.extend(section.grid.iter().cloned());
    }

    Ok(rows)
}

/// Render rows as CSV text with `\n` line endings.
///
/// Fields are quoted only when they contain a comma, a quote or a line
/// break; embedded quotes are doubled.
pub fn to_csv(rows: &[Vec<String>], layout: RowLayout) -> Result<String, Pdf2CsvError> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);

    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for row in rows {
        let result = match layout {
            RowLayout::Rectangular if row.len() < width => writer.write_record(
                row.iter()
                    .map(String::as_str)
                    .chain(std::iter::repeat("").take(width - row.len())),
            ),
            _ => writer.write_record(row),
        };
        result.map_err(|e| Pdf2CsvError::CsvEncoding(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Pdf2CsvError::CsvEncoding(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Pdf2CsvError::CsvEncoding(e.to_string()))
}

/// `report.pdf` → `report_converted.csv`.
///
/// Only the last extension is stripped, and only when it is non-empty.
pub fn output_file_name(name: &str) -> String {
    let base = match name.rfind('.') {
        Some(i) if i + 1 < name.len() && !name[i + 1..].contains('/') => &name[..i],
        _ => name,
    };
    format!("{base}{OUTPUT_SUFFIX}")
}

/// Merge, render and name the output for `result`.
pub fn serialize(
    result: &ConversionResult,
    suggested_name: &str,
    layout: RowLayout,
) -> Result<CsvDocument, Pdf2CsvError> {
    let rows = merge_sections(result)?;
    let csv = to_csv(&rows, layout)?;
    let file_name = output_file_name(suggested_name);
    debug!("Serialized {} rows → {} bytes CSV", rows.len(), csv.len());
    Ok(CsvDocument {
        file_name,
        csv,
        row_count: rows.len(),
    })
}

/// Hand the CSV to the user.
///
/// Directory delivery writes to a temp file and renames it into place so a
/// reader never sees a partial file. Returns the written path, if any.
pub async fn deliver(
    doc: &CsvDocument,
    target: &OutputTarget,
) -> Result<Option<PathBuf>, Pdf2CsvError> {
    match stage(doc, target).await? {
        Some(staged) => staged.commit().map(Some),
        None => Ok(None),
    }
}

/// First half of [`deliver`]: write the CSV next to its final name.
///
/// The temp file belongs to the returned [`StagedCsv`] and is removed when
/// that is dropped uncommitted, including when this future is dropped
/// mid-write. `Memory` targets stage nothing.
pub async fn stage(
    doc: &CsvDocument,
    target: &OutputTarget,
) -> Result<Option<StagedCsv>, Pdf2CsvError> {
    let dir = match target {
        OutputTarget::Memory => return Ok(None),
        OutputTarget::Directory(dir) => dir.clone(),
    };

    // The name derives from user input; never let it leave `dir`.
    let file_name = Path::new(&doc.file_name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OUTPUT_SUFFIX.trim_start_matches('_').into());
    let path = dir.join(&file_name);

    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| Pdf2CsvError::OutputWriteFailed {
            path: path.clone(),
            source,
        })?;

    let mut tmp_name = file_name;
    tmp_name.push(".tmp");
    let staged = StagedCsv {
        tmp_path: dir.join(tmp_name),
        path,
        committed: false,
    };
    let bytes = doc.csv.clone().into_bytes();

    // A dropped JoinHandle drops the task's output, so an abandoned write
    // still cleans up after itself.
    tokio::task::spawn_blocking(move || -> Result<Option<StagedCsv>, Pdf2CsvError> {
        std::fs::write(&staged.tmp_path, bytes).map_err(|source| {
            Pdf2CsvError::OutputWriteFailed {
                path: staged.path.clone(),
                source,
            }
        })?;
        debug!("Staged {}", staged.tmp_path.display());
        Ok(Some(staged))
    })
    .await
    .map_err(|e| Pdf2CsvError::Internal(format!("CSV write task failed: {}", e)))?
}

/// A CSV written to a temp file, waiting to be renamed into place.
#[derive(Debug)]
pub struct StagedCsv {
    tmp_path: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl StagedCsv {
    /// Final location once committed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the temp file into place. Synchronous, so it cannot be
    /// interrupted between the rename and whatever the caller does next.
    pub fn commit(mut self) -> Result<PathBuf, Pdf2CsvError> {
        std::fs::rename(&self.tmp_path, &self.path).map_err(|source| {
            Pdf2CsvError::OutputWriteFailed {
                path: self.path.clone(),
                source,
            }
        })?;
        self.committed = true;
        info!("Wrote {}", self.path.display());
        Ok(self.path.clone())
    }
}

impl Drop for StagedCsv {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.tmp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove {}: {}", self.tmp_path.display(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Section;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn merge_two_sections_in_order() {
        let result = ConversionResult::new(vec![
            Section::new("A", vec![row(&["1", "2"])]),
            Section::new("B", vec![row(&["3"])]),
        ]);
        let rows = merge_sections(&result).unwrap();
        assert_eq!(
            rows,
            vec![
                row(&["--- SECTION: A ---"]),
                row(&["1", "2"]),
                vec![],
                vec![],
                row(&["--- SECTION: B ---"]),
                row(&["3"]),
            ]
        );
    }

    #[test]
    fn single_section_has_no_banner() {
        let result = ConversionResult::new(vec![Section::new(
            "Only",
            vec![row(&["a", "", "b"]), row(&["c"])],
        )]);
        let rows = merge_sections(&result).unwrap();
        assert_eq!(rows, vec![row(&["a", "", "b"]), row(&["c"])]);
    }

    #[test]
    fn banner_is_upper_cased() {
        assert_eq!(section_banner("Page 2 – totals"), "--- SECTION: PAGE 2 – TOTALS ---");
    }

    #[test]
    fn empty_section_still_gets_banner() {
        let result = ConversionResult::new(vec![
            Section::new("cover", vec![]),
            Section::new("body", vec![row(&["x"])]),
        ]);
        let rows = merge_sections(&result).unwrap();
        // the first banner makes the buffer non-empty, so separators follow
        assert_eq!(
            rows,
            vec![
                row(&["--- SECTION: COVER ---"]),
                vec![],
                vec![],
                row(&["--- SECTION: BODY ---"]),
                row(&["x"]),
            ]
        );
    }

    #[test]
    fn empty_result_is_serialization_error() {
        let err = merge_sections(&ConversionResult::default()).unwrap_err();
        assert!(matches!(err, Pdf2CsvError::NoSections));
        assert!(serialize(&ConversionResult::default(), "a.pdf", RowLayout::Ragged).is_err());
    }

    #[test]
    fn rectangular_pads_short_rows() {
        let csv = to_csv(&[row(&["a", "b", "c"]), row(&["d"])], RowLayout::Rectangular).unwrap();
        assert_eq!(csv, "a,b,c\nd,,\n");
    }

    #[test]
    fn ragged_keeps_row_widths() {
        let csv = to_csv(&[row(&["a", "b", "c"]), row(&["d"])], RowLayout::Ragged).unwrap();
        assert_eq!(csv, "a,b,c\nd\n");
    }

    #[test]
    fn quoting_only_when_needed() {
        let csv = to_csv(
            &[row(&["$1,200.00", "say \"hi\"", "two\nlines", "plain"])],
            RowLayout::Ragged,
        )
        .unwrap();
        assert_eq!(
            csv,
            "\"$1,200.00\",\"say \"\"hi\"\"\",\"two\nlines\",plain\n"
        );
    }

    #[test]
    fn escaped_cell_round_trips_through_a_csv_reader() {
        let tricky = "Smith, \"Jr.\" & Co";
        let csv = to_csv(&[row(&[tricky, "x"])], RowLayout::Rectangular).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(csv.as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[0], tricky);
        assert_eq!(&record[1], "x");
    }

    #[test]
    fn separator_rows_survive_as_records() {
        let result = ConversionResult::new(vec![
            Section::new("A", vec![row(&["1", "2"])]),
            Section::new("B", vec![row(&["3"])]),
        ]);
        let doc = serialize(&result, "r.pdf", RowLayout::Rectangular).unwrap();
        assert_eq!(doc.row_count, 6);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(doc.csv.as_bytes());
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 6);
        assert_eq!(&records[0][0], "--- SECTION: A ---");
        assert_eq!(&records[2][0], "");
        assert_eq!(&records[5][0], "3");
    }

    #[test]
    fn file_name_derivation() {
        assert_eq!(output_file_name("report.pdf"), "report_converted.csv");
        assert_eq!(output_file_name("report"), "report_converted.csv");
        assert_eq!(output_file_name("archive.tar.gz"), "archive.tar_converted.csv");
        assert_eq!(output_file_name("scan.2024.png"), "scan.2024_converted.csv");
        assert_eq!(output_file_name("trailing."), "trailing._converted.csv");
        assert_eq!(output_file_name(".hidden"), "_converted.csv");
    }

    #[tokio::test]
    async fn deliver_writes_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let doc = CsvDocument {
            file_name: "report_converted.csv".into(),
            csv: "a,b\n".into(),
            row_count: 1,
        };
        let path = deliver(&doc, &OutputTarget::Directory(dir.path().join("out")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, dir.path().join("out/report_converted.csv"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n");
        // no temp file left behind
        assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn deliver_never_escapes_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let doc = CsvDocument {
            file_name: "../../evil_converted.csv".into(),
            csv: "x\n".into(),
            row_count: 1,
        };
        let path = deliver(&doc, &OutputTarget::Directory(dir.path().to_path_buf()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, dir.path().join("evil_converted.csv"));
    }

    #[tokio::test]
    async fn uncommitted_stage_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let doc = CsvDocument {
            file_name: "report_converted.csv".into(),
            csv: "a,b\n".into(),
            row_count: 1,
        };
        let staged = stage(&doc, &OutputTarget::Directory(dir.path().to_path_buf()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(staged.path(), dir.path().join("report_converted.csv"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(staged);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn memory_delivery_writes_nothing() {
        let doc = CsvDocument {
            file_name: "a_converted.csv".into(),
            csv: "x\n".into(),
            row_count: 1,
        };
        assert_eq!(deliver(&doc, &OutputTarget::Memory).await.unwrap(), None);
    }
}
