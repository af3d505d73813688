//! Input acquisition: validate a selected file and read it into memory.
//!
//! Acquisition happens in two steps so the pipeline can tell a *rejected*
//! selection from a *failed* one:
//!
//! 1. [`inspect`] derives the filename and declared MIME type and checks the
//!    type gate. Nothing is read; a rejection leaves the pipeline `Idle`.
//! 2. [`read_content`] performs the (suspending) read or download. A failure
//!    here ends the attempt in `Error`. For URLs this includes the type gate
//!    on the served `Content-Type`; a URL without a known extension is only
//!    judged there.
//!
//! [`acquire`] runs both for callers that don't need the distinction.

use crate::error::Pdf2CsvError;
use crate::model::{FileDescriptor, FileState};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// The one non-image type accepted.
pub const PDF_MIME: &str = "application/pdf";

const OCTET_STREAM: &str = "application/octet-stream";

/// A file the user selected, before it has been read.
#[derive(Clone)]
pub enum FileSource {
    /// A local file; the type is guessed from its extension.
    Path(PathBuf),
    /// An HTTP/HTTPS URL; the type is the response `Content-Type`, falling
    /// back to the URL extension.
    Url(String),
    /// Content already in memory with a caller-declared type.
    Bytes {
        name: String,
        mime_type: String,
        data: Vec<u8>,
    },
}

impl FileSource {
    /// Interpret a command-line style argument as a URL or a local path.
    pub fn parse(input: &str) -> Self {
        if is_url(input) {
            FileSource::Url(input.to_string())
        } else {
            FileSource::Path(PathBuf::from(input))
        }
    }

    /// Short description for logs and progress output.
    pub fn display_name(&self) -> String {
        match self {
            FileSource::Path(p) => p.display().to_string(),
            FileSource::Url(u) => u.clone(),
            FileSource::Bytes { name, .. } => name.clone(),
        }
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            FileSource::Url(u) => f.debug_tuple("Url").field(u).finish(),
            FileSource::Bytes {
                name,
                mime_type,
                data,
            } => f
                .debug_struct("Bytes")
                .field("name", name)
                .field("mime_type", mime_type)
                .field("len", &data.len())
                .finish(),
        }
    }
}

impl From<PathBuf> for FileSource {
    fn from(p: PathBuf) -> Self {
        FileSource::Path(p)
    }
}

impl From<&Path> for FileSource {
    fn from(p: &Path) -> Self {
        FileSource::Path(p.to_path_buf())
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// The type gate: `application/pdf` or any `image/*`.
///
/// Comparison ignores case, surrounding whitespace and MIME parameters.
pub fn is_supported_type(mime_type: &str) -> bool {
    let essence = essence(mime_type);
    essence == PDF_MIME || essence.starts_with("image/")
}

fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Validate a name/type pair.
pub fn validate(name: &str, mime_type: &str) -> Result<FileDescriptor, Pdf2CsvError> {
    if !is_supported_type(mime_type) {
        return Err(Pdf2CsvError::UnsupportedType {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
        });
    }
    Ok(FileDescriptor {
        name: name.to_string(),
        declared_type: essence(mime_type),
    })
}

/// Derive name and declared type and apply the type gate. Reads nothing.
pub fn inspect(source: &FileSource) -> Result<FileDescriptor, Pdf2CsvError> {
    match source {
        FileSource::Path(path) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| Pdf2CsvError::InvalidInput {
                    input: path.display().to_string(),
                })?;
            validate(&name, &guess_mime(Path::new(&name)))
        }
        FileSource::Url(url) => {
            let name = url_file_name(url)?;
            match mime_guess::from_path(&name).first() {
                Some(guess) => validate(&name, guess.essence_str()),
                // No recognisable extension: the response header decides.
                None => Ok(FileDescriptor {
                    name,
                    declared_type: OCTET_STREAM.to_string(),
                }),
            }
        }
        FileSource::Bytes {
            name, mime_type, ..
        } => validate(name, mime_type),
    }
}

/// Read the content of an inspected source.
pub async fn read_content(
    source: FileSource,
    descriptor: &FileDescriptor,
    download_timeout_secs: u64,
) -> Result<FileState, Pdf2CsvError> {
    match source {
        FileSource::Path(path) => {
            let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Pdf2CsvError::FileNotFound { path: path.clone() },
                std::io::ErrorKind::PermissionDenied => {
                    Pdf2CsvError::PermissionDenied { path: path.clone() }
                }
                _ => Pdf2CsvError::ReadFailed {
                    path: path.clone(),
                    source: e,
                },
            })?;
            debug!("Read {} bytes from {}", data.len(), path.display());
            Ok(FileState::new(
                descriptor.name.clone(),
                descriptor.declared_type.clone(),
                data,
            ))
        }
        FileSource::Url(url) => download_url(&url, descriptor, download_timeout_secs).await,
        FileSource::Bytes { data, .. } => Ok(FileState::new(
            descriptor.name.clone(),
            descriptor.declared_type.clone(),
            data,
        )),
    }
}

/// Inspect and read in one step.
pub async fn acquire(
    source: FileSource,
    download_timeout_secs: u64,
) -> Result<FileState, Pdf2CsvError> {
    let descriptor = inspect(&source)?;
    read_content(source, &descriptor, download_timeout_secs).await
}

fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Last non-empty path segment of a URL, or a fallback name.
fn url_file_name(url: &str) -> Result<String, Pdf2CsvError> {
    let parsed = reqwest::Url::parse(url).map_err(|_| Pdf2CsvError::InvalidInput {
        input: url.to_string(),
    })?;
    let name = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .filter(|last| !last.is_empty())
        .unwrap_or_else(|| "downloaded".to_string());
    Ok(name)
}

/// Type of a downloaded document: the response `Content-Type` when it names
/// one, else the type guessed from the URL. A generic
/// `application/octet-stream` header names nothing.
fn served_type(content_type: Option<&str>, guessed: &str) -> String {
    content_type
        .map(essence)
        .filter(|ct| !ct.is_empty() && ct != OCTET_STREAM)
        .unwrap_or_else(|| guessed.to_string())
}

/// Download a URL into memory.
///
/// The served type is gated before the body is read, so an HTML error page
/// behind a `.png` link is refused rather than analyzed.
async fn download_url(
    url: &str,
    descriptor: &FileDescriptor,
    timeout_secs: u64,
) -> Result<FileState, Pdf2CsvError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2CsvError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2CsvError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2CsvError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Pdf2CsvError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let declared_type = validate(
        &descriptor.name,
        &served_type(content_type, &descriptor.declared_type),
    )?
    .declared_type;

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2CsvError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2CsvError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    info!("Downloaded {} bytes ({})", bytes.len(), declared_type);
    Ok(FileState::new(
        descriptor.name.clone(),
        declared_type,
        bytes.to_vec(),
    ))
}
