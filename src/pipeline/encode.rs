//! Transport encoding: `FileState` → base64 inline document.
//!
//! Multimodal APIs accept binary attachments as base64 text embedded in the
//! JSON request body, next to the attachment's MIME type. PDFs are sent as-is
//! (no rasterisation): the Analyzer reads the original document.

use crate::model::FileState;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// A document ready to be embedded in an Analyzer request.
#[derive(Clone, PartialEq, Eq)]
pub struct InlineDocument {
    /// Standard base64 (with padding), no `data:` prefix.
    pub data: String,
    pub mime_type: String,
}

impl std::fmt::Debug for InlineDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineDocument")
            .field("data", &format_args!("<{} base64 chars>", self.data.len()))
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Encode the file content for transport.
pub fn encode_document(file: &FileState) -> InlineDocument {
    let data = STANDARD.encode(file.content());
    debug!(
        "Encoded {} ({} bytes) → {} bytes base64",
        file.name(),
        file.content().len(),
        data.len()
    );
    InlineDocument {
        data,
        mime_type: file.declared_type().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_small_document() {
        let file = FileState::new("a.pdf", "application/pdf", b"%PDF-1.7\n".to_vec());
        let doc = encode_document(&file);
        assert_eq!(doc.mime_type, "application/pdf");
        assert!(!doc.data.starts_with("data:"));
        let decoded = STANDARD.decode(&doc.data).expect("valid base64");
        assert_eq!(decoded, b"%PDF-1.7\n");
    }
}
