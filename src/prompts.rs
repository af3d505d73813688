//! Instruction text and response schema sent to the Analyzer.
//!
//! Centralising the prompt here keeps the request contract in one place:
//! analyzers only decide *how* to transmit it. Callers can override the
//! instruction text via [`crate::config::ConversionConfig::instructions`];
//! the schema is fixed because the response parser depends on it.

use serde_json::{json, Value};

/// Default instructions for converting a document into labelled grids.
pub const DEFAULT_INSTRUCTIONS: &str = r#"Analyze the attached document and convert it into structured tabular data.

Follow these rules precisely:

1. STRUCTURE
   - Create a separate section for each logical section or distinct page of the document
   - Give every section a short, human-readable label
   - Keep sections in the order a human would read the document

2. FORMATTING & LAYOUT
   - Preserve the visual feel of the document
   - Where there are indentations, large gaps or specific alignments, use empty
     cells ("") to simulate that spacing instead of collapsing whitespace
   - Rows do not need to have the same number of cells

3. TEXT FIDELITY
   - Keep all text exactly as written
   - Text that is coloured or bold in the document belongs in a header row

4. TABLES
   - Identify all tables and represent them accurately
   - If a table has merged headers, represent that structure logically in the rows

5. DATA TYPES
   - Keep currency symbols ($), percentages (%) and dates in their original
     display format; every cell is literal text, never a re-typed number

Respond STRICTLY with JSON matching the schema. "sections" must be a non-empty array."#;

/// JSON schema of the expected response, in the OpenAPI subset accepted by
/// Gemini's `responseSchema`.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "sections": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "label": {
                            "type": "STRING",
                            "description": "Human-readable name of the section"
                        },
                        "grid": {
                            "type": "ARRAY",
                            "description": "Rows of cells for this section; empty strings are intentional blank cells",
                            "items": {
                                "type": "ARRAY",
                                "items": { "type": "STRING" }
                            }
                        }
                    },
                    "required": ["label", "grid"]
                }
            }
        },
        "required": ["sections"]
    })
}

/// Instructions for analyzers without native structured output: the
/// schema is spelled out in the text itself.
pub fn instructions_with_inline_schema(instructions: &str) -> String {
    format!(
        "{instructions}\n\nThe JSON must have exactly this shape:\n\
         {{\"sections\": [{{\"label\": \"<string>\", \"grid\": [[\"<cell>\", ...], ...]}}, ...]}}\n\
         Output ONLY the JSON object. Do NOT wrap it in ``` fences and do NOT add commentary."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requires_sections_label_and_grid() {
        let schema = response_schema();
        assert_eq!(schema["required"], json!(["sections"]));
        let item = &schema["properties"]["sections"]["items"];
        assert_eq!(item["required"], json!(["label", "grid"]));
        assert_eq!(
            item["properties"]["grid"]["items"]["items"]["type"],
            json!("STRING")
        );
    }

    #[test]
    fn default_instructions_cover_the_contract() {
        assert!(DEFAULT_INSTRUCTIONS.contains("separate section"));
        assert!(DEFAULT_INSTRUCTIONS.contains("empty"));
        assert!(DEFAULT_INSTRUCTIONS.contains("original"));
        assert!(DEFAULT_INSTRUCTIONS.contains("\"sections\""));
    }

    #[test]
    fn inline_schema_mentions_shape() {
        let text = instructions_with_inline_schema("Convert.");
        assert!(text.starts_with("Convert."));
        assert!(text.contains("\"grid\""));
    }
}
