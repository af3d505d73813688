//! Pipeline stages for document-to-CSV conversion.
//!
//! Each submodule implements one transformation step, so each can be tested
//! alone and the Analyzer can be swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ analyze ──▶ response ──▶ serialize
//! (file/URL) (base64)  (Analyzer)   (JSON)       (CSV)
//! ```
//!
//! 1. [`input`]:     derive name/type, apply the type gate, read the bytes
//! 2. [`encode`]:    base64-wrap the content for the request body
//! 3. [`analyze`]:   the only stage with Analyzer network I/O
//! 4. [`response`]:  unwrap and validate the Analyzer's JSON
//! 5. [`serialize`]: merge sections, write CSV text, deliver the file
//!
//! The stages know nothing about the state machine; [`crate::convert`]
//! sequences them and records progress.

pub mod analyze;
pub mod encode;
pub mod input;
pub mod response;
pub mod serialize;
