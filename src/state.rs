//! The conversion state machine.
//!
//! A conversion moves through
//!
//! ```text
//! Idle ──▶ Uploading ──▶ Analyzing ──▶ Generating ──▶ Completed
//!             │              │              │
//!             └──────────────┴──────────────┴──────▶ Error
//! ```
//!
//! and any state returns to `Idle` on [`Event::Reset`].
//!
//! [`PipelineState`] is a plain value and [`PipelineState::next`] is a pure
//! function from `(state, event)` to the next state. The converter keeps the
//! current value in a watch channel; presentation code only ever reads it.
//!
//! Every attempt carries an [`AttemptId`]. Events from an attempt that is no
//! longer the active one (because the user reset, or started over after an
//! error) are rejected as [`TransitionError::Stale`] and leave the state
//! untouched.

use crate::model::FileDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identity of one conversion attempt.
pub type AttemptId = u64;

/// Pipeline progress. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConversionStatus {
    #[default]
    Idle,
    Uploading,
    Analyzing,
    Generating,
    Completed,
    Error,
}

/// Stages shown by a progress display, in order.
const STEPS: [ConversionStatus; 4] = [
    ConversionStatus::Uploading,
    ConversionStatus::Analyzing,
    ConversionStatus::Generating,
    ConversionStatus::Completed,
];

impl ConversionStatus {
    /// A conversion is in flight.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConversionStatus::Uploading | ConversionStatus::Analyzing | ConversionStatus::Generating
        )
    }

    /// The attempt has ended, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConversionStatus::Completed | ConversionStatus::Error)
    }

    /// A new file selection may be accepted.
    pub fn accepts_files(self) -> bool {
        matches!(self, ConversionStatus::Idle | ConversionStatus::Error)
    }

    /// Human-readable stage label.
    pub fn label(self) -> &'static str {
        match self {
            ConversionStatus::Idle => "Waiting for a document",
            ConversionStatus::Uploading => "Reading Document",
            ConversionStatus::Analyzing => "AI Analysis",
            ConversionStatus::Generating => "Building CSV",
            ConversionStatus::Completed => "Done",
            ConversionStatus::Error => "Failed",
        }
    }

    /// 1-based position among the displayed steps, with the step count.
    ///
    /// `None` for `Idle` and `Error`, which are not steps.
    pub fn step(self) -> Option<(usize, usize)> {
        STEPS
            .iter()
            .position(|s| *s == self)
            .map(|i| (i + 1, STEPS.len()))
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionStatus::Idle => "idle",
            ConversionStatus::Uploading => "uploading",
            ConversionStatus::Analyzing => "analyzing",
            ConversionStatus::Generating => "generating",
            ConversionStatus::Completed => "completed",
            ConversionStatus::Error => "in error",
        };
        f.write_str(s)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A selection passed validation and a new attempt begins.
    FileAccepted {
        attempt: AttemptId,
        file: FileDescriptor,
    },
    /// The file content has been read.
    ReadComplete { attempt: AttemptId },
    /// The Analyzer returned a non-empty result.
    AnalysisComplete { attempt: AttemptId },
    /// The CSV was built and delivered under `file_name`.
    Delivered {
        attempt: AttemptId,
        file_name: String,
    },
    /// A stage failed; `message` is what the user sees.
    Failed { attempt: AttemptId, message: String },
    /// User-initiated reset.
    Reset,
}

impl Event {
    fn attempt(&self) -> Option<AttemptId> {
        match self {
            Event::FileAccepted { attempt, .. }
            | Event::ReadComplete { attempt }
            | Event::AnalysisComplete { attempt }
            | Event::Delivered { attempt, .. }
            | Event::Failed { attempt, .. } => Some(*attempt),
            Event::Reset => None,
        }
    }
}

/// Why an event was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// A file was offered while the machine could not take one.
    #[error("cannot accept a file while {0}")]
    Busy(ConversionStatus),

    /// The event belongs to an attempt that is no longer active.
    #[error("event from attempt {event} ignored (active attempt: {active:?})")]
    Stale {
        event: AttemptId,
        active: Option<AttemptId>,
    },

    /// The event does not apply to the current status.
    #[error("event not valid while {0}")]
    Invalid(ConversionStatus),
}

/// Snapshot of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    status: ConversionStatus,
    attempt: Option<AttemptId>,
    file: Option<FileDescriptor>,
    error: Option<String>,
    output: Option<String>,
}

impl PipelineState {
    /// The initial `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConversionStatus {
        self.status
    }

    /// The attempt currently owning the machine, if any.
    pub fn attempt(&self) -> Option<AttemptId> {
        self.attempt
    }

    /// The selection being (or last) converted.
    pub fn file(&self) -> Option<&FileDescriptor> {
        self.file.as_ref()
    }

    /// The user-facing error message, only set in `Error`.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The delivered file name, only set in `Completed`.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Compute the state that follows `event`.
    pub fn next(&self, event: Event) -> Result<PipelineState, TransitionError> {
        if let Event::Reset = event {
            return Ok(PipelineState::new());
        }

        if let Event::FileAccepted { attempt, file } = event {
            if !self.status.accepts_files() {
                return Err(TransitionError::Busy(self.status));
            }
            return Ok(PipelineState {
                status: ConversionStatus::Uploading,
                attempt: Some(attempt),
                file: Some(file),
                error: None,
                output: None,
            });
        }

        let event_attempt = event.attempt().unwrap_or_default();
        if self.attempt != Some(event_attempt) {
            return Err(TransitionError::Stale {
                event: event_attempt,
                active: self.attempt,
            });
        }

        let mut next = self.clone();
        match (self.status, event) {
            (ConversionStatus::Uploading, Event::ReadComplete { .. }) => {
                next.status = ConversionStatus::Analyzing;
            }
            (ConversionStatus::Analyzing, Event::AnalysisComplete { .. }) => {
                next.status = ConversionStatus::Generating;
            }
            (ConversionStatus::Generating, Event::Delivered { file_name, .. }) => {
                next.status = ConversionStatus::Completed;
                next.output = Some(file_name);
            }
            (status, Event::Failed { message, .. }) if status.is_active() => {
                next.status = ConversionStatus::Error;
                next.error = Some(message);
            }
            (status, _) => return Err(TransitionError::Invalid(status)),
        }
        Ok(next)
    }
}
