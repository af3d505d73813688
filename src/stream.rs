//! Streaming APIs: observe the state machine, convert many files in turn.
//!
//! [`status_stream`] is how presentation code follows a conversion: it gets
//! the current [`PipelineState`] first and every change after that, and has
//! no way to modify it.
//!
//! [`convert_each`] runs a list of inputs through one [`Converter`], strictly
//! one at a time, yielding each outcome as soon as it is known.

use crate::convert::Converter;
use crate::error::Pdf2CsvError;
use crate::model::ConversionOutput;
use crate::pipeline::input::FileSource;
use crate::state::PipelineState;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;
use tracing::debug;

/// A boxed stream of state snapshots.
pub type StatusStream = Pin<Box<dyn Stream<Item = PipelineState> + Send>>;

/// A boxed stream of per-input outcomes.
pub type BatchStream = Pin<Box<dyn Stream<Item = BatchItem> + Send>>;

/// Outcome of one input in [`convert_each`].
#[derive(Debug)]
pub struct BatchItem {
    /// Position of the input in the submitted list.
    pub index: usize,
    /// The input as given (path, URL or name).
    pub input: String,
    pub result: Result<ConversionOutput, Pdf2CsvError>,
}

/// Follow the converter's state: current value first, then each change.
///
/// Intermediate values may be skipped if the consumer is slower than the
/// pipeline; the latest state is never missed.
pub fn status_stream(converter: &Converter) -> StatusStream {
    Box::pin(WatchStream::new(converter.subscribe()))
}

/// Convert `sources` one after another.
///
/// The converter is reset after each attempt so the next one starts from
/// `Idle`. Failures do not stop the batch; each shows up in its own item.
pub fn convert_each(converter: Arc<Converter>, sources: Vec<FileSource>) -> BatchStream {
    let s = stream::iter(sources.into_iter().enumerate()).then(move |(index, source)| {
        let converter = Arc::clone(&converter);
        async move {
            let input = source.display_name();
            debug!("Batch item {}: {}", index, input);
            let result = converter.convert(source).await;
            converter.reset();
            BatchItem {
                index,
                input,
                result,
            }
        }
    });
    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversionConfig, OutputTarget};
    use crate::model::{ConversionResult, Section, TokenUsage};
    use crate::pipeline::analyze::{Analysis, Analyzer};
    use crate::pipeline::encode::InlineDocument;
    use crate::state::ConversionStatus;
    use async_trait::async_trait;

    struct OneCell;

    #[async_trait]
    impl Analyzer for OneCell {
        fn name(&self) -> &str {
            "one-cell"
        }

        async fn analyze(
            &self,
            _document: &InlineDocument,
            _instructions: &str,
        ) -> Result<Analysis, Pdf2CsvError> {
            Ok(Analysis {
                result: ConversionResult::new(vec![Section::new("s", vec![vec!["x".into()]])]),
                usage: TokenUsage::default(),
            })
        }
    }

    fn converter() -> Arc<Converter> {
        let config = ConversionConfig::builder()
            .output(OutputTarget::Memory)
            .build()
            .unwrap();
        Arc::new(Converter::with_analyzer(Arc::new(OneCell), config))
    }

    fn bytes(name: &str, mime: &str) -> FileSource {
        FileSource::Bytes {
            name: name.into(),
            mime_type: mime.into(),
            data: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn batch_runs_every_input_in_order() {
        let c = converter();
        let items: Vec<BatchItem> = convert_each(
            Arc::clone(&c),
            vec![
                bytes("a.pdf", "application/pdf"),
                bytes("notes.txt", "text/plain"),
                bytes("b.jpg", "image/jpeg"),
            ],
        )
        .collect()
        .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].result.as_ref().unwrap().file_name, "a_converted.csv");
        assert!(matches!(
            items[1].result,
            Err(Pdf2CsvError::UnsupportedType { .. })
        ));
        assert_eq!(items[2].input, "b.jpg");
        assert_eq!(items[2].result.as_ref().unwrap().file_name, "b_converted.csv");
        assert_eq!(c.status(), ConversionStatus::Idle);
    }

    #[tokio::test]
    async fn status_stream_starts_with_current_state() {
        let c = converter();
        let mut states = status_stream(&c);
        let first = states.next().await.unwrap();
        assert_eq!(first.status(), ConversionStatus::Idle);
    }
}
