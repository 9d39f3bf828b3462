//! Chunked response reader for newline-delimited JSON bodies.
//!
//! The generation service streams one JSON object per line. Chunk boundaries are
//! arbitrary: a record may span several chunks and a chunk may split a multi-byte
//! UTF-8 sequence, so decoding happens on raw bytes once a full line is buffered.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use pagesmith_abstraction::{ByteStream, ModelError};
use serde::de::DeserializeOwned;
use tracing::trace;

/// Lazily decodes records of type `T` from a byte stream.
///
/// A decode failure is fatal: it is yielded once and the stream ends.
pub struct NdjsonStream<T> {
    inner: ByteStream,
    buffer: Vec<u8>,
    done: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T> NdjsonStream<T> {
    /// Wrap a byte stream.
    pub fn new(inner: ByteStream) -> Self {
        Self { inner, buffer: Vec::new(), done: false, _record: PhantomData }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        Some(self.buffer.drain(..=end).collect())
    }
}

fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Option<Result<T, ModelError>> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    trace!(len = trimmed.len(), "Decoding upstream record");
    Some(serde_json::from_slice(trimmed).map_err(|e| {
        let preview = String::from_utf8_lossy(&trimmed[..trimmed.len().min(120)]).into_owned();
        ModelError::Serialization(format!("Malformed record ({e}): {preview}"))
    }))
}

impl<T: DeserializeOwned> Stream for NdjsonStream<T> {
    type Item = Result<T, ModelError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            while let Some(line) = this.take_line() {
                if let Some(result) = decode_line(&line) {
                    if result.is_err() {
                        this.done = true;
                    }
                    return Poll::Ready(Some(result));
                }
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    // Trailing partial line without a newline terminator.
                    this.done = true;
                    let rest = std::mem::take(&mut this.buffer);
                    return Poll::Ready(decode_line(&rest));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Build a [`ByteStream`] from in-memory chunks.
pub fn byte_stream_from_chunks<I, C>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = C>,
    I::IntoIter: Send + 'static,
    C: Into<bytes::Bytes>,
{
    Box::pin(futures::stream::iter(chunks.into_iter().map(|c| Ok(c.into()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::StreamExt;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        text: String,
        done: bool,
    }

    fn collect(chunks: Vec<Vec<u8>>) -> Vec<Result<Rec, ModelError>> {
        block_on(NdjsonStream::<Rec>::new(byte_stream_from_chunks(chunks)).collect())
    }

    #[test]
    fn test_decodes_lines_split_across_chunks() {
        let chunks = vec![
            b"{\"text\":\"he".to_vec(),
            b"llo\",\"done\":false}\n{\"text\":".to_vec(),
            b"\"!\",\"done\":true}\n".to_vec(),
        ];
        let records: Vec<Rec> = collect(chunks).into_iter().map(Result::unwrap).collect();
        assert_eq!(
            records,
            vec![
                Rec { text: "hello".to_string(), done: false },
                Rec { text: "!".to_string(), done: true },
            ]
        );
    }

    #[test]
    fn test_trailing_partial_line_is_decoded() {
        let chunks = vec![b"{\"text\":\"a\",\"done\":false}\n{\"text\":\"b\",\"done\":true}".to_vec()];
        let records = collect(chunks);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].as_ref().unwrap().text, "b");
    }

    #[test]
    fn test_blank_lines_and_crlf_are_ignored() {
        let chunks = vec![b"\r\n{\"text\":\"a\",\"done\":false}\r\n\n   \n".to_vec()];
        let records = collect(chunks);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_multibyte_character_split_between_chunks() {
        let line = "{\"text\":\"h\u{e9}llo \u{1f600}\",\"done\":false}\n".as_bytes().to_vec();
        let (a, b) = line.split_at(12);
        let records = collect(vec![a.to_vec(), b.to_vec()]);
        assert_eq!(records[0].as_ref().unwrap().text, "h\u{e9}llo \u{1f600}");
    }

    #[test]
    fn test_decode_failure_is_fatal() {
        let chunks = vec![b"{\"text\":\"a\",\"done\":false}\nnot json\n{\"text\":\"b\",\"done\":true}\n".to_vec()];
        let records = collect(chunks);
        assert_eq!(records.len(), 2);
        assert!(records[0].is_ok());
        assert!(matches!(records[1], Err(ModelError::Serialization(_))));
    }

    #[test]
    fn test_transport_error_ends_stream() {
        let inner: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"{\"text\":\"a\",\"done\":false}\n")),
            Err(ModelError::Request("connection reset".to_string())),
            Ok(bytes::Bytes::from_static(b"{\"text\":\"b\",\"done\":true}\n")),
        ]));
        let records: Vec<_> = block_on(NdjsonStream::<Rec>::new(inner).collect());
        assert_eq!(records.len(), 2);
        assert!(matches!(records[1], Err(ModelError::Request(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn test_chunk_boundaries_do_not_change_records(
            texts in prop::collection::vec("[a-z \u{e9}\u{4e2d}{}\"\\\\]{0,12}", 1..8),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
        ) {
            let records: Vec<Rec> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| Rec { text: t.clone(), done: i + 1 == texts.len() })
                .collect();
            let mut payload = Vec::new();
            for r in &records {
                payload.extend_from_slice(serde_json::to_string(r).unwrap().as_bytes());
                payload.push(b'\n');
            }

            let mut offsets: Vec<usize> = cuts.iter().map(|c| c.index(payload.len())).collect();
            offsets.sort_unstable();
            offsets.dedup();
            let mut chunks = Vec::new();
            let mut start = 0;
            for off in offsets {
                chunks.push(payload[start..off].to_vec());
                start = off;
            }
            chunks.push(payload[start..].to_vec());

            let whole: Vec<Rec> = collect(vec![payload.clone()]).into_iter().map(Result::unwrap).collect();
            let split: Vec<Rec> = collect(chunks).into_iter().map(Result::unwrap).collect();
            prop_assert_eq!(&whole, &records);
            prop_assert_eq!(split, whole);
        }
    }
}
