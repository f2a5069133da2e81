use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::debug;

/// Number of leading stderr characters retained per process
pub const CAPTURE_LIMIT: usize = 4096;

/// How long to wait for the reader to reach EOF once the process has exited
const SETTLE_TIMEOUT: Duration = Duration::from_millis(500);

/// Decodes a byte stream into UTF-8 chunks, replacing invalid sequences
struct Utf8Codec;

impl Decoder for Utf8Codec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match std::str::from_utf8(src) {
            Ok(s) => {
                let out = s.to_owned();
                src.clear();
                Ok(Some(out))
            }
            // Incomplete multi-byte sequence at the end, keep it for the next read
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                if valid == 0 {
                    return Ok(None);
                }
                let out = String::from_utf8_lossy(&src[..valid]).into_owned();
                src.advance(valid);
                Ok(Some(out))
            }
            Err(e) => {
                let end = e.valid_up_to() + e.error_len().unwrap_or(1);
                let out = String::from_utf8_lossy(&src[..end]).into_owned();
                src.advance(end);
                Ok(Some(out))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let out = String::from_utf8_lossy(src).into_owned();
        src.clear();
        Ok(Some(out))
    }
}

#[derive(Default)]
struct CaptureBuffer {
    text: String,
    chars: usize,
}

impl CaptureBuffer {
    fn push(&mut self, chunk: &str) {
        if self.chars >= CAPTURE_LIMIT {
            return;
        }
        for c in chunk.chars().take(CAPTURE_LIMIT - self.chars) {
            self.text.push(c);
            self.chars += 1;
        }
    }
}

/// Drains a child's stderr in the background, keeping the leading output.
///
/// The pipe is read to EOF even after the buffer is full so the child never
/// blocks on a full pipe.
pub struct DiagnosticCapture {
    buffer: Arc<Mutex<CaptureBuffer>>,
    reader: Option<JoinHandle<()>>,
}

impl DiagnosticCapture {
    pub fn spawn<R>(io: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
        let reader = tokio::spawn({
            let buffer = buffer.clone();
            async move {
                let mut frames = FramedRead::with_capacity(io, Utf8Codec, 1024);
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(text) => {
                            if let Ok(mut buffer) = buffer.lock() {
                                buffer.push(&text);
                            }
                        }
                        Err(e) => {
                            debug!("stderr capture stopped: {e}");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            buffer,
            reader: Some(reader),
        }
    }

    /// A capture with nothing to read
    pub fn empty() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(CaptureBuffer::default())),
            reader: None,
        }
    }

    /// Leading output truncated to `limit` characters, `None` if nothing was written.
    ///
    /// Gives the reader a short window to reach EOF so output written just
    /// before exit is included.
    pub async fn snippet(&mut self, limit: usize) -> Option<String> {
        if let Some(reader) = self.reader.take() {
            if tokio::time::timeout(SETTLE_TIMEOUT, reader).await.is_err() {
                debug!("stderr reader still running after process exit");
            }
        }

        let buffer = self.buffer.lock().ok()?;
        let text: String = buffer.text.chars().take(limit).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl Drop for DiagnosticCapture {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
