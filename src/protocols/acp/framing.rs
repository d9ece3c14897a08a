//! Newline-delimited JSON framing over a duplex byte stream.
//!
//! Read side: one message per line, framed on raw bytes so a line that is not
//! valid UTF-8 is dropped like any other malformed line. A line that fails to
//! decode, parse or classify is logged and dropped; it never ends the stream.
//!
//! Write side: serialize, append `\n`, flush, all under one lock so concurrent
//! writers never interleave partial lines.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::message::Message;
use crate::api::types::ApiError;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared write half. Cloning shares the underlying stream.
#[derive(Clone)]
pub struct FrameWriter {
    inner: Arc<Mutex<Option<BoxedWriter>>>,
}

impl FrameWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::new(writer)))),
        }
    }

    /// Write one message as a single line.
    pub async fn send(&self, message: &Message) -> Result<(), ApiError> {
        let mut data = serde_json::to_vec(&message.to_value()).map_err(|e| {
            ApiError::ProtocolError {
                message: format!("Failed to serialize JSON-RPC message: {e}"),
            }
        })?;
        data.push(b'\n');

        let mut guard = self.inner.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(ApiError::ProtocolError {
                message: "Agent stdin not available".to_string(),
            });
        };

        writer
            .write_all(&data)
            .await
            .map_err(|e| ApiError::io("Failed to write to agent", e))?;
        writer
            .flush()
            .await
            .map_err(|e| ApiError::io("Failed to flush agent stream", e))?;
        Ok(())
    }

    /// Close the write half. Later sends fail.
    pub async fn close(&self) {
        let writer = self.inner.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                log::debug!("Failed to shut down agent write stream: {e}");
            }
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

/// Read half yielding classified messages.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next well-formed message, or `None` once the stream ends or fails.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Failed to read from agent stream: {e}");
                    return None;
                }
            }

            let line = match std::str::from_utf8(&self.buf) {
                Ok(line) => line,
                Err(e) => {
                    log::warn!(
                        "Dropping non-UTF-8 line from agent ({e}): {}",
                        snippet(&String::from_utf8_lossy(&self.buf))
                    );
                    continue;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value = match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(value) => value,
                Err(e) => {
                    // Agents sometimes print plain log text on stdout
                    log::warn!("Dropping malformed line from agent ({e}): {}", snippet(trimmed));
                    continue;
                }
            };

            match Message::classify(value) {
                Ok(message) => return Some(message),
                Err(e) => {
                    log::warn!("Dropping unrecognized message ({e}): {}", snippet(trimmed));
                }
            }
        }
    }
}

fn snippet(line: &str) -> String {
    line.chars().take(200).collect()
}
