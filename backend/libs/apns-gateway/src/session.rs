use std::time::Duration;

use apns_wire::{FeedbackDecoder, FeedbackEntry};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::endpoint::GatewayEndpoint;
use crate::error::{GatewayError, GatewayResult};

/// Byte stream a session runs over: a TLS stream in production, an
/// in-memory duplex in tests.
pub trait GatewayStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> GatewayStream for T {}

/// An open connection to a gateway, scoped to one credential.
///
/// Dropping the session closes the socket.
pub struct GatewaySession {
    stream: Box<dyn GatewayStream>,
    endpoint: GatewayEndpoint,
    /// Bytes received but not yet returned by a read
    read_buf: BytesMut,
}

impl GatewaySession {
    pub fn new(stream: impl GatewayStream + 'static, endpoint: GatewayEndpoint) -> Self {
        Self {
            stream: Box::new(stream),
            endpoint,
            read_buf: BytesMut::with_capacity(64),
        }
    }

    pub fn endpoint(&self) -> &GatewayEndpoint {
        &self.endpoint
    }

    /// Write one frame and flush it.
    pub async fn write(&mut self, frame: &[u8]) -> GatewayResult<()> {
        self.stream
            .write_all(frame)
            .await
            .map_err(GatewayError::Write)?;
        self.stream.flush().await.map_err(GatewayError::Write)
    }

    /// Wait up to `window` for exactly `n` bytes.
    ///
    /// Returns `None` when fewer than `n` bytes arrive in time or the peer
    /// closes the stream first; neither is an error. Bytes that arrived
    /// before the deadline are kept and count towards the next read.
    pub async fn read_with_timeout(
        &mut self,
        n: usize,
        window: Duration,
    ) -> GatewayResult<Option<Vec<u8>>> {
        // read_buf is cancel-safe: bytes are buffered before the timeout can
        // drop the future
        let filled = tokio::time::timeout(window, async {
            while self.read_buf.len() < n {
                if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                    return Ok(false);
                }
            }
            Ok::<_, std::io::Error>(true)
        })
        .await;

        match filled {
            Err(_) => Ok(None),
            Ok(Ok(true)) => Ok(Some(self.read_buf.split_to(n).to_vec())),
            Ok(Ok(false)) => {
                debug!(
                    endpoint = %self.endpoint,
                    buffered = self.read_buf.len(),
                    "Gateway closed the session"
                );
                Ok(None)
            }
            Ok(Err(e)) => Err(GatewayError::Read(e)),
        }
    }

    /// Send close_notify and shut the stream down.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(endpoint = %self.endpoint, error = %e, "Session shutdown was not clean");
        }
    }

    /// Turn the session into a reader over feedback records.
    pub fn into_feedback_stream(mut self) -> FeedbackStream {
        let mut decoder = FeedbackDecoder::new();
        decoder.extend(&self.read_buf.split());
        FeedbackStream {
            session: self,
            decoder,
            finished: false,
        }
    }
}

/// Lazy, finite sequence of feedback records; ends at EOF.
pub struct FeedbackStream {
    session: GatewaySession,
    decoder: FeedbackDecoder,
    finished: bool,
}

impl FeedbackStream {
    /// Next record, or `None` once the service has closed the stream.
    pub async fn next_entry(&mut self) -> GatewayResult<Option<FeedbackEntry>> {
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(entry) = self.decoder.next_entry() {
                return Ok(Some(entry));
            }
            if self.finished {
                return Ok(None);
            }

            let read = self
                .session
                .stream
                .read(&mut chunk)
                .await
                .map_err(GatewayError::Read)?;

            if read == 0 {
                self.finished = true;
                self.decoder.finish()?;
            } else {
                self.decoder.extend(&chunk[..read]);
            }
        }
    }

    /// Drain the remaining records.
    pub async fn collect(mut self) -> GatewayResult<Vec<FeedbackEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry().await? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
