//! Feedback-stream frames.
//!
//! The feedback service writes a sequence of
//! `timestamp:u32 | token_len:u16 | token` records and closes the stream.

use bytes::{Buf, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{CodecError, CodecResult};
use crate::token::DeviceToken;

const ENTRY_HEADER_LEN: usize = 4 + 2;

/// One device reported by the feedback service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackEntry {
    /// Epoch seconds at which the gateway saw the app uninstalled
    pub timestamp: u32,
    pub token: DeviceToken,
}

impl FeedbackEntry {
    pub fn feedback_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(i64::from(self.timestamp), 0)
            .single()
            .unwrap_or_default()
    }

    /// Wire form of the entry.
    pub fn to_bytes(&self) -> Vec<u8> {
        let token = self.token.as_bytes();
        let mut buf = Vec::with_capacity(ENTRY_HEADER_LEN + token.len());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&(token.len() as u16).to_be_bytes());
        buf.extend_from_slice(token);
        buf
    }
}

/// Decode one entry from the front of `buf`.
///
/// Returns the entry and the number of bytes it occupied, or `None` when
/// `buf` does not yet hold a complete entry.
pub fn decode_feedback_entry(buf: &[u8]) -> Option<(FeedbackEntry, usize)> {
    if buf.len() < ENTRY_HEADER_LEN {
        return None;
    }
    let mut header = &buf[..ENTRY_HEADER_LEN];
    let timestamp = header.get_u32();
    let token_len = header.get_u16() as usize;

    let consumed = ENTRY_HEADER_LEN + token_len;
    if buf.len() < consumed {
        return None;
    }

    let token = DeviceToken::from_bytes(buf[ENTRY_HEADER_LEN..consumed].to_vec());
    Some((FeedbackEntry { timestamp, token }, consumed))
}

/// Incremental decoder fed with whatever chunks the socket yields.
#[derive(Debug, Default)]
pub struct FeedbackDecoder {
    buf: BytesMut,
}

impl FeedbackDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete entry, if one is buffered.
    pub fn next_entry(&mut self) -> Option<FeedbackEntry> {
        let (entry, consumed) = decode_feedback_entry(&self.buf)?;
        self.buf.advance(consumed);
        Some(entry)
    }

    /// Check that the stream ended on an entry boundary.
    pub fn finish(&self) -> CodecResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let needed = if self.buf.len() < ENTRY_HEADER_LEN {
            ENTRY_HEADER_LEN
        } else {
            ENTRY_HEADER_LEN + u16::from_be_bytes([self.buf[4], self.buf[5]]) as usize
        };
        Err(CodecError::Truncated {
            needed,
            available: self.buf.len(),
        })
    }
}
