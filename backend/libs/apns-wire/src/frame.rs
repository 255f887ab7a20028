//! Notification frames and the error-response frame.
//!
//! All integers are big-endian; lengths are in bytes.
//!
//! ```text
//! simple:   0x00 | token_len:u16 | token | payload_len:u16 | payload
//! enhanced: 0x01 | id:u32 | expiry:u32 | token_len:u16 | token | payload_len:u16 | payload
//! error:    0x08 | status:u8 | id:u32
//! ```

use std::fmt;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::Utc;

use crate::error::{CodecError, CodecResult};

/// Payload ceiling for simple frames.
pub const SIMPLE_PAYLOAD_LIMIT: usize = 256;
/// Whole-frame ceiling for enhanced frames.
pub const MAX_FRAME_SIZE: usize = 256;
/// Payload ceiling for group fan-out frames.
pub const GROUP_PAYLOAD_LIMIT: usize = 1900;
/// Size of an error-response frame.
pub const ERROR_RESPONSE_LEN: usize = 6;

const SIMPLE_COMMAND: u8 = 0;
const ENHANCED_COMMAND: u8 = 1;
const ERROR_RESPONSE_COMMAND: u8 = 8;

/// Encode a simple-format frame; the payload may not exceed 256 bytes.
pub fn encode_simple(token: &[u8], payload: &[u8]) -> CodecResult<Bytes> {
    encode_command_zero(token, payload, SIMPLE_PAYLOAD_LIMIT)
}

/// Encode a group fan-out frame: simple layout with a 1900 byte payload ceiling.
pub fn encode_group(token: &[u8], payload: &[u8]) -> CodecResult<Bytes> {
    encode_command_zero(token, payload, GROUP_PAYLOAD_LIMIT)
}

fn encode_command_zero(token: &[u8], payload: &[u8], limit: usize) -> CodecResult<Bytes> {
    if payload.len() > limit {
        return Err(CodecError::PayloadTooLarge {
            size: payload.len(),
            limit,
        });
    }
    let token_len = length_prefix(token)?;

    let mut frame = BytesMut::with_capacity(1 + 2 + token.len() + 2 + payload.len());
    frame.put_u8(SIMPLE_COMMAND);
    frame.put_u16(token_len);
    frame.put_slice(token);
    // payload.len() <= limit < u16::MAX
    frame.put_u16(payload.len() as u16);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Encode an enhanced-format frame. The whole frame may not exceed 256 bytes.
pub fn encode_enhanced(
    notification_id: u32,
    expiry: u32,
    token: &[u8],
    payload: &[u8],
) -> CodecResult<Bytes> {
    let size = 1 + 4 + 4 + 2 + token.len() + 2 + payload.len();
    if size > MAX_FRAME_SIZE {
        return Err(CodecError::PayloadTooLarge {
            size,
            limit: MAX_FRAME_SIZE,
        });
    }
    let token_len = length_prefix(token)?;

    let mut frame = BytesMut::with_capacity(size);
    frame.put_u8(ENHANCED_COMMAND);
    frame.put_u32(notification_id);
    frame.put_u32(expiry);
    frame.put_u16(token_len);
    frame.put_slice(token);
    frame.put_u16(payload.len() as u16);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Expiry timestamp `window` from now, in epoch seconds.
pub fn expiry_from_now(window: Duration) -> u32 {
    let now = Utc::now().timestamp().max(0) as u64;
    now.saturating_add(window.as_secs()).min(u32::MAX as u64) as u32
}

fn length_prefix(token: &[u8]) -> CodecResult<u16> {
    u16::try_from(token.len()).map_err(|_| CodecError::TokenTooLong(token.len()))
}

/// Status codes carried by an error-response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoErrors,
    ProcessingError,
    MissingDeviceToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    InvalidToken,
    Unknown,
    Unrecognized(u8),
}

impl ErrorCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => ErrorCode::NoErrors,
            1 => ErrorCode::ProcessingError,
            2 => ErrorCode::MissingDeviceToken,
            3 => ErrorCode::MissingTopic,
            4 => ErrorCode::MissingPayload,
            5 => ErrorCode::InvalidTokenSize,
            6 => ErrorCode::InvalidTopicSize,
            7 => ErrorCode::InvalidPayloadSize,
            8 => ErrorCode::InvalidToken,
            255 => ErrorCode::Unknown,
            other => ErrorCode::Unrecognized(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ErrorCode::NoErrors => 0,
            ErrorCode::ProcessingError => 1,
            ErrorCode::MissingDeviceToken => 2,
            ErrorCode::MissingTopic => 3,
            ErrorCode::MissingPayload => 4,
            ErrorCode::InvalidTokenSize => 5,
            ErrorCode::InvalidTopicSize => 6,
            ErrorCode::InvalidPayloadSize => 7,
            ErrorCode::InvalidToken => 8,
            ErrorCode::Unknown => 255,
            ErrorCode::Unrecognized(code) => *code,
        }
    }

    pub fn description(&self) -> String {
        match self {
            ErrorCode::NoErrors => "No errors encountered".to_string(),
            ErrorCode::ProcessingError => "Processing error (problem on Apple's end)".to_string(),
            ErrorCode::MissingDeviceToken => "Missing device token".to_string(),
            ErrorCode::MissingTopic => {
                "Missing topic (topic = app's bundle identifier)".to_string()
            }
            ErrorCode::MissingPayload => "Missing payload".to_string(),
            ErrorCode::InvalidTokenSize => "Invalid token size".to_string(),
            ErrorCode::InvalidTopicSize => "Invalid topic size".to_string(),
            ErrorCode::InvalidPayloadSize => "Invalid payload size".to_string(),
            ErrorCode::InvalidToken => "Invalid token".to_string(),
            ErrorCode::Unknown => "None (unknown)".to_string(),
            ErrorCode::Unrecognized(code) => format!("Unknown error code ({code})"),
        }
    }

    /// Whether the peer actually reported a problem.
    pub fn is_error(&self) -> bool {
        !matches!(self, ErrorCode::NoErrors)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.code(), self.description())
    }
}

/// Decoded error-response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: ErrorCode,
    pub notification_id: u32,
}

impl ErrorResponse {
    pub fn new(status: ErrorCode, notification_id: u32) -> Self {
        Self {
            status,
            notification_id,
        }
    }

    /// Wire form, as the gateway would send it.
    pub fn to_bytes(&self) -> [u8; ERROR_RESPONSE_LEN] {
        let mut buf = [0u8; ERROR_RESPONSE_LEN];
        buf[0] = ERROR_RESPONSE_COMMAND;
        buf[1] = self.status.code();
        buf[2..].copy_from_slice(&self.notification_id.to_be_bytes());
        buf
    }
}

/// Decode a 6-byte error-response frame into `(status, notification id)`.
///
/// The leading command byte is not checked; the gateway only ever writes
/// error responses on the delivery socket.
pub fn decode_error_response(frame: &[u8]) -> CodecResult<ErrorResponse> {
    if frame.len() < ERROR_RESPONSE_LEN {
        return Err(CodecError::Truncated {
            needed: ERROR_RESPONSE_LEN,
            available: frame.len(),
        });
    }
    let mut buf = &frame[..ERROR_RESPONSE_LEN];
    let _command = buf.get_u8();
    let status = ErrorCode::from_u8(buf.get_u8());
    let notification_id = buf.get_u32();
    Ok(ErrorResponse::new(status, notification_id))
}
