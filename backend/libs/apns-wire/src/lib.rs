/// APNs Legacy Binary Protocol Codec
///
/// Pure encoders and decoders for the binary gateway protocol spoken over
/// the persistent TLS sessions to the Apple push gateway and feedback service.
///
/// It handles:
/// - JSON payload assembly (the `aps` dictionary plus custom properties)
/// - Alert truncation per notification format
/// - Simple (command 0) and enhanced (command 1) notification frames
/// - The 6-byte error-response frame
/// - The feedback-stream frame format
///
/// Nothing in this crate performs I/O.
pub mod error;
pub mod feedback;
pub mod frame;
pub mod payload;
pub mod token;

pub use error::{CodecError, CodecResult};
pub use feedback::{decode_feedback_entry, FeedbackDecoder, FeedbackEntry};
pub use frame::{
    decode_error_response, encode_enhanced, encode_group, encode_simple, expiry_from_now,
    ErrorCode, ErrorResponse, ERROR_RESPONSE_LEN, GROUP_PAYLOAD_LIMIT, MAX_FRAME_SIZE,
    SIMPLE_PAYLOAD_LIMIT,
};
pub use payload::{truncate_alert, Alert, PayloadFormat, PushPayload, Sound, DEFAULT_SOUND};
pub use token::DeviceToken;
