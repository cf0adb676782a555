//! Error types for the quill-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding gateway frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a frame.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a frame.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// A payload did not have the expected shape.
    #[error("invalid payload for '{context}': {reason}")]
    InvalidPayload {
        /// Which frame or event the payload belonged to.
        context: String,
        /// What was wrong with it.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoding_error_display() {
        let err = ProtoError::Decoding("expected value at line 1".to_string());
        assert_eq!(err.to_string(), "decoding error: expected value at line 1");
    }

    #[test]
    fn test_invalid_payload_display() {
        let err = ProtoError::InvalidPayload {
            context: "connect.challenge".to_string(),
            reason: "missing nonce".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid payload for 'connect.challenge': missing nonce"
        );
    }
}
