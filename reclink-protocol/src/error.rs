//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors covering framing, version configuration and
/// property schema access.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid length prefix: {0:?}")]
    InvalidLengthPrefix([u8; 8]),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("connection closed mid-frame: need {needed} more bytes")]
    TruncatedFrame { needed: usize },

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("unknown protocol version number: {0}")]
    UnknownVersion(i32),

    #[error("invalid version range: from {from} is newer than to {to}")]
    InvalidRange { from: String, to: String },

    #[error("field '{field}' declares a range outside its schema '{schema}'")]
    FieldOutsideSchemaRange {
        schema: &'static str,
        field: &'static str,
    },

    #[error("duplicate field '{field}' in schema '{schema}'")]
    DuplicateField {
        schema: &'static str,
        field: &'static str,
    },

    #[error("property '{0}' is not declared in this schema")]
    UnknownProperty(String),

    #[error("wire value count mismatch: got {got}, schema expects {expected}")]
    ValueCountMismatch { got: usize, expected: usize },

    #[error("cannot decode {raw:?} as {kind}")]
    ValueDecode { kind: &'static str, raw: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::InvalidLengthPrefix(*b"12x45678");
        assert!(err.to_string().contains("length prefix"));

        let err = ProtocolError::FrameTooLarge {
            size: 100,
            max: 50,
        };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::UnknownVersion(1234);
        assert!(err.to_string().contains("1234"));

        let err = ProtocolError::ValueDecode {
            kind: "integer",
            raw: "abc".to_string(),
        };
        assert!(err.to_string().contains("abc"));

        let err = ProtocolError::ValueCountMismatch {
            got: 3,
            expected: 5,
        };
        assert!(err.to_string().contains("3"));
        assert!(err.to_string().contains("5"));
    }
}
