//! Text frame format.
//!
//! Frame layout (8-byte ASCII header + payload):
//!
//! ```text
//! +----------------------+---------------------------------------+
//! | length               | payload                               |
//! | 8 ASCII digits,      | `length` bytes: arguments joined by   |
//! | zero-padded decimal  | the literal delimiter `[]:[]`         |
//! +----------------------+---------------------------------------+
//! ```
//!
//! There is no trailing delimiter after the last argument. An empty argument
//! list encodes as `00000000` with zero payload bytes. The length counts
//! payload bytes, not characters.

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};

/// The literal joining consecutive arguments on the wire.
pub const DELIMITER: &str = "[]:[]";

/// Size of the ASCII length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Leading argument reserved for backend-initiated event frames.
pub const EVENT_MARKER: &str = "BACKEND_MESSAGE";

/// One decoded wire frame: an ordered list of string arguments.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Ordered argument strings.
    pub args: Vec<String>,
    /// When this packet was built or decoded.
    pub created_at: DateTime<Utc>,
}

impl Packet {
    /// Creates a packet from owned argument strings.
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            created_at: Utc::now(),
        }
    }

    /// Creates a packet from anything string-like.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(args.into_iter().map(Into::into).collect())
    }

    /// Returns the argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Whether this frame is an unsolicited backend event rather than a
    /// command reply.
    pub fn is_event(&self) -> bool {
        self.arg(0) == Some(EVENT_MARKER)
    }

    /// Encodes the packet into a length-prefixed frame.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let payload_len: usize = if self.args.is_empty() {
            0
        } else {
            self.args.iter().map(String::len).sum::<usize>()
                + DELIMITER.len() * (self.args.len() - 1)
        };
        if payload_len as u64 > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len as u64,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload_len);
        buf.put_slice(format!("{payload_len:08}").as_bytes());
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                buf.put_slice(DELIMITER.as_bytes());
            }
            buf.put_slice(arg.as_bytes());
        }
        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(packet))` if a complete frame was consumed,
    /// `Ok(None)` if more data is needed, or `Err` on a malformed prefix.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let prefix: [u8; LENGTH_PREFIX_SIZE] = buf[..LENGTH_PREFIX_SIZE]
            .try_into()
            .expect("slice length checked above");
        if !prefix.iter().all(u8::is_ascii_digit) {
            return Err(ProtocolError::InvalidLengthPrefix(prefix));
        }
        let payload_len = prefix
            .iter()
            .fold(0u64, |acc, &d| acc * 10 + u64::from(d - b'0'));
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let payload_len = payload_len as usize;

        if buf.len() < LENGTH_PREFIX_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let payload = buf.split_to(payload_len);
        let args = if payload.is_empty() {
            Vec::new()
        } else {
            let text = std::str::from_utf8(&payload).map_err(|_| ProtocolError::InvalidUtf8)?;
            text.split(DELIMITER).map(str::to_string).collect()
        };

        Ok(Some(Self::new(args)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(args: &[&str]) -> Vec<String> {
        let packet = Packet::from_args(args.iter().copied());
        let mut buf = packet.encode().unwrap();
        Packet::decode(&mut buf).unwrap().unwrap().args
    }

    #[test]
    fn test_encode_known_frame() {
        let packet = Packet::from_args(["GET_NEXT_FREE_RECORDER", "-1"]);
        let encoded = packet.encode().unwrap();
        // Payload: GET_NEXT_FREE_RECORDER[]:[]-1 (29 bytes).
        assert_eq!(&encoded[..], b"00000029GET_NEXT_FREE_RECORDER[]:[]-1");
    }

    #[test]
    fn test_decode_known_frame() {
        let mut buf = BytesMut::from(&b"00000029GET_NEXT_FREE_RECORDER[]:[]-1"[..]);
        let packet = Packet::decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.args, vec!["GET_NEXT_FREE_RECORDER", "-1"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrip_variants() {
        assert_eq!(roundtrip(&["OK"]), vec!["OK"]);
        assert_eq!(roundtrip(&["a", "", "b"]), vec!["a", "", "b"]);
        assert_eq!(
            roundtrip(&["QUERY_RECORDINGS", "Ascending"]),
            vec!["QUERY_RECORDINGS", "Ascending"]
        );
    }

    #[test]
    fn test_empty_arg_list() {
        let packet = Packet::new(Vec::new());
        let encoded = packet.encode().unwrap();
        assert_eq!(&encoded[..], b"00000000");

        let mut buf = encoded;
        let decoded = Packet::decode(&mut buf).unwrap().unwrap();
        assert!(decoded.args.is_empty());
    }

    #[test]
    fn test_no_trailing_delimiter() {
        let packet = Packet::from_args(["A", "B"]);
        let encoded = packet.encode().unwrap();
        assert!(!encoded.ends_with(DELIMITER.as_bytes()));
    }

    #[test]
    fn test_length_counts_bytes_not_chars() {
        // Multi-byte UTF-8 in an argument.
        let packet = Packet::from_args(["ANN", "Röhre"]);
        let encoded = packet.encode().unwrap();
        let expected_len = "ANN[]:[]Röhre".len();
        assert_eq!(&encoded[..8], format!("{expected_len:08}").as_bytes());

        let mut buf = encoded;
        let decoded = Packet::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.args, vec!["ANN", "Röhre"]);
    }

    #[test]
    fn test_partial_frame_needs_more_data() {
        let packet = Packet::from_args(["QUERY_UPTIME"]);
        let encoded = packet.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..5]);
        assert!(Packet::decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(Packet::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_invalid_length_prefix() {
        let mut buf = BytesMut::from(&b"0000x029GET_NEXT"[..]);
        let err = Packet::decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLengthPrefix(_)));
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::from(&b"99999999"[..]);
        let err = Packet::decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));

        let huge = Packet::from_args(["x".repeat(MAX_PAYLOAD_SIZE as usize + 1)]);
        assert!(matches!(
            huge.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_event_marker() {
        let event = Packet::from_args([EVENT_MARKER, "SYSTEM_EVENT CLIENT_CONNECTED", "empty"]);
        assert!(event.is_event());

        let reply = Packet::from_args(["ACCEPT", "91"]);
        assert!(!reply.is_event());
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Packet::from_args(["ACCEPT", "91"]).encode().unwrap());
        buf.extend_from_slice(&Packet::from_args(["OK"]).encode().unwrap());

        let first = Packet::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.args, vec!["ACCEPT", "91"]);
        let second = Packet::decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.args, vec!["OK"]);
        assert!(Packet::decode(&mut buf).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(args in proptest::collection::vec("[a-zA-Z0-9 _.-]{0,24}", 1..8)) {
            let packet = Packet::new(args.clone());
            let mut buf = packet.encode().unwrap();
            let decoded = Packet::decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(decoded.args, args);
            prop_assert!(buf.is_empty());
        }
    }
}
