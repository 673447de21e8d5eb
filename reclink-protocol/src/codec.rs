//! Buffered encoder and decoder for wire frames.

use crate::error::ProtocolError;
use crate::frame::Packet;
use bytes::BytesMut;

/// Encodes packets into length-prefixed frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a packet into a frame ready to be written to the socket.
    pub fn encode_packet(packet: &Packet) -> Result<BytesMut, ProtocolError> {
        packet.encode()
    }

    /// Encodes a command name plus arguments into a frame.
    pub fn encode_command(command: &str, args: &[String]) -> Result<BytesMut, ProtocolError> {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(command.to_string());
        all.extend_from_slice(args);
        Packet::new(all).encode()
    }
}

/// Accumulates socket reads and yields complete packets.
///
/// Socket reads are arbitrary-sized; the decoder buffers partial frames until
/// the length prefix is satisfied, so short reads never surface to callers.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends raw socket data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete packet from the buffer.
    pub fn decode_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
        Packet::decode(&mut self.buffer)
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards any buffered data.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
