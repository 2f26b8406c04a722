//! Low-level Source engine query protocol.
//!
//! This module handles the binary framing for the A2S_INFO exchange: the
//! four-byte simple-packet header, request construction (with the optional
//! challenge suffix modern servers demand), and payload field decoding.

use std::io;

/// Header of a single-packet ("simple") response or request.
const SIMPLE_HEADER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
/// Header of a split ("multi-packet") response, which this client does not speak.
const SPLIT_HEADER: [u8; 4] = [0xFE, 0xFF, 0xFF, 0xFF];

/// A2S_INFO request type byte.
const INFO_REQUEST: u8 = 0x54; // 'T'
/// A2S_INFO response type byte.
pub const INFO_RESPONSE: u8 = 0x49; // 'I'
/// Challenge response type byte; the request must be resent with the challenge.
pub const CHALLENGE_RESPONSE: u8 = 0x41; // 'A'

const INFO_REQUEST_PAYLOAD: &[u8] = b"Source Engine Query\0";

/// Build an A2S_INFO request packet.
///
/// Servers that answer with a challenge expect the same request resent with
/// the four challenge bytes appended.
pub fn build_info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(29);
    packet.extend_from_slice(&SIMPLE_HEADER);
    packet.push(INFO_REQUEST);
    packet.extend_from_slice(INFO_REQUEST_PAYLOAD);
    if let Some(challenge) = challenge {
        packet.extend_from_slice(&challenge);
    }
    packet
}

/// Split a response packet into its type byte and payload.
///
/// Returns an error for truncated packets, unknown headers, and split
/// responses (game servers this tool targets fit A2S_INFO in one datagram).
pub fn strip_header(packet: &[u8]) -> io::Result<(u8, &[u8])> {
    if packet.len() < 5 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "response shorter than packet header",
        ));
    }
    if packet[..4] == SPLIT_HEADER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "split response packets are not supported",
        ));
    }
    if packet[..4] != SIMPLE_HEADER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid packet header",
        ));
    }
    Ok((packet[4], &packet[5..]))
}

/// Sequential reader over a response payload.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let byte = *self.data.get(self.pos).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "payload ended inside a byte field")
        })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16_le(&mut self) -> io::Result<u16> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Read a NUL-terminated UTF-8 string.
    pub fn read_cstring(&mut self) -> io::Result<String> {
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "payload ended inside a string field",
            )
        })?;
        let s = String::from_utf8_lossy(&rest[..end]).to_string();
        self.pos += end + 1;
        Ok(s)
    }
}
