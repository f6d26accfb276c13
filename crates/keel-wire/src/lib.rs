//! Framing for keel protocol messages.
//!
//! Every message travels as one self-delimiting frame:
//!
//! ```text
//! magic (u32 BE) | version (u16 BE) | direction (u16 BE) | length (u32 BE) | payload
//! ```
//!
//! The protocol carries no correlation ids, so the header stays small: the
//! only per-frame metadata is the payload length and which of the two tagged
//! unions the payload belongs to. Putting the direction in the header lets an
//! endpoint refuse a frame sent the wrong way before it ever reaches the
//! payload decoder, where it would otherwise surface as an opaque
//! deserialization failure.
use bytes::{Buf, Bytes, BytesMut};

mod message;

pub use message::{
    matches, BlockHeader, InfoResult, QueryParams, QueryResult, Request, Response, TxResult,
    Validator, CODE_OK,
};

pub const MAGIC: u32 = 0x4B454C31;
pub const VERSION: u16 = 1;

/// Wire values for [`Direction`].
pub const FLAG_REQUEST: u16 = 0x1;
pub const FLAG_RESPONSE: u16 = 0x2;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid magic number")]
    InvalidMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    #[error("unknown direction flags {0:#06x}")]
    UnexpectedFlags(u16),
    #[error("{got:?} frame where a {expected:?} frame was expected")]
    Direction { expected: Direction, got: Direction },
    #[error("frame too large")]
    FrameTooLarge,
    #[error("incomplete frame")]
    Incomplete,
    #[error("message codec: {0}")]
    Codec(String),
}

/// Which tagged union a frame's payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    fn from_wire(flags: u16) -> Result<Self> {
        match flags {
            FLAG_REQUEST => Ok(Direction::Request),
            FLAG_RESPONSE => Ok(Direction::Response),
            other => Err(Error::UnexpectedFlags(other)),
        }
    }

    fn to_wire(self) -> u16 {
        match self {
            Direction::Request => FLAG_REQUEST,
            Direction::Response => FLAG_RESPONSE,
        }
    }
}

/// Decoded frame header.
///
/// Magic and version are protocol constants: `decode` checks them and
/// `encode_into` writes them, but they are never stored. Only the fields
/// that vary per frame live here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub direction: Direction,
    pub length: u32,
}

impl FrameHeader {
    /// Encoded size: magic, version, direction, length.
    pub const LEN: usize = 12;

    pub fn encode_into(&self, out: &mut [u8; Self::LEN]) {
        out[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        out[4..6].copy_from_slice(&VERSION.to_be_bytes());
        out[6..8].copy_from_slice(&self.direction.to_wire().to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Parse and validate a header from the front of `bytes`.
    ///
    /// Fields are checked front to back so the caller learns the most
    /// specific problem: a stranger speaking on the socket (magic), a
    /// version skew, or a corrupt direction field. The returned length is
    /// NOT validated here; readers cap it against their configured maximum
    /// before allocating.
    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.remaining() < Self::LEN {
            return Err(Error::Incomplete);
        }
        let magic = bytes.get_u32();
        if magic != MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = bytes.get_u16();
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let direction = Direction::from_wire(bytes.get_u16())?;
        let length = bytes.get_u32();
        Ok(Self { direction, length })
    }
}

/// One framed payload.
///
/// ```
/// use bytes::Bytes;
/// use keel_wire::{Direction, Frame};
///
/// let frame = Frame::new(Direction::Request, Bytes::from_static(b"ping")).expect("frame");
/// let decoded = Frame::decode(frame.encode()).expect("decode");
/// assert_eq!(decoded.header.direction, Direction::Request);
/// assert_eq!(decoded.payload, Bytes::from_static(b"ping"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(direction: Direction, payload: Bytes) -> Result<Self> {
        // The length field is u32 on the wire; refuse anything that cannot
        // be represented rather than truncate.
        let length = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge)?;
        Ok(Self {
            header: FrameHeader { direction, length },
            payload,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FrameHeader::LEN + self.payload.len());
        let mut header = [0u8; FrameHeader::LEN];
        self.header.encode_into(&mut header);
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(input: Bytes) -> Result<Self> {
        let header = FrameHeader::decode(&input)?;
        let end = FrameHeader::LEN + header.length as usize;
        if input.len() < end {
            return Err(Error::Incomplete);
        }
        // Take exactly the declared length; bytes past it belong to whoever
        // handed us the buffer.
        let payload = input.slice(FrameHeader::LEN..end);
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(direction: Direction, payload: &'static [u8]) -> Bytes {
        Frame::new(direction, Bytes::from_static(payload))
            .expect("frame")
            .encode()
    }

    fn corrupt(at: usize, value: u8) -> Bytes {
        let mut buf = encoded(Direction::Request, b"x").to_vec();
        buf[at] = value;
        Bytes::from(buf)
    }

    #[test]
    fn both_directions_round_trip() {
        for direction in [Direction::Request, Direction::Response] {
            let decoded = Frame::decode(encoded(direction, b"payload")).expect("decode");
            assert_eq!(decoded.header.direction, direction);
            assert_eq!(decoded.header.length, 7);
            assert_eq!(decoded.payload, Bytes::from_static(b"payload"));
        }
    }

    #[test]
    fn empty_payload_is_valid() {
        let decoded = Frame::decode(encoded(Direction::Response, b"")).expect("decode");
        assert_eq!(decoded.header.length, 0);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let mut buf = BytesMut::from(&encoded(Direction::Request, b"one")[..]);
        buf.extend_from_slice(b"junk after the frame");
        let decoded = Frame::decode(buf.freeze()).expect("decode");
        assert_eq!(decoded.payload, Bytes::from_static(b"one"));
    }

    #[test]
    fn header_corruption_is_pinpointed_per_field() {
        // Byte 0 sits in the magic, 5 in the version, 7 in the direction.
        assert!(matches!(
            Frame::decode(corrupt(0, 0)).expect_err("magic"),
            Error::InvalidMagic
        ));
        assert!(matches!(
            Frame::decode(corrupt(5, 9)).expect_err("version"),
            Error::UnsupportedVersion(9)
        ));
        assert!(matches!(
            Frame::decode(corrupt(7, 9)).expect_err("direction"),
            Error::UnexpectedFlags(9)
        ));
    }

    #[test]
    fn truncation_anywhere_is_incomplete() {
        let frame = encoded(Direction::Response, b"abcdef");
        // Cut once inside the header, once inside the payload.
        for cut in [3, FrameHeader::LEN + 2] {
            let err = Frame::decode(frame.slice(..cut)).expect_err("truncated");
            assert!(matches!(err, Error::Incomplete), "cut at {cut}");
        }
    }
}
