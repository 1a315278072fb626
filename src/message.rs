/*!
    harp wire format

    every frame is laid out as follows, all integers little-endian

    ```text
    | type | length | address | port | payload type | [seconds: u32, ticks: u16] | payload ... | checksum |
    ```

    `length` counts every byte following it, checksum included. The timestamp is only present when the payload type carries [PayloadType::HAS_TIMESTAMP], which is always the case for frames sent by the device and never for requests sent by the host.
*/

use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes, ByteArray};
use thiserror::Error;

use crate::{
    pack_bits,
    utils::checksum,
    clock::HarpTime,
    };


/// size of the fixed header, up to and including the payload type
pub const HEADER_SIZE: usize = 5;
/// size of the optional timestamp following the header
pub const TIMESTAMP_SIZE: usize = 6;
/// biggest frame the length field can describe
pub const MAX_FRAME: usize = 2 + u8::MAX as usize;
/// biggest payload a timestamped frame can carry
pub const MAX_PAYLOAD: usize = u8::MAX as usize - TIMESTAMP_SIZE - 4;
/// port set on every frame emitted by the device
pub const DEFAULT_PORT: u8 = 0xFF;

/// owned bytes of a serialized frame
pub type Frame = heapless::Vec<u8, MAX_FRAME>;


/// kind of message
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq)]
pub enum MessageType {
    Read = 1,
    Write = 2,
    /// unsolicited message emitted by the device
    Event = 3,
    ReadError = 9,
    WriteError = 10,
    #[fallback]
    Unknown = 255,
}
pack_bits!(MessageType);

/**
    tag describing the value carried by a message or stored in a register

    the lower nibble is the width in bytes of one element, upper bits are flags
*/
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct PayloadType(u8);

impl PayloadType {
    pub const IS_SIGNED: u8 = 0x80;
    pub const IS_FLOAT: u8 = 0x40;
    pub const HAS_TIMESTAMP: u8 = 0x10;
    const WIDTH: u8 = 0x0f;

    pub const U8: Self = Self(1);
    pub const S8: Self = Self(Self::IS_SIGNED | 1);
    pub const U16: Self = Self(2);
    pub const S16: Self = Self(Self::IS_SIGNED | 2);
    pub const U32: Self = Self(4);
    pub const S32: Self = Self(Self::IS_SIGNED | 4);
    pub const U64: Self = Self(8);
    pub const S64: Self = Self(Self::IS_SIGNED | 8);
    pub const FLOAT: Self = Self(Self::IS_FLOAT | 4);

    pub const fn from_bits(bits: u8) -> Self {Self(bits)}
    pub const fn bits(self) -> u8 {self.0}

    /// number of bytes of one element of this type
    pub const fn element_width(self) -> u8 {self.0 & Self::WIDTH}
    pub const fn is_signed(self) -> bool {self.0 & Self::IS_SIGNED != 0}
    pub const fn is_float(self) -> bool {self.0 & Self::IS_FLOAT != 0}
    pub const fn has_timestamp(self) -> bool {self.0 & Self::HAS_TIMESTAMP != 0}

    pub const fn with_timestamp(self) -> Self {Self(self.0 | Self::HAS_TIMESTAMP)}
    pub const fn without_timestamp(self) -> Self {Self(self.0 & !Self::HAS_TIMESTAMP)}
}
impl core::fmt::Debug for PayloadType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = if self.is_float() {"F"} else if self.is_signed() {"S"} else {"U"};
        write!(f, "{}{}", kind, 8 * u32::from(self.element_width()))?;
        if self.has_timestamp() {
            f.write_str("+timestamp")?;
        }
        Ok(())
    }
}
impl ToBytes for PayloadType {
    type Bytes = [u8; 1];
    fn to_le_bytes(self) -> Self::Bytes {[self.0]}
    fn to_be_bytes(self) -> Self::Bytes {[self.0]}
}
impl FromBytes for PayloadType {
    type Bytes = [u8; 1];
    fn from_le_bytes(bytes: Self::Bytes) -> Self {Self(bytes[0])}
    fn from_be_bytes(bytes: Self::Bytes) -> Self {Self(bytes[0])}
}


/// fixed part at the start of every frame
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, PartialEq)]
pub struct Header {
    pub kind: MessageType,
    /// number of bytes following this field, checksum included
    pub length: u8,
    /// register address
    pub address: u8,
    pub port: u8,
    pub payload_type: PayloadType,
}

impl Header {
    /// decode the header at the start of `bytes`, or `None` if not enough bytes arrived yet
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let head = bytes.get(.. HEADER_SIZE)?;
        let mut raw = <Self as FromBytes>::Bytes::zeroed();
        raw.as_mut().copy_from_slice(head);
        Some(Self::from_le_bytes(raw))
    }
    pub fn timestamped(&self) -> bool {
        self.payload_type.has_timestamp()
    }
    /// position of the payload in the frame
    pub fn payload_offset(&self) -> usize {
        if self.timestamped()  {HEADER_SIZE + TIMESTAMP_SIZE}
        else                   {HEADER_SIZE}
    }
    /// number of payload bytes announced by the length field
    pub fn payload_length(&self) -> Result<usize, FrameError> {
        let overhead = if self.timestamped() {TIMESTAMP_SIZE + 4} else {4};
        usize::from(self.length).checked_sub(overhead)
            .ok_or(FrameError::Length(self.length))
    }
    /// position of the checksum byte in the frame
    pub fn checksum_offset(&self) -> usize {
        usize::from(self.length) + 1
    }
    /// total number of bytes of the frame
    pub fn frame_length(&self) -> usize {
        usize::from(self.length) + 2
    }
}

/// decode a header, `None` means the frame is still incomplete
pub fn parse_header(bytes: &[u8]) -> Option<Header> {
    Header::parse(bytes)
}


/// view on a complete and verified frame
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Message<'a> {
    pub header: Header,
    /// only set on timestamped frames
    pub timestamp: Option<HarpTime>,
    pub payload: &'a [u8],
    pub checksum: u8,
}

impl<'a> Message<'a> {
    /**
        decode the frame at the start of `bytes`

        returns `Ok(None)` while the frame is incomplete, otherwise the message and the number of bytes it spans
    */
    pub fn parse(bytes: &'a [u8]) -> Result<Option<(Self, usize)>, FrameError> {
        let Some(header) = Header::parse(bytes)
            else {return Ok(None)};
        let payload_length = header.payload_length()?;
        let size = header.frame_length();
        let Some(frame) = bytes.get(.. size)
            else {return Ok(None)};

        let computed = checksum(&frame[.. header.checksum_offset()]);
        let received = frame[header.checksum_offset()];
        if computed != received {
            return Err(FrameError::Checksum {computed, received});
        }

        let timestamp = header.timestamped().then(|| {
            let seconds = u32::from_le_bytes([frame[5], frame[6], frame[7], frame[8]]);
            let ticks = u16::from_le_bytes([frame[9], frame[10]]);
            HarpTime::from_ticks(seconds, ticks)
        });
        let start = header.payload_offset();
        Ok(Some((
            Self {
                header,
                timestamp,
                payload: &frame[start ..][.. payload_length],
                checksum: received,
            },
            size,
        )))
    }
    pub fn kind(&self) -> MessageType {self.header.kind}
    pub fn address(&self) -> u8 {self.header.address}
}


/**
    serialize a frame

    the timestamp flag of `payload_type` is set according to the presence of `timestamp`
*/
pub fn assemble(
        kind: MessageType,
        address: u8,
        port: u8,
        payload_type: PayloadType,
        timestamp: Option<HarpTime>,
        payload: &[u8],
    ) -> Result<Frame, FrameError>
{
    let too_long = FrameError::TooLong(payload.len());
    let overhead = if timestamp.is_some() {TIMESTAMP_SIZE + 4} else {4};
    let length = u8::try_from(payload.len() + overhead).map_err(|_| too_long)?;
    let header = Header {
        kind,
        length,
        address,
        port,
        payload_type: match timestamp {
            Some(_) => payload_type.with_timestamp(),
            None => payload_type.without_timestamp(),
            },
        };

    let mut frame = Frame::new();
    frame.extend_from_slice(header.to_le_bytes().as_ref()).map_err(|_| too_long)?;
    if let Some(time) = timestamp {
        frame.extend_from_slice(&time.seconds().to_le_bytes()).map_err(|_| too_long)?;
        frame.extend_from_slice(&time.ticks().to_le_bytes()).map_err(|_| too_long)?;
    }
    frame.extend_from_slice(payload).map_err(|_| too_long)?;
    frame.push(checksum(&frame)).map_err(|_| too_long)?;
    Ok(frame)
}

/// serialize a timestamped frame as sent by the device
pub fn assemble_reply(
        kind: MessageType,
        address: u8,
        payload: &[u8],
        payload_type: PayloadType,
        time: HarpTime,
    ) -> Result<Frame, FrameError>
{
    assemble(kind, address, DEFAULT_PORT, payload_type, Some(time), payload)
}


/// reason for rejecting a frame
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("length field {0} is too short for the frame header")]
    Length(u8),
    #[error("checksum mismatch, computed {computed:#04x} but received {received:#04x}")]
    Checksum {computed: u8, received: u8},
    #[error("payload of {0} bytes does not fit in a frame")]
    TooLong(usize),
}
