//! Framed wire protocol spoken between agents, the gateway and UI
//! subscribers.
//!
//! Every frame on the wire is a little-endian u32 length followed by the
//! rkyv-archived [`WireMessage`]. Producers open their stream with a
//! [`WireMessage::Hello`] carrying the `authorization` metadata value and
//! then push opaque snapshot chunks; subscribers send the same hello and
//! receive chunks. The payload bytes are opaque to this crate.

use std::error::Error;
use std::fmt::Display;
use std::io::{Read, Write};

use rkyv::api::high::{to_bytes_in, HighSerializer};
use rkyv::rancor::{fail, Fallible};
use rkyv::ser::allocator::ArenaHandle;
use rkyv::ser::{Positional, Writer};
use rkyv::util::AlignedVec;
use rkyv::with::{InlineAsBox, Map};
use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error;

pub const VERSION: &str = "0.1";

/// Upper bound for a single frame; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 16 << 20;

/// Metadata key under which bearer credentials travel.
pub const AUTHORIZATION_KEY: &str = "authorization";

#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] rkyv::rancor::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum Role {
    Producer,
    Subscriber,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum RejectStatus {
    Unauthenticated,
    PermissionDenied,
    IssuerMismatch,
}

#[derive(Archive, Serialize, Deserialize)]
pub enum WireMessage<'a> {
    Hello {
        role: Role,
        #[rkyv(with = Map<InlineAsBox>)]
        authorization: Option<&'a str>,
    },
    HelloAck,
    HelloReject {
        status: RejectStatus,
        #[rkyv(with = InlineAsBox)]
        message: &'a str,
    },
    Chunk {
        #[rkyv(with = InlineAsBox)]
        payload: &'a [u8],
    },
}

/// Serializes `msg` and writes one length-prefixed frame.
pub fn write_frame<W, T>(w: &mut W, msg: &T) -> Result<()>
where
    W: Write,
    T: for<'a> Serialize<HighSerializer<CountingWriter, ArenaHandle<'a>, rkyv::rancor::Error>>
        + for<'a, 'b> Serialize<
            HighSerializer<SliceWriter<'b>, ArenaHandle<'a>, rkyv::rancor::Error>,
        >,
{
    let len = compute_length(msg)?;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    serialize_to_buf(msg, &mut buf)?;
    w.write_all(&(len as u32).to_le_bytes())?;
    w.write_all(&buf)?;
    Ok(())
}

/// Reads one frame into `buf`, replacing its contents. The aligned buffer
/// can then be handed to [`access_message`].
pub fn read_frame<R: Read>(r: &mut R, buf: &mut AlignedVec) -> Result<()> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }

    buf.clear();
    let mut scratch = [0u8; 8192];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(scratch.len());
        let n = r.read(&mut scratch[..want])?;
        if n == 0 {
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed mid-frame",
            )));
        }
        buf.extend_from_slice(&scratch[..n]);
        remaining -= n;
    }
    Ok(())
}

/// Validates and provides access to the archived message in a frame buffer.
pub fn access_message(buf: &AlignedVec) -> Result<&ArchivedWireMessage<'_>> {
    Ok(rkyv::access::<ArchivedWireMessage, rkyv::rancor::Error>(
        buf,
    )?)
}

/// Writer that discards its input and only tracks the byte count, so a
/// frame buffer can be sized before the real serialization pass.
#[derive(Default)]
pub struct CountingWriter {
    total_bytes: usize,
}

impl Fallible for CountingWriter {
    type Error = rkyv::rancor::Error;
}

impl Positional for CountingWriter {
    fn pos(&self) -> usize {
        self.total_bytes
    }
}

impl Writer<rkyv::rancor::Error> for CountingWriter {
    fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), rkyv::rancor::Error> {
        self.total_bytes += bytes.len();
        Ok(())
    }
}

/// Writer backed by a pre-sized frame buffer; refuses to spill past it.
pub struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl Fallible for SliceWriter<'_> {
    type Error = rkyv::rancor::Error;
}

impl Positional for SliceWriter<'_> {
    fn pos(&self) -> usize {
        self.pos
    }
}

#[derive(Debug)]
pub struct OutOfSpaceError;

impl Display for OutOfSpaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "not enough space in the buffer")
    }
}

impl Error for OutOfSpaceError {}

impl Writer<rkyv::rancor::Error> for SliceWriter<'_> {
    fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), rkyv::rancor::Error> {
        if self.pos + bytes.len() > self.buf.len() {
            fail!(OutOfSpaceError);
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }
}

/// The caller must ensure that `buf` has sufficient capacity to hold the
/// serialized data; use [`compute_length`] first to size it.
pub fn serialize_to_buf<'b, T>(
    value: &T,
    buf: &'b mut [u8],
) -> std::result::Result<(), rkyv::rancor::Error>
where
    T: for<'a> Serialize<HighSerializer<SliceWriter<'b>, ArenaHandle<'a>, rkyv::rancor::Error>>,
{
    let writer = SliceWriter::new(buf);
    let _ = to_bytes_in(value, writer)?;
    Ok(())
}

/// Size of `value` once archived, without serializing it anywhere.
pub fn compute_length<T>(value: &T) -> std::result::Result<usize, rkyv::rancor::Error>
where
    T: for<'b> Serialize<HighSerializer<CountingWriter, ArenaHandle<'b>, rkyv::rancor::Error>>,
{
    let writer = to_bytes_in(value, CountingWriter::default())?;
    Ok(writer.pos())
}
