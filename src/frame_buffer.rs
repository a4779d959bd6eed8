use crate::errors::*;
use amq_protocol::frame::{parse_frame, AMQPFrame};
use bytes::Buf;
use input_buffer::{InputBuffer, MIN_READ};
use log::{trace, warn};
use snafu::ResultExt;
use std::io;

// frame type (1), channel (2), payload size (4)
const FRAME_HEADER_LEN: usize = 7;
const FRAME_END_LEN: usize = 1;

/// What a decoder found at the front of the buffer.
enum Decoded<T> {
    /// More bytes are needed; the total frame length once the header has arrived.
    Incomplete(Option<usize>),
    /// A frame and the number of bytes it occupied.
    Frame(T, usize),
    /// A frame of the given length that could not be decoded.
    Malformed(usize),
}

/// Accumulates bytes from a blocking reader and hands complete frames to a callback.
///
/// Frames that fail to decode are logged and skipped; the length prefix says how many bytes to
/// discard, so one bad frame does not poison the rest of the stream.
pub(crate) struct FrameBuffer<T = AMQPFrame> {
    buf: InputBuffer,
    decode: fn(&[u8]) -> Decoded<T>,
}

impl FrameBuffer {
    pub(crate) fn new() -> FrameBuffer {
        FrameBuffer::with_decoder(decode_amqp)
    }
}

impl<T> FrameBuffer<T> {
    fn with_decoder(decode: fn(&[u8]) -> Decoded<T>) -> FrameBuffer<T> {
        FrameBuffer {
            buf: InputBuffer::new(),
            decode,
        }
    }

    /// Dispatch every complete buffered frame, then keep reading from `stream` until a read
    /// times out (`WouldBlock` or `TimedOut`). Returns the number of bytes read.
    pub(crate) fn read_from<S, F>(&mut self, stream: &mut S, mut handler: F) -> Result<usize>
    where
        S: io::Read,
        F: FnMut(T) -> Result<()>,
    {
        let mut bytes_read = 0;
        loop {
            let reserve = self.dispatch_buffered(&mut handler)?;
            match self.fill(stream, reserve)? {
                Some(0) => return UnexpectedSocketCloseSnafu.fail(),
                Some(n) => bytes_read += n,
                None => return Ok(bytes_read),
            }
        }
    }

    // Returns how much room the next read should reserve.
    fn dispatch_buffered<F>(&mut self, handler: &mut F) -> Result<usize>
    where
        F: FnMut(T) -> Result<()>,
    {
        loop {
            match (self.decode)(self.buf.chunk()) {
                Decoded::Frame(frame, len) => {
                    self.buf.advance(len);
                    handler(frame)?;
                }
                Decoded::Malformed(len) => {
                    warn!("discarding malformed frame of {} bytes", len);
                    self.buf.advance(len);
                }
                Decoded::Incomplete(needed) => {
                    return Ok(needed.map_or(MIN_READ, |len| usize::max(MIN_READ, len)))
                }
            }
        }
    }

    // One read; `None` once the stream has nothing more for now.
    fn fill<S: io::Read>(&mut self, stream: &mut S, reserve: usize) -> Result<Option<usize>> {
        loop {
            match self.buf.prepare_reserve(reserve).read_from(stream) {
                Ok(n) => {
                    trace!("read {} bytes", n);
                    return Ok(Some(n));
                }
                Err(err) => match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => return Ok(None),
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(err).context(IoSnafu),
                },
            }
        }
    }
}

fn decode_amqp(buf: &[u8]) -> Decoded<AMQPFrame> {
    if buf.len() < FRAME_HEADER_LEN {
        return Decoded::Incomplete(None);
    }
    let payload = u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]) as usize;
    let len = FRAME_HEADER_LEN + payload + FRAME_END_LEN;
    if buf.len() < len {
        return Decoded::Incomplete(Some(len));
    }
    // the parser must consume exactly the advertised frame
    match parse_frame(&buf[..len]) {
        Ok((rest, frame)) if rest.is_empty() => Decoded::Frame(frame, len),
        _ => Decoded::Malformed(len),
    }
}
