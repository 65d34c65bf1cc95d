//! Frame transport
//!
//! Reads and writes `[len: u16 LE][kind: u8][payload]` frames over a byte
//! stream. Outbound frames are written whole under a single writer lock so
//! concurrent senders never interleave.

use bytes::{BufMut, BytesMut};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::protocol::{CodecError, RequestPacket, ResponsePacket, FRAME_HEADER_SIZE};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },

    #[error("Invalid frame length: {0}")]
    InvalidLength(u16),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// One unit of the wire protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Length prefix as written on the wire
    pub fn length(&self) -> usize {
        self.payload.len() + FRAME_HEADER_SIZE
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Owns both halves of an admin port stream
pub struct Transport {
    reader: Mutex<BoxedReader>,
    writer: Mutex<BoxedWriter>,
}

impl Transport {
    /// Wrap any bidirectional byte stream
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(Box::new(reader)),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Connect to an admin port over TCP
    pub async fn connect(addr: SocketAddr) -> TransportResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(Box::new(reader)),
            writer: Mutex::new(Box::new(writer)),
        })
    }

    /// Read exactly one frame
    pub async fn read_frame(&self) -> TransportResult<Frame> {
        let mut reader = self.reader.lock().await;

        let mut len_bytes = [0u8; 2];
        let got = read_full(&mut **reader, &mut len_bytes).await?;
        if got == 0 {
            return Err(TransportError::Closed);
        }
        if got < len_bytes.len() {
            return Err(TransportError::ShortRead { expected: 2, actual: got });
        }

        let length = u16::from_le_bytes(len_bytes);
        if (length as usize) < FRAME_HEADER_SIZE {
            return Err(TransportError::InvalidLength(length));
        }

        // kind byte plus payload
        let mut rest = vec![0u8; length as usize - 2];
        let got = read_full(&mut **reader, &mut rest).await?;
        if got != rest.len() {
            return Err(TransportError::ShortRead {
                expected: rest.len(),
                actual: got,
            });
        }

        let kind = rest[0];
        rest.remove(0);
        tracing::trace!("Read frame kind={} len={}", kind, length);
        Ok(Frame { kind, payload: rest })
    }

    /// Write one frame as a single operation
    pub async fn write_frame(&self, kind: u8, payload: &[u8]) -> TransportResult<()> {
        let length = payload.len() + FRAME_HEADER_SIZE;
        if length > u16::MAX as usize {
            return Err(CodecError::PacketTooLarge(payload.len()).into());
        }

        let mut buf = BytesMut::with_capacity(length);
        buf.put_u16_le(length as u16);
        buf.put_u8(kind);
        buf.put_slice(payload);

        let mut writer = self.writer.lock().await;
        let written = writer.write(&buf).await?;
        if written < buf.len() {
            return Err(TransportError::ShortWrite {
                expected: buf.len(),
                written,
            });
        }
        writer.flush().await?;
        tracing::trace!("Wrote frame kind={} len={}", kind, length);
        Ok(())
    }

    /// Encode and send a request
    pub async fn send(&self, packet: &RequestPacket) -> TransportResult<()> {
        let payload = packet.encode()?;
        self.write_frame(packet.kind(), &payload).await
    }

    /// Receive and decode the next packet
    pub async fn recv(&self) -> TransportResult<ResponsePacket> {
        let frame = self.read_frame().await?;
        Ok(ResponsePacket::decode(frame.kind, &frame.payload)?)
    }

    /// Shut down the write half
    pub async fn shutdown(&self) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

/// Fill `buf` unless the stream ends first; returns the bytes read
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
