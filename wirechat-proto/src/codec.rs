//! Serialization, framing, and stream decoding for the `WireChat` wire
//! protocol.
//!
//! Wire format: `[u32 length (BE)][body]`, where the body is the postcard
//! serialization of a [`Packet`], optionally sealed with a [`FrameCipher`].
//! The cipher is chosen per call so media frames can skip encryption while
//! the framing stays identical.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{CryptoError, FrameCipher};
use crate::packet::Packet;

/// Default cap on a single frame body. Large enough for inline file
/// transfers and JPEG call frames.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length of the frame header in bytes.
const HEADER_LEN: usize = 4;

/// Error type for codec encode/decode operations.
///
/// Any decode-side error means the stream is no longer byte-aligned with
/// the protocol; callers must drop the connection rather than retry.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame is incomplete or has an invalid length prefix.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// The length header announces a body larger than the configured cap.
    #[error("frame of {len} bytes exceeds cap of {max} bytes")]
    FrameTooLarge {
        /// Announced body length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Sealing or opening the frame body failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// The underlying stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes a [`Packet`] into its postcard byte form, without framing or
/// encryption.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the packet cannot be
/// serialized.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(packet).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`Packet`] from plaintext postcard bytes.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes cannot be
/// deserialized.
pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a frame body (the bytes after the length header), opening the
/// cipher first when one is given.
///
/// # Errors
///
/// Returns [`CodecError::Crypto`] if the body cannot be opened, or
/// [`CodecError::Serialization`] if it cannot be deserialized.
pub fn decode_body(body: &[u8], cipher: Option<&FrameCipher>) -> Result<Packet, CodecError> {
    match cipher {
        Some(c) => decode(&c.open(body)?),
        None => decode(body),
    }
}

/// Encodes a [`Packet`] as a complete wire frame: 4-byte big-endian length
/// header followed by the (optionally sealed) body.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the packet cannot be
/// serialized, [`CodecError::Crypto`] if sealing fails, or
/// [`CodecError::InvalidFrame`] if the body exceeds `u32::MAX` bytes.
pub fn encode_framed(
    packet: &Packet,
    cipher: Option<&FrameCipher>,
) -> Result<Vec<u8>, CodecError> {
    let body = match cipher {
        Some(c) => c.seal(&encode(packet)?)?,
        None => encode(packet)?,
    };
    let len = u32::try_from(body.len()).map_err(|_| {
        CodecError::InvalidFrame(format!("body too large for framing: {} bytes", body.len()))
    })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes one length-prefixed frame from the front of a buffer.
///
/// Returns the decoded packet and the total number of bytes consumed,
/// including the header.
///
/// # Errors
///
/// Returns [`CodecError::InvalidFrame`] if the buffer holds less than a
/// complete frame, or any body decode error.
pub fn decode_framed(
    bytes: &[u8],
    cipher: Option<&FrameCipher>,
) -> Result<(Packet, usize), CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::InvalidFrame(format!(
            "need at least {HEADER_LEN} bytes for length header, got {}",
            bytes.len()
        )));
    }
    let header: [u8; HEADER_LEN] = bytes[..HEADER_LEN]
        .try_into()
        .map_err(|_| CodecError::InvalidFrame("failed to read length header".into()))?;
    let body_len = u32::from_be_bytes(header) as usize;

    let total_len = HEADER_LEN + body_len;
    if bytes.len() < total_len {
        return Err(CodecError::InvalidFrame(format!(
            "frame announces {body_len} bytes but only {} available",
            bytes.len() - HEADER_LEN
        )));
    }

    let packet = decode_body(&bytes[HEADER_LEN..total_len], cipher)?;
    Ok((packet, total_len))
}

/// Push-style frame accumulator for streams that arrive in arbitrary
/// fragments.
///
/// Feed bytes in with [`FrameDecoder::extend`] and pull complete packets
/// out with [`FrameDecoder::next_frame`]. Fragmentation never changes the
/// decoded packet sequence.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder with the default frame size cap.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a decoder with a custom frame size cap.
    #[must_use]
    pub const fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    /// Appends freshly received bytes to the internal buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, if one has accumulated.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::FrameTooLarge`] if the pending header exceeds
    /// the cap, or any body decode error. After an error the buffer state
    /// is unspecified; the connection must be dropped.
    pub fn next_frame(
        &mut self,
        cipher: Option<&FrameCipher>,
    ) -> Result<Option<Packet>, CodecError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header: [u8; HEADER_LEN] = self.buf[..HEADER_LEN]
            .try_into()
            .map_err(|_| CodecError::InvalidFrame("failed to read length header".into()))?;
        let body_len = u32::from_be_bytes(header) as usize;
        if body_len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                len: body_len,
                max: self.max_frame,
            });
        }
        let total_len = HEADER_LEN + body_len;
        if self.buf.len() < total_len {
            return Ok(None);
        }
        let packet = decode_body(&self.buf[HEADER_LEN..total_len], cipher)?;
        self.buf.drain(..total_len);
        Ok(Some(packet))
    }
}

/// Reads exactly one frame from an async stream.
///
/// Returns `Ok(None)` when the peer closes the stream before a header or
/// body completes — the normal disconnect signal, not a failure. The body
/// is read with `read_exact` into a buffer bounded by `max_frame`, so a
/// hostile length header can never trigger an unbounded allocation.
///
/// # Errors
///
/// Returns [`CodecError::FrameTooLarge`] for an over-cap header,
/// [`CodecError::Io`] for transport failures other than clean close, or
/// any body decode error.
pub async fn read_frame<R>(
    reader: &mut R,
    cipher: Option<&FrameCipher>,
    max_frame: usize,
) -> Result<Option<Packet>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let body_len = u32::from_be_bytes(header) as usize;
    if body_len > max_frame {
        return Err(CodecError::FrameTooLarge {
            len: body_len,
            max: max_frame,
        });
    }
    let mut body = vec![0u8; body_len];
    match reader.read_exact(&mut body).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    decode_body(&body, cipher).map(Some)
}

/// Encodes a packet and writes the complete frame to an async stream.
///
/// # Errors
///
/// Returns any encode error, or [`CodecError::Io`] if the write fails.
pub async fn write_frame<W>(
    writer: &mut W,
    packet: &Packet,
    cipher: Option<&FrameCipher>,
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_framed(packet, cipher)?;
    writer.write_all(&frame).await?;
    Ok(())
}
