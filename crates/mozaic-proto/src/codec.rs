//! Length-delimited framing: `<varint body_len><body>`, repeated.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    constants::MAX_FRAME_LEN,
    error::ProtoError,
    varint::{decode_varint, encode_varint, varint_len},
};

/// Frame `body` into a single buffer ready for one write call.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>, ProtoError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(body.len()));
    }
    let len = body.len() as u32;
    let mut out = Vec::with_capacity(varint_len(len) + body.len());
    encode_varint(len, &mut out);
    out.extend_from_slice(body);
    Ok(out)
}

/// Append a framed `body` to `out`.
pub fn encode_frame_into(body: &[u8], out: &mut BytesMut) -> Result<(), ProtoError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(body.len()));
    }
    let len = body.len() as u32;
    out.reserve(varint_len(len) + body.len());
    encode_varint(len, out);
    out.extend_from_slice(body);
    Ok(())
}

/// Locate the first frame of `buf`.
///
/// Returns `(prefix_len, body_len)` once the whole frame is present.
fn peek_frame(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtoError> {
    let Some((len, prefix_len)) = decode_varint(buf)? else {
        return Ok(None);
    };
    let len = len as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len));
    }
    if buf.len() - prefix_len < len {
        return Ok(None);
    }
    Ok(Some((prefix_len, len)))
}

fn split_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, ProtoError> {
    match peek_frame(buf)? {
        Some((prefix_len, len)) => {
            buf.advance(prefix_len);
            Ok(Some(buf.split_to(len).freeze()))
        }
        None => Ok(None),
    }
}

/// Decode every complete frame at the front of `in_buf`.
///
/// Returns the frame bodies and the number of bytes they occupied; the
/// caller keeps `in_buf[consumed..]` for the next read.
pub fn try_decode_frames(in_buf: &[u8]) -> Result<(Vec<&[u8]>, usize), ProtoError> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    while let Some((prefix_len, len)) = peek_frame(&in_buf[offset..])? {
        let start = offset + prefix_len;
        frames.push(&in_buf[start..start + len]);
        offset = start + len;
    }

    Ok((frames, offset))
}

/// Incremental frame decoder over an accumulation buffer.
///
/// - bytes are appended as they arrive (`push` or a socket `read_buf` into `buf_mut`)
/// - complete frames are split off the front as owned [`Bytes`]
/// - an incomplete tail stays buffered for the next chunk
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder with an initial buffer capacity.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(initial_capacity),
        }
    }

    /// Mutable access to the buffer for socket reads.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Append a chunk of received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Split the next complete frame off the buffer, if there is one.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtoError> {
        split_frame(&mut self.buf)
    }

    /// Split off every complete frame currently buffered.
    pub fn drain_frames(&mut self) -> Result<Vec<Bytes>, ProtoError> {
        let mut out = Vec::new();
        while let Some(frame) = self.next_frame()? {
            out.push(frame);
        }
        Ok(out)
    }
}

/// [`tokio_util::codec`] adapter for the same framing, for use with
/// `FramedRead` / `FramedWrite` / `Framed`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtoError> {
        split_frame(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtoError> {
        match split_frame(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtoError::TruncatedLog {
                pending: src.len(),
            }),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtoError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), ProtoError> {
        encode_frame_into(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(bodies: &[&[u8]]) -> Vec<u8> {
        bodies
            .iter()
            .flat_map(|body| encode_frame(body).unwrap())
            .collect()
    }

    #[test]
    fn frame_layout_is_prefix_then_body() {
        let frame = encode_frame(b"abc").unwrap();
        assert_eq!(frame, [3, b'a', b'b', b'c']);

        let body = vec![7u8; 300];
        let frame = encode_frame(&body).unwrap();
        assert_eq!(&frame[..2], &[0xAC, 0x02]);
        assert_eq!(&frame[2..], body.as_slice());
    }

    #[test]
    fn decodes_multiple_frames_from_one_buffer() {
        let bytes = stream_of(&[&b"one"[..], &b""[..], &b"three"[..]]);
        let (frames, consumed) = try_decode_frames(&bytes).unwrap();
        assert_eq!(frames, vec![&b"one"[..], &b""[..], &b"three"[..]]);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn keeps_incomplete_tail() {
        let mut bytes = stream_of(&[&b"first"[..], &b"second"[..]]);
        bytes.truncate(bytes.len() - 2);

        let (frames, consumed) = try_decode_frames(&bytes).unwrap();
        assert_eq!(frames, vec![&b"first"[..]]);
        assert_eq!(consumed, 6);
    }

    #[test]
    fn decoder_reassembles_split_frames() {
        let bytes = stream_of(&[&b"hello"[..], &b"world"[..]]);
        let (a, b) = bytes.split_at(3);

        let mut decoder = FrameDecoder::new(16);
        decoder.push(a);
        assert!(decoder.drain_frames().unwrap().is_empty());
        assert_eq!(decoder.pending(), 3);

        decoder.push(b);
        let frames = decoder.drain_frames().unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world")]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn corrupt_prefix_is_an_error() {
        let mut decoder = FrameDecoder::new(16);
        decoder.push(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(
            decoder.drain_frames(),
            Err(ProtoError::CorruptLengthPrefix)
        ));
    }

    #[test]
    fn oversized_frame_is_rejected_before_body_arrives() {
        let mut prefix = Vec::new();
        encode_varint((MAX_FRAME_LEN + 1) as u32, &mut prefix);
        assert!(matches!(
            try_decode_frames(&prefix),
            Err(ProtoError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn codec_reports_truncated_input_at_eof() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&stream_of(&[&b"done"[..]])[..]);
        buf.extend_from_slice(&[4, b'p']);

        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Bytes::from_static(b"done"))
        );
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtoError::TruncatedLog { pending: 2 })
        ));
    }

    #[test]
    fn codec_encoder_matches_encode_frame() {
        let mut codec = FrameCodec;
        let mut out = BytesMut::new();
        codec.encode(Bytes::from_static(b"xyz"), &mut out).unwrap();
        assert_eq!(&out[..], encode_frame(b"xyz").unwrap().as_slice());
    }
}
