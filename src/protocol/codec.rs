//! # Envelope codec.
//!
//! [`EnvelopeCodec`] implements [`Decoder`]/[`Encoder`] so a byte stream can be
//! wrapped with `FramedRead`/`FramedWrite`.
//!
//! ## Error split
//! Every malformed frame is reported as an *item* (`Some(Err(..))`) and the
//! stream keeps going: the length prefix always tells where the next frame
//! starts. A frame larger than the limit is reported as soon as its prefix is
//! seen, and its body is skipped as it arrives. Only transport failures are
//! returned as the decoder error, which terminates the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

use super::envelope::{Body, DataPayload, Envelope, ErrorPayload, Kind};

/// Maximum frame body size (bytes after the 4-byte length prefix).
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Self-framing envelope codec (`u32` big-endian length prefix).
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_len: usize,
    // Bytes of an oversized frame still to be skipped.
    discard: usize,
}

impl EnvelopeCodec {
    /// Creates a codec accepting frames up to [`MAX_FRAME_LEN`].
    pub fn new() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
            discard: 0,
        }
    }

    /// Creates a codec with a smaller frame limit (clamped to [`MAX_FRAME_LEN`]).
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(MAX_FRAME_LEN),
            discard: 0,
        }
    }

    /// Largest accepted frame body.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Result<Envelope, ProtocolError>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.discard > 0 {
            let skip = self.discard.min(src.len());
            src.advance(skip);
            self.discard -= skip;
            if self.discard > 0 {
                return Ok(None);
            }
        }
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&src[..LEN_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_frame_len {
            src.advance(LEN_PREFIX);
            let skip = len.min(src.len());
            src.advance(skip);
            self.discard = len - skip;
            return Ok(Some(Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            })));
        }
        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let body = src.split_to(len).freeze();
        Ok(Some(decode_body(body)))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(&item, self.max_frame_len, dst)
    }
}

impl Encoder<&Envelope> for EnvelopeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(item, self.max_frame_len, dst)
    }
}

/// Encodes one envelope as a complete frame (length prefix included).
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let mut dst = BytesMut::new();
    encode_into(envelope, MAX_FRAME_LEN, &mut dst)?;
    Ok(dst.freeze())
}

/// Decodes exactly one complete frame (length prefix included).
///
/// Fails on truncated input, trailing bytes, oversized frames and unknown kinds.
pub fn decode(frame: &[u8]) -> Result<Envelope, ProtocolError> {
    if frame.len() < LEN_PREFIX {
        return Err(ProtocolError::Truncated {
            needed: LEN_PREFIX,
            available: frame.len(),
        });
    }
    let mut prefix = [0u8; LEN_PREFIX];
    prefix.copy_from_slice(&frame[..LEN_PREFIX]);
    let declared = u32::from_be_bytes(prefix) as usize;
    if declared > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: declared,
            max: MAX_FRAME_LEN,
        });
    }

    let actual = frame.len() - LEN_PREFIX;
    if actual < declared {
        return Err(ProtocolError::Truncated {
            needed: declared,
            available: actual,
        });
    }
    if actual > declared {
        return Err(ProtocolError::LengthMismatch { declared, actual });
    }
    decode_body(Bytes::copy_from_slice(&frame[LEN_PREFIX..]))
}

fn body_len(envelope: &Envelope) -> usize {
    let fixed = 1 + 8;
    fixed
        + match envelope.body() {
            Body::Data(p) | Body::StatusRequest(p) => 4 + p.content_type().len() + 4 + p.len(),
            Body::NonFatalError(e) | Body::FatalError(e) => 4 + e.message().len(),
            Body::CancelRequest => 0,
        }
}

fn encode_into(envelope: &Envelope, max: usize, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let len = body_len(envelope);
    if len > max {
        return Err(ProtocolError::FrameTooLarge { len, max });
    }

    dst.reserve(LEN_PREFIX + len);
    dst.put_u32(len as u32);
    dst.put_u8(envelope.kind().as_u8());
    dst.put_i64(envelope.timestamp());

    match envelope.body() {
        Body::Data(p) | Body::StatusRequest(p) => {
            put_str(dst, p.content_type());
            // Bounded by `max`, which never exceeds i32::MAX.
            dst.put_i32(p.len() as i32);
            dst.put_slice(p.data());
        }
        Body::NonFatalError(e) | Body::FatalError(e) => put_str(dst, e.message()),
        Body::CancelRequest => {}
    }
    Ok(())
}

fn put_str(dst: &mut BytesMut, s: &str) {
    dst.put_u32(s.len() as u32);
    dst.put_slice(s.as_bytes());
}

/// Decodes a frame body (everything after the length prefix).
fn decode_body(mut body: Bytes) -> Result<Envelope, ProtocolError> {
    let declared = body.len();

    need(&body, 1)?;
    let kind = Kind::try_from(body.get_u8())?;
    need(&body, 8)?;
    let timestamp = body.get_i64();

    let parsed = match kind {
        Kind::Data => Body::Data(read_data(&mut body)?),
        Kind::StatusRequest => Body::StatusRequest(read_data(&mut body)?),
        Kind::NonFatalError => Body::NonFatalError(ErrorPayload::new(read_str(&mut body)?)),
        Kind::FatalError => Body::FatalError(ErrorPayload::new(read_str(&mut body)?)),
        Kind::CancelRequest => Body::CancelRequest,
    };

    if body.has_remaining() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: declared - body.remaining(),
        });
    }
    Ok(Envelope::new(timestamp, parsed))
}

fn read_data(body: &mut Bytes) -> Result<DataPayload, ProtocolError> {
    let content_type = read_str(body)?;
    need(body, 4)?;
    let raw_len = body.get_i32();
    if raw_len < 0 {
        return Err(ProtocolError::NegativeLength(raw_len));
    }
    let len = raw_len as usize;
    if body.remaining() < len {
        return Err(ProtocolError::Truncated {
            needed: len,
            available: body.remaining(),
        });
    }
    if body.remaining() > len {
        return Err(ProtocolError::LengthMismatch {
            declared: len,
            actual: body.remaining(),
        });
    }
    Ok(DataPayload::new(content_type, body.split_to(len)))
}

fn read_str(body: &mut Bytes) -> Result<String, ProtocolError> {
    need(body, 4)?;
    let len = body.get_u32() as usize;
    need(body, len)?;
    let raw = body.split_to(len);
    Ok(std::str::from_utf8(&raw)?.to_owned())
}

#[inline]
fn need(body: &Bytes, n: usize) -> Result<(), ProtocolError> {
    if body.remaining() < n {
        return Err(ProtocolError::Truncated {
            needed: n,
            available: body.remaining(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Envelope> {
        vec![
            Envelope::new(1, Body::Data(DataPayload::int64(120))),
            Envelope::new(-7, Body::Data(DataPayload::new("empty", Bytes::new()))),
            Envelope::new(2, Body::NonFatalError(ErrorPayload::new("slow"))),
            Envelope::new(3, Body::FatalError(ErrorPayload::new("timeout: boom"))),
            Envelope::new(4, Body::CancelRequest),
            Envelope::new(i64::MAX, Body::StatusRequest(DataPayload::default())),
        ]
    }

    #[test]
    fn test_roundtrip_every_kind() {
        for env in samples() {
            let frame = encode(&env).unwrap();
            assert_eq!(decode(&frame).unwrap(), env);
            assert_eq!(encode(&decode(&frame).unwrap()).unwrap(), frame);
        }
    }

    #[test]
    fn test_roundtrip_max_sized_payload() {
        // 1 kind + 8 ts + 4 ct_len + 1 ct + 4 data_len
        let overhead = 1 + 8 + 4 + 1 + 4;
        let data = vec![0xAB; MAX_FRAME_LEN - overhead];
        let env = Envelope::new(9, Body::Data(DataPayload::new("x", data)));
        let frame = encode(&env).unwrap();
        assert_eq!(frame.len(), LEN_PREFIX + MAX_FRAME_LEN);
        assert_eq!(decode(&frame).unwrap(), env);
    }

    #[test]
    fn test_oversized_payload_rejected_on_encode() {
        let data = vec![0u8; MAX_FRAME_LEN];
        let env = Envelope::new(9, Body::Data(DataPayload::new("x", data)));
        assert!(matches!(
            encode(&env),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_cancel_request_layout() {
        let frame = encode(&Envelope::new(0x0102, Body::CancelRequest)).unwrap();
        assert_eq!(
            frame.as_ref(),
            &[0, 0, 0, 9, 3, 0, 0, 0, 0, 0, 0, 0x01, 0x02][..]
        );
    }

    #[test]
    fn test_truncated_input() {
        let frame = encode(&Envelope::new(1, Body::Data(DataPayload::int64(5)))).unwrap();
        for cut in 0..frame.len() {
            assert!(decode(&frame[..cut]).is_err(), "cut at {cut} must fail");
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = BytesMut::from(&encode(&Envelope::new(1, Body::CancelRequest)).unwrap()[..]);
        frame.put_u8(0);
        assert!(matches!(
            decode(&frame),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_data_length_disagreeing_with_body() {
        let mut body = BytesMut::new();
        body.put_u8(Kind::Data.as_u8());
        body.put_i64(1);
        body.put_u32(1);
        body.put_slice(b"x");
        body.put_i32(10);
        body.put_slice(b"abc");
        assert!(matches!(
            decode_body(body.freeze()),
            Err(ProtocolError::Truncated { needed: 10, available: 3 })
        ));
    }

    #[test]
    fn test_negative_data_length() {
        let mut body = BytesMut::new();
        body.put_u8(Kind::StatusRequest.as_u8());
        body.put_i64(1);
        body.put_u32(0);
        body.put_i32(-1);
        assert!(matches!(
            decode_body(body.freeze()),
            Err(ProtocolError::NegativeLength(-1))
        ));
    }

    #[test]
    fn test_unknown_kind_in_body() {
        let mut body = BytesMut::new();
        body.put_u8(99);
        body.put_i64(1);
        assert!(matches!(
            decode_body(body.freeze()),
            Err(ProtocolError::UnknownKind(99))
        ));
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let frame = encode(&Envelope::new(5, Body::FatalError(ErrorPayload::new("x")))).unwrap();
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&frame[..frame.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_u8(frame[frame.len() - 1]);
        let env = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(env.kind(), Kind::FatalError);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_splits_back_to_back_frames() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        for env in samples() {
            codec.encode(&env, &mut buf).unwrap();
        }
        let mut decoded = Vec::new();
        while let Some(item) = codec.decode(&mut buf).unwrap() {
            decoded.push(item.unwrap());
        }
        assert_eq!(decoded, samples());
    }

    #[test]
    fn test_decoder_keeps_framing_after_bad_body() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(9);
        buf.put_u8(42);
        buf.put_i64(0);
        codec.encode(Envelope::new(1, Body::CancelRequest), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(first, Err(ProtocolError::UnknownKind(42))));
        let second = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(second.kind(), Kind::CancelRequest);
    }

    #[test]
    fn test_decoder_skips_oversized_frame() {
        let mut codec = EnvelopeCodec::with_max_frame_len(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);
        buf.put_slice(&[7u8; 10]);

        let item = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(
            item,
            Err(ProtocolError::FrameTooLarge { len: 17, max: 16 })
        ));
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Rest of the oversized body, then a valid frame.
        buf.put_slice(&[7u8; 7]);
        codec.encode(Envelope::new(1, Body::CancelRequest), &mut buf).unwrap();
        let next = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(next.kind(), Kind::CancelRequest);
        assert!(buf.is_empty());
    }
}
