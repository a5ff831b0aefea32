//! Frame codec.
//!
//! A message is written as a 4-byte big-endian frame count followed by each
//! frame as a 4-byte big-endian length and its payload. Nothing separates
//! consecutive messages beyond the declared lengths.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tandem_types::config::{DEFAULT_MAX_FRAMES, DEFAULT_MAX_MESSAGE_SIZE};
use tandem_types::{Msg, SocketConfig, TandemError, TandemResult};

/// Size of the frame-count header and of each frame-length header.
const HEADER_LEN: usize = 4;

/// Encode a message to bytes (frame count, then length-prefixed frames).
///
/// Fails if the frame count or a frame length does not fit the 4-byte header.
pub fn encode_msg(msg: &Msg) -> TandemResult<Bytes> {
    let count = u32::try_from(msg.len())
        .map_err(|_| TandemError::MalformedFrame(format!("{} frames", msg.len())))?;
    let mut buf =
        BytesMut::with_capacity(HEADER_LEN * (msg.len() + 1) + msg.payload_len());
    buf.put_u32(count);
    for frame in msg.frames() {
        let len = u32::try_from(frame.len()).map_err(|_| TandemError::MessageTooLarge {
            size: frame.len() as u64,
            max: u64::from(u32::MAX),
        })?;
        buf.put_u32(len);
        buf.put_slice(frame);
    }
    Ok(buf.freeze())
}

/// Incremental decoder that turns a growing byte buffer into messages.
///
/// The decoder is stateless between calls: it re-reads the headers of the
/// partially buffered message each time, which keeps it correct no matter how
/// reads are split.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frames: u32,
    max_message_size: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl FrameDecoder {
    pub fn new(max_frames: u32, max_message_size: u64) -> Self {
        Self {
            max_frames,
            max_message_size,
        }
    }

    /// Decoder with the limits of a socket config.
    pub fn from_config(config: &SocketConfig) -> Self {
        Self::new(config.max_frames, config.max_message_size)
    }

    /// Reject an outgoing message the receiving decoder would refuse.
    pub fn check(&self, msg: &Msg) -> TandemResult<()> {
        if msg.len() as u64 > u64::from(self.max_frames) {
            return Err(TandemError::MalformedFrame(format!(
                "message has {} frames (max {})",
                msg.len(),
                self.max_frames
            )));
        }
        let size = msg.payload_len() as u64;
        if size > self.max_message_size {
            return Err(TandemError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    /// Try to decode one message from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; `buf` is left untouched
    /// in that case. On success exactly one message is consumed.
    pub fn decode(&self, buf: &mut BytesMut) -> TandemResult<Option<Msg>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let count = read_u32(&buf[..HEADER_LEN]);
        if count == 0 {
            return Err(TandemError::MalformedFrame(
                "message declares zero frames".to_string(),
            ));
        }
        if count > self.max_frames {
            return Err(TandemError::MalformedFrame(format!(
                "message declares {count} frames (max {})",
                self.max_frames
            )));
        }

        // First pass: make sure the whole message is buffered.
        let mut offset = HEADER_LEN;
        let mut total: u64 = 0;
        for _ in 0..count {
            if buf.len() < offset + HEADER_LEN {
                return Ok(None);
            }
            let len = read_u32(&buf[offset..offset + HEADER_LEN]) as usize;
            total += len as u64;
            if total > self.max_message_size {
                return Err(TandemError::MessageTooLarge {
                    size: total,
                    max: self.max_message_size,
                });
            }
            offset += HEADER_LEN;
            if buf.len() < offset + len {
                return Ok(None);
            }
            offset += len;
        }

        // Second pass: slice the frames out without copying.
        let mut raw = buf.split_to(offset).freeze();
        raw.advance(HEADER_LEN);
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = raw.get_u32() as usize;
            frames.push(raw.split_to(len));
        }
        Msg::new(frames).map(Some)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(frames: &[&'static str]) -> Msg {
        Msg::from_frames(frames.iter().copied()).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode_msg(&msg(&["NAME", "x"])).unwrap();
        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 2, 0, 0, 0, 4, b'N', b'A', b'M', b'E', 0, 0, 0, 1, b'x'][..]
        );
    }

    #[test]
    fn test_roundtrip_with_empty_frame() {
        let original = Msg::from_frames(vec![Bytes::new(), Bytes::from_static(b"tail")]).unwrap();
        let mut buf = BytesMut::from(&encode_msg(&original).unwrap()[..]);
        let decoded = FrameDecoder::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let original = msg(&["LANG", "Go", "frames"]);
        let encoded = encode_msg(&original).unwrap();
        let decoder = FrameDecoder::default();
        let mut buf = BytesMut::new();
        for (i, byte) in encoded.iter().enumerate() {
            buf.put_u8(*byte);
            let out = decoder.decode(&mut buf).unwrap();
            if i + 1 < encoded.len() {
                assert!(out.is_none(), "decoded early at byte {i}");
            } else {
                assert_eq!(out.unwrap(), original);
            }
        }
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_msg(&msg(&["one"])).unwrap());
        buf.extend_from_slice(&encode_msg(&msg(&["two", "2"])).unwrap());
        buf.extend_from_slice(&encode_msg(&msg(&["thr"])).unwrap()[..5]);

        let decoder = FrameDecoder::default();
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), msg(&["one"]));
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), msg(&["two", "2"]));
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_zero_frames_is_malformed() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(matches!(
            FrameDecoder::default().decode(&mut buf),
            Err(TandemError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_frame_count_limit() {
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        assert!(matches!(
            FrameDecoder::new(2, 1024).decode(&mut buf),
            Err(TandemError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_declared_size_limit() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u32(2048);
        match FrameDecoder::new(8, 1024).decode(&mut buf) {
            Err(TandemError::MessageTooLarge { size, max }) => {
                assert_eq!(size, 2048);
                assert_eq!(max, 1024);
            }
            other => panic!("expected MessageTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_check_outgoing_limits() {
        let decoder = FrameDecoder::new(2, 8);
        assert!(decoder.check(&msg(&["12345678"])).is_ok());
        assert!(matches!(
            decoder.check(&msg(&["12345", "6789"])),
            Err(TandemError::MessageTooLarge { size: 9, max: 8 })
        ));
        assert!(matches!(
            decoder.check(&msg(&["a", "b", "c"])),
            Err(TandemError::MalformedFrame(_))
        ));
    }
}
