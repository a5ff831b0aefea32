//! Multi-frame messages.

use crate::error::{TandemError, TandemResult};
use bytes::Bytes;
use std::fmt;

/// An immutable message made of one or more opaque byte frames.
///
/// Frame order is significant. Two messages are equal when they hold the same
/// frames in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Msg {
    frames: Vec<Bytes>,
}

impl Msg {
    /// Build a message from its frames. Fails if `frames` is empty.
    pub fn new(frames: Vec<Bytes>) -> TandemResult<Self> {
        if frames.is_empty() {
            return Err(TandemError::EmptyMessage);
        }
        Ok(Self { frames })
    }

    /// Build a message from anything that converts into frames.
    pub fn from_frames<I, B>(frames: I) -> TandemResult<Self>
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::new(frames.into_iter().map(Into::into).collect())
    }

    /// A single-frame message holding a copy of `s`.
    pub fn from_string(s: &str) -> Self {
        Self {
            frames: vec![Bytes::copy_from_slice(s.as_bytes())],
        }
    }

    /// All frames, in order.
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// The frame at `index`, if any.
    pub fn frame(&self, index: usize) -> Option<&Bytes> {
        self.frames.get(index)
    }

    /// The first frame. Always present.
    pub fn first(&self) -> &Bytes {
        &self.frames[0]
    }

    /// Number of frames (at least one).
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Total payload size across all frames.
    pub fn payload_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    /// Consume the message, returning its frames.
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }
}

impl From<Bytes> for Msg {
    fn from(frame: Bytes) -> Self {
        Self {
            frames: vec![frame],
        }
    }
}

impl From<&str> for Msg {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for Msg {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<Vec<u8>> for Msg {
    fn from(v: Vec<u8>) -> Self {
        Bytes::from(v).into()
    }
}

impl From<&[u8]> for Msg {
    fn from(v: &[u8]) -> Self {
        Bytes::copy_from_slice(v).into()
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:?}", String::from_utf8_lossy(frame))?;
        }
        f.write_str("]")
    }
}
