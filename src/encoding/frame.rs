//! The wire layout of tagged log messages, shared by the push path (the
//! accumulator frames messages per log server) and the peek path (cursors
//! parse the same frames back out of replies).
//!
//! A message frame is, in little-endian order:
//!
//! ```text
//! [u32 len][u32 subsequence][u16 n_tags][Tag × n_tags][payload]
//! ```
//!
//! where `len` counts every byte after itself and a `Tag` is an i8
//! locality followed by a u32 id. Subsequences start at 1; a zero
//! subsequence is the version-boundary sentinel and must never appear in
//! framed data (decoding one is fatal).
//!
//! Peek replies group frames into version blocks:
//!
//! ```text
//! [u64 version][u32 len][frames...]
//! ```
//!
//! All payloads are shared `Bytes` slices of the enclosing buffer, so
//! many cursors and messages can reference one reply allocation without
//! copying.

use crate::error::Result;
use crate::log::message::Tag;
use crate::log::Version;

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};

/// The encoded size of a tag: an i8 locality and a u32 id.
pub const TAG_SIZE: usize = 5;

/// The fixed frame header past the length prefix: subsequence and tag count.
const FRAME_HEADER_SIZE: usize = 6;

/// A single decoded message frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// The message's ordinal within its version, starting at 1.
    pub subsequence: u32,
    /// The tags the message was pushed with.
    pub tags: Vec<Tag>,
    /// The message body, sliced out of the enclosing buffer.
    pub payload: Bytes,
}

/// Accumulates message frames for one log server.
#[derive(Clone, Debug, Default)]
pub struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// The byte offset the next frame will be written at, recorded in
    /// the per-tag side tables that accompany a push.
    pub fn offset(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends a frame. The subsequence must not be the zero sentinel.
    pub fn append(&mut self, subsequence: u32, tags: &[Tag], payload: &[u8]) {
        assert!(subsequence > 0, "subsequence 0 is reserved for version boundaries");
        let len = FRAME_HEADER_SIZE + TAG_SIZE * tags.len() + payload.len();
        self.buf.reserve(4 + len);
        self.buf.put_u32_le(len as u32);
        self.buf.put_u32_le(subsequence);
        self.buf.put_u16_le(tags.len() as u16);
        for tag in tags {
            self.buf.put_i8(tag.locality);
            self.buf.put_u32_le(tag.id);
        }
        self.buf.put_slice(payload);
    }

    /// Takes the accumulated frames, leaving the writer empty.
    pub fn finish(&mut self) -> Bytes {
        std::mem::take(&mut self.buf).freeze()
    }
}

/// Reads message frames back out of a buffer.
#[derive(Clone, Debug, Default)]
pub struct FrameReader {
    buf: Bytes,
}

impl FrameReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Decodes the next frame, or None at the end of the buffer.
    /// Panics on a zero subsequence: that's corrupt data there is no
    /// safe way to continue past, since downstream consumers treat it
    /// as a version boundary.
    pub fn next(&mut self) -> Result<Option<Frame>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf.len() < 4 {
            return errdata!("truncated frame length");
        }
        let len = self.buf.get_u32_le() as usize;
        if self.buf.len() < len || len < FRAME_HEADER_SIZE {
            return errdata!("truncated frame of length {len}");
        }
        let mut frame = self.buf.split_to(len);
        let subsequence = frame.get_u32_le();
        assert!(subsequence > 0, "zero subsequence in framed data");
        let n_tags = frame.get_u16_le() as usize;
        if frame.len() < n_tags * TAG_SIZE {
            return errdata!("truncated tags in frame");
        }
        let mut tags = Vec::with_capacity(n_tags);
        for _ in 0..n_tags {
            tags.push(Tag::new(frame.get_i8(), frame.get_u32_le()));
        }
        Ok(Some(Frame { subsequence, tags, payload: frame }))
    }
}

/// Builds the version blocks of a peek reply.
#[derive(Debug, Default)]
pub struct BlockWriter {
    buf: BytesMut,
}

impl BlockWriter {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Appends one version's frames. Versions must be appended in
    /// strictly increasing order; empty blocks are omitted.
    pub fn block(&mut self, version: Version, frames: &[u8]) {
        if frames.is_empty() {
            return;
        }
        self.buf.reserve(12 + frames.len());
        self.buf.put_u64_le(version);
        self.buf.put_u32_le(frames.len() as u32);
        self.buf.put_slice(frames);
    }

    pub fn finish(&mut self) -> Bytes {
        std::mem::take(&mut self.buf).freeze()
    }
}

/// Iterates over the version blocks of a peek reply.
#[derive(Clone, Debug, Default)]
pub struct BlockReader {
    buf: Bytes,
}

impl BlockReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Decodes the next version block as (version, frames).
    pub fn next(&mut self) -> Result<Option<(Version, Bytes)>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf.len() < 12 {
            return errdata!("truncated block header");
        }
        let version = self.buf.get_u64_le();
        let len = self.buf.get_u32_le() as usize;
        if self.buf.len() < len {
            return errdata!("truncated block of length {len}");
        }
        Ok(Some((version, self.buf.split_to(len))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frames should have the documented byte layout, since log servers
    /// index into them by raw offset.
    #[test]
    fn frame_layout() {
        let mut writer = FrameWriter::new();
        assert_eq!(writer.offset(), 0);
        writer.append(1, &[Tag::new(0, 7)], b"a");
        // len(4) + subseq(4) + n_tags(2) + tag(5) + payload(1)
        assert_eq!(writer.offset(), 16);
        let buf = writer.finish();
        assert_eq!(
            hex::encode(&buf),
            concat!(
                "0c000000", // len = 12
                "01000000", // subsequence = 1
                "0100",     // 1 tag
                "00",       // tag locality 0
                "07000000", // tag id 7
                "61",       // "a"
            )
        );
    }

    #[test]
    fn frame_roundtrip_preserves_tags_and_payload() {
        let tags = vec![Tag::new(-1, 0), Tag::new(2, 42)];
        let mut writer = FrameWriter::new();
        writer.append(3, &tags, b"hello");
        writer.append(4, &[], b"");

        let mut reader = FrameReader::new(writer.finish());
        let frame = reader.next().unwrap().unwrap();
        assert_eq!(frame.subsequence, 3);
        assert_eq!(frame.tags, tags);
        assert_eq!(&frame.payload[..], b"hello");
        let frame = reader.next().unwrap().unwrap();
        assert_eq!(frame.subsequence, 4);
        assert!(frame.tags.is_empty());
        assert!(frame.payload.is_empty());
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn blocks_skip_empty_versions() {
        let mut frames = FrameWriter::new();
        frames.append(1, &[Tag::new(0, 1)], b"x");
        let frames = frames.finish();

        let mut writer = BlockWriter::new();
        writer.block(10, &frames);
        writer.block(11, b"");
        writer.block(12, &frames);

        let mut reader = BlockReader::new(writer.finish());
        assert_eq!(reader.next().unwrap().unwrap().0, 10);
        assert_eq!(reader.next().unwrap().unwrap().0, 12);
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    #[should_panic(expected = "subsequence 0")]
    fn zero_subsequence_is_fatal() {
        FrameWriter::new().append(0, &[], b"boom");
    }

    #[test]
    fn truncated_data_is_an_error() {
        let mut writer = FrameWriter::new();
        writer.append(1, &[Tag::new(0, 1)], b"abc");
        let buf = writer.finish();
        let mut reader = FrameReader::new(buf.slice(0..buf.len() - 1));
        assert!(reader.next().is_err());
    }
}
