//! Long value streams.
//!
//! Long values never travel inside packed records:
//! 1. **Results**: the provider hands out a sequential stream per long cell,
//!    wrapped here in a [`BlobStream`] that converts charsets on the fly.
//! 2. **Parameters**: long inputs are handed to the provider as a
//!    [`ValueStream`] reading from caller memory or a caller reader.

use super::value::{ByteStream, Value};
use crate::charset::{CharsetConverter, ConversionContext, ConvertStatus, Direction};
use crate::error::Result;
use crate::protocol::constants::STREAM_STAGING_SIZE;
use crate::protocol::provider::SequentialStream;
use crate::protocol::status::{HResult, ProviderError, ProviderResult};
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::rc::Rc;
use tracing::trace;

/// Caller-facing reader over a provider long value.
///
/// Holds an optional keepalive reference to the resources of the statement
/// that produced it, so the value stays readable after the statement moves
/// on or is closed.
pub struct BlobStream {
    source: Option<Box<dyn SequentialStream>>,
    seekable: bool,
    length: usize,
    converter: Option<Rc<dyn CharsetConverter>>,
    staging: Vec<u8>,
    staged_start: usize,
    staged_end: usize,
    pending: Vec<u8>,
    pending_pos: usize,
    eof: bool,
    keepalive: Option<Rc<dyn Any>>,
}

impl BlobStream {
    /// Wrap a provider stream.
    ///
    /// `length` is the provider's declared length (0 when unknown). With a
    /// converter, bytes are converted while reading.
    pub fn new(
        mut source: Box<dyn SequentialStream>,
        length: usize,
        converter: Option<Rc<dyn CharsetConverter>>,
    ) -> Self {
        let seekable = source.seekable().is_some();
        Self {
            source: Some(source),
            seekable,
            length,
            converter,
            staging: Vec::new(),
            staged_start: 0,
            staged_end: 0,
            pending: Vec::new(),
            pending_pos: 0,
            eof: false,
            keepalive: None,
        }
    }

    /// Keep `owner` alive for as long as this stream holds provider data.
    pub fn with_keepalive(mut self, owner: Rc<dyn Any>) -> Self {
        self.keepalive = Some(owner);
        self
    }

    /// Length in bytes, known only when no conversion takes place.
    pub fn len(&self) -> Option<u64> {
        if self.converter.is_none() && self.length > 0 {
            Some(self.length as u64)
        } else {
            None
        }
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable && self.source.is_some()
    }

    /// Whether the stream still holds provider references.
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    pub fn holds_keepalive(&self) -> bool {
        self.keepalive.is_some()
    }

    /// Release the provider stream and the keepalive reference.
    pub fn close(&mut self) {
        self.source = None;
        self.keepalive = None;
        self.converter = None;
        self.staging = Vec::new();
        self.pending = Vec::new();
        self.staged_start = 0;
        self.staged_end = 0;
        self.pending_pos = 0;
        self.eof = true;
    }

    fn reached_end(&mut self) {
        self.eof = true;
        if !self.seekable {
            trace!("blob stream exhausted, releasing provider stream");
            self.source = None;
            self.keepalive = None;
        }
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        n
    }

    fn refill_staging(&mut self) -> io::Result<()> {
        if self.staging.len() < STREAM_STAGING_SIZE {
            self.staging.resize(STREAM_STAGING_SIZE, 0);
        }
        // Keep a trailing partial character at the front.
        self.staging.copy_within(self.staged_start..self.staged_end, 0);
        self.staged_end -= self.staged_start;
        self.staged_start = 0;

        let Some(source) = self.source.as_mut() else {
            self.eof = true;
            return Ok(());
        };
        let n = source
            .read(&mut self.staging[self.staged_end..])
            .map_err(io::Error::other)?;
        if n == 0 {
            self.eof = true;
        }
        self.staged_end += n;
        Ok(())
    }

    fn read_converted(&mut self, converter: Rc<dyn CharsetConverter>, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pending_pos < self.pending.len() {
                return Ok(self.drain_pending(buf));
            }
            if !self.eof && self.staged_end - self.staged_start < STREAM_STAGING_SIZE / 2 {
                self.refill_staging()?;
            }
            if self.staged_start == self.staged_end {
                self.reached_end();
                return Ok(0);
            }

            let staged = &self.staging[self.staged_start..self.staged_end];
            self.pending.clear();
            self.pending.resize(staged.len() * 4 + 8, 0);
            self.pending_pos = 0;
            let step = converter.convert(staged, &mut self.pending);
            self.staged_start += step.consumed;
            self.pending.truncate(step.produced);

            match step.status {
                ConvertStatus::Complete | ConvertStatus::OutputFull => {}
                ConvertStatus::Incomplete if self.eof => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "stream ends inside a character",
                    ));
                }
                ConvertStatus::Incomplete => {
                    if step.produced == 0 {
                        self.refill_staging()?;
                    }
                }
                ConvertStatus::Invalid => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "invalid byte sequence in stream",
                    ));
                }
            }
        }
    }
}

impl Read for BlobStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(converter) = self.converter.clone() {
            return self.read_converted(converter, buf);
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };
        let n = source.read(buf).map_err(io::Error::other)?;
        if n == 0 {
            self.reached_end();
        }
        Ok(n)
    }
}

impl Seek for BlobStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if !self.seekable {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "stream is not seekable"));
        }
        let seeker = self
            .source
            .as_mut()
            .and_then(|source| source.seekable())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "stream is closed"))?;
        let position = seeker.seek(pos).map_err(io::Error::other)?;
        self.staged_start = 0;
        self.staged_end = 0;
        self.pending.clear();
        self.pending_pos = 0;
        self.eof = false;
        Ok(position)
    }
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream")
            .field("open", &self.is_open())
            .field("seekable", &self.seekable)
            .field("length", &self.length)
            .field("converting", &self.converter.is_some())
            .finish()
    }
}

enum ValueSource {
    Memory { data: Bytes, pos: usize },
    Reader(Box<dyn Read>),
}

/// Provider-facing stream over a caller value.
pub struct ValueStream {
    source: ValueSource,
}

impl ValueStream {
    pub fn from_bytes(data: Bytes) -> Self {
        Self {
            source: ValueSource::Memory { data, pos: 0 },
        }
    }

    pub fn from_reader(reader: Box<dyn Read>) -> Self {
        Self {
            source: ValueSource::Reader(reader),
        }
    }

    /// Build a stream over `value`, converting text along `direction`.
    ///
    /// Caller streams of known length pass through untouched when no
    /// conversion applies; otherwise they are read fully first. The value is
    /// left as `Null` when its stream is taken. Returns the stream and its
    /// byte length.
    pub fn for_value(
        value: &mut Value,
        conv: &ConversionContext,
        direction: Option<Direction>,
    ) -> Result<(Self, u64)> {
        let converts = direction.is_some_and(|d| conv.converter(d).is_some());
        let data = if matches!(value, Value::Stream(_)) {
            match std::mem::replace(value, Value::Null) {
                Value::Stream(ByteStream::Reader {
                    reader,
                    len: Some(len),
                }) if !converts => return Ok((Self::from_reader(reader), len)),
                Value::Stream(mut other) => Bytes::from(other.read_to_vec()?),
                _ => Bytes::new(),
            }
        } else {
            value.scalar_text().unwrap_or_default()
        };
        let data = match direction {
            Some(direction) if converts => Bytes::from(conv.convert(&data, direction)?.into_owned()),
            _ => data,
        };
        let len = data.len() as u64;
        Ok((Self::from_bytes(data), len))
    }
}

impl SequentialStream for ValueStream {
    fn read(&mut self, buf: &mut [u8]) -> ProviderResult<usize> {
        match &mut self.source {
            ValueSource::Memory { data, pos } => {
                let remaining = &data[*pos..];
                let n = remaining.len().min(buf.len());
                buf[..n].copy_from_slice(&remaining[..n]);
                *pos += n;
                Ok(n)
            }
            ValueSource::Reader(reader) => reader
                .read(buf)
                .map_err(|_| ProviderError::new(HResult::E_FAIL)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::{BuiltinCharsets, ConversionOption};
    use crate::protocol::memory::MemoryStream;
    use std::io::Cursor;

    fn utf8_to_1252() -> Rc<dyn CharsetConverter> {
        let mut ctx = ConversionContext::with_charset(Rc::new(BuiltinCharsets), "windows-1252").unwrap();
        ctx.set_option(ConversionOption::NarrowEncoding, Some("utf-8")).unwrap();
        ctx.converter(Direction::NarrowToOutput).unwrap().clone()
    }

    #[test]
    fn test_passthrough_read_and_len() {
        let source = MemoryStream::new(Bytes::from_static(b"hello blob"), false);
        let mut blob = BlobStream::new(Box::new(source), 10, None);
        assert_eq!(blob.len(), Some(10));
        let mut out = String::new();
        blob.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello blob");
        assert!(!blob.is_open());
    }

    #[test]
    fn test_converting_read_across_staging_boundary() {
        let text = "é".repeat(STREAM_STAGING_SIZE);
        let source = MemoryStream::new(Bytes::from(text.clone()), false);
        let mut blob = BlobStream::new(Box::new(source), text.len(), Some(utf8_to_1252()));
        assert_eq!(blob.len(), None);
        let mut out = Vec::new();
        let mut chunk = [0u8; 7];
        loop {
            let n = blob.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, vec![0xE9u8; STREAM_STAGING_SIZE]);
    }

    #[test]
    fn test_seek_requires_seekable_source() {
        let source = MemoryStream::new(Bytes::from_static(b"abcdef"), false);
        let mut blob = BlobStream::new(Box::new(source), 6, None);
        assert!(blob.seek(SeekFrom::Start(2)).is_err());

        let source = MemoryStream::new(Bytes::from_static(b"abcdef"), true);
        let mut blob = BlobStream::new(Box::new(source), 6, None);
        assert_eq!(blob.seek(SeekFrom::Start(2)).unwrap(), 2);
        let mut out = Vec::new();
        blob.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"cdef");
        assert!(blob.is_open());
    }

    #[test]
    fn test_close_releases_keepalive() {
        let owner: Rc<dyn Any> = Rc::new(5u32);
        let source = MemoryStream::new(Bytes::from_static(b"x"), false);
        let mut blob = BlobStream::new(Box::new(source), 1, None).with_keepalive(owner.clone());
        assert_eq!(Rc::strong_count(&owner), 2);
        blob.close();
        assert_eq!(Rc::strong_count(&owner), 1);
        assert_eq!(blob.read(&mut [0u8; 4]).unwrap(), 0);
    }

    #[test]
    fn test_value_stream_from_text() {
        let ctx = ConversionContext::with_charset(Rc::new(BuiltinCharsets), "windows-1252").unwrap();
        let mut value = Value::from(&b"caf\xE9"[..]);
        let (mut stream, len) =
            ValueStream::for_value(&mut value, &ctx, Some(Direction::InputToUnicode)).unwrap();
        assert_eq!(len, 8);
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        let expected: Vec<u8> = "café".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(&buf[..n], expected.as_slice());
        assert!(!value.is_null());
    }

    #[test]
    fn test_value_stream_passes_sized_reader() {
        let ctx = ConversionContext::new(Rc::new(BuiltinCharsets));
        let mut value = Value::Stream(ByteStream::with_len(Cursor::new(vec![1u8, 2, 3]), 3));
        let (mut stream, len) = ValueStream::for_value(&mut value, &ctx, None).unwrap();
        assert_eq!(len, 3);
        assert!(value.is_null());
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }
}
