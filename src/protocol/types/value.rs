//! Values exchanged with callers.

use super::lob::BlobStream;
use bytes::Bytes;
use std::fmt;
use std::io::{self, Read};

/// A caller-side value: the closed set of shapes parameters take and column
/// reads produce.
///
/// Text is carried as bytes in the connection's display charset.
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Long(i64),
    /// Floating point value.
    Double(f64),
    /// Text or binary value.
    Str(Bytes),
    /// Long value read through a stream.
    Stream(ByteStream),
}

impl Value {
    /// Check if the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Raw bytes of a text value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(b) => Some(b),
            _ => None,
        }
    }

    /// Text value as a string slice, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Try to convert to i64.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Bool(b) => Some(*b as i64),
            Value::Str(_) => self.as_str().and_then(|s| s.trim().parse().ok()),
            _ => None,
        }
    }

    /// Try to convert to f64.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Long(v) => Some(*v as f64),
            Value::Str(_) => self.as_str().and_then(|s| s.trim().parse().ok()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Long(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_stream_mut(&mut self) -> Option<&mut ByteStream> {
        match self {
            Value::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Stream(_) => "stream",
        }
    }

    /// Text form of a scalar, as bytes.
    pub fn scalar_text(&self) -> Option<Bytes> {
        match self {
            Value::Bool(b) => Some(Bytes::from(if *b { "1" } else { "0" })),
            Value::Long(v) => Some(Bytes::from(v.to_string())),
            Value::Double(v) => Some(Bytes::from(v.to_string())),
            Value::Str(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Long(v) => write!(f, "Long({})", v),
            Value::Double(v) => write!(f, "Double({})", v),
            Value::Str(b) => write!(f, "Str({:?})", String::from_utf8_lossy(b)),
            Value::Stream(s) => write!(f, "Stream({:?})", s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Stream(s) => match s.len_hint() {
                Some(len) => write!(f, "<STREAM: {} bytes>", len),
                None => write!(f, "<STREAM>"),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Bytes::from(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Str(Bytes::copy_from_slice(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Str(Bytes::from(v))
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Long(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<ByteStream> for Value {
    fn from(v: ByteStream) -> Self {
        Value::Stream(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A byte stream handle: either a provider long value or a caller reader.
pub enum ByteStream {
    /// Long value read from the provider.
    Blob(BlobStream),
    /// Caller supplied reader, with its length when known.
    Reader {
        reader: Box<dyn Read>,
        len: Option<u64>,
    },
}

impl ByteStream {
    /// Wrap a caller reader of unknown length.
    pub fn new(reader: impl Read + 'static) -> Self {
        ByteStream::Reader {
            reader: Box::new(reader),
            len: None,
        }
    }

    /// Wrap a caller reader of known length.
    pub fn with_len(reader: impl Read + 'static, len: u64) -> Self {
        ByteStream::Reader {
            reader: Box::new(reader),
            len: Some(len),
        }
    }

    /// Length in bytes, when known without reading.
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            ByteStream::Blob(blob) => blob.len(),
            ByteStream::Reader { len, .. } => *len,
        }
    }

    pub fn as_blob_mut(&mut self) -> Option<&mut BlobStream> {
        match self {
            ByteStream::Blob(blob) => Some(blob),
            ByteStream::Reader { .. } => None,
        }
    }

    /// Read the remaining bytes.
    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ByteStream::Blob(blob) => blob.read(buf),
            ByteStream::Reader { reader, .. } => reader.read(buf),
        }
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteStream::Blob(blob) => write!(f, "{:?}", blob),
            ByteStream::Reader { len, .. } => f.debug_struct("Reader").field("len", len).finish(),
        }
    }
}
