//! Packed record buffers exchanged with the provider.
//!
//! A record is a sequence of fields, each made of a 4-byte status slot, an
//! optional length slot and an optional value slot. Every slot starts on a
//! 4-byte boundary. [`BufferLayout`] computes the offsets; [`RecordReader`]
//! and [`RecordWriter`] access the slots of an allocated record.

use crate::error::{Error, Result};
use crate::protocol::constants::{LENGTH_WIDTH, RECORD_ALIGN, STATUS_WIDTH};
use bytes::BytesMut;
use std::panic::Location;

/// Round `offset` up to the record alignment.
pub const fn align(offset: usize) -> usize {
    (offset + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}

/// Shape of a field to be placed in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Declared maximum byte count of the value.
    pub width: usize,
    /// Whether a length slot precedes the value.
    pub variable_length: bool,
    /// Whether a value slot is reserved at all.
    pub value_slot: bool,
}

impl FieldSpec {
    pub fn fixed(width: usize) -> Self {
        Self {
            width,
            variable_length: false,
            value_slot: width > 0,
        }
    }

    pub fn variable(width: usize) -> Self {
        Self {
            width,
            variable_length: true,
            value_slot: true,
        }
    }

    /// A field that only reports a status (e.g. an input NULL).
    pub fn status_only() -> Self {
        Self {
            width: 0,
            variable_length: false,
            value_slot: false,
        }
    }
}

/// Offsets assigned to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldLayout {
    pub status: usize,
    pub length: Option<usize>,
    pub value: Option<usize>,
    pub width: usize,
}

/// Append-only offset cursor building a record layout.
#[derive(Debug, Clone, Default)]
pub struct BufferLayout {
    offset: usize,
    fields: Vec<FieldLayout>,
}

impl BufferLayout {
    pub fn new() -> Self {
        Self::default()
    }

    fn advance(&mut self, width: usize) -> usize {
        let start = self.offset;
        self.offset = align(self.offset + width);
        start
    }

    /// Place the next field and return its offsets.
    pub fn place(&mut self, spec: FieldSpec) -> FieldLayout {
        let status = self.advance(STATUS_WIDTH);
        let length = spec.variable_length.then(|| self.advance(LENGTH_WIDTH));
        let value = spec.value_slot.then(|| self.advance(spec.width));
        let field = FieldLayout {
            status,
            length,
            value,
            width: if spec.value_slot { spec.width } else { 0 },
        };
        self.fields.push(field);
        field
    }

    /// Total bytes the record needs.
    pub fn total_size(&self) -> usize {
        self.offset
    }

    /// Fields placed so far, in declaration order.
    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    /// Allocate a zeroed record of the computed size.
    pub fn allocate(&self) -> BytesMut {
        BytesMut::zeroed(self.offset)
    }
}

/// Read access to a packed record.
pub struct RecordReader<'a> {
    data: &'a [u8],
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Borrow `len` bytes at `offset`.
    #[track_caller]
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset.checked_add(len).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => Ok(&self.data[offset..end]),
            None => Err(Error::BufferTooSmall {
                needed: offset.saturating_add(len),
                available: self.data.len(),
                location: Location::caller(),
            }),
        }
    }

    #[track_caller]
    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    #[track_caller]
    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.array::<1>(offset)?[0])
    }

    #[track_caller]
    pub fn read_u16_le(&self, offset: usize) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array(offset)?))
    }

    #[track_caller]
    pub fn read_i16_le(&self, offset: usize) -> Result<i16> {
        Ok(i16::from_le_bytes(self.array(offset)?))
    }

    #[track_caller]
    pub fn read_u32_le(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(offset)?))
    }

    #[track_caller]
    pub fn read_i32_le(&self, offset: usize) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array(offset)?))
    }

    #[track_caller]
    pub fn read_u64_le(&self, offset: usize) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array(offset)?))
    }

    #[track_caller]
    pub fn read_i64_le(&self, offset: usize) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array(offset)?))
    }

    #[track_caller]
    pub fn read_f32_le(&self, offset: usize) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array(offset)?))
    }

    #[track_caller]
    pub fn read_f64_le(&self, offset: usize) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array(offset)?))
    }

    /// Status word of a field.
    #[track_caller]
    pub fn status(&self, field: &FieldLayout) -> Result<u32> {
        self.read_u32_le(field.status)
    }

    /// Length slot of a field, `None` for fixed-length fields.
    #[track_caller]
    pub fn length(&self, field: &FieldLayout) -> Result<Option<usize>> {
        match field.length {
            Some(offset) => Ok(Some(self.read_u64_le(offset)? as usize)),
            None => Ok(None),
        }
    }

    /// Value slot of a field, clipped to `len` bytes.
    #[track_caller]
    pub fn value(&self, field: &FieldLayout, len: usize) -> Result<&'a [u8]> {
        let offset = field.value.ok_or_else(|| Error::BufferTooSmall {
            needed: len,
            available: 0,
            location: Location::caller(),
        })?;
        self.slice(offset, len.min(field.width))
    }
}

/// Write access to a packed record.
pub struct RecordWriter<'a> {
    data: &'a mut [u8],
}

impl<'a> RecordWriter<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    /// Copy `bytes` to `offset`.
    #[track_caller]
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let available = self.data.len();
        match offset.checked_add(bytes.len()).filter(|end| *end <= available) {
            Some(end) => {
                self.data[offset..end].copy_from_slice(bytes);
                Ok(())
            }
            None => Err(Error::BufferTooSmall {
                needed: offset.saturating_add(bytes.len()),
                available,
                location: Location::caller(),
            }),
        }
    }

    #[track_caller]
    pub fn write_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.write_bytes(offset, &[value])
    }

    #[track_caller]
    pub fn write_u16_le(&mut self, offset: usize, value: u16) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    #[track_caller]
    pub fn write_i16_le(&mut self, offset: usize, value: i16) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    #[track_caller]
    pub fn write_u32_le(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    #[track_caller]
    pub fn write_i32_le(&mut self, offset: usize, value: i32) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    #[track_caller]
    pub fn write_u64_le(&mut self, offset: usize, value: u64) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    #[track_caller]
    pub fn write_i64_le(&mut self, offset: usize, value: i64) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    #[track_caller]
    pub fn write_f64_le(&mut self, offset: usize, value: f64) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Zero `len` bytes at `offset`.
    #[track_caller]
    pub fn zero(&mut self, offset: usize, len: usize) -> Result<()> {
        self.write_bytes(offset, &vec![0u8; len])
    }

    #[track_caller]
    pub fn set_status(&mut self, field: &FieldLayout, status: u32) -> Result<()> {
        self.write_u32_le(field.status, status)
    }

    /// Set the length slot; ignored for fixed-length fields.
    #[track_caller]
    pub fn set_length(&mut self, field: &FieldLayout, len: usize) -> Result<()> {
        match field.length {
            Some(offset) => self.write_u64_le(offset, len as u64),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align(0), 0);
        assert_eq!(align(1), 4);
        assert_eq!(align(4), 4);
        assert_eq!(align(13), 16);
    }

    #[test]
    fn test_offsets_aligned_and_increasing() {
        let mut layout = BufferLayout::new();
        let specs = [
            FieldSpec::fixed(4),
            FieldSpec::variable(11),
            FieldSpec::fixed(1),
            FieldSpec::status_only(),
            FieldSpec::variable(0),
            FieldSpec::fixed(16),
        ];
        for spec in specs {
            layout.place(spec);
        }
        let mut last = 0;
        for field in layout.fields() {
            let mut offsets = vec![field.status];
            offsets.extend(field.length);
            offsets.extend(field.value);
            for offset in offsets {
                assert_eq!(offset % 4, 0);
                assert!(offset >= last);
                last = offset;
            }
        }
        let final_field = layout.fields().last().unwrap();
        let end = final_field.value.unwrap() + final_field.width;
        assert_eq!(layout.total_size(), align(end));
    }

    #[test]
    fn test_exact_offsets() {
        let mut layout = BufferLayout::new();
        let a = layout.place(FieldSpec::fixed(4));
        assert_eq!((a.status, a.length, a.value), (0, None, Some(4)));
        let b = layout.place(FieldSpec::variable(6));
        assert_eq!((b.status, b.length, b.value), (8, Some(12), Some(20)));
        assert_eq!(layout.total_size(), 28);
    }

    #[test]
    fn test_status_only_field() {
        let mut layout = BufferLayout::new();
        let field = layout.place(FieldSpec::status_only());
        assert_eq!(field.value, None);
        assert_eq!(field.length, None);
        assert_eq!(layout.total_size(), 4);
    }

    #[test]
    fn test_reader_writer() {
        let mut layout = BufferLayout::new();
        let field = layout.place(FieldSpec::variable(8));
        let mut buf = layout.allocate();
        {
            let mut writer = RecordWriter::new(&mut buf);
            writer.set_status(&field, 3).unwrap();
            writer.set_length(&field, 5).unwrap();
            writer.write_bytes(field.value.unwrap(), b"hello").unwrap();
        }
        let reader = RecordReader::new(&buf);
        assert_eq!(reader.status(&field).unwrap(), 3);
        assert_eq!(reader.length(&field).unwrap(), Some(5));
        assert_eq!(reader.value(&field, 5).unwrap(), b"hello");
    }

    #[test]
    fn test_read_past_end() {
        let reader = RecordReader::new(&[0u8; 4]);
        let err = reader.read_u64_le(0).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { needed: 8, available: 4, .. }));
    }
}
