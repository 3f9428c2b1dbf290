//! Statement parameters.
//!
//! A bound parameter is converted when it is prepared for execute: text goes
//! to the wide or narrow form the provider expects, long values become
//! provider-facing streams, and scalars fill fixed slots.

use super::lob::{BlobStream, ValueStream};
use super::provider_type::{param_type_names as names, LogicalType};
use super::value::{ByteStream, Value};
use crate::attributes::Flags;
use crate::charset::{ConversionContext, Direction};
use crate::error::{Error, Result};
use crate::protocol::buffer::{FieldLayout, FieldSpec, RecordReader, RecordWriter};
use crate::protocol::constants::*;
use crate::protocol::provider::{wide, Binding, ParamBindInfo, ParamInfo, SequentialStream};
use bytes::Bytes;
use std::io::Read;
use tracing::trace;

/// Output buffer size when neither the caller nor the provider gives one.
const DEFAULT_OUTPUT_LEN: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamDirection {
    #[default]
    Input,
    Output,
    InputOutput,
}

impl ParamDirection {
    pub fn is_input(self) -> bool {
        matches!(self, ParamDirection::Input | ParamDirection::InputOutput)
    }

    pub fn is_output(self) -> bool {
        matches!(self, ParamDirection::Output | ParamDirection::InputOutput)
    }
}

/// Prepared slot contents.
#[derive(Default)]
enum Payload {
    #[default]
    None,
    Scalar { bytes: [u8; 8], len: usize },
    Buffer(Bytes),
    Stream { stream: Option<ValueStream>, len: u64 },
}

/// A parameter bound to a statement.
pub struct ParameterBinding {
    /// 1-based position in the rewritten query.
    pub ordinal: usize,
    /// Marker name for named parameters, without the leading colon.
    pub name: Option<String>,
    pub direction: ParamDirection,
    /// Caller's hint for the value shape, used for outputs.
    pub hint: LogicalType,
    /// Caller-declared maximum output length in bytes.
    pub max_len: usize,
    pub flags: Flags,
    pub conv: ConversionContext,
    pub value: Value,

    /// `DBTYPE_*` the slot exchanges.
    retrieval: u16,
    byte_count: usize,
    variable_length: bool,
    bind_info: Option<ParamBindInfo>,
    payload: Payload,
    field: Option<FieldLayout>,
    stream_slot: Option<usize>,
    /// Set once a caller stream has been handed to the provider; only a
    /// fresh bind or an output read clears it.
    stream_taken: bool,
}

impl std::fmt::Debug for ParameterBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterBinding")
            .field("ordinal", &self.ordinal)
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("value", &self.value)
            .field("retrieval", &self.retrieval)
            .field("byte_count", &self.byte_count)
            .finish()
    }
}

impl ParameterBinding {
    pub fn new(ordinal: usize, value: Value, conv: ConversionContext) -> Self {
        Self {
            ordinal,
            name: None,
            direction: ParamDirection::Input,
            hint: LogicalType::String,
            max_len: 0,
            flags: Flags::NONE,
            conv,
            value,
            retrieval: DBTYPE_EMPTY,
            byte_count: 0,
            variable_length: false,
            bind_info: None,
            payload: Payload::None,
            field: None,
            stream_slot: None,
            stream_taken: false,
        }
    }

    pub fn with_direction(mut self, direction: ParamDirection, hint: LogicalType, max_len: usize) -> Self {
        self.direction = direction;
        self.hint = hint;
        self.max_len = max_len;
        self
    }

    pub fn retrieval(&self) -> u16 {
        self.retrieval
    }

    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    pub fn bind_info(&self) -> Option<&ParamBindInfo> {
        self.bind_info.as_ref()
    }

    fn reset(&mut self) {
        self.retrieval = DBTYPE_EMPTY;
        self.byte_count = 0;
        self.variable_length = false;
        self.bind_info = None;
        self.payload = Payload::None;
        self.field = None;
        self.stream_slot = None;
    }

    /// Decide type and width and convert the value, using the provider's
    /// description of the parameter when it has one.
    pub fn prepare(&mut self, info: Option<&ParamInfo>) -> Result<&ParamBindInfo> {
        if self.stream_taken {
            return Err(Error::parameter(
                SQLSTATE_GENERAL,
                format!("Stream parameter {} was already consumed; bind it again", self.ordinal),
            ));
        }
        self.reset();

        let declared_type = info.map(|i| i.db_type & !DBTYPE_BYREF).unwrap_or(DBTYPE_EMPTY);
        let declared_size = info.map(|i| i.param_size).unwrap_or(0);
        let mut pflags = info.map(|i| i.flags).unwrap_or(DBPARAMFLAGS_ISINPUT);
        pflags &= !(DBPARAMFLAGS_ISINPUT | DBPARAMFLAGS_ISOUTPUT);
        if self.direction.is_input() {
            pflags |= DBPARAMFLAGS_ISINPUT;
        }
        if self.direction.is_output() {
            pflags |= DBPARAMFLAGS_ISOUTPUT;
        }
        let long = pflags & DBPARAMFLAGS_ISLONG != 0;
        let unicode = match declared_type {
            DBTYPE_WSTR | DBTYPE_BSTR => true,
            DBTYPE_EMPTY => self.flags.contains(Flags::STRING_AS_UNICODE),
            _ => false,
        };
        let binary = declared_type == DBTYPE_BYTES;
        let truncate = self.flags.contains(Flags::TRUNCATE_STRINGS)
            && declared_size > 0
            && super::ProviderType(declared_type).is_variable_width();

        let mut type_name = names::VARCHAR;
        let mut width = 0;

        if self.direction.is_input() {
            match &self.value {
                Value::Null => {
                    if !self.direction.is_output() {
                        type_name = names::WVARCHAR;
                        self.retrieval = DBTYPE_WSTR;
                    }
                }
                Value::Stream(_) => {
                    type_name = self.bind_stream(unicode, binary)?;
                    width = UNBOUNDED_WIDTH;
                }
                Value::Str(bytes) if long || bytes.len() > LONG_VALUE_THRESHOLD => {
                    type_name = self.bind_stream(unicode, binary)?;
                    width = UNBOUNDED_WIDTH;
                }
                Value::Str(bytes) => {
                    let bytes = bytes.clone();
                    let (converted, name, retrieval) = if binary {
                        (bytes.clone(), names::VARBINARY, DBTYPE_BYTES)
                    } else if unicode {
                        let wide = self.conv.convert(&bytes, Direction::InputToUnicode)?;
                        (Bytes::from(wide.into_owned()), names::WVARCHAR, DBTYPE_WSTR)
                    } else {
                        let narrow = self.conv.convert(&bytes, Direction::InputToNarrow)?;
                        (Bytes::from(narrow.into_owned()), names::VARCHAR, DBTYPE_STR)
                    };
                    let units = if retrieval == DBTYPE_WSTR { 2 } else { 1 };
                    let mut len = converted.len();
                    if truncate && declared_size * units < len {
                        len = match retrieval {
                            DBTYPE_STR => self.conv.truncated_length(&converted, declared_size),
                            _ => declared_size * units,
                        };
                        trace!(ordinal = self.ordinal, from = converted.len(), to = len, "parameter truncated");
                    }
                    type_name = name;
                    width = (len / units).max(declared_size);
                    self.retrieval = retrieval;
                    self.byte_count = len;
                    self.variable_length = true;
                    self.payload = Payload::Buffer(converted.slice(..len));
                }
                &Value::Long(v) => match i32::try_from(v) {
                    Ok(small) => {
                        type_name = names::I4;
                        self.set_scalar(DBTYPE_I4, &small.to_le_bytes());
                    }
                    Err(_) => {
                        type_name = names::I8;
                        self.set_scalar(DBTYPE_I8, &v.to_le_bytes());
                    }
                },
                &Value::Bool(b) => {
                    type_name = names::BOOL;
                    self.set_scalar(DBTYPE_I4, &(b as i32).to_le_bytes());
                }
                &Value::Double(d) => {
                    type_name = names::R8;
                    self.set_scalar(DBTYPE_R8, &d.to_le_bytes());
                }
            }
        }

        if self.direction.is_output() {
            if self.retrieval == DBTYPE_EMPTY {
                type_name = self.guess_output(unicode, binary, declared_size);
                width = match self.retrieval {
                    DBTYPE_IUNKNOWN => UNBOUNDED_WIDTH,
                    _ => self.byte_count,
                };
            } else if self.variable_length {
                let wanted = self.output_len(declared_size, self.retrieval == DBTYPE_WSTR);
                self.byte_count = self.byte_count.max(wanted);
                width = width.max(declared_size);
            }
        }

        trace!(
            ordinal = self.ordinal,
            type_name,
            byte_count = self.byte_count,
            direction = ?self.direction,
            "parameter prepared"
        );

        let name = self.name.as_deref().map(wide);
        Ok(self.bind_info.insert(ParamBindInfo {
            type_name,
            name,
            param_size: width,
            flags: pflags,
            precision: info.map(|i| i.precision).unwrap_or(0),
            scale: info.map(|i| i.scale).unwrap_or(0),
        }))
    }

    fn set_scalar(&mut self, retrieval: u16, raw: &[u8]) {
        let mut bytes = [0u8; 8];
        bytes[..raw.len()].copy_from_slice(raw);
        self.retrieval = retrieval;
        self.byte_count = raw.len();
        self.payload = Payload::Scalar {
            bytes,
            len: raw.len(),
        };
    }

    fn bind_stream(&mut self, unicode: bool, binary: bool) -> Result<&'static str> {
        let (direction, type_name) = if binary {
            (None, names::LONGVARBINARY)
        } else if unicode {
            (Some(Direction::InputToUnicode), names::WLONGVARCHAR)
        } else {
            (Some(Direction::InputToNarrow), names::LONGVARCHAR)
        };
        let taken = matches!(self.value, Value::Stream(_));
        let (stream, len) = ValueStream::for_value(&mut self.value, &self.conv, direction)?;
        self.stream_taken = taken;
        self.retrieval = DBTYPE_IUNKNOWN;
        self.byte_count = STREAM_SLOT_WIDTH;
        self.variable_length = true;
        self.payload = Payload::Stream {
            stream: Some(stream),
            len,
        };
        Ok(type_name)
    }

    fn output_len(&self, declared_size: usize, unicode: bool) -> usize {
        let base = if self.max_len > 0 {
            self.max_len
        } else if declared_size > 0 {
            declared_size
        } else {
            DEFAULT_OUTPUT_LEN
        };
        if unicode {
            (base + 1) * 2
        } else {
            base + 1
        }
    }

    /// Shape for an output whose type the input value did not settle.
    fn guess_output(&mut self, unicode: bool, binary: bool, declared_size: usize) -> &'static str {
        match self.hint {
            LogicalType::Int => {
                self.set_output_scalar(DBTYPE_I8, 8);
                names::I8
            }
            LogicalType::Bool => {
                self.set_output_scalar(DBTYPE_I4, 4);
                names::BOOL
            }
            LogicalType::Lob => {
                self.retrieval = DBTYPE_IUNKNOWN;
                self.byte_count = STREAM_SLOT_WIDTH;
                self.variable_length = true;
                if binary {
                    names::LONGVARBINARY
                } else if unicode {
                    names::WLONGVARCHAR
                } else {
                    names::LONGVARCHAR
                }
            }
            LogicalType::String | LogicalType::Null => {
                self.variable_length = true;
                if binary {
                    self.retrieval = DBTYPE_BYTES;
                    self.byte_count = self.output_len(declared_size, false) - 1;
                    names::VARBINARY
                } else if unicode {
                    self.retrieval = DBTYPE_WSTR;
                    self.byte_count = self.output_len(declared_size, true);
                    names::WVARCHAR
                } else {
                    self.retrieval = DBTYPE_STR;
                    self.byte_count = self.output_len(declared_size, false);
                    names::VARCHAR
                }
            }
        }
    }

    fn set_output_scalar(&mut self, retrieval: u16, width: usize) {
        self.retrieval = retrieval;
        self.byte_count = width;
        self.variable_length = false;
    }

    /// Shape of this parameter's slot in the input record.
    pub fn field_spec(&self) -> FieldSpec {
        if self.byte_count == 0 && !self.variable_length {
            FieldSpec::status_only()
        } else if self.variable_length {
            FieldSpec::variable(self.byte_count)
        } else {
            FieldSpec::fixed(self.byte_count)
        }
    }

    pub fn set_field(&mut self, field: FieldLayout) {
        self.field = Some(field);
    }

    /// Accessor binding for the placed slot.
    pub fn binding(&self) -> Option<Binding> {
        let field = self.field.as_ref()?;
        let mut io = DBPARAMIO_NOTPARAM;
        if self.direction.is_input() {
            io |= DBPARAMIO_INPUT;
        }
        if self.direction.is_output() {
            io |= DBPARAMIO_OUTPUT;
        }
        let mut binding = Binding::for_field(self.ordinal, self.retrieval, field, io);
        if let Some(info) = &self.bind_info {
            binding.precision = info.precision;
            binding.scale = info.scale;
        }
        Some(binding)
    }

    /// Copy the prepared value into the input record.
    ///
    /// Streams move into `streams`; the slot records their index.
    pub fn write_input(
        &mut self,
        record: &mut [u8],
        streams: &mut Vec<Option<Box<dyn SequentialStream>>>,
    ) -> Result<()> {
        let Some(field) = self.field else {
            return Err(Error::parameter(
                SQLSTATE_GENERAL,
                format!("Parameter {} has no buffer slot", self.ordinal),
            ));
        };
        let mut writer = RecordWriter::new(record);
        if let Some(offset) = field.value {
            writer.zero(offset, field.width)?;
        }
        if !self.direction.is_input() {
            writer.set_status(&field, DBSTATUS_S_OK)?;
            writer.set_length(&field, 0)?;
            if self.retrieval == DBTYPE_IUNKNOWN {
                self.reserve_stream_slot(&mut writer, &field, streams, None)?;
            }
            return Ok(());
        }
        match &mut self.payload {
            Payload::None => {
                writer.set_status(&field, DBSTATUS_S_ISNULL)?;
                writer.set_length(&field, 0)?;
            }
            Payload::Scalar { bytes, len } => {
                writer.set_status(&field, DBSTATUS_S_OK)?;
                writer.write_bytes(field.value.unwrap_or_default(), &bytes[..*len])?;
            }
            Payload::Buffer(data) => {
                writer.set_status(&field, DBSTATUS_S_OK)?;
                writer.set_length(&field, data.len())?;
                writer.write_bytes(field.value.unwrap_or_default(), data)?;
            }
            Payload::Stream { stream, len } => {
                let len = *len as usize;
                let stream = stream
                    .take()
                    .map(|s| Box::new(s) as Box<dyn SequentialStream>);
                if stream.is_none() {
                    return Err(Error::parameter(
                        SQLSTATE_GENERAL,
                        format!("Stream parameter {} was already consumed", self.ordinal),
                    ));
                }
                writer.set_status(&field, DBSTATUS_S_OK)?;
                writer.set_length(&field, len)?;
                self.reserve_stream_slot(&mut writer, &field, streams, stream)?;
            }
        }
        Ok(())
    }

    fn reserve_stream_slot(
        &mut self,
        writer: &mut RecordWriter<'_>,
        field: &FieldLayout,
        streams: &mut Vec<Option<Box<dyn SequentialStream>>>,
        stream: Option<Box<dyn SequentialStream>>,
    ) -> Result<()> {
        let index = streams.len();
        streams.push(stream);
        self.stream_slot = Some(index);
        writer.write_u64_le(field.value.unwrap_or_default(), index as u64)
    }

    /// Replace the caller value with what the provider returned.
    pub fn read_output(
        &mut self,
        record: &[u8],
        streams: &mut [Option<Box<dyn SequentialStream>>],
    ) -> Result<()> {
        if !self.direction.is_output() {
            return Ok(());
        }
        self.stream_taken = false;
        let Some(field) = self.field else {
            return Ok(());
        };
        let reader = RecordReader::new(record);
        let status = reader.status(&field)?;
        if status == DBSTATUS_S_ISNULL {
            self.value = Value::Null;
            return Ok(());
        }
        if status != DBSTATUS_S_OK && status != DBSTATUS_S_TRUNCATED {
            return Err(Error::parameter(
                SQLSTATE_GENERAL,
                format!("Output parameter {} not returned (status {})", self.ordinal, status),
            ));
        }
        let offset = field.value.unwrap_or_default();
        let len = reader.length(&field)?.unwrap_or(self.byte_count);
        self.value = match self.retrieval {
            DBTYPE_STR => {
                let raw = reader.value(&field, len.min(field.width.saturating_sub(1)))?;
                Value::Str(Bytes::from(self.conv.convert(raw, Direction::NarrowToOutput)?.into_owned()))
            }
            DBTYPE_WSTR => {
                let take = len.min(field.width.saturating_sub(2)) & !1;
                let raw = reader.value(&field, take)?;
                Value::Str(Bytes::from(self.conv.convert(raw, Direction::UnicodeToOutput)?.into_owned()))
            }
            DBTYPE_BYTES => Value::Str(Bytes::copy_from_slice(reader.value(&field, len)?)),
            DBTYPE_I4 if self.hint == LogicalType::Bool => Value::Bool(reader.read_i32_le(offset)? != 0),
            DBTYPE_I4 => Value::Long(reader.read_i32_le(offset)? as i64),
            DBTYPE_I8 if self.hint == LogicalType::Bool => Value::Bool(reader.read_i64_le(offset)? != 0),
            DBTYPE_I8 => Value::Long(reader.read_i64_le(offset)?),
            DBTYPE_R8 => Value::Double(reader.read_f64_le(offset)?),
            DBTYPE_IUNKNOWN => self.read_output_stream(&reader, &field, len, streams)?,
            other => {
                return Err(Error::type_conversion(format!(
                    "unsupported output type {}",
                    super::ProviderType(other)
                )))
            }
        };
        Ok(())
    }

    fn read_output_stream(
        &self,
        reader: &RecordReader<'_>,
        field: &FieldLayout,
        len: usize,
        streams: &mut [Option<Box<dyn SequentialStream>>],
    ) -> Result<Value> {
        let index = match self.stream_slot {
            Some(index) => index,
            None => reader.read_u64_le(field.value.unwrap_or_default())? as usize,
        };
        let Some(stream) = streams.get_mut(index).and_then(Option::take) else {
            return Ok(Value::Null);
        };
        let unicode = self
            .bind_info
            .as_ref()
            .is_some_and(|i| i.type_name == names::WLONGVARCHAR);
        let binary = self
            .bind_info
            .as_ref()
            .is_some_and(|i| i.type_name == names::LONGVARBINARY);
        let direction = if unicode {
            Some(Direction::UnicodeToOutput)
        } else if binary || self.hint == LogicalType::Lob {
            None
        } else {
            Some(Direction::NarrowToOutput)
        };
        let converter = direction.and_then(|d| self.conv.converter(d).cloned());
        let mut blob = BlobStream::new(stream, len, converter);
        if self.hint == LogicalType::Lob {
            return Ok(Value::Stream(ByteStream::Blob(blob)));
        }
        let mut out = Vec::new();
        blob.read_to_end(&mut out)?;
        Ok(Value::Str(Bytes::from(out)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::{BuiltinCharsets, ConversionOption};
    use crate::protocol::buffer::BufferLayout;
    use crate::protocol::memory::MemoryStream;
    use std::io::Cursor;
    use std::rc::Rc;

    fn ctx() -> ConversionContext {
        ConversionContext::with_charset(Rc::new(BuiltinCharsets), "utf-8").unwrap()
    }

    fn declared(db_type: u16, size: usize, flags: u32) -> ParamInfo {
        ParamInfo {
            flags,
            ordinal: 1,
            name: None,
            db_type,
            param_size: size,
            precision: 0,
            scale: 0,
        }
    }

    fn placed(param: &mut ParameterBinding) -> bytes::BytesMut {
        let mut layout = BufferLayout::new();
        let field = layout.place(param.field_spec());
        param.set_field(field);
        layout.allocate()
    }

    #[test]
    fn test_scalars_bind_fixed_slots() {
        let mut p = ParameterBinding::new(1, Value::Long(5), ctx());
        assert_eq!(p.prepare(None).unwrap().type_name, names::I4);
        assert_eq!((p.retrieval(), p.byte_count()), (DBTYPE_I4, 4));

        let mut p = ParameterBinding::new(1, Value::Long(1 << 40), ctx());
        assert_eq!(p.prepare(None).unwrap().type_name, names::I8);
        assert_eq!(p.byte_count(), 8);

        let mut p = ParameterBinding::new(1, Value::Double(1.5), ctx());
        assert_eq!(p.prepare(None).unwrap().type_name, names::R8);

        let mut p = ParameterBinding::new(1, Value::Bool(true), ctx());
        assert_eq!(p.prepare(None).unwrap().type_name, names::BOOL);
        let mut record = placed(&mut p);
        p.write_input(&mut record, &mut Vec::new()).unwrap();
        let field = p.field.unwrap();
        assert_eq!(RecordReader::new(&record).read_i32_le(field.value.unwrap()).unwrap(), 1);
    }

    #[test]
    fn test_null_input_binds_status_only() {
        let mut p = ParameterBinding::new(1, Value::Null, ctx());
        let info = p.prepare(None).unwrap();
        assert_eq!(info.type_name, names::WVARCHAR);
        assert_eq!(p.byte_count(), 0);
        assert_eq!(p.field_spec(), FieldSpec::status_only());
        let mut record = placed(&mut p);
        assert_eq!(record.len(), 4);
        p.write_input(&mut record, &mut Vec::new()).unwrap();
        let field = p.field.unwrap();
        assert_eq!(RecordReader::new(&record).status(&field).unwrap(), DBSTATUS_S_ISNULL);
        assert_eq!(p.binding().unwrap().parts, DBPART_STATUS);
    }

    #[test]
    fn test_text_routes_by_declared_type() {
        let mut conv = ctx();
        conv.set_option(ConversionOption::NarrowEncoding, Some("windows-1252")).unwrap();

        let mut p = ParameterBinding::new(1, Value::from("é"), conv.clone());
        p.prepare(Some(&declared(DBTYPE_WSTR, 10, DBPARAMFLAGS_ISINPUT))).unwrap();
        assert_eq!((p.retrieval(), p.byte_count()), (DBTYPE_WSTR, 2));

        let mut p = ParameterBinding::new(1, Value::from("é"), conv.clone());
        let info = p.prepare(Some(&declared(DBTYPE_STR, 10, DBPARAMFLAGS_ISINPUT))).unwrap();
        assert_eq!(info.type_name, names::VARCHAR);
        assert_eq!(info.param_size, 10);
        let mut record = placed(&mut p);
        p.write_input(&mut record, &mut Vec::new()).unwrap();
        let field = p.field.unwrap();
        let reader = RecordReader::new(&record);
        assert_eq!(reader.length(&field).unwrap(), Some(1));
        assert_eq!(reader.value(&field, 1).unwrap(), b"\xe9");
    }

    #[test]
    fn test_truncation_respects_character_boundaries() {
        let mut conv = ctx();
        conv.set_option(ConversionOption::NarrowEncoding, Some("utf-8")).unwrap();
        let mut p = ParameterBinding::new(1, Value::from("aéé"), conv);
        p.flags = Flags::TRUNCATE_STRINGS;
        p.prepare(Some(&declared(DBTYPE_STR, 4, DBPARAMFLAGS_ISINPUT))).unwrap();
        // "a" + "é" fit in 3 bytes; the second "é" would straddle the limit.
        assert_eq!(p.byte_count(), 3);

        let mut wide = ParameterBinding::new(1, Value::from("abcdef"), ctx());
        wide.flags = Flags::TRUNCATE_STRINGS;
        wide.prepare(Some(&declared(DBTYPE_WSTR, 4, DBPARAMFLAGS_ISINPUT))).unwrap();
        assert_eq!(wide.byte_count(), 8);

        let mut untouched = ParameterBinding::new(1, Value::from("abcdef"), ctx());
        untouched.prepare(Some(&declared(DBTYPE_STR, 4, DBPARAMFLAGS_ISINPUT))).unwrap();
        assert_eq!(untouched.byte_count(), 6);
    }

    #[test]
    fn test_long_text_becomes_stream() {
        let text = "x".repeat(LONG_VALUE_THRESHOLD + 1);
        let mut p = ParameterBinding::new(1, Value::from(text.as_str()), ctx());
        let info = p.prepare(None).unwrap();
        assert_eq!(info.type_name, names::LONGVARCHAR);
        assert_eq!(info.param_size, UNBOUNDED_WIDTH);
        assert_eq!(p.retrieval(), DBTYPE_IUNKNOWN);

        let mut record = placed(&mut p);
        let mut streams = Vec::new();
        p.write_input(&mut record, &mut streams).unwrap();
        let field = p.field.unwrap();
        let reader = RecordReader::new(&record);
        assert_eq!(reader.length(&field).unwrap(), Some(LONG_VALUE_THRESHOLD + 1));
        assert_eq!(reader.read_u64_le(field.value.unwrap()).unwrap(), 0);
        let mut stream = streams[0].take().unwrap();
        let mut buf = vec![0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 16);

        // A stream is handed over once.
        assert!(p.write_input(&mut record, &mut streams).is_err());
    }

    #[test]
    fn test_marked_long_and_reader_values_stream() {
        let mut p = ParameterBinding::new(1, Value::from("short"), ctx());
        p.prepare(Some(&declared(DBTYPE_BYTES, 0, DBPARAMFLAGS_ISINPUT | DBPARAMFLAGS_ISLONG)))
            .unwrap();
        assert_eq!(p.bind_info().unwrap().type_name, names::LONGVARBINARY);

        let reader = ByteStream::with_len(Cursor::new(b"abc".to_vec()), 3);
        let mut p = ParameterBinding::new(1, Value::Stream(reader), ctx());
        p.prepare(None).unwrap();
        assert_eq!(p.retrieval(), DBTYPE_IUNKNOWN);
        assert!(p.value.is_null());

        // The caller's reader is gone; a second round must not bind NULL.
        let err = p.prepare(None).unwrap_err();
        assert!(matches!(err, Error::ParameterBind(_)));
        assert_eq!(err.sql_state(), SQLSTATE_GENERAL);
    }

    #[test]
    fn test_output_guess_and_read_back() {
        let mut p = ParameterBinding::new(1, Value::Null, ctx()).with_direction(
            ParamDirection::Output,
            LogicalType::String,
            10,
        );
        let info = p.prepare(None).unwrap();
        assert_eq!(info.flags & DBPARAMFLAGS_ISOUTPUT, DBPARAMFLAGS_ISOUTPUT);
        assert_eq!(info.flags & DBPARAMFLAGS_ISINPUT, 0);
        assert_eq!((p.retrieval(), p.byte_count()), (DBTYPE_STR, 11));

        let mut record = placed(&mut p);
        p.write_input(&mut record, &mut Vec::new()).unwrap();
        let field = p.field.unwrap();
        {
            let mut w = RecordWriter::new(&mut record);
            w.set_length(&field, 5).unwrap();
            w.write_bytes(field.value.unwrap(), b"hello").unwrap();
        }
        p.read_output(&record, &mut []).unwrap();
        assert_eq!(p.value, Value::from("hello"));
    }

    #[test]
    fn test_input_output_widens_buffer() {
        let mut p = ParameterBinding::new(1, Value::from("ab"), ctx()).with_direction(
            ParamDirection::InputOutput,
            LogicalType::String,
            20,
        );
        p.prepare(None).unwrap();
        assert_eq!(p.byte_count(), 21);
        let mut record = placed(&mut p);
        p.write_input(&mut record, &mut Vec::new()).unwrap();
        let field = p.field.unwrap();
        assert_eq!(RecordReader::new(&record).length(&field).unwrap(), Some(2));
    }

    #[test]
    fn test_output_stream_surfaces_as_blob() {
        let mut p = ParameterBinding::new(1, Value::Null, ctx()).with_direction(
            ParamDirection::Output,
            LogicalType::Lob,
            0,
        );
        p.prepare(None).unwrap();
        let mut record = placed(&mut p);
        let mut streams = Vec::new();
        p.write_input(&mut record, &mut streams).unwrap();
        assert_eq!(streams.len(), 1);
        streams[0] = Some(Box::new(MemoryStream::new(Bytes::from_static(b"\x00\x01"), false)));
        let field = p.field.unwrap();
        RecordWriter::new(&mut record).set_length(&field, 2).unwrap();
        p.read_output(&record, &mut streams).unwrap();
        let Value::Stream(mut stream) = std::mem::replace(&mut p.value, Value::Null) else {
            panic!("expected stream");
        };
        assert_eq!(stream.len_hint(), Some(2));
        assert_eq!(stream.read_to_vec().unwrap(), vec![0, 1]);
    }
}
