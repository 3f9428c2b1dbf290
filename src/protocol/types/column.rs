//! Result columns: retrieval policy, record decoding and the user-facing
//! column description.

use super::lob::BlobStream;
use super::metadata::ColumnMetadata;
use super::provider_type::{LogicalType, ProviderType};
use super::timestamp::{decode_timestamp, format_timestamp};
use super::value::{ByteStream, Value};
use super::variant::variant_to_wide;
use crate::attributes::Flags;
use crate::charset::{ConversionContext, Direction};
use crate::error::{Diagnostic, Error, Result};
use crate::protocol::buffer::{BufferLayout, FieldLayout, FieldSpec, RecordReader};
use crate::protocol::constants::*;
use crate::protocol::provider::{
    from_wide, AccessorHandle, Binding, BlobCell, ColumnDesc, WideString,
};
use crate::protocol::status::HResult;
use bytes::Bytes;
use std::any::Any;
use std::io::Read;
use std::rc::Rc;
use tracing::trace;

/// Minimum text width for timestamps fetched as text.
const TIMESTAMP_TEXT_WIDTH: usize = 19;

/// A column in a result set (user-facing representation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Display name, encoded in the output charset.
    pub name: Bytes,
    /// Whether NULL values are allowed.
    pub nullable: bool,
    pub provider_type: ProviderType,
    pub logical: LogicalType,
    /// Declared maximum length.
    pub max_len: usize,
    pub precision: u8,
    pub scale: u8,
}

impl Column {
    /// Display name as a string slice, if it is valid UTF-8.
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.name).ok()
    }
}

/// Shared column information for all rows in a result set.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    pub columns: Vec<Column>,
}

impl ColumnInfo {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column_names(&self) -> Vec<&[u8]> {
        self.columns.iter().map(|c| &c.name[..]).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Find column index by name (ASCII case-insensitive). `name` is
    /// compared in the output charset.
    pub fn find_by_name(&self, name: impl AsRef<[u8]>) -> Option<usize> {
        let name = name.as_ref();
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// How one result column is fetched and decoded.
#[derive(Debug, Clone)]
pub struct ColumnBinding {
    /// 1-based provider ordinal.
    pub ordinal: usize,
    pub wide_name: WideString,
    /// Display name in the output charset.
    pub name: Bytes,
    pub provider_type: ProviderType,
    /// `DBCOLUMNFLAGS_*` reported by the provider.
    pub column_flags: u32,
    pub column_size: usize,
    pub precision: u8,
    pub scale: u8,
    pub logical: LogicalType,
    /// Type requested from the provider.
    pub retrieval: ProviderType,
    /// Value slot width in the shared record.
    pub byte_count: usize,
    pub variable_length: bool,
    /// Long values are read through a private stream accessor.
    pub long: bool,
    /// Place in the shared record; `None` for long columns.
    pub field: Option<FieldLayout>,
    pub blob_accessor: Option<AccessorHandle>,
    pub conv: ConversionContext,
    pub flags: Flags,
    pub metadata: Option<ColumnMetadata>,
    pub aliased: bool,
}

impl ColumnBinding {
    /// Choose logical type, retrieval type and slot width for a column.
    pub fn plan(desc: &ColumnDesc, flags: Flags, conv: ConversionContext) -> Self {
        let provider_type = ProviderType(desc.db_type);
        let long = desc.flags & DBCOLUMNFLAGS_ISLONG != 0;
        let fixed = desc.flags & DBCOLUMNFLAGS_ISFIXEDLENGTH != 0;
        let size = desc.column_size;

        let (logical, retrieval, byte_count, variable_length) = if long {
            let logical = match provider_type.base() {
                DBTYPE_WSTR | DBTYPE_STR | DBTYPE_BSTR => LogicalType::String,
                _ => LogicalType::Lob,
            };
            (logical, DBTYPE_IUNKNOWN, 0, false)
        } else {
            match provider_type.base() {
                DBTYPE_WSTR | DBTYPE_BSTR => {
                    (LogicalType::String, DBTYPE_WSTR, (size + 1) * 2, !fixed)
                }
                DBTYPE_STR if flags.contains(Flags::STRING_AS_UNICODE) => {
                    (LogicalType::String, DBTYPE_WSTR, (size + 1) * 2, !fixed)
                }
                DBTYPE_STR | DBTYPE_BYTES => (LogicalType::String, provider_type.base(), size + 1, !fixed),
                DBTYPE_BOOL => (LogicalType::Bool, DBTYPE_UI1, 1, false),
                DBTYPE_I1 | DBTYPE_UI1 | DBTYPE_I2 | DBTYPE_UI2 | DBTYPE_I4 => {
                    (LogicalType::Int, DBTYPE_I4, 4, false)
                }
                DBTYPE_UI4 => (LogicalType::Int, DBTYPE_UI4, 4, false),
                DBTYPE_R4 | DBTYPE_R8 | DBTYPE_CY | DBTYPE_NUMERIC | DBTYPE_DECIMAL
                | DBTYPE_VARNUMERIC => (LogicalType::String, DBTYPE_R8, 8, false),
                DBTYPE_DATE | DBTYPE_DBTIMESTAMP if flags.contains(Flags::CONVERT_DATE_TIME) => {
                    let width = (desc.precision as usize).max(TIMESTAMP_TEXT_WIDTH) + 1;
                    (LogicalType::String, DBTYPE_STR, width, false)
                }
                DBTYPE_DATE | DBTYPE_DBTIMESTAMP => {
                    (LogicalType::String, DBTYPE_DBTIMESTAMP, TIMESTAMP_WIDTH, false)
                }
                DBTYPE_VARIANT => (LogicalType::String, DBTYPE_VARIANT, VARIANT_WIDTH, false),
                _ => (
                    LogicalType::String,
                    DBTYPE_STR,
                    (desc.precision as usize).max(size) + 1,
                    true,
                ),
            }
        };

        let mut retrieval = ProviderType(retrieval);
        let mut byte_count = byte_count;
        if !long && provider_type.is_byref() {
            retrieval = ProviderType(retrieval.0 | DBTYPE_BYREF);
            byte_count = REF_WIDTH;
        }

        trace!(
            ordinal = desc.ordinal,
            provider_type = %provider_type,
            retrieval = %retrieval,
            byte_count,
            long,
            "column planned"
        );

        let wide_name = desc.name.clone().unwrap_or_default();
        Self {
            ordinal: desc.ordinal,
            name: Bytes::from(String::from_utf16_lossy(&wide_name)),
            wide_name,
            provider_type,
            column_flags: desc.flags,
            column_size: size,
            precision: desc.precision,
            scale: desc.scale,
            logical,
            retrieval,
            byte_count,
            variable_length,
            long,
            field: None,
            blob_accessor: None,
            conv,
            flags,
            metadata: None,
            aliased: false,
        }
    }

    /// Shape of this column's slot in the shared record, `None` for long
    /// columns.
    pub fn field_spec(&self) -> Option<FieldSpec> {
        if self.long {
            None
        } else if self.variable_length {
            Some(FieldSpec::variable(self.byte_count))
        } else {
            Some(FieldSpec::fixed(self.byte_count))
        }
    }

    /// Provider binding for the shared record accessor.
    pub fn binding(&self) -> Option<Binding> {
        let field = self.field.as_ref()?;
        let mut binding = Binding::for_field(self.ordinal, self.retrieval.0, field, DBPARAMIO_NOTPARAM);
        binding.precision = self.precision;
        binding.scale = self.scale;
        Some(binding)
    }

    /// Binding for the private stream accessor of a long column.
    pub fn blob_binding(&self) -> Binding {
        let mut layout = BufferLayout::new();
        let field = layout.place(FieldSpec::variable(STREAM_SLOT_WIDTH));
        Binding::for_field(self.ordinal, DBTYPE_IUNKNOWN, &field, DBPARAMIO_NOTPARAM)
    }

    pub fn nullable(&self) -> bool {
        self.column_flags & (DBCOLUMNFLAGS_ISNULLABLE | DBCOLUMNFLAGS_MAYBENULL) != 0
    }

    /// Attach extended metadata and recompute the display name.
    pub fn apply_metadata(&mut self, metadata: Option<ColumnMetadata>) -> Result<()> {
        let plain = from_wide(&self.wide_name);
        self.aliased = metadata.as_ref().is_some_and(|m| m.is_aliased(&plain));
        self.metadata = metadata;
        self.refresh_name()
    }

    /// Display name: `catalog.table.column` per the table/catalog flags
    /// unless aliased, converted to the output charset.
    pub fn refresh_name(&mut self) -> Result<()> {
        let mut name = from_wide(&self.wide_name);
        if let (Some(meta), false) = (&self.metadata, self.aliased) {
            if self.flags.contains(Flags::ADD_TABLE) {
                if let Some(table) = &meta.base_table {
                    name = format!("{}.{}", table, name);
                }
            }
            if self.flags.contains(Flags::ADD_CATALOG) {
                if let Some(catalog) = &meta.base_catalog {
                    name = format!("{}.{}", catalog, name);
                }
            }
        }
        let units: Vec<u16> = name.encode_utf16().collect();
        self.name = Bytes::from(self.conv.from_wide(&units, Direction::UnicodeToOutput)?);
        Ok(())
    }

    /// User-facing description.
    pub fn describe(&self) -> Column {
        Column {
            name: self.name.clone(),
            nullable: self.nullable(),
            provider_type: self.provider_type,
            logical: self.logical,
            max_len: self.column_size,
            precision: self.precision,
            scale: self.scale,
        }
    }

    fn fetch_error(&self, message: String) -> Error {
        Error::Fetch(Diagnostic::new(HResult::E_FAIL, SQLSTATE_GENERAL, message))
    }

    /// Decode this column from a fetched record.
    ///
    /// `resolve` maps by-reference tokens to the bytes they stand for.
    pub fn decode(&self, record: &[u8], resolve: &dyn Fn(u64) -> Option<Bytes>) -> Result<Value> {
        let Some(field) = self.field.as_ref() else {
            return Err(self.fetch_error(format!(
                "Column {} is a long value and has no record slot",
                self.ordinal
            )));
        };
        let reader = RecordReader::new(record);
        let status = reader.status(field)?;
        match status {
            DBSTATUS_S_ISNULL => return Ok(Value::Null),
            DBSTATUS_S_OK | DBSTATUS_S_TRUNCATED => {}
            other => {
                return Err(self.fetch_error(format!(
                    "Column {} could not be retrieved (status {})",
                    self.ordinal, other
                )))
            }
        }

        let base = self.retrieval.base();
        let raw = self.raw_bytes(&reader, field, resolve)?;
        let value = match base {
            DBTYPE_STR => {
                let text = if self.has_exact_length() {
                    &raw[..]
                } else {
                    trim_at_nul(&raw, 1)
                };
                Value::Str(self.convert(text, Direction::NarrowToOutput)?)
            }
            DBTYPE_WSTR => {
                let text = if self.has_exact_length() {
                    &raw[..]
                } else {
                    trim_at_nul(&raw, 2)
                };
                let even = text.len() & !1;
                Value::Str(self.convert(&text[..even], Direction::UnicodeToOutput)?)
            }
            DBTYPE_BYTES => Value::Str(raw),
            DBTYPE_UI1 => {
                let byte = raw.first().copied().unwrap_or(0);
                if self.logical == LogicalType::Bool {
                    Value::Bool(byte != 0)
                } else {
                    Value::Long(byte as i64)
                }
            }
            DBTYPE_I4 => Value::Long(RecordReader::new(&raw).read_i32_le(0)? as i64),
            DBTYPE_UI4 => Value::Long(RecordReader::new(&raw).read_u32_le(0)? as i64),
            DBTYPE_R8 => {
                let number = RecordReader::new(&raw).read_f64_le(0)?;
                Value::Str(Bytes::from(number.to_string()))
            }
            DBTYPE_DBTIMESTAMP => {
                Value::Str(Bytes::from(format_timestamp(&decode_timestamp(&raw)?)))
            }
            DBTYPE_VARIANT => match variant_to_wide(&raw, resolve)? {
                Some(units) => Value::Str(Bytes::from(
                    self.conv.from_wide(&units, Direction::UnicodeToOutput)?,
                )),
                None => Value::Null,
            },
            other => {
                return Err(Error::type_conversion(format!(
                    "unsupported retrieval type {}",
                    ProviderType(other)
                )))
            }
        };
        Ok(value)
    }

    /// Text whose length slot is trusted; converted or fixed slots are cut
    /// at the terminator instead.
    fn has_exact_length(&self) -> bool {
        self.variable_length && self.retrieval.base() == self.provider_type.base()
    }

    fn raw_bytes(
        &self,
        reader: &RecordReader<'_>,
        field: &FieldLayout,
        resolve: &dyn Fn(u64) -> Option<Bytes>,
    ) -> Result<Bytes> {
        let len = reader.length(field)?;
        if self.retrieval.is_byref() {
            let offset = field.value.unwrap_or_default();
            let token = reader.read_u64_le(offset)?;
            let data = resolve(token).ok_or_else(|| {
                Error::type_conversion(format!("unresolved value reference {}", token))
            })?;
            return Ok(match len {
                Some(len) if len < data.len() => data.slice(..len),
                _ => data,
            });
        }
        let terminator = match self.retrieval.base() {
            DBTYPE_STR => 1,
            DBTYPE_WSTR => 2,
            _ => 0,
        };
        let capacity = field.width.saturating_sub(terminator);
        let take = match len {
            Some(len) => len.min(capacity),
            None if self.retrieval.base() == DBTYPE_BYTES => self.column_size.min(field.width),
            None => field.width,
        };
        Ok(Bytes::copy_from_slice(reader.value(field, take)?))
    }

    fn convert(&self, text: &[u8], direction: Direction) -> Result<Bytes> {
        Ok(Bytes::from(self.conv.convert(text, direction)?.into_owned()))
    }

    /// Converter that applies to a long value read through a stream.
    fn blob_direction(&self) -> Option<Direction> {
        match self.provider_type.base() {
            DBTYPE_WSTR | DBTYPE_BSTR => Some(Direction::UnicodeToOutput),
            DBTYPE_STR => Some(Direction::NarrowToOutput),
            _ => None,
        }
    }

    /// Turn a provider long cell into a value.
    ///
    /// Text columns are read fully; other long values stay streams that keep
    /// `keepalive` alive until closed.
    pub fn open_blob(&self, cell: BlobCell, keepalive: Rc<dyn Any>) -> Result<Value> {
        if cell.status == DBSTATUS_S_ISNULL {
            return Ok(Value::Null);
        }
        if cell.status != DBSTATUS_S_OK && cell.status != DBSTATUS_S_TRUNCATED {
            return Err(self.fetch_error(format!(
                "Long column {} could not be retrieved (status {})",
                self.ordinal, cell.status
            )));
        }
        let Some(stream) = cell.stream else {
            return Ok(Value::Null);
        };
        let converter = self
            .blob_direction()
            .and_then(|d| self.conv.converter(d).cloned());
        let mut blob = BlobStream::new(stream, cell.length, converter).with_keepalive(keepalive);
        if self.logical == LogicalType::Lob {
            return Ok(Value::Stream(ByteStream::Blob(blob)));
        }
        let mut out = Vec::with_capacity(cell.length);
        blob.read_to_end(&mut out)?;
        Ok(Value::Str(Bytes::from(out)))
    }
}

/// Clip at the first terminator of `width` bytes, if any.
fn trim_at_nul(data: &[u8], width: usize) -> &[u8] {
    let end = data
        .chunks_exact(width)
        .position(|unit| unit.iter().all(|b| *b == 0))
        .map(|idx| idx * width)
        .unwrap_or(data.len());
    &data[..end]
}
