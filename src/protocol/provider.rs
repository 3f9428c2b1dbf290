//! Data provider interfaces.
//!
//! The bridge talks to a provider only through these traits. Optional
//! capabilities are exposed as methods returning `Option<&mut dyn Trait>`;
//! callers query them once and cache the answer as a flag.

use crate::protocol::buffer::FieldLayout;
use crate::protocol::constants::{DBPART_LENGTH, DBPART_STATUS, DBPART_VALUE};
use crate::protocol::status::{HResult, ProviderResult};
use bytes::Bytes;
use std::io::SeekFrom;

/// UTF-16 text as providers exchange it.
pub type WideString = Vec<u16>;

/// Encode a Rust string as provider wide text.
pub fn wide(text: &str) -> WideString {
    text.encode_utf16().collect()
}

/// Decode provider wide text, replacing unpaired surrogates.
pub fn from_wide(text: &[u16]) -> String {
    String::from_utf16_lossy(text)
}

/// Handle to an accessor created on a rowset or command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessorHandle(pub u64);

/// Handle to a row held by a rowset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle(pub u64);

/// Column identifier used by metadata rowsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnId {
    /// Well known metadata column (`DBCOLUMN_*`).
    Property(u32),
    /// Column identified by name.
    Name(String),
}

/// One slot mapping between a record buffer and a column or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// 1-based column or parameter ordinal.
    pub ordinal: usize,
    /// Type the value is exchanged as, possibly with `DBTYPE_BYREF`.
    pub db_type: u16,
    /// `DBPART_*` bits present in the record.
    pub parts: u32,
    pub status_offset: usize,
    pub length_offset: usize,
    pub value_offset: usize,
    /// Capacity of the value slot.
    pub max_len: usize,
    /// `DBPARAMIO_*` direction for parameter bindings.
    pub param_io: u32,
    pub precision: u8,
    pub scale: u8,
}

impl Binding {
    /// Binding for a field placed by a [`crate::protocol::buffer::BufferLayout`].
    pub fn for_field(ordinal: usize, db_type: u16, field: &FieldLayout, param_io: u32) -> Self {
        let mut parts = DBPART_STATUS;
        if field.length.is_some() {
            parts |= DBPART_LENGTH;
        }
        if field.value.is_some() {
            parts |= DBPART_VALUE;
        }
        Self {
            ordinal,
            db_type,
            parts,
            status_offset: field.status,
            length_offset: field.length.unwrap_or_default(),
            value_offset: field.value.unwrap_or_default(),
            max_len: field.width,
            param_io,
            precision: 0,
            scale: 0,
        }
    }

    pub fn has_part(&self, part: u32) -> bool {
        self.parts & part != 0
    }
}

/// Provider description of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    pub id: ColumnId,
    pub name: Option<WideString>,
    /// 1-based ordinal; 0 is the bookmark column.
    pub ordinal: usize,
    pub db_type: u16,
    /// Maximum length in characters for text, bytes for binary.
    pub column_size: usize,
    pub precision: u8,
    pub scale: u8,
    /// `DBCOLUMNFLAGS_*` bits.
    pub flags: u32,
}

/// Provider description of a command parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    /// `DBPARAMFLAGS_*` bits.
    pub flags: u32,
    pub ordinal: usize,
    pub name: Option<WideString>,
    pub db_type: u16,
    pub param_size: usize,
    pub precision: u8,
    pub scale: u8,
}

/// Parameter description supplied to the provider before execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBindInfo {
    /// Provider type name, e.g. `DBTYPE_WVARCHAR`.
    pub type_name: &'static str,
    pub name: Option<WideString>,
    pub param_size: usize,
    /// `DBPARAMFLAGS_*` bits.
    pub flags: u32,
    pub precision: u8,
    pub scale: u8,
}

/// Property groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertySetId {
    DbInit,
    DataSourceInfo,
    Rowset,
    /// Provider specific initialization group.
    ProviderInit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    Empty,
    Bool(bool),
    I4(i32),
    Str(WideString),
}

impl PropValue {
    pub fn text(value: &str) -> Self {
        PropValue::Str(wide(value))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            PropValue::I4(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            PropValue::Str(s) => Some(from_wide(s)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropOption {
    Required,
    Optional,
}

/// Per-property outcome filled in by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropStatus {
    #[default]
    Ok,
    NotSupported,
    BadValue,
    NotSettable,
    Conflicting,
    NotSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: u32,
    pub value: PropValue,
    pub option: PropOption,
    pub status: PropStatus,
}

impl Property {
    pub fn required(id: u32, value: PropValue) -> Self {
        Self {
            id,
            value,
            option: PropOption::Required,
            status: PropStatus::Ok,
        }
    }

    pub fn optional(id: u32, value: PropValue) -> Self {
        Self {
            id,
            value,
            option: PropOption::Optional,
            status: PropStatus::Ok,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySet {
    pub set: PropertySetId,
    pub properties: Vec<Property>,
}

impl PropertySet {
    pub fn new(set: PropertySetId) -> Self {
        Self {
            set,
            properties: Vec::new(),
        }
    }

    pub fn push(&mut self, property: Property) {
        self.properties.push(property);
    }

    /// First required property the provider rejected.
    pub fn rejected_required(&self) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.option == PropOption::Required && p.status != PropStatus::Ok)
    }
}

/// Entry point for creating data source objects.
pub trait DataInitialize {
    /// Create an uninitialized data source for a named provider.
    fn create_instance(&self, provider: &str) -> ProviderResult<Box<dyn DataSource>>;

    /// Create a data source from a provider initialization string.
    fn data_source(&self, init_string: &[u16]) -> ProviderResult<Box<dyn DataSource>>;
}

pub trait DataSource {
    /// Apply properties, filling in each property's status.
    ///
    /// Returns `DB_S_ERRORSOCCURRED` when some optional properties failed.
    fn set_properties(&mut self, sets: &mut [PropertySet]) -> ProviderResult<HResult>;

    fn get_property(&self, set: PropertySetId, id: u32) -> Option<PropValue>;

    /// Whether the provider recognizes a property group.
    fn supports_property_set(&self, set: PropertySetId) -> bool {
        set != PropertySetId::ProviderInit
    }

    fn initialize(&mut self) -> ProviderResult<()>;

    fn create_session(&mut self) -> ProviderResult<Box<dyn Session>>;
}

pub trait Session {
    fn create_command(&mut self) -> ProviderResult<Box<dyn Command>>;

    /// Local transaction capability.
    fn transactions(&mut self) -> Option<&mut dyn TransactionLocal> {
        None
    }
}

pub trait TransactionLocal {
    fn start_transaction(&mut self) -> ProviderResult<()>;
    fn commit(&mut self) -> ProviderResult<()>;
    fn abort(&mut self) -> ProviderResult<()>;
}

/// What the caller wants back from execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteRequest {
    NoResult,
    Rowset,
    MultipleResults,
}

pub enum ExecuteResult {
    None,
    Rowset(Box<dyn Rowset>),
    Multiple(Box<dyn MultipleResults>),
}

pub struct ExecuteOutcome {
    /// Success code; `DB_S_ERRORSOCCURRED` marks partial failure.
    pub status: HResult,
    pub rows_affected: Option<u64>,
    pub result: ExecuteResult,
}

/// Parameter data handed to execute.
pub struct ParamData<'a> {
    pub accessor: AccessorHandle,
    pub buffer: &'a mut [u8],
    /// Stream objects referenced by `DBTYPE_IUNKNOWN` slots, which hold an
    /// index into this table. Providers take input streams and place output
    /// streams here.
    pub streams: &'a mut Vec<Option<Box<dyn SequentialStream>>>,
}

pub trait Command {
    fn set_command_text(&mut self, text: &[u16]) -> ProviderResult<()>;

    /// Parameter marker capability.
    fn parameters(&mut self) -> Option<&mut dyn CommandWithParameters> {
        None
    }

    /// Explicit prepare capability.
    fn preparer(&mut self) -> Option<&mut dyn CommandPrepare> {
        None
    }

    /// Rowset property capability.
    fn properties(&mut self) -> Option<&mut dyn CommandProperties> {
        None
    }

    fn execute(
        &mut self,
        request: ExecuteRequest,
        params: Option<ParamData<'_>>,
    ) -> ProviderResult<ExecuteOutcome>;
}

pub trait CommandWithParameters {
    fn parameter_info(&mut self) -> ProviderResult<Vec<ParamInfo>>;

    fn set_parameter_info(
        &mut self,
        ordinals: &[usize],
        info: &[ParamBindInfo],
    ) -> ProviderResult<()>;

    fn create_accessor(&mut self, bindings: &[Binding], row_size: usize) -> ProviderResult<AccessorHandle>;

    fn release_accessor(&mut self, accessor: AccessorHandle);
}

pub trait CommandPrepare {
    fn prepare(&mut self) -> ProviderResult<()>;
}

pub trait CommandProperties {
    /// Apply rowset properties, filling in each property's status.
    fn set_properties(&mut self, sets: &mut [PropertySet]) -> ProviderResult<HResult>;
}

/// Member of a multiple-results sequence.
pub struct ResultMember {
    pub rows_affected: Option<u64>,
    pub rowset: Option<Box<dyn Rowset>>,
}

pub trait MultipleResults {
    /// Next result, `None` once the sequence is exhausted.
    fn next_result(&mut self) -> ProviderResult<Option<ResultMember>>;
}

/// Long value retrieved through a stream accessor.
pub struct BlobCell {
    /// `DBSTATUS_*` of the value.
    pub status: u32,
    /// Declared length, 0 when unknown.
    pub length: usize,
    pub stream: Option<Box<dyn SequentialStream>>,
}

pub trait Rowset {
    fn column_info(&self) -> ProviderResult<Vec<ColumnDesc>>;

    fn create_accessor(&mut self, bindings: &[Binding], row_size: usize) -> ProviderResult<AccessorHandle>;

    fn release_accessor(&mut self, accessor: AccessorHandle);

    /// Move the next-fetch position by `skip` rows, then fetch `|count|` rows
    /// forward (`count > 0`) or backward (`count < 0`).
    ///
    /// The position ends just past the last row fetched in the direction of
    /// travel. Returns no handles at either end of the rowset.
    fn get_next_rows(&mut self, skip: i64, count: i64) -> ProviderResult<Vec<RowHandle>>;

    fn release_rows(&mut self, rows: &[RowHandle]);

    /// Move the next-fetch position before the first row.
    fn restart_position(&mut self) -> ProviderResult<()>;

    /// Fill `buffer` for `row` through a row accessor.
    fn get_data(&mut self, row: RowHandle, accessor: AccessorHandle, buffer: &mut [u8]) -> ProviderResult<()>;

    /// Open the long value bound by a single-column stream accessor.
    fn get_blob(&mut self, row: RowHandle, accessor: AccessorHandle) -> ProviderResult<BlobCell>;

    /// Bytes behind a reference token written into a by-reference slot.
    fn resolve_ref(&self, token: u64) -> Option<Bytes>;

    /// Extended column metadata capability.
    fn columns_rowset(&mut self) -> Option<ProviderResult<Box<dyn Rowset>>> {
        None
    }
}

/// Forward-only byte source.
pub trait SequentialStream {
    /// Read up to `buf.len()` bytes; `Ok(0)` marks the end.
    fn read(&mut self, buf: &mut [u8]) -> ProviderResult<usize>;

    /// Seek capability.
    fn seekable(&mut self) -> Option<&mut dyn SeekableStream> {
        None
    }
}

pub trait SeekableStream {
    fn seek(&mut self, pos: SeekFrom) -> ProviderResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_round_trip() {
        let text = "Grüße";
        assert_eq!(from_wide(&wide(text)), text);
    }

    #[test]
    fn test_binding_parts_follow_field() {
        let mut layout = crate::protocol::buffer::BufferLayout::new();
        let null = layout.place(crate::protocol::buffer::FieldSpec::status_only());
        let text = layout.place(crate::protocol::buffer::FieldSpec::variable(10));
        let b = Binding::for_field(1, 130, &null, 0);
        assert_eq!(b.parts, DBPART_STATUS);
        let b = Binding::for_field(2, 130, &text, 0);
        assert!(b.has_part(DBPART_LENGTH) && b.has_part(DBPART_VALUE));
        assert_eq!((b.status_offset, b.length_offset, b.value_offset), (4, 8, 16));
        assert_eq!(b.max_len, 10);
    }

    #[test]
    fn test_rejected_required() {
        let mut set = PropertySet::new(PropertySetId::DbInit);
        set.push(Property::optional(1, PropValue::I4(30)));
        set.push(Property::required(2, PropValue::text("db")));
        assert!(set.rejected_required().is_none());
        set.properties[0].status = PropStatus::NotSupported;
        assert!(set.rejected_required().is_none());
        set.properties[1].status = PropStatus::BadValue;
        assert_eq!(set.rejected_required().map(|p| p.id), Some(2));
    }

    #[test]
    fn test_prop_value_accessors() {
        assert_eq!(PropValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PropValue::I4(5).as_i32(), Some(5));
        assert_eq!(PropValue::text("x").as_string().as_deref(), Some("x"));
        assert_eq!(PropValue::Empty.as_string(), None);
    }
}
