//! Extended column metadata.
//!
//! Providers publish base table, catalog and key information through a
//! secondary "columns rowset": one row per result column, one column per
//! well known `DBCOLUMN_*` property. It is read once per execution.

use crate::diagnostics::render;
use crate::error::{Diagnostic, Error, Result};
use crate::protocol::buffer::{BufferLayout, FieldLayout, FieldSpec, RecordReader};
use crate::protocol::constants::*;
use crate::protocol::provider::{Binding, ColumnId, Rowset};
use crate::protocol::status::ProviderError;
use super::provider_type::ProviderType;
use bytes::Bytes;

/// Text slots are bound with this many UTF-16 units.
const NAME_UNITS: usize = 256;

/// Extended metadata for one result column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Ordinal the metadata row describes, when the provider reports it.
    pub number: Option<usize>,
    pub name: Option<String>,
    pub base_column: Option<String>,
    pub base_table: Option<String>,
    pub base_catalog: Option<String>,
    pub default_value: Option<String>,
    pub compute_mode: Option<i32>,
    pub key: bool,
    pub unique: bool,
    pub auto_increment: bool,
}

impl ColumnMetadata {
    /// Whether the result name differs from the underlying column name.
    pub fn is_aliased(&self, display_name: &str) -> bool {
        match &self.base_column {
            Some(base) => base != display_name,
            None => false,
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(
            self.compute_mode,
            Some(DBCOMPUTEMODE_COMPUTED) | Some(DBCOMPUTEMODE_DYNAMIC)
        )
    }
}

/// Native description of a column, as reported by `column_meta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Display name, encoded in the output charset.
    pub name: Bytes,
    pub provider_type: ProviderType,
    /// Server-side type name, e.g. `nvarchar`.
    pub native_type: Option<&'static str>,
    pub max_len: usize,
    pub precision: u8,
    pub scale: u8,
    /// Any of `not_null`, `blob`, `primary_key`, `unique_key`,
    /// `auto_increment`, `computed`.
    pub flags: Vec<&'static str>,
    pub table: Option<String>,
    pub catalog: Option<String>,
    pub default_value: Option<String>,
}

impl ColumnMeta {
    pub fn new(
        name: Bytes,
        provider_type: ProviderType,
        column_flags: u32,
        max_len: usize,
        precision: u8,
        scale: u8,
        extended: Option<&ColumnMetadata>,
    ) -> Self {
        let mut flags = Vec::new();
        if column_flags & (DBCOLUMNFLAGS_ISNULLABLE | DBCOLUMNFLAGS_MAYBENULL) == 0 {
            flags.push("not_null");
        }
        if column_flags & DBCOLUMNFLAGS_ISLONG != 0 {
            flags.push("blob");
        }
        if let Some(meta) = extended {
            if meta.key {
                flags.push("primary_key");
            }
            if meta.unique {
                flags.push("unique_key");
            }
            if meta.auto_increment {
                flags.push("auto_increment");
            }
            if meta.is_computed() {
                flags.push("computed");
            }
        }
        Self {
            name,
            provider_type,
            native_type: provider_type.native_name(column_flags),
            max_len,
            precision,
            scale,
            flags,
            table: extended.and_then(|m| m.base_table.clone()),
            catalog: extended.and_then(|m| m.base_catalog.clone()),
            default_value: extended.and_then(|m| m.default_value.clone()),
        }
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Text,
    Int,
    Flag,
}

/// Metadata properties read from the columns rowset.
const WANTED: [(u32, Slot); 10] = [
    (DBCOLUMN_NUMBER, Slot::Int),
    (DBCOLUMN_NAME, Slot::Text),
    (DBCOLUMN_BASECOLUMNNAME, Slot::Text),
    (DBCOLUMN_BASETABLENAME, Slot::Text),
    (DBCOLUMN_BASECATALOGNAME, Slot::Text),
    (DBCOLUMN_DEFAULTVALUE, Slot::Text),
    (DBCOLUMN_COMPUTEMODE, Slot::Int),
    (DBCOLUMN_KEYCOLUMN, Slot::Flag),
    (DBCOLUMN_ISUNIQUE, Slot::Flag),
    (DBCOLUMN_ISAUTOINCREMENT, Slot::Flag),
];

fn metadata_error(err: &ProviderError) -> Error {
    let (sql_state, message) = render(err.status, &err.records);
    Error::Metadata(Diagnostic::new(err.status.normalized(), sql_state, message))
}

/// Read every row of a columns rowset.
pub fn read_columns_rowset(rowset: &mut dyn Rowset) -> Result<Vec<ColumnMetadata>> {
    let descs = rowset.column_info().map_err(|e| metadata_error(&e))?;

    let mut layout = BufferLayout::new();
    let mut bound: Vec<(u32, Slot, FieldLayout)> = Vec::new();
    let mut bindings = Vec::new();
    for (id, slot) in WANTED {
        let Some(desc) = descs.iter().find(|d| d.id == ColumnId::Property(id)) else {
            continue;
        };
        let (db_type, spec) = match slot {
            Slot::Text => (DBTYPE_WSTR, FieldSpec::variable((NAME_UNITS + 1) * 2)),
            Slot::Int => (DBTYPE_I4, FieldSpec::fixed(4)),
            Slot::Flag => (DBTYPE_BOOL, FieldSpec::fixed(2)),
        };
        let field = layout.place(spec);
        bindings.push(Binding::for_field(desc.ordinal, db_type, &field, DBPARAMIO_NOTPARAM));
        bound.push((id, slot, field));
    }
    if bindings.is_empty() {
        return Ok(Vec::new());
    }

    let accessor = rowset
        .create_accessor(&bindings, layout.total_size())
        .map_err(|e| metadata_error(&e))?;
    let mut record = layout.allocate();
    let mut rows = Vec::new();
    let outcome = loop {
        let handles = match rowset.get_next_rows(0, 1) {
            Ok(handles) => handles,
            Err(e) => break Err(metadata_error(&e)),
        };
        let Some(&row) = handles.first() else {
            break Ok(());
        };
        record.fill(0);
        let fetched = rowset.get_data(row, accessor, &mut record);
        rowset.release_rows(&handles);
        if let Err(e) = fetched {
            break Err(metadata_error(&e));
        }
        match decode_row(&record, &bound) {
            Ok(meta) => rows.push(meta),
            Err(e) => break Err(e),
        }
    };
    rowset.release_accessor(accessor);
    outcome.map(|_| rows)
}

fn decode_row(record: &[u8], bound: &[(u32, Slot, FieldLayout)]) -> Result<ColumnMetadata> {
    let reader = RecordReader::new(record);
    let mut meta = ColumnMetadata::default();
    for (id, slot, field) in bound {
        if reader.status(field)? != DBSTATUS_S_OK {
            continue;
        }
        let offset = field.value.unwrap_or_default();
        match slot {
            Slot::Text => {
                let len = reader.length(field)?.unwrap_or(0);
                let bytes = reader.value(field, len)?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                let text = Some(String::from_utf16_lossy(&units));
                match *id {
                    DBCOLUMN_NAME => meta.name = text,
                    DBCOLUMN_BASECOLUMNNAME => meta.base_column = text,
                    DBCOLUMN_BASETABLENAME => meta.base_table = text,
                    DBCOLUMN_BASECATALOGNAME => meta.base_catalog = text,
                    DBCOLUMN_DEFAULTVALUE => meta.default_value = text,
                    _ => {}
                }
            }
            Slot::Int => {
                let value = reader.read_i32_le(offset)?;
                match *id {
                    DBCOLUMN_NUMBER => meta.number = usize::try_from(value).ok(),
                    DBCOLUMN_COMPUTEMODE => meta.compute_mode = Some(value),
                    _ => {}
                }
            }
            Slot::Flag => {
                let on = reader.read_i16_le(offset)? != 0;
                match *id {
                    DBCOLUMN_KEYCOLUMN => meta.key = on,
                    DBCOLUMN_ISUNIQUE => meta.unique = on,
                    DBCOLUMN_ISAUTOINCREMENT => meta.auto_increment = on,
                    _ => {}
                }
            }
        }
    }
    Ok(meta)
}

/// Pick the metadata row for a 1-based column ordinal: by reported number,
/// else by position.
pub fn match_column(rows: &[ColumnMetadata], ordinal: usize) -> Option<&ColumnMetadata> {
    rows.iter()
        .find(|m| m.number == Some(ordinal))
        .or_else(|| {
            rows.get(ordinal.checked_sub(1)?)
                .filter(|m| m.number.is_none())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliasing() {
        let meta = ColumnMetadata {
            base_column: Some("id".into()),
            ..Default::default()
        };
        assert!(!meta.is_aliased("id"));
        assert!(meta.is_aliased("user_id"));
        assert!(!ColumnMetadata::default().is_aliased("x"));
    }

    #[test]
    fn test_match_column_by_number_then_position() {
        let rows = vec![
            ColumnMetadata {
                number: Some(2),
                name: Some("b".into()),
                ..Default::default()
            },
            ColumnMetadata {
                number: Some(1),
                name: Some("a".into()),
                ..Default::default()
            },
        ];
        assert_eq!(match_column(&rows, 1).unwrap().name.as_deref(), Some("a"));
        assert_eq!(match_column(&rows, 2).unwrap().name.as_deref(), Some("b"));
        assert!(match_column(&rows, 3).is_none());

        let unnumbered = vec![ColumnMetadata::default(), ColumnMetadata::default()];
        assert!(match_column(&unnumbered, 2).is_some());
        assert!(match_column(&unnumbered, 0).is_none());
    }

    #[test]
    fn test_column_meta_flags() {
        let extended = ColumnMetadata {
            key: true,
            auto_increment: true,
            compute_mode: Some(DBCOMPUTEMODE_NOTCOMPUTED),
            base_table: Some("users".into()),
            ..Default::default()
        };
        let meta = ColumnMeta::new(
            "id".into(),
            ProviderType(DBTYPE_I4),
            DBCOLUMNFLAGS_ISFIXEDLENGTH,
            4,
            10,
            0,
            Some(&extended),
        );
        assert_eq!(meta.native_type, Some("int"));
        assert_eq!(meta.flags, vec!["not_null", "primary_key", "auto_increment"]);
        assert_eq!(meta.table.as_deref(), Some("users"));

        let blob = ColumnMeta::new(
            "body".into(),
            ProviderType(DBTYPE_WSTR),
            DBCOLUMNFLAGS_ISLONG | DBCOLUMNFLAGS_ISNULLABLE,
            0,
            0,
            0,
            None,
        );
        assert_eq!(blob.native_type, Some("ntext"));
        assert_eq!(blob.flags, vec!["blob"]);
    }
}
