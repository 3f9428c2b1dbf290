//! Provider type codes and the logical types callers see.

use crate::protocol::constants::*;
use std::fmt;

/// Logical type of a column value or a parameter hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogicalType {
    Null,
    Bool,
    Int,
    #[default]
    String,
    /// Long value delivered as a stream.
    Lob,
}

/// A provider type code, possibly carrying the `DBTYPE_BYREF` modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderType(pub u16);

impl ProviderType {
    /// Type code without modifier bits.
    pub fn base(self) -> u16 {
        self.0 & !DBTYPE_BYREF
    }

    pub fn is_byref(self) -> bool {
        self.0 & DBTYPE_BYREF != 0
    }

    /// Types whose declared size bounds a variable amount of data.
    pub fn is_variable_width(self) -> bool {
        matches!(
            self.base(),
            DBTYPE_STR | DBTYPE_WSTR | DBTYPE_BYTES | DBTYPE_VARNUMERIC
        )
    }

    /// Server-side type name for column metadata, if the type has one.
    pub fn native_name(self, column_flags: u32) -> Option<&'static str> {
        let long = column_flags & DBCOLUMNFLAGS_ISLONG != 0;
        let fixed = column_flags & DBCOLUMNFLAGS_ISFIXEDLENGTH != 0;
        let name = match self.base() {
            DBTYPE_I2 => "smallint",
            DBTYPE_I4 => "int",
            DBTYPE_I8 => "bigint",
            DBTYPE_UI1 => "tinyint",
            DBTYPE_NUMERIC => "numeric",
            DBTYPE_R8 => "float",
            DBTYPE_R4 => "real",
            DBTYPE_DECIMAL => "decimal",
            DBTYPE_CY => "money",
            DBTYPE_WSTR if long => "ntext",
            DBTYPE_WSTR if fixed => "nchar",
            DBTYPE_WSTR => "nvarchar",
            DBTYPE_BOOL => "bit",
            DBTYPE_VARIANT => "sql_variant",
            DBTYPE_GUID => "uniqueidentifier",
            DBTYPE_BYTES if long => "image",
            DBTYPE_BYTES if fixed => "binary",
            DBTYPE_BYTES => "varbinary",
            DBTYPE_STR if long => "text",
            DBTYPE_STR if fixed => "char",
            DBTYPE_STR => "varchar",
            DBTYPE_DATE | DBTYPE_DBTIMESTAMP => "datetime",
            DBTYPE_XML => "xml",
            _ => return None,
        };
        Some(name)
    }

    fn code_name(self) -> Option<&'static str> {
        let name = match self.base() {
            DBTYPE_EMPTY => "DBTYPE_EMPTY",
            DBTYPE_NULL => "DBTYPE_NULL",
            DBTYPE_I2 => "DBTYPE_I2",
            DBTYPE_I4 => "DBTYPE_I4",
            DBTYPE_R4 => "DBTYPE_R4",
            DBTYPE_R8 => "DBTYPE_R8",
            DBTYPE_CY => "DBTYPE_CY",
            DBTYPE_DATE => "DBTYPE_DATE",
            DBTYPE_BSTR => "DBTYPE_BSTR",
            DBTYPE_BOOL => "DBTYPE_BOOL",
            DBTYPE_VARIANT => "DBTYPE_VARIANT",
            DBTYPE_IUNKNOWN => "DBTYPE_IUNKNOWN",
            DBTYPE_DECIMAL => "DBTYPE_DECIMAL",
            DBTYPE_I1 => "DBTYPE_I1",
            DBTYPE_UI1 => "DBTYPE_UI1",
            DBTYPE_UI2 => "DBTYPE_UI2",
            DBTYPE_UI4 => "DBTYPE_UI4",
            DBTYPE_I8 => "DBTYPE_I8",
            DBTYPE_UI8 => "DBTYPE_UI8",
            DBTYPE_GUID => "DBTYPE_GUID",
            DBTYPE_BYTES => "DBTYPE_BYTES",
            DBTYPE_STR => "DBTYPE_STR",
            DBTYPE_WSTR => "DBTYPE_WSTR",
            DBTYPE_NUMERIC => "DBTYPE_NUMERIC",
            DBTYPE_DBDATE => "DBTYPE_DBDATE",
            DBTYPE_DBTIME => "DBTYPE_DBTIME",
            DBTYPE_DBTIMESTAMP => "DBTYPE_DBTIMESTAMP",
            DBTYPE_VARNUMERIC => "DBTYPE_VARNUMERIC",
            DBTYPE_XML => "DBTYPE_XML",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code_name() {
            Some(name) => write!(f, "{}", name)?,
            None => write!(f, "DBTYPE({})", self.base())?,
        }
        if self.is_byref() {
            write!(f, "|BYREF")?;
        }
        Ok(())
    }
}

/// Type names passed to the provider when describing parameters.
pub mod param_type_names {
    pub const WVARCHAR: &str = "DBTYPE_WVARCHAR";
    pub const VARCHAR: &str = "DBTYPE_VARCHAR";
    pub const VARBINARY: &str = "DBTYPE_VARBINARY";
    pub const WLONGVARCHAR: &str = "DBTYPE_WLONGVARCHAR";
    pub const LONGVARCHAR: &str = "DBTYPE_LONGVARCHAR";
    pub const LONGVARBINARY: &str = "DBTYPE_LONGVARBINARY";
    pub const I4: &str = "DBTYPE_I4";
    pub const I8: &str = "DBTYPE_I8";
    pub const R8: &str = "DBTYPE_R8";
    pub const BOOL: &str = "DBTYPE_BOOL";
}
