//! Driver options and flag words.
//!
//! Options are set at connection, statement, column or parameter scope. Flag
//! options land in a [`Flags`] word; each scope accepts only the bits in its
//! mask. Charset options are handled by the conversion context.

use crate::charset::ConversionOption;
use crate::error::{Error, Result};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Bit set of boolean driver options.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(pub u32);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const STRING_AS_UNICODE: Flags = Flags(1 << 0);
    pub const TRUNCATE_STRINGS: Flags = Flags(1 << 4);
    pub const MULTIPLE_RESULTS: Flags = Flags(1 << 7);
    pub const INTEGRATED_AUTH: Flags = Flags(1 << 8);
    pub const CONNECTION_POOLING: Flags = Flags(1 << 9);
    pub const ENCRYPTION: Flags = Flags(1 << 10);
    pub const AUTO_TRANSLATE: Flags = Flags(1 << 11);
    pub const UNIQUE_ROWS: Flags = Flags(1 << 16);
    pub const ADD_TABLE: Flags = Flags(1 << 17);
    pub const ADD_CATALOG: Flags = Flags(1 << 18);
    pub const CONVERT_DATE_TIME: Flags = Flags(1 << 19);
    pub const SCROLLABLE: Flags = Flags(1 << 20);
    pub const SERVER_SIDE: Flags = Flags(1 << 21);

    /// Bits a connection accepts.
    pub const CONNECTION_MASK: Flags = Flags(
        Self::STRING_AS_UNICODE.0
            | Self::TRUNCATE_STRINGS.0
            | Self::INTEGRATED_AUTH.0
            | Self::CONNECTION_POOLING.0
            | Self::ENCRYPTION.0
            | Self::AUTO_TRANSLATE.0
            | Self::UNIQUE_ROWS.0
            | Self::ADD_TABLE.0
            | Self::ADD_CATALOG.0
            | Self::CONVERT_DATE_TIME.0
            | Self::SCROLLABLE.0
            | Self::SERVER_SIDE.0,
    );

    /// Bits a statement accepts.
    pub const STATEMENT_MASK: Flags = Flags(
        Self::STRING_AS_UNICODE.0
            | Self::TRUNCATE_STRINGS.0
            | Self::UNIQUE_ROWS.0
            | Self::ADD_TABLE.0
            | Self::ADD_CATALOG.0
            | Self::CONVERT_DATE_TIME.0
            | Self::SCROLLABLE.0
            | Self::SERVER_SIDE.0,
    );

    /// Bits a single column accepts.
    pub const COLUMN_MASK: Flags = Flags(Self::STRING_AS_UNICODE.0 | Self::CONVERT_DATE_TIME.0);

    /// Bits a single parameter accepts.
    pub const PARAM_MASK: Flags = Flags(Self::STRING_AS_UNICODE.0 | Self::TRUNCATE_STRINGS.0);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn set(&mut self, other: Flags, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Flags {
    type Output = Flags;

    fn bitand(self, rhs: Flags) -> Flags {
        Flags(self.0 & rhs.0)
    }
}

impl Not for Flags {
    type Output = Flags;

    fn not(self) -> Flags {
        Flags(!self.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#x})", self.0)
    }
}

/// Cursor requested for result sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorType {
    pub scrollable: bool,
    pub server_side: bool,
}

impl CursorType {
    const SCROLL_BIT: i64 = 1;
    const SERVER_SIDE_BIT: i64 = 0x8000_0000;

    pub const FORWARD_ONLY: CursorType = CursorType {
        scrollable: false,
        server_side: false,
    };

    pub const SCROLLABLE: CursorType = CursorType {
        scrollable: true,
        server_side: false,
    };

    /// Decode the integer form (`1` scrollable, `0x80000000` server side).
    pub fn from_bits(bits: i64) -> Self {
        Self {
            scrollable: bits & Self::SCROLL_BIT != 0,
            server_side: bits & Self::SERVER_SIDE_BIT != 0,
        }
    }

    pub fn bits(self) -> i64 {
        let mut bits = 0;
        if self.scrollable {
            bits |= Self::SCROLL_BIT;
        }
        if self.server_side {
            bits |= Self::SERVER_SIDE_BIT;
        }
        bits
    }

    fn flags(self) -> Flags {
        let mut flags = Flags::NONE;
        flags.set(Flags::SCROLLABLE, self.scrollable);
        flags.set(Flags::SERVER_SIDE, self.server_side);
        flags
    }
}

/// Driver options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Encoding,
    QueryEncoding,
    NarrowEncoding,
    ApplicationName,
    FetchTableNames,
    FetchCatalogNames,
    UnicodeStrings,
    ExtendedMetadata,
    ConvertDateTime,
    IntegratedAuth,
    ConnectionPooling,
    Encryption,
    AutoTranslate,
    TruncateStrings,
    CursorType,
    /// Connection timeout in seconds.
    Timeout,
    /// Read-only server version text.
    ServerVersion,
    /// Read-only provider version text.
    ClientVersion,
}

impl Attribute {
    /// Flag bit controlled by this attribute, if it is a boolean option.
    pub fn flag(self) -> Option<Flags> {
        let flag = match self {
            Attribute::FetchTableNames => Flags::ADD_TABLE,
            Attribute::FetchCatalogNames => Flags::ADD_CATALOG,
            Attribute::UnicodeStrings => Flags::STRING_AS_UNICODE,
            Attribute::ExtendedMetadata => Flags::UNIQUE_ROWS,
            Attribute::ConvertDateTime => Flags::CONVERT_DATE_TIME,
            Attribute::IntegratedAuth => Flags::INTEGRATED_AUTH,
            Attribute::ConnectionPooling => Flags::CONNECTION_POOLING,
            Attribute::Encryption => Flags::ENCRYPTION,
            Attribute::AutoTranslate => Flags::AUTO_TRANSLATE,
            Attribute::TruncateStrings => Flags::TRUNCATE_STRINGS,
            _ => return None,
        };
        Some(flag)
    }

    /// Conversion option controlled by this attribute.
    pub fn conversion_option(self) -> Option<ConversionOption> {
        match self {
            Attribute::Encoding => Some(ConversionOption::Encoding),
            Attribute::QueryEncoding => Some(ConversionOption::QueryEncoding),
            Attribute::NarrowEncoding => Some(ConversionOption::NarrowEncoding),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Encoding => "encoding",
            Attribute::QueryEncoding => "query-encoding",
            Attribute::NarrowEncoding => "narrow-encoding",
            Attribute::ApplicationName => "application-name",
            Attribute::FetchTableNames => "fetch-table-names",
            Attribute::FetchCatalogNames => "fetch-catalog-names",
            Attribute::UnicodeStrings => "unicode-strings",
            Attribute::ExtendedMetadata => "extended-metadata",
            Attribute::ConvertDateTime => "convert-datetime",
            Attribute::IntegratedAuth => "integrated-auth",
            Attribute::ConnectionPooling => "connection-pooling",
            Attribute::Encryption => "encryption",
            Attribute::AutoTranslate => "auto-translate",
            Attribute::TruncateStrings => "truncate-strings",
            Attribute::CursorType => "cursor-type",
            Attribute::Timeout => "timeout",
            Attribute::ServerVersion => "server-version",
            Attribute::ClientVersion => "client-version",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Option value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl AttrValue {
    /// Truth value: non-zero integers and `1`/`true`/`on`/`yes` text are true.
    pub fn as_bool(&self) -> bool {
        match self {
            AttrValue::Null => false,
            AttrValue::Bool(b) => *b,
            AttrValue::Int(i) => *i != 0,
            AttrValue::Str(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "on" | "yes"
            ),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Bool(b) => Some(*b as i64),
            AttrValue::Int(i) => Some(*i),
            AttrValue::Str(s) => s.trim().parse().ok(),
            AttrValue::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

impl From<CursorType> for AttrValue {
    fn from(v: CursorType) -> Self {
        AttrValue::Int(v.bits())
    }
}

/// Apply a flag option to `flags`, rejecting bits outside `mask`.
///
/// Returns `Ok(false)` when `attr` is not a flag option.
pub fn set_flag_attribute(
    flags: &mut Flags,
    mask: Flags,
    attr: Attribute,
    value: &AttrValue,
) -> Result<bool> {
    let (bits, on) = match attr {
        Attribute::CursorType => {
            let bits = value.as_int().ok_or_else(|| {
                Error::invalid_attribute(format!("{} expects an integer", attr))
            })?;
            let cursor = CursorType::from_bits(bits);
            let wanted = Flags::SCROLLABLE | Flags::SERVER_SIDE;
            if mask & wanted != wanted {
                return Err(Error::invalid_attribute(format!("{} not valid here", attr)));
            }
            flags.set(wanted, false);
            *flags |= cursor.flags();
            return Ok(true);
        }
        other => match other.flag() {
            Some(bits) => (bits, value.as_bool()),
            None => return Ok(false),
        },
    };
    if !mask.contains(bits) {
        return Err(Error::invalid_attribute(format!("{} not valid here", attr)));
    }
    flags.set(bits, on);
    Ok(true)
}

/// Read a flag option from `flags`.
pub fn get_flag_attribute(flags: Flags, attr: Attribute) -> Option<AttrValue> {
    match attr {
        Attribute::CursorType => Some(
            CursorType {
                scrollable: flags.contains(Flags::SCROLLABLE),
                server_side: flags.contains(Flags::SERVER_SIDE),
            }
            .into(),
        ),
        other => other.flag().map(|bits| AttrValue::Bool(flags.contains(bits))),
    }
}
