//! Provider status codes and provider-side error records.

use std::fmt;

/// A provider status code.
///
/// Negative values are failures; zero and positive values are successes,
/// some of which (like [`HResult::S_FALSE`]) carry extra meaning.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HResult(pub i32);

macro_rules! hresults {
    ($($name:ident = $value:expr;)*) => {
        impl HResult {
            $(pub const $name: HResult = HResult({
                let raw: u32 = $value;
                raw as i32
            });)*
        }
    };
}

hresults! {
    S_OK = 0x0000_0000;
    S_FALSE = 0x0000_0001;
    E_NOTIMPL = 0x8000_4001;
    E_NOINTERFACE = 0x8000_4002;
    E_POINTER = 0x8000_4003;
    E_FAIL = 0x8000_4005;
    E_UNEXPECTED = 0x8000_FFFF;
    E_OUTOFMEMORY = 0x8007_000E;
    E_INVALIDARG = 0x8007_0057;
    DB_S_ENDOFROWSET = 0x0004_0EC6;
    DB_S_NORESULT = 0x0004_0EC9;
    DB_S_ERRORSOCCURRED = 0x0004_0EDA;
    DB_E_BADACCESSORHANDLE = 0x8004_0E00;
    DB_E_ROWLIMITEXCEEDED = 0x8004_0E01;
    DB_E_READONLYACCESSOR = 0x8004_0E02;
    DB_E_SCHEMAVIOLATION = 0x8004_0E03;
    DB_E_BADROWHANDLE = 0x8004_0E04;
    DB_E_OBJECTOPEN = 0x8004_0E05;
    DB_E_BADCHAPTER = 0x8004_0E06;
    DB_E_CANTCONVERTVALUE = 0x8004_0E07;
    DB_E_BADBINDINFO = 0x8004_0E08;
    DB_SEC_E_PERMISSIONDENIED = 0x8004_0E09;
    DB_E_NOTAREFERENCECOLUMN = 0x8004_0E0A;
    DB_E_LIMITREJECTED = 0x8004_0E0B;
    DB_E_NOCOMMAND = 0x8004_0E0C;
    DB_E_COSTLIMIT = 0x8004_0E0D;
    DB_E_BADBOOKMARK = 0x8004_0E0E;
    DB_E_BADLOCKMODE = 0x8004_0E0F;
    DB_E_PARAMNOTOPTIONAL = 0x8004_0E10;
    DB_E_BADCOLUMNID = 0x8004_0E11;
    DB_E_BADRATIO = 0x8004_0E12;
    DB_E_BADVALUES = 0x8004_0E13;
    DB_E_ERRORSINCOMMAND = 0x8004_0E14;
    DB_E_CANTCANCEL = 0x8004_0E15;
    DB_E_DIALECTNOTSUPPORTED = 0x8004_0E16;
    DB_E_DUPLICATEDATASOURCE = 0x8004_0E17;
    DB_E_CANNOTRESTART = 0x8004_0E18;
    DB_E_NOTFOUND = 0x8004_0E19;
    DB_E_CANNOTFREE = 0x8004_0E1A;
    DB_E_NEWLYINSERTED = 0x8004_0E1B;
    DB_E_GOALREJECTED = 0x8004_0E1C;
    DB_E_UNSUPPORTEDCONVERSION = 0x8004_0E1D;
    DB_E_BADSTARTPOSITION = 0x8004_0E1E;
    DB_E_NOQUERY = 0x8004_0E1F;
    DB_E_NOTREENTRANT = 0x8004_0E20;
    DB_E_ERRORSOCCURRED = 0x8004_0E21;
    DB_E_NOAGGREGATION = 0x8004_0E22;
    DB_E_DELETEDROW = 0x8004_0E23;
    DB_E_CANTFETCHBACKWARDS = 0x8004_0E24;
    DB_E_ROWSNOTRELEASED = 0x8004_0E25;
    DB_E_BADSTORAGEFLAG = 0x8004_0E26;
    DB_E_BADCOMPAREOP = 0x8004_0E27;
    DB_E_BADSTATUSVALUE = 0x8004_0E28;
    DB_E_CANTSCROLLBACKWARDS = 0x8004_0E29;
    DB_E_NOTABLE = 0x8004_0E37;
    DB_SEC_E_AUTH_FAILED = 0x8004_0E4D;
    DB_E_CANCELED = 0x8004_0E4E;
    DB_E_NOTSUPPORTED = 0x8004_0E53;
}

/// Facility carried by status codes wrapping a platform error number.
pub const FACILITY_WIN32: u32 = 7;

impl HResult {
    /// Check if the status denotes success (including informational codes).
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// Check if the status denotes failure.
    pub fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Facility field of the status code.
    pub fn facility(self) -> u32 {
        ((self.0 as u32) >> 16) & 0x1FFF
    }

    /// Low 16 bits of the status code.
    pub fn code(self) -> u32 {
        (self.0 as u32) & 0xFFFF
    }

    /// Collapse composite "multiple-step errors" codes into a generic failure.
    pub fn normalized(self) -> HResult {
        if self == HResult::DB_S_ERRORSOCCURRED || self == HResult::DB_E_ERRORSOCCURRED {
            HResult::E_FAIL
        } else {
            self
        }
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult({:#010X})", self.0 as u32)
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0 as u32)
    }
}

/// One diagnostic record attached by the provider to a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorRecord {
    /// Human readable description.
    pub description: String,
    /// SQL state reported by the provider, if any.
    pub sql_state: Option<String>,
    /// Provider native error number.
    pub native_error: i32,
}

impl ErrorRecord {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            sql_state: None,
            native_error: 0,
        }
    }

    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    pub fn with_native_error(mut self, native: i32) -> Self {
        self.native_error = native;
        self
    }
}

/// Error returned by a provider call: a failure status plus any records the
/// provider attached to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("provider call failed with status {status}")]
pub struct ProviderError {
    pub status: HResult,
    pub records: Vec<ErrorRecord>,
}

impl ProviderError {
    /// Create an error carrying only a status code.
    pub fn new(status: HResult) -> Self {
        Self {
            status,
            records: Vec::new(),
        }
    }

    /// Attach a diagnostic record.
    pub fn with_record(mut self, record: ErrorRecord) -> Self {
        self.records.push(record);
        self
    }
}

impl From<HResult> for ProviderError {
    fn from(status: HResult) -> Self {
        Self::new(status)
    }
}

/// Result type returned by provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_failure() {
        assert!(HResult::S_OK.is_success());
        assert!(HResult::S_FALSE.is_success());
        assert!(HResult::DB_S_ERRORSOCCURRED.is_success());
        assert!(HResult::E_FAIL.is_failure());
        assert!(HResult::DB_E_NOTSUPPORTED.is_failure());
    }

    #[test]
    fn test_normalized_composite_errors() {
        assert_eq!(HResult::DB_S_ERRORSOCCURRED.normalized(), HResult::E_FAIL);
        assert_eq!(HResult::DB_E_ERRORSOCCURRED.normalized(), HResult::E_FAIL);
        assert_eq!(HResult::E_NOTIMPL.normalized(), HResult::E_NOTIMPL);
    }

    #[test]
    fn test_facility_and_display() {
        assert_eq!(HResult::E_INVALIDARG.facility(), FACILITY_WIN32);
        assert_eq!(HResult::E_INVALIDARG.code(), 0x57);
        assert_eq!(HResult::E_FAIL.to_string(), "0x80004005");
    }
}
