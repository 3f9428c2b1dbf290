//! Data provider protocol constants.
//!
//! Type codes, binding parts, status words and property identifiers shared by
//! the binding engine and provider implementations.

// Provider type codes
pub const DBTYPE_EMPTY: u16 = 0;
pub const DBTYPE_NULL: u16 = 1;
pub const DBTYPE_I2: u16 = 2;
pub const DBTYPE_I4: u16 = 3;
pub const DBTYPE_R4: u16 = 4;
pub const DBTYPE_R8: u16 = 5;
pub const DBTYPE_CY: u16 = 6;
pub const DBTYPE_DATE: u16 = 7;
pub const DBTYPE_BSTR: u16 = 8;
pub const DBTYPE_ERROR: u16 = 10;
pub const DBTYPE_BOOL: u16 = 11;
pub const DBTYPE_VARIANT: u16 = 12;
pub const DBTYPE_IUNKNOWN: u16 = 13;
pub const DBTYPE_DECIMAL: u16 = 14;
pub const DBTYPE_I1: u16 = 16;
pub const DBTYPE_UI1: u16 = 17;
pub const DBTYPE_UI2: u16 = 18;
pub const DBTYPE_UI4: u16 = 19;
pub const DBTYPE_I8: u16 = 20;
pub const DBTYPE_UI8: u16 = 21;
pub const DBTYPE_GUID: u16 = 72;
pub const DBTYPE_BYTES: u16 = 128;
pub const DBTYPE_STR: u16 = 129;
pub const DBTYPE_WSTR: u16 = 130;
pub const DBTYPE_NUMERIC: u16 = 131;
pub const DBTYPE_DBDATE: u16 = 133;
pub const DBTYPE_DBTIME: u16 = 134;
pub const DBTYPE_DBTIMESTAMP: u16 = 135;
pub const DBTYPE_VARNUMERIC: u16 = 139;
pub const DBTYPE_XML: u16 = 141;

/// Modifier bit: the slot holds a reference token instead of inline data.
pub const DBTYPE_BYREF: u16 = 0x4000;

// Column flags reported in column descriptors
pub const DBCOLUMNFLAGS_ISBOOKMARK: u32 = 0x0001;
pub const DBCOLUMNFLAGS_MAYDEFER: u32 = 0x0002;
pub const DBCOLUMNFLAGS_WRITE: u32 = 0x0004;
pub const DBCOLUMNFLAGS_ISFIXEDLENGTH: u32 = 0x0010;
pub const DBCOLUMNFLAGS_ISNULLABLE: u32 = 0x0020;
pub const DBCOLUMNFLAGS_MAYBENULL: u32 = 0x0040;
pub const DBCOLUMNFLAGS_ISLONG: u32 = 0x0080;
pub const DBCOLUMNFLAGS_ISROWID: u32 = 0x0100;
pub const DBCOLUMNFLAGS_ISROWVER: u32 = 0x0200;

// Binding parts
pub const DBPART_VALUE: u32 = 0x1;
pub const DBPART_LENGTH: u32 = 0x2;
pub const DBPART_STATUS: u32 = 0x4;

// Parameter direction in bindings
pub const DBPARAMIO_NOTPARAM: u32 = 0;
pub const DBPARAMIO_INPUT: u32 = 0x1;
pub const DBPARAMIO_OUTPUT: u32 = 0x2;

// Parameter flags reported by the provider
pub const DBPARAMFLAGS_ISINPUT: u32 = 0x001;
pub const DBPARAMFLAGS_ISOUTPUT: u32 = 0x002;
pub const DBPARAMFLAGS_ISSIGNED: u32 = 0x010;
pub const DBPARAMFLAGS_ISNULLABLE: u32 = 0x040;
pub const DBPARAMFLAGS_ISLONG: u32 = 0x080;

// Per-field status words
pub const DBSTATUS_S_OK: u32 = 0;
pub const DBSTATUS_E_BADACCESSOR: u32 = 1;
pub const DBSTATUS_E_CANTCONVERTVALUE: u32 = 2;
pub const DBSTATUS_S_ISNULL: u32 = 3;
pub const DBSTATUS_S_TRUNCATED: u32 = 4;
pub const DBSTATUS_E_UNAVAILABLE: u32 = 8;
pub const DBSTATUS_S_DEFAULT: u32 = 13;

// Slot widths inside packed records
pub const STATUS_WIDTH: usize = 4;
pub const LENGTH_WIDTH: usize = 8;
pub const REF_WIDTH: usize = 8;
pub const STREAM_SLOT_WIDTH: usize = 8;
pub const TIMESTAMP_WIDTH: usize = 16;
pub const VARIANT_WIDTH: usize = 16;
pub const RECORD_ALIGN: usize = 4;

/// Width reported to the provider for streamed (unbounded) parameters.
pub const UNBOUNDED_WIDTH: usize = usize::MAX;

/// Inline input text longer than this is streamed to the provider.
pub const LONG_VALUE_THRESHOLD: usize = 8000;

/// Staging buffer used by converting blob streams.
pub const STREAM_STAGING_SIZE: usize = 1024;

// Variant tags
pub const VT_EMPTY: u16 = 0;
pub const VT_NULL: u16 = 1;
pub const VT_I2: u16 = 2;
pub const VT_I4: u16 = 3;
pub const VT_R4: u16 = 4;
pub const VT_R8: u16 = 5;
pub const VT_CY: u16 = 6;
pub const VT_DATE: u16 = 7;
pub const VT_BSTR: u16 = 8;
pub const VT_BOOL: u16 = 11;
pub const VT_I1: u16 = 16;
pub const VT_UI1: u16 = 17;
pub const VT_UI2: u16 = 18;
pub const VT_UI4: u16 = 19;
pub const VT_I8: u16 = 20;
pub const VT_UI8: u16 = 21;

// Initialization properties
pub const DBPROP_AUTH_CACHE_AUTHINFO: u32 = 0x05;
pub const DBPROP_AUTH_ENCRYPT_PASSWORD: u32 = 0x06;
pub const DBPROP_AUTH_INTEGRATED: u32 = 0x07;
pub const DBPROP_AUTH_PASSWORD: u32 = 0x09;
pub const DBPROP_AUTH_PERSIST_SENSITIVE_AUTHINFO: u32 = 0x0B;
pub const DBPROP_AUTH_USERID: u32 = 0x0C;
pub const DBPROP_INIT_DATASOURCE: u32 = 0x3B;
pub const DBPROP_INIT_TIMEOUT: u32 = 0x42;
pub const DBPROP_INIT_CATALOG: u32 = 0xE9;
pub const DBPROP_INIT_OLEDBSERVICES: u32 = 0xF8;

// Data source information properties
pub const DBPROP_DBMSNAME: u32 = 0x28;
pub const DBPROP_DBMSVER: u32 = 0x29;
pub const DBPROP_PROVIDERVER: u32 = 0x2F;
pub const DBPROP_MULTIPLERESULTS: u32 = 0xC4;
pub const DBPROP_PROVIDERFRIENDLYNAME: u32 = 0x235;

// Rowset properties
pub const DBPROP_CANFETCHBACKWARDS: u32 = 0x12;
pub const DBPROP_CANSCROLLBACKWARDS: u32 = 0x15;
pub const DBPROP_SERVERCURSOR: u32 = 0xE4;
pub const DBPROP_UNIQUEROWS: u32 = 0xEE;

// Provider specific initialization properties
pub const SSPROP_INIT_AUTOTRANSLATE: u32 = 8;
pub const SSPROP_INIT_APPNAME: u32 = 10;
pub const SSPROP_INIT_ENCRYPT: u32 = 13;

pub const DBPROPVAL_MR_NOTSUPPORTED: i32 = 0;
pub const DBPROPVAL_MR_SUPPORTED: i32 = 1;
pub const DBPROPVAL_MR_CONCURRENT: i32 = 2;

pub const DBPROPVAL_OS_ENABLEALL: i32 = -1;
pub const DBPROPVAL_OS_RESOURCEPOOLING: i32 = 0x1;

/// Value the integrated-authentication property takes when enabled.
pub const INTEGRATED_AUTH_SSPI: &str = "SSPI";

/// Provider created directly by the `mssql` connection factory.
pub const MSSQL_PROVIDER: &str = "SQLOLEDB";

/// Display charset used when none is configured.
pub const DEFAULT_CHARSET: &str = "windows-1252";

/// SQL state used when a provider record carries no usable state.
pub const SQLSTATE_PROVIDER: &str = "58004";
pub const SQLSTATE_SUCCESS: &str = "00000";
pub const SQLSTATE_GENERAL: &str = "HY000";
pub const SQLSTATE_BAD_PARAMETER: &str = "HY093";
pub const SQLSTATE_SEQUENCE: &str = "HY010";
pub const SQLSTATE_CURSOR_SCROLL: &str = "42872";
pub const SQLSTATE_NOT_SUPPORTED: &str = "IM001";

// Well known metadata rowset columns
pub const DBCOLUMN_NAME: u32 = 1;
pub const DBCOLUMN_NUMBER: u32 = 2;
pub const DBCOLUMN_BASECATALOGNAME: u32 = 10;
pub const DBCOLUMN_BASECOLUMNNAME: u32 = 11;
pub const DBCOLUMN_BASETABLENAME: u32 = 13;
pub const DBCOLUMN_COMPUTEMODE: u32 = 16;
pub const DBCOLUMN_DEFAULTVALUE: u32 = 20;
pub const DBCOLUMN_ISAUTOINCREMENT: u32 = 26;
pub const DBCOLUMN_ISUNIQUE: u32 = 29;
pub const DBCOLUMN_KEYCOLUMN: u32 = 30;

pub const DBCOMPUTEMODE_COMPUTED: i32 = 1;
pub const DBCOMPUTEMODE_DYNAMIC: i32 = 2;
pub const DBCOMPUTEMODE_NOTCOMPUTED: i32 = 3;
