//! Provider-facing layer: record buffers, provider interfaces, status codes
//! and the value types exchanged through them.

pub mod buffer;
pub mod constants;
pub mod memory;
pub mod provider;
pub mod status;
pub mod types;

pub use buffer::{BufferLayout, FieldLayout, FieldSpec, RecordReader, RecordWriter};
pub use memory::{Datum, MemoryColumn, MemoryProvider, MemoryStream, MemoryTable, Script, ScriptedResult};
pub use status::{ErrorRecord, HResult, ProviderError, ProviderResult};
pub use types::{Column, ColumnInfo, ColumnMeta, ColumnMetadata, ProviderType, Row, Value};
