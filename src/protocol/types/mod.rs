//! Provider types, values and their record codecs.

mod column;
mod lob;
mod metadata;
mod param;
mod provider_type;
mod row;
mod timestamp;
mod value;
mod variant;

pub use column::{Column, ColumnBinding, ColumnInfo};
pub use lob::{BlobStream, ValueStream};
pub use metadata::{match_column, read_columns_rowset, ColumnMeta, ColumnMetadata};
pub use param::{ParamDirection, ParameterBinding};
pub use provider_type::{param_type_names, LogicalType, ProviderType};
pub use row::Row;
pub use timestamp::{decode_ole_date, decode_timestamp, encode_timestamp, format_timestamp};
pub use value::{ByteStream, Value};
pub use variant::variant_to_wide;
