//! Data-provider client bridge
//!
//! Drives a data provider that speaks the row/accessor/property-set model:
//! connections set initialization properties and open sessions, statements
//! rewrite named markers, bind parameters into packed record buffers, move a
//! cursor over the returned rowsets and decode each column into a [`Value`].
//! Text crosses the boundary as UTF-16 and is converted through a
//! per-connection [`ConversionContext`].
//!
//! # Example
//!
//! ```no_run
//! use oledb_bridge::{ConnectParams, Connection, Result, Services};
//! use std::rc::Rc;
//!
//! fn run(services: &Services) -> Result<()> {
//!     let params = ConnectParams::parse("mssql:host=localhost;dbname=sales")?
//!         .with_credentials("app", "secret");
//!     let mut conn = Connection::open(&params, services)?;
//!
//!     let mut stmt = conn.prepare("SELECT id, name FROM customers WHERE region = :region")?;
//!     stmt.bind_named(":region", "north")?;
//!     stmt.execute()?;
//!     while let Some(row) = stmt.next_row()? {
//!         println!("{:?}", row.values());
//!     }
//!
//!     conn.close();
//!     Ok(())
//! }
//! ```

pub mod attributes;
pub mod charset;
pub mod connection;
pub mod cursor;
pub mod diagnostics;
mod errmsg;
pub mod error;
pub mod placeholder;
pub mod protocol;
pub mod statement;

// Re-export main types
pub use attributes::{AttrValue, Attribute, CursorType, Flags};
pub use charset::{BuiltinCharsets, CharsetService, ConversionContext, ConversionOption, Direction};
pub use connection::{ConnectParams, Connection, DataSourceSpec, Services};
pub use cursor::FetchOrientation;
pub use diagnostics::ErrorContext;
pub use error::{Diagnostic, Error, Result};
pub use protocol::types::{BlobStream, Column, ColumnInfo, ColumnMeta, ColumnMetadata, ParamDirection, Row, Value};
pub use statement::{Statement, StatementConfig, StatementState};
