//! Parameter binding as the provider sees it: converted bytes, declared
//! types, truncation, named markers, outputs and streamed long values.

use oledb_bridge::protocol::constants::*;
use oledb_bridge::protocol::memory::{MemoryProvider, Script};
use oledb_bridge::protocol::provider::ParamInfo;
use oledb_bridge::protocol::types::{ByteStream, LogicalType};
use oledb_bridge::{AttrValue, Attribute, ConnectParams, Connection, Error, ParamDirection, Services, Value};
use std::io::Cursor;
use std::rc::Rc;

fn connect(provider: &MemoryProvider, options: &[(Attribute, AttrValue)]) -> Connection {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut params = ConnectParams::parse("mssql:host=db1;dbname=shop")
        .unwrap()
        .with_credentials("app", "secret");
    for (attr, value) in options {
        params = params.with_option(*attr, value.clone());
    }
    Connection::open(&params, &Services::new(Rc::new(provider.clone()))).unwrap()
}

fn declared(ordinal: usize, db_type: u16, size: usize) -> ParamInfo {
    ParamInfo {
        flags: DBPARAMFLAGS_ISINPUT | DBPARAMFLAGS_ISNULLABLE,
        ordinal,
        name: None,
        db_type,
        param_size: size,
        precision: 0,
        scale: 0,
    }
}

#[test]
fn test_narrow_input_truncated_to_declared_size() {
    let provider = MemoryProvider::new();
    provider.script(
        "INSERT INTO streets (name) VALUES (?)",
        Script::count(1).with_param_info(vec![declared(1, DBTYPE_STR, 5)]),
    );
    let mut conn = connect(
        &provider,
        &[
            (Attribute::Encoding, "utf-8".into()),
            (Attribute::NarrowEncoding, "windows-1252".into()),
        ],
    );

    let mut stmt = conn
        .prepare_with(
            "INSERT INTO streets (name) VALUES (?)",
            &[(Attribute::TruncateStrings, AttrValue::Bool(true))],
        )
        .unwrap();
    stmt.bind_param(1, "Grüße-Straße").unwrap();
    assert_eq!(stmt.execute_no_rowset().unwrap(), 1);

    let executed = provider.last_executed().unwrap();
    let param = &executed.params[0];
    assert_eq!(param.db_type, DBTYPE_STR);
    assert_eq!(param.length, Some(5));
    assert_eq!(param.data, vec![b'G', b'r', 0xFC, 0xDF, b'e']);

    let (ordinals, infos) = provider.param_descriptions().pop().unwrap();
    assert_eq!(ordinals, vec![1]);
    assert_eq!(infos[0].type_name, "DBTYPE_VARCHAR");
    assert_eq!(infos[0].param_size, 5);
}

#[test]
fn test_untruncated_input_keeps_full_length() {
    let provider = MemoryProvider::new();
    provider.script(
        "INSERT INTO streets (name) VALUES (?)",
        Script::count(1).with_param_info(vec![declared(1, DBTYPE_STR, 5)]),
    );
    let mut conn = connect(&provider, &[(Attribute::Encoding, "utf-8".into())]);

    let mut stmt = conn.prepare("INSERT INTO streets (name) VALUES (?)").unwrap();
    stmt.bind_param(1, "Main Street").unwrap();
    stmt.execute_no_rowset().unwrap();
    let executed = provider.last_executed().unwrap();
    assert_eq!(executed.params[0].length, Some(11));
    assert_eq!(executed.params[0].data, b"Main Street".to_vec());
}

#[test]
fn test_named_markers_bind_every_occurrence() {
    let provider = MemoryProvider::new();
    provider.script("UPDATE t SET a = ? WHERE b = ? OR c = ?", Script::count(3));
    let mut conn = connect(&provider, &[]);

    let mut stmt = conn.prepare("UPDATE t SET a = :v WHERE b = :v OR c = :w").unwrap();
    assert_eq!(stmt.query(), "UPDATE t SET a = ? WHERE b = ? OR c = ?");
    assert_eq!(stmt.marker_count(), 3);
    stmt.bind_named(":v", 7).unwrap();
    stmt.bind_named("w", "x").unwrap();

    let err = stmt.bind_named(":missing", 1).unwrap_err();
    assert!(matches!(err, Error::ParameterNotFound { .. }));
    assert_eq!(stmt.error_info().sql_state(), "HY093");

    assert_eq!(stmt.execute_no_rowset().unwrap(), 3);
    let params = provider.last_executed().unwrap().params;
    assert_eq!(params.len(), 3);
    assert_eq!(params[0].db_type, DBTYPE_I4);
    assert_eq!(params[0].data, 7i32.to_le_bytes().to_vec());
    assert_eq!(params[1].data, 7i32.to_le_bytes().to_vec());
    assert_eq!(params[2].db_type, DBTYPE_STR);
    assert_eq!(params[2].data, b"x".to_vec());
}

#[test]
fn test_invalid_ordinals_rejected() {
    let provider = MemoryProvider::new();
    let mut conn = connect(&provider, &[]);
    let mut stmt = conn.prepare("SELECT * FROM t WHERE a = ?").unwrap();
    assert_eq!(stmt.bind_param(0, 1).unwrap_err().sql_state(), "HY093");
    assert_eq!(stmt.bind_param(2, 1).unwrap_err().sql_state(), "HY093");
    stmt.bind_param(1, 1).unwrap();
}

#[test]
fn test_null_and_wide_inputs() {
    let provider = MemoryProvider::new();
    provider.script("INSERT INTO t VALUES (?, ?)", Script::count(1));
    let mut conn = connect(
        &provider,
        &[
            (Attribute::Encoding, "utf-8".into()),
            (Attribute::UnicodeStrings, AttrValue::Bool(true)),
        ],
    );

    let mut stmt = conn.prepare("INSERT INTO t VALUES (?, ?)").unwrap();
    stmt.bind_param(1, Value::Null).unwrap();
    stmt.bind_param(2, "hé").unwrap();
    stmt.execute_no_rowset().unwrap();

    let params = provider.last_executed().unwrap().params;
    assert_eq!(params[0].status, DBSTATUS_S_ISNULL);
    assert!(params[0].data.is_empty());
    assert_eq!(params[1].db_type, DBTYPE_WSTR);
    let units: Vec<u8> = "hé".encode_utf16().flat_map(u16::to_le_bytes).collect();
    assert_eq!(params[1].data, units);

    let (_, infos) = provider.param_descriptions().pop().unwrap();
    assert_eq!(infos[0].type_name, "DBTYPE_WVARCHAR");
    assert_eq!(infos[1].type_name, "DBTYPE_WVARCHAR");
}

#[test]
fn test_output_parameter_reads_back() {
    let provider = MemoryProvider::new();
    provider.script("{CALL next_id(?, ?)}", Script::count(0).with_output(2, 42i64));
    let mut conn = connect(&provider, &[]);

    let mut stmt = conn.prepare("{CALL next_id(:seed, :id)}").unwrap();
    stmt.bind_named(":seed", 5).unwrap();
    stmt.bind_named_with(":id", Value::Null, ParamDirection::Output, LogicalType::Int, 0)
        .unwrap();
    stmt.execute_no_rowset().unwrap();

    assert_eq!(stmt.named_value("id"), Some(&Value::Long(42)));
    assert_eq!(stmt.param_value(1), Some(&Value::Long(5)));
    let params = provider.last_executed().unwrap().params;
    assert_ne!(params[1].param_io & DBPARAMIO_OUTPUT, 0);
}

#[test]
fn test_long_values_are_streamed() {
    let provider = MemoryProvider::new();
    provider.script("INSERT INTO docs VALUES (?, ?)", Script::count(1));
    let mut conn = connect(&provider, &[]);

    let body = "a".repeat(9000);
    let mut stmt = conn.prepare("INSERT INTO docs VALUES (?, ?)").unwrap();
    stmt.bind_param(1, body.as_str()).unwrap();
    stmt.bind_param(2, ByteStream::with_len(Cursor::new(b"hello".to_vec()), 5))
        .unwrap();
    stmt.execute_no_rowset().unwrap();

    let params = provider.last_executed().unwrap().params;
    assert_eq!(params[0].db_type, DBTYPE_IUNKNOWN);
    assert_eq!(params[0].data.len(), 9000);
    assert_eq!(params[1].db_type, DBTYPE_IUNKNOWN);
    assert_eq!(params[1].data, b"hello".to_vec());

    let (_, infos) = provider.param_descriptions().pop().unwrap();
    assert_eq!(infos[0].type_name, "DBTYPE_LONGVARCHAR");
    assert_eq!(provider.live_streams(), 0);
}

#[test]
fn test_stream_on_repeated_marker_rejected() {
    let provider = MemoryProvider::new();
    let mut conn = connect(&provider, &[]);
    let mut stmt = conn.prepare("SELECT :doc, :doc").unwrap();
    let err = stmt
        .bind_named(":doc", ByteStream::new(Cursor::new(b"x".to_vec())))
        .unwrap_err();
    assert_eq!(err.sql_state(), "HY093");
}

#[test]
fn test_parameter_option_splits_context() {
    let provider = MemoryProvider::new();
    provider.script("INSERT INTO t VALUES (?)", Script::count(1));
    let mut conn = connect(&provider, &[]);

    let mut stmt = conn.prepare("INSERT INTO t VALUES (?)").unwrap();
    stmt.bind_param(1, "abc").unwrap();
    stmt.set_param_option(1, Attribute::UnicodeStrings, &AttrValue::Bool(true))
        .unwrap();
    assert!(stmt
        .set_param_option(1, Attribute::FetchTableNames, &AttrValue::Bool(true))
        .is_err());
    stmt.execute_no_rowset().unwrap();

    let params = provider.last_executed().unwrap().params;
    assert_eq!(params[0].db_type, DBTYPE_WSTR);
    assert_eq!(conn.get_attribute(Attribute::UnicodeStrings).unwrap(), AttrValue::Bool(false));
}

#[test]
fn test_stream_parameter_needs_rebind_before_reexecute() {
    let provider = MemoryProvider::new();
    provider.script("INSERT INTO docs VALUES (?)", Script::count(1));
    let mut conn = connect(&provider, &[]);

    let mut stmt = conn.prepare("INSERT INTO docs VALUES (?)").unwrap();
    stmt.bind_param(1, ByteStream::with_len(Cursor::new(b"abc".to_vec()), 3))
        .unwrap();
    stmt.execute_no_rowset().unwrap();
    assert_eq!(provider.executed().len(), 1);

    let err = stmt.execute_no_rowset().unwrap_err();
    assert!(matches!(err, Error::ParameterBind(_)));
    assert_eq!(stmt.error_info().sql_state(), "HY000");
    assert_eq!(provider.executed().len(), 1);

    stmt.bind_param(1, ByteStream::with_len(Cursor::new(b"xyz".to_vec()), 3))
        .unwrap();
    stmt.execute_no_rowset().unwrap();
    let params = provider.last_executed().unwrap().params;
    assert_eq!(params[0].status, DBSTATUS_S_OK);
    assert_eq!(params[0].data, b"xyz".to_vec());
}
