//! Statement lifecycle against the in-memory provider: fetch walks, the
//! doer path, multiple results, scrolling and long columns.

use oledb_bridge::protocol::memory::{MemoryColumn, MemoryProvider, MemoryTable, Script, ScriptedResult};
use oledb_bridge::{
    AttrValue, Attribute, ConnectParams, Connection, Error, FetchOrientation, Services, StatementState, Value,
};
use std::io::Read;
use std::rc::Rc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn connect(provider: &MemoryProvider) -> Connection {
    init_tracing();
    let params = ConnectParams::parse("mssql:host=db1;dbname=shop")
        .unwrap()
        .with_credentials("app", "secret");
    Connection::open(&params, &Services::new(Rc::new(provider.clone()))).unwrap()
}

fn people() -> MemoryTable {
    MemoryTable::new(vec![MemoryColumn::int("id"), MemoryColumn::wide("name", 50)])
        .row(vec![1i64.into(), "Ada".into()])
        .row(vec![2i64.into(), "Grace".into()])
        .row(vec![3i64.into(), "Barbara".into()])
}

#[test]
fn test_fetch_next_walks_three_rows() {
    let provider = MemoryProvider::new();
    provider.script("SELECT id, name FROM people", Script::rows(people()));
    let mut conn = connect(&provider);

    let mut stmt = conn.prepare("SELECT id, name FROM people").unwrap();
    assert_eq!(stmt.state(), StatementState::Prepared);
    stmt.execute().unwrap();
    assert_eq!(stmt.state(), StatementState::HasRowset);
    assert_eq!(stmt.column_count(), 2);

    let mut seen = Vec::new();
    for _ in 0..3 {
        assert!(stmt.fetch(FetchOrientation::Next).unwrap());
        let id = stmt.get_col(0).unwrap().to_i64().unwrap();
        let name = stmt.get_col(1).unwrap();
        seen.push((id, name.as_str().unwrap().to_string()));
    }
    assert_eq!(
        seen,
        vec![
            (1, "Ada".to_string()),
            (2, "Grace".to_string()),
            (3, "Barbara".to_string())
        ]
    );
    assert!(!stmt.fetch(FetchOrientation::Next).unwrap());
    assert!(matches!(stmt.get_col(0), Err(Error::InvalidState { .. })));
}

#[test]
fn test_rows_share_column_info() {
    let provider = MemoryProvider::new();
    provider.script("SELECT id, name FROM people", Script::rows(people()));
    let mut conn = connect(&provider);

    let mut stmt = conn.query("SELECT id, name FROM people").unwrap();
    let first = stmt.next_row().unwrap().unwrap();
    let second = stmt.next_row().unwrap().unwrap();
    assert_eq!(first.column_names(), vec![b"id".as_slice(), b"name".as_slice()]);
    assert_eq!(second.get_by_name("name").and_then(|v| v.as_str()), Some("Grace"));
    assert_eq!(first.get(0), Some(&Value::Long(1)));
    // Direct execution skips the prepare round trip.
    assert!(provider.prepared().is_empty());
}

#[test]
fn test_doer_leaves_no_rowset() {
    let provider = MemoryProvider::new();
    provider.script("UPDATE people SET active = 0", Script::count(12));
    let mut conn = connect(&provider);

    assert_eq!(conn.exec("UPDATE people SET active = 0").unwrap(), 12);
    assert_eq!(provider.live_rowsets(), 0);

    let mut stmt = conn.prepare("UPDATE people SET active = 0").unwrap();
    assert_eq!(stmt.execute_no_rowset().unwrap(), 12);
    assert_eq!(stmt.state(), StatementState::NoRowset);
    assert_eq!(stmt.column_count(), 0);
    assert!(stmt.columns().is_none());
    assert_eq!(provider.live_rowsets(), 0);
}

#[test]
fn test_blob_outlives_closed_statement() {
    let provider = MemoryProvider::new();
    let text = "x".repeat(20_000);
    provider.script(
        "SELECT body FROM notes",
        Script::rows(MemoryTable::new(vec![MemoryColumn::wide_long("body")]).row(vec![text.as_str().into()])),
    );
    let mut conn = connect(&provider);

    let mut stmt = conn.query("SELECT body FROM notes").unwrap();
    assert!(stmt.fetch(FetchOrientation::Next).unwrap());
    let mut value = stmt.get_col(0).unwrap();
    stmt.close();
    assert_eq!(stmt.state(), StatementState::Closed);
    stmt.close();
    assert_eq!(provider.live_rowsets(), 1);

    let stream = value.as_stream_mut().unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    assert_eq!(out, text.as_bytes());

    drop(value);
    assert_eq!(provider.live_rowsets(), 0);
    assert_eq!(provider.live_streams(), 0);
}

#[test]
fn test_scrollable_cursor_moves_back() {
    let provider = MemoryProvider::new();
    provider.script("SELECT id, name FROM people", Script::rows(people()));
    let mut conn = connect(&provider);

    let mut stmt = conn
        .prepare_with(
            "SELECT id, name FROM people",
            &[(Attribute::CursorType, AttrValue::Int(1))],
        )
        .unwrap();
    stmt.execute().unwrap();
    let id = |stmt: &mut oledb_bridge::Statement| stmt.get_col(0).unwrap().to_i64();

    assert!(stmt.fetch(FetchOrientation::Absolute(3)).unwrap());
    assert_eq!(id(&mut stmt), Some(3));
    assert!(stmt.fetch(FetchOrientation::Prior).unwrap());
    assert_eq!(id(&mut stmt), Some(2));
    assert!(stmt.fetch(FetchOrientation::First).unwrap());
    assert_eq!(id(&mut stmt), Some(1));
    assert!(stmt.fetch(FetchOrientation::Relative(2)).unwrap());
    assert_eq!(id(&mut stmt), Some(3));

    let err = stmt.fetch(FetchOrientation::Last).unwrap_err();
    assert_eq!(err.sql_state(), "42872");
    assert_eq!(stmt.error_info().sql_state(), "42872");
}

#[test]
fn test_next_rowset_skips_counts() {
    let provider = MemoryProvider::new();
    provider.script(
        "EXEC refresh_people",
        Script::multiple(vec![
            ScriptedResult::Count(5),
            ScriptedResult::Rows(people()),
            ScriptedResult::Count(2),
            ScriptedResult::Rows(MemoryTable::new(vec![MemoryColumn::int("total")]).row(vec![3i64.into()])),
        ]),
    );
    let mut conn = connect(&provider);

    let mut stmt = conn.query("EXEC refresh_people").unwrap();
    assert_eq!(stmt.rows_affected(), Some(5));
    assert_eq!(stmt.column_count(), 2);

    assert!(stmt.next_rowset().unwrap());
    assert_eq!(stmt.rows_affected(), Some(2));
    assert_eq!(stmt.column_count(), 1);
    let row = stmt.next_row().unwrap().unwrap();
    assert_eq!(row.get(0).and_then(Value::to_i64), Some(3));

    assert!(!stmt.next_rowset().unwrap());
    assert_eq!(stmt.state(), StatementState::NoRowset);
    assert_eq!(provider.live_rowsets(), 0);
}

#[test]
fn test_extended_metadata_names_table() {
    let provider = MemoryProvider::new();
    provider.script(
        "SELECT id, name FROM people",
        Script::rows(
            MemoryTable::new(vec![
                MemoryColumn::int("id").table("people").base_name("id").key().not_null(),
                MemoryColumn::wide("name", 50).table("people").catalog("shop"),
            ])
            .row(vec![1i64.into(), "Ada".into()]),
        ),
    );
    let mut conn = connect(&provider);
    conn.set_attribute(Attribute::FetchTableNames, &AttrValue::Bool(true)).unwrap();

    let mut stmt = conn.query("SELECT id, name FROM people").unwrap();
    let meta = stmt.column_meta(0).unwrap();
    assert_eq!(meta.table.as_deref(), Some("people"));
    assert!(meta.flags.contains(&"primary_key"));
    assert!(meta.flags.contains(&"not_null"));
    let described = stmt.describe(1).unwrap();
    assert_eq!(described.name, "people.name");
}

#[test]
fn test_execute_failure_is_recorded() {
    let provider = MemoryProvider::new();
    let mut conn = connect(&provider);

    let mut stmt = conn.prepare("SELECT * FROM missing").unwrap();
    let err = stmt.execute().unwrap_err();
    assert!(matches!(err, Error::Execute(_)));
    assert_eq!(err.sql_state(), "42S02");
    assert_eq!(stmt.state(), StatementState::Prepared);
    assert!(stmt.error_info().message().contains("Invalid object name"));

    let err = conn.query("SELECT * FROM missing").unwrap_err();
    assert_eq!(err.sql_state(), "42S02");
    assert_eq!(conn.error_info().sql_state(), "42S02");
}

#[test]
fn test_non_ascii_column_name_in_default_charset() {
    let provider = MemoryProvider::new();
    provider.script(
        "SELECT size FROM boxes",
        Script::rows(MemoryTable::new(vec![MemoryColumn::int("Größe")]).row(vec![4i64.into()])),
    );
    let mut conn = connect(&provider);

    let mut stmt = conn.query("SELECT size FROM boxes").unwrap();
    let described = stmt.describe(0).unwrap();
    assert_eq!(&described.name[..], b"Gr\xF6\xDFe");
    assert_eq!(&stmt.column_meta(0).unwrap().name[..], b"Gr\xF6\xDFe");

    let row = stmt.next_row().unwrap().unwrap();
    assert_eq!(row.get_by_name(b"GR\xF6\xDFE"), Some(&Value::Long(4)));
}
