//! Connection setup: initialization properties, init strings, capability
//! discovery, transactions and connection attributes.

use oledb_bridge::protocol::constants::*;
use oledb_bridge::protocol::memory::MemoryProvider;
use oledb_bridge::protocol::provider::{PropValue, PropertySet, PropertySetId};
use oledb_bridge::protocol::{ErrorRecord, HResult, ProviderError};
use oledb_bridge::{AttrValue, Attribute, ConnectParams, Connection, Error, Flags, Services};
use std::rc::Rc;

fn services(provider: &MemoryProvider) -> Services {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Services::new(Rc::new(provider.clone()))
}

fn find(sets: &[PropertySet], set: PropertySetId, id: u32) -> Option<PropValue> {
    sets.iter()
        .filter(|s| s.set == set)
        .flat_map(|s| s.properties.iter())
        .find(|p| p.id == id)
        .map(|p| p.value.clone())
}

#[test]
fn test_integrated_auth_replaces_credentials() {
    let provider = MemoryProvider::new();
    let params = ConnectParams::parse("mssql:host=db1;dbname=shop")
        .unwrap()
        .with_credentials("app", "secret")
        .with_option(Attribute::IntegratedAuth, true)
        .with_option(Attribute::ConnectionPooling, true)
        .with_option(Attribute::ApplicationName, "billing")
        .with_option(Attribute::Encryption, true)
        .with_timeout(5);
    let mut conn = Connection::open(&params, &services(&provider)).unwrap();

    let sets = provider.init_properties();
    assert_eq!(find(&sets, PropertySetId::DbInit, DBPROP_AUTH_INTEGRATED), Some(PropValue::text("SSPI")));
    assert_eq!(find(&sets, PropertySetId::DbInit, DBPROP_AUTH_USERID), None);
    assert_eq!(find(&sets, PropertySetId::DbInit, DBPROP_AUTH_PASSWORD), None);
    assert_eq!(find(&sets, PropertySetId::DbInit, DBPROP_INIT_TIMEOUT), Some(PropValue::I4(5)));
    assert_eq!(
        find(&sets, PropertySetId::DbInit, DBPROP_INIT_OLEDBSERVICES),
        Some(PropValue::I4(DBPROPVAL_OS_RESOURCEPOOLING))
    );
    assert_eq!(find(&sets, PropertySetId::ProviderInit, SSPROP_INIT_APPNAME), Some(PropValue::text("billing")));
    assert_eq!(find(&sets, PropertySetId::ProviderInit, SSPROP_INIT_ENCRYPT), Some(PropValue::Bool(true)));
    assert_eq!(
        find(&sets, PropertySetId::ProviderInit, SSPROP_INIT_AUTOTRANSLATE),
        Some(PropValue::Bool(false))
    );

    assert_eq!(conn.timeout(), 5);
    assert_eq!(
        conn.get_attribute(Attribute::ApplicationName).unwrap(),
        AttrValue::Str("billing".to_string())
    );
    assert_eq!(conn.get_attribute(Attribute::Timeout).unwrap(), AttrValue::Int(5));
}

#[test]
fn test_password_adds_auth_options() {
    let provider = MemoryProvider::new();
    let params = ConnectParams::parse("mssql:host=db1")
        .unwrap()
        .with_credentials("app", "secret");
    Connection::open(&params, &services(&provider)).unwrap();

    let sets = provider.init_properties();
    assert_eq!(find(&sets, PropertySetId::DbInit, DBPROP_AUTH_PASSWORD), Some(PropValue::text("secret")));
    assert_eq!(
        find(&sets, PropertySetId::DbInit, DBPROP_AUTH_PERSIST_SENSITIVE_AUTHINFO),
        Some(PropValue::Bool(true))
    );
    assert_eq!(find(&sets, PropertySetId::DbInit, DBPROP_INIT_CATALOG), None);
}

#[test]
fn test_rejected_required_property_aborts() {
    let provider = MemoryProvider::new();
    provider.reject_property(DBPROP_INIT_CATALOG);
    let params = ConnectParams::parse("mssql:host=db1;dbname=shop").unwrap();
    let err = Connection::open(&params, &services(&provider)).unwrap_err();
    assert!(matches!(err, Error::ConnectionSetup(_)));
    assert!(err.to_string().contains("was rejected"));
}

#[test]
fn test_rejected_optional_property_is_tolerated() {
    let provider = MemoryProvider::new();
    provider.reject_property(DBPROP_AUTH_CACHE_AUTHINFO);
    provider.without_provider_properties();
    let params = ConnectParams::parse("mssql:host=db1")
        .unwrap()
        .with_credentials("app", "secret");
    let conn = Connection::open(&params, &services(&provider)).unwrap();
    assert!(!conn.is_closed());
    let sets = provider.init_properties();
    assert!(sets.iter().all(|s| s.set != PropertySetId::ProviderInit));
}

#[test]
fn test_initialize_failure_carries_provider_record() {
    let provider = MemoryProvider::new();
    provider.fail_initialize(
        ProviderError::new(HResult::E_FAIL).with_record(
            ErrorRecord::new("Login failed for user 'app'.")
                .with_sql_state("28000")
                .with_native_error(18456),
        ),
    );
    let params = ConnectParams::parse("mssql:host=db1").unwrap();
    let err = Connection::open(&params, &services(&provider)).unwrap_err();
    assert!(matches!(err, Error::ConnectionSetup(_)));
    assert_eq!(err.sql_state(), "28000");
    assert!(err.to_string().contains("Login failed"));
}

#[test]
fn test_init_string_settings_merge_back() {
    let provider = MemoryProvider::new();
    let params = ConnectParams::parse(
        "oledb:Provider=SQLNCLI11;Data Source=db2;Connect Timeout=15;Ole Db Services=-1;\
         Integrated Security=SSPI;Auto Translate=true;Application Name=reports",
    )
    .unwrap();
    let mut conn = Connection::open(&params, &services(&provider)).unwrap();

    assert!(provider.created().is_empty());
    assert_eq!(provider.init_strings().len(), 1);
    assert_eq!(conn.timeout(), 15);
    let flags = conn.flags();
    assert!(flags.contains(Flags::CONNECTION_POOLING));
    assert!(flags.contains(Flags::INTEGRATED_AUTH));
    assert!(flags.contains(Flags::AUTO_TRANSLATE));
    assert!(!flags.contains(Flags::ENCRYPTION));
    assert_eq!(
        conn.get_attribute(Attribute::ApplicationName).unwrap(),
        AttrValue::Str("reports".to_string())
    );
    assert_eq!(conn.get_attribute(Attribute::AutoTranslate).unwrap(), AttrValue::Bool(true));
}

#[test]
fn test_transactions_round_trip() {
    let provider = MemoryProvider::new();
    let params = ConnectParams::parse("mssql:host=db1").unwrap();
    let mut conn = Connection::open(&params, &services(&provider)).unwrap();
    conn.begin().unwrap();
    conn.commit().unwrap();
    conn.begin().unwrap();
    conn.rollback().unwrap();
    assert_eq!(provider.transaction_log(), vec!["begin", "commit", "begin", "rollback"]);
}

#[test]
fn test_transactions_unsupported() {
    let provider = MemoryProvider::new();
    provider.without_transactions().without_multiple_results();
    let params = ConnectParams::parse("mssql:host=db1").unwrap();
    let mut conn = Connection::open(&params, &services(&provider)).unwrap();
    assert!(!conn.supports_transactions());
    assert!(!conn.supports_multiple_results());

    let err = conn.begin().unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert_eq!(conn.error_info().sql_state(), "IM001");
}

#[test]
fn test_connection_attributes() {
    let provider = MemoryProvider::new();
    let params = ConnectParams::parse("mssql:host=db1").unwrap();
    let mut conn = Connection::open(&params, &services(&provider)).unwrap();

    conn.set_attribute(Attribute::QueryEncoding, &AttrValue::from("utf-8")).unwrap();
    assert_eq!(
        conn.get_attribute(Attribute::QueryEncoding).unwrap(),
        AttrValue::Str("utf-8".to_string())
    );
    assert_eq!(
        conn.get_attribute(Attribute::Encoding).unwrap(),
        AttrValue::Str(DEFAULT_CHARSET.to_string())
    );

    assert!(conn.set_attribute(Attribute::Encoding, &AttrValue::from("klingon")).is_err());
    assert!(conn
        .set_attribute(Attribute::ServerVersion, &AttrValue::from("x"))
        .is_err());

    conn.set_attribute(Attribute::TruncateStrings, &AttrValue::Bool(true)).unwrap();
    assert_eq!(conn.get_attribute(Attribute::TruncateStrings).unwrap(), AttrValue::Bool(true));
    // Only the requested bit changes.
    assert_eq!(conn.get_attribute(Attribute::UnicodeStrings).unwrap(), AttrValue::Bool(false));

    let stmt = conn.prepare("SELECT 1").unwrap();
    drop(stmt);
    assert_eq!(provider.prepared(), vec!["SELECT 1".to_string()]);
}

#[test]
fn test_prepare_without_parameter_support() {
    let provider = MemoryProvider::new();
    provider.without_parameters();
    let params = ConnectParams::parse("mssql:host=db1").unwrap();
    let mut conn = Connection::open(&params, &services(&provider)).unwrap();

    let mut stmt = conn.prepare("SELECT * FROM t WHERE a = :a").unwrap();
    let err = stmt.bind_named(":a", 1).unwrap_err();
    assert_eq!(err.sql_state(), "HY093");
    let err = stmt.bind_param(1, 1).unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}
