//! Connection API.
//!
//! A [`Connection`] creates a provider data source from [`ConnectParams`],
//! sets its initialization properties, opens a session and discovers the
//! optional capabilities (multiple results, local transactions). Statements
//! are created from it and inherit its flags and conversion context.
//!
//! ```
//! use oledb_bridge::protocol::memory::{MemoryColumn, MemoryProvider, MemoryTable, Script};
//! use oledb_bridge::{ConnectParams, Connection, Services};
//! use std::rc::Rc;
//!
//! let provider = MemoryProvider::new();
//! provider.script(
//!     "SELECT name FROM towns",
//!     Script::rows(MemoryTable::new(vec![MemoryColumn::wide("name", 40)]).row(vec!["Ely".into()])),
//! );
//! let services = Services::new(Rc::new(provider.clone()));
//! let params = ConnectParams::parse("mssql:host=db1;dbname=geo").unwrap();
//! let mut conn = Connection::open(&params, &services).unwrap();
//! let mut stmt = conn.query("SELECT name FROM towns").unwrap();
//! let row = stmt.next_row().unwrap().unwrap();
//! assert_eq!(row.get(0).and_then(|v| v.as_str()), Some("Ely"));
//! ```

use crate::attributes::{get_flag_attribute, set_flag_attribute, AttrValue, Attribute, Flags};
use crate::charset::{BuiltinCharsets, CharsetService, ConversionContext, ConversionOption, Direction};
use crate::diagnostics::{provider_failure, ErrorContext};
use crate::error::{Diagnostic, Error, ErrorKind, Result};
use crate::protocol::buffer::{BufferLayout, FieldSpec, RecordReader};
use crate::protocol::constants::*;
use crate::protocol::provider::{
    from_wide, wide, Binding, Command, DataInitialize, DataSource, ExecuteRequest, ExecuteResult, PropValue,
    Property, PropertySet, PropertySetId, Rowset, Session, TransactionLocal,
};
use crate::protocol::status::{HResult, ProviderError, ProviderResult};
use crate::statement::{Statement, StatementConfig};
use std::rc::Rc;
use tracing::{debug, warn};

/// Default login timeout of the `mssql` factory, in seconds.
const DEFAULT_TIMEOUT: i32 = 30;

/// Width of the text slot `last_insert_id` reads into.
const IDENTITY_WIDTH: usize = 128;

/// Which factory builds the data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceSpec {
    /// SQL Server through its native provider.
    Mssql { host: String, dbname: Option<String> },
    /// Any provider, described by a provider init string.
    InitString(String),
}

/// Connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    pub source: DataSourceSpec,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Login timeout in seconds; the factory default when `None`.
    pub timeout: Option<i32>,
    /// Driver options applied in order before connecting.
    pub options: Vec<(Attribute, AttrValue)>,
}

impl ConnectParams {
    pub fn new(source: DataSourceSpec) -> Self {
        Self {
            source,
            username: None,
            password: None,
            timeout: None,
            options: Vec::new(),
        }
    }

    /// Parse `mssql:host=..;dbname=..` or `oledb:<init string>`.
    pub fn parse(dsn: &str) -> Result<Self> {
        let (driver, rest) = dsn.split_once(':').ok_or_else(|| Error::InvalidConnectString {
            message: "Expected '<driver>:<data source>'".to_string(),
        })?;
        let source = match driver.trim().to_ascii_lowercase().as_str() {
            "mssql" => {
                let mut host = "localhost".to_string();
                let mut dbname = None;
                for part in rest.split(';') {
                    let Some((key, value)) = part.split_once('=') else {
                        continue;
                    };
                    match key.trim().to_ascii_lowercase().as_str() {
                        "host" => host = value.trim().to_string(),
                        "dbname" => dbname = Some(value.trim().to_string()),
                        _ => {}
                    }
                }
                DataSourceSpec::Mssql { host, dbname }
            }
            "oledb" => {
                if rest.trim().is_empty() {
                    return Err(Error::InvalidConnectString {
                        message: "Empty provider init string".to_string(),
                    });
                }
                DataSourceSpec::InitString(rest.to_string())
            }
            other => {
                return Err(Error::InvalidConnectString {
                    message: format!("Unknown driver: {}", other),
                })
            }
        };
        Ok(Self::new(source))
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_option(mut self, attr: Attribute, value: impl Into<AttrValue>) -> Self {
        self.options.push((attr, value.into()));
        self
    }

    pub fn with_timeout(mut self, seconds: i32) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

/// Provider-side collaborators a connection is built from.
#[derive(Clone)]
pub struct Services {
    pub data_init: Rc<dyn DataInitialize>,
    pub charsets: Rc<dyn CharsetService>,
}

impl Services {
    /// Use `data_init` with the built-in charsets.
    pub fn new(data_init: Rc<dyn DataInitialize>) -> Self {
        Self {
            data_init,
            charsets: Rc::new(BuiltinCharsets),
        }
    }

    pub fn with_charsets(mut self, charsets: Rc<dyn CharsetService>) -> Self {
        self.charsets = charsets;
        self
    }
}

/// Settings gathered from the driver options before connecting.
struct Settings {
    conv: ConversionContext,
    flags: Flags,
    timeout: i32,
    app_name: Option<String>,
}

impl Settings {
    fn apply(&mut self, attr: Attribute, value: &AttrValue) -> Result<()> {
        match attr {
            Attribute::ApplicationName => {
                self.app_name = value.as_str().map(str::to_string);
                Ok(())
            }
            Attribute::Timeout => {
                self.timeout = value
                    .as_int()
                    .and_then(|t| i32::try_from(t).ok())
                    .ok_or_else(|| Error::invalid_attribute("timeout expects an integer"))?;
                Ok(())
            }
            other => match other.conversion_option() {
                Some(option) => self.conv.set_option(option, value.as_str()),
                None => {
                    if set_flag_attribute(&mut self.flags, Flags::CONNECTION_MASK, other, value)? {
                        Ok(())
                    } else {
                        Err(Error::invalid_attribute(format!("{} is read-only", other)))
                    }
                }
            },
        }
    }
}

/// An open provider session.
pub struct Connection {
    source: Option<Box<dyn DataSource>>,
    session: Option<Box<dyn Session>>,
    conv: ConversionContext,
    flags: Flags,
    timeout: i32,
    app_name: Option<String>,
    transactions: bool,
    errors: ErrorContext,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("flags", &self.flags)
            .field("timeout", &self.timeout)
            .field("transactions", &self.transactions)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Connect. Failures are returned directly; there is no error context
    /// to record them in yet.
    pub fn open(params: &ConnectParams, services: &Services) -> Result<Self> {
        let mssql = matches!(params.source, DataSourceSpec::Mssql { .. });
        let mut settings = Settings {
            conv: ConversionContext::new(services.charsets.clone()),
            flags: Flags::CONVERT_DATE_TIME,
            timeout: if mssql { DEFAULT_TIMEOUT } else { 0 },
            app_name: None,
        };
        for (attr, value) in &params.options {
            settings.apply(*attr, value)?;
        }
        if let Some(timeout) = params.timeout {
            settings.timeout = timeout;
        }
        if settings.conv.charset().is_none() {
            settings.conv.set_option(ConversionOption::Encoding, Some(DEFAULT_CHARSET))?;
        }

        let setup = |err| provider_failure(ErrorKind::ConnectionSetup, &err);
        let mut source = match &params.source {
            DataSourceSpec::Mssql { host, dbname } => {
                let mut source = services.data_init.create_instance(MSSQL_PROVIDER).map_err(setup)?;
                set_init_properties(&mut *source, &settings, params, Some(host), dbname.as_deref())?;
                source
            }
            DataSourceSpec::InitString(init) => {
                let text = settings.conv.to_wide(init.as_bytes(), Direction::InputToUnicode)?;
                let mut source = services.data_init.data_source(&text).map_err(setup)?;
                merge_settings(&*source, &mut settings)?;
                set_init_properties(&mut *source, &settings, params, None, None)?;
                source
            }
        };

        source.initialize().map_err(setup)?;
        let mut session = source.create_session().map_err(setup)?;

        let multiple = source
            .get_property(PropertySetId::DataSourceInfo, DBPROP_MULTIPLERESULTS)
            .and_then(|v| v.as_i32())
            .is_some_and(|v| v == DBPROPVAL_MR_SUPPORTED || v == DBPROPVAL_MR_CONCURRENT);
        if multiple {
            settings.flags |= Flags::MULTIPLE_RESULTS;
        }
        let transactions = session.transactions().is_some();

        debug!(
            factory = if mssql { "mssql" } else { "oledb" },
            timeout = settings.timeout,
            multiple_results = multiple,
            transactions,
            "connection opened"
        );
        Ok(Self {
            source: Some(source),
            session: Some(session),
            conv: settings.conv,
            flags: settings.flags,
            timeout: settings.timeout,
            app_name: settings.app_name,
            transactions,
            errors: ErrorContext::new(),
        })
    }

    /// Copy a failure into the error context.
    #[track_caller]
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.errors.record_error(err);
        }
        result
    }

    fn session(&mut self) -> Result<&mut Box<dyn Session>> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("use the connection", "disconnected"))
    }

    fn create_command(&mut self) -> Result<Box<dyn Command>> {
        self.session()?
            .create_command()
            .map_err(|err| provider_failure(ErrorKind::Prepare, &err))
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Login timeout in seconds.
    pub fn timeout(&self) -> i32 {
        self.timeout
    }

    pub fn conversion(&self) -> &ConversionContext {
        &self.conv
    }

    pub fn supports_multiple_results(&self) -> bool {
        self.flags.contains(Flags::MULTIPLE_RESULTS)
    }

    pub fn supports_transactions(&self) -> bool {
        self.transactions
    }

    /// Outcome of the last connection-level operation.
    pub fn error_info(&self) -> &ErrorContext {
        &self.errors
    }

    /// Prepare a statement.
    pub fn prepare(&mut self, sql: &str) -> Result<Statement> {
        self.prepare_with(sql, &[])
    }

    /// Prepare a statement with statement options applied first.
    pub fn prepare_with(&mut self, sql: &str, options: &[(Attribute, AttrValue)]) -> Result<Statement> {
        self.errors.clear();
        let result = self.new_statement(sql, options, false);
        self.track(result)
    }

    fn new_statement(&mut self, sql: &str, options: &[(Attribute, AttrValue)], direct: bool) -> Result<Statement> {
        let mut conv = self.conv.clone();
        let mut flags = self.flags & Flags::STATEMENT_MASK;
        for (attr, value) in options {
            match attr.conversion_option() {
                Some(option) => conv.set_option(option, value.as_str())?,
                None => {
                    if !set_flag_attribute(&mut flags, Flags::STATEMENT_MASK, *attr, value)? {
                        return Err(Error::invalid_attribute(format!(
                            "{} is not a statement attribute",
                            attr
                        )));
                    }
                }
            }
        }
        let command = self.create_command()?;
        Statement::prepare(
            command,
            sql,
            StatementConfig {
                conv,
                flags,
                multiple_results: self.supports_multiple_results(),
                direct,
            },
        )
    }

    /// Run a query without a prepare round trip and return the executed
    /// statement.
    pub fn query(&mut self, sql: &str) -> Result<Statement> {
        self.errors.clear();
        let result = self.new_statement(sql, &[], true).and_then(|mut stmt| {
            stmt.execute()?;
            Ok(stmt)
        });
        self.track(result)
    }

    /// Execute without asking for rows; returns the affected row count.
    pub fn exec(&mut self, sql: &str) -> Result<u64> {
        self.errors.clear();
        let result = self.exec_inner(sql);
        self.track(result)
    }

    fn exec_inner(&mut self, sql: &str) -> Result<u64> {
        let mut command = self.create_command()?;
        let text = self.conv.to_wide(sql.as_bytes(), Direction::InputToQuery)?;
        let execute = |err| provider_failure(ErrorKind::Execute, &err);
        command.set_command_text(&text).map_err(execute)?;
        let outcome = command.execute(ExecuteRequest::NoResult, None).map_err(execute)?;
        if outcome.status == HResult::DB_S_ERRORSOCCURRED {
            return Err(provider_failure(
                ErrorKind::Execute,
                &ProviderError::new(outcome.status),
            ));
        }
        let rows = outcome.rows_affected.unwrap_or(0);
        debug!(rows, "statement executed without rowset");
        Ok(rows)
    }

    /// Start a local transaction.
    pub fn begin(&mut self) -> Result<()> {
        self.transaction("begin a transaction", |tx| tx.start_transaction())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.transaction("commit", |tx| tx.commit())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.transaction("roll back", |tx| tx.abort())
    }

    fn transaction(
        &mut self,
        operation: &str,
        call: impl FnOnce(&mut dyn TransactionLocal) -> ProviderResult<()>,
    ) -> Result<()> {
        self.errors.clear();
        let result = self.session().and_then(|session| match session.transactions() {
            None => Err(Error::unsupported(format!(
                "Provider does not support transactions; cannot {}",
                operation
            ))),
            Some(tx) => call(tx).map_err(|err| provider_failure(ErrorKind::Execute, &err)),
        });
        if result.is_ok() {
            debug!(operation, "transaction call completed");
        }
        self.track(result)
    }

    /// Value of `SELECT @@IDENTITY`, `None` when it is NULL.
    pub fn last_insert_id(&mut self) -> Result<Option<String>> {
        self.errors.clear();
        let result = self.last_insert_id_inner();
        self.track(result)
    }

    fn last_insert_id_inner(&mut self) -> Result<Option<String>> {
        let mut command = self.create_command()?;
        let execute = |err| provider_failure(ErrorKind::Execute, &err);
        command.set_command_text(&wide("SELECT @@IDENTITY")).map_err(execute)?;
        let outcome = command.execute(ExecuteRequest::Rowset, None).map_err(execute)?;
        let ExecuteResult::Rowset(mut rowset) = outcome.result else {
            return Ok(None);
        };
        read_identity(&mut *rowset)
    }

    /// `<DBMS name> <DBMS version>`.
    pub fn server_version(&self) -> Option<String> {
        self.version_info(DBPROP_DBMSNAME, DBPROP_DBMSVER)
    }

    /// `<provider name> <provider version>`.
    pub fn client_version(&self) -> Option<String> {
        self.version_info(DBPROP_PROVIDERFRIENDLYNAME, DBPROP_PROVIDERVER)
    }

    fn version_info(&self, name_id: u32, version_id: u32) -> Option<String> {
        let source = self.source.as_ref()?;
        let text = |id| match source.get_property(PropertySetId::DataSourceInfo, id) {
            Some(PropValue::Str(units)) => Some(from_wide(&units)),
            _ => None,
        };
        match (text(name_id), text(version_id)) {
            (Some(name), Some(version)) => Some(format!("{} {}", name, version)),
            (name, version) => name.or(version),
        }
    }

    /// Set a connection option. Statements prepared afterwards see it.
    pub fn set_attribute(&mut self, attr: Attribute, value: &AttrValue) -> Result<()> {
        self.errors.clear();
        let result = match attr {
            Attribute::ApplicationName => {
                self.app_name = value.as_str().map(str::to_string);
                Ok(())
            }
            other => match other.conversion_option() {
                Some(option) => self.conv.set_option(option, value.as_str()),
                None => set_flag_attribute(&mut self.flags, Flags::CONNECTION_MASK, other, value).and_then(
                    |known| {
                        if known {
                            Ok(())
                        } else {
                            Err(Error::invalid_attribute(format!("{} is read-only", other)))
                        }
                    },
                ),
            },
        };
        self.track(result)
    }

    pub fn get_attribute(&mut self, attr: Attribute) -> Result<AttrValue> {
        self.errors.clear();
        let result = match attr {
            Attribute::ServerVersion => Ok(self.server_version().map_or(AttrValue::Null, AttrValue::Str)),
            Attribute::ClientVersion => Ok(self.client_version().map_or(AttrValue::Null, AttrValue::Str)),
            Attribute::Timeout => Ok(AttrValue::Int(self.timeout as i64)),
            Attribute::ApplicationName => {
                Ok(self.app_name.clone().map_or(AttrValue::Null, AttrValue::Str))
            }
            other => match other.conversion_option() {
                Some(option) => Ok(self
                    .conv
                    .option(option)
                    .map_or(AttrValue::Null, |name| AttrValue::Str(name.to_string()))),
                None => match other.flag() {
                    Some(bits) if !Flags::CONNECTION_MASK.contains(bits) => Err(Error::invalid_attribute(
                        format!("{} is not a connection attribute", other),
                    )),
                    _ => get_flag_attribute(self.flags, other).ok_or_else(|| {
                        Error::invalid_attribute(format!("{} is not a connection attribute", other))
                    }),
                },
            },
        };
        self.track(result)
    }

    /// Release the session and data source.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("connection closed");
        }
        self.source = None;
    }
}

/// Build and set the initialization property sets.
fn set_init_properties(
    source: &mut dyn DataSource,
    settings: &Settings,
    params: &ConnectParams,
    host: Option<&str>,
    dbname: Option<&str>,
) -> Result<()> {
    let text = |value: &str| -> Result<PropValue> {
        Ok(PropValue::Str(settings.conv.to_wide(value.as_bytes(), Direction::InputToUnicode)?))
    };

    let mut init = PropertySet::new(PropertySetId::DbInit);
    if let Some(host) = host {
        init.push(Property::required(DBPROP_INIT_DATASOURCE, text(host)?));
    }
    if let Some(dbname) = dbname {
        init.push(Property::required(DBPROP_INIT_CATALOG, text(dbname)?));
    }
    if settings.timeout != 0 {
        init.push(Property::optional(DBPROP_INIT_TIMEOUT, PropValue::I4(settings.timeout)));
    }
    if settings.flags.contains(Flags::INTEGRATED_AUTH) {
        if host.is_some() {
            init.push(Property::required(
                DBPROP_AUTH_INTEGRATED,
                PropValue::text(INTEGRATED_AUTH_SSPI),
            ));
        }
    } else {
        if let Some(user) = &params.username {
            init.push(Property::required(DBPROP_AUTH_USERID, text(user)?));
        }
        if let Some(password) = &params.password {
            init.push(Property::required(DBPROP_AUTH_PASSWORD, text(password)?));
            init.push(Property::optional(DBPROP_AUTH_ENCRYPT_PASSWORD, PropValue::Bool(true)));
            init.push(Property::optional(DBPROP_AUTH_CACHE_AUTHINFO, PropValue::Bool(true)));
            init.push(Property::optional(
                DBPROP_AUTH_PERSIST_SENSITIVE_AUTHINFO,
                PropValue::Bool(true),
            ));
        }
    }
    if settings.flags.contains(Flags::CONNECTION_POOLING) {
        init.push(Property::optional(
            DBPROP_INIT_OLEDBSERVICES,
            PropValue::I4(DBPROPVAL_OS_RESOURCEPOOLING),
        ));
    }

    let mut sets = Vec::with_capacity(2);
    if !init.properties.is_empty() {
        sets.push(init);
    }
    if source.supports_property_set(PropertySetId::ProviderInit) {
        let mut provider = PropertySet::new(PropertySetId::ProviderInit);
        if let Some(name) = &settings.app_name {
            provider.push(Property::optional(SSPROP_INIT_APPNAME, text(name)?));
        }
        if settings.flags.contains(Flags::ENCRYPTION) {
            provider.push(Property::optional(SSPROP_INIT_ENCRYPT, PropValue::Bool(true)));
        }
        if !settings.flags.contains(Flags::AUTO_TRANSLATE) {
            provider.push(Property::optional(SSPROP_INIT_AUTOTRANSLATE, PropValue::Bool(false)));
        }
        if !provider.properties.is_empty() {
            sets.push(provider);
        }
    }
    if sets.is_empty() {
        return Ok(());
    }

    let status = source
        .set_properties(&mut sets)
        .map_err(|err| provider_failure(ErrorKind::ConnectionSetup, &err))?;
    if let Some(prop) = sets.iter().find_map(PropertySet::rejected_required) {
        return Err(Error::ConnectionSetup(Diagnostic::new(
            HResult::DB_E_ERRORSOCCURRED.normalized(),
            SQLSTATE_PROVIDER,
            format!("Required initialization property {:#x} was rejected", prop.id),
        )));
    }
    if status != HResult::S_OK {
        warn!(%status, "optional initialization properties rejected");
    }
    Ok(())
}

/// Fold the data source's effective settings back into `settings`.
fn merge_settings(source: &dyn DataSource, settings: &mut Settings) -> Result<()> {
    let init = |id| source.get_property(PropertySetId::DbInit, id);
    if init(DBPROP_INIT_OLEDBSERVICES)
        .and_then(|v| v.as_i32())
        .is_some_and(|v| v & DBPROPVAL_OS_RESOURCEPOOLING != 0)
    {
        settings.flags |= Flags::CONNECTION_POOLING;
    }
    if let Some(timeout) = init(DBPROP_INIT_TIMEOUT).and_then(|v| v.as_i32()) {
        settings.timeout = timeout;
    }
    if init(DBPROP_AUTH_INTEGRATED)
        .and_then(|v| v.as_string())
        .is_some_and(|v| v.eq_ignore_ascii_case(INTEGRATED_AUTH_SSPI))
    {
        settings.flags |= Flags::INTEGRATED_AUTH;
    }

    let provider = |id| source.get_property(PropertySetId::ProviderInit, id);
    if provider(SSPROP_INIT_AUTOTRANSLATE).and_then(|v| v.as_bool()) == Some(true) {
        settings.flags |= Flags::AUTO_TRANSLATE;
    }
    if provider(SSPROP_INIT_ENCRYPT).and_then(|v| v.as_bool()) == Some(true) {
        settings.flags |= Flags::ENCRYPTION;
    }
    if let Some(PropValue::Str(units)) = provider(SSPROP_INIT_APPNAME) {
        settings.app_name = Some(from_wide(&units));
    }
    debug!(flags = ?settings.flags, timeout = settings.timeout, "init string settings merged");
    Ok(())
}

/// Read the first column of the first row as narrow text.
fn read_identity(rowset: &mut dyn Rowset) -> Result<Option<String>> {
    let fetch = |err| provider_failure(ErrorKind::Fetch, &err);
    let mut layout = BufferLayout::new();
    let field = layout.place(FieldSpec::variable(IDENTITY_WIDTH));
    let binding = Binding::for_field(1, DBTYPE_STR, &field, DBPARAMIO_NOTPARAM);
    let accessor = rowset.create_accessor(&[binding], layout.total_size()).map_err(fetch)?;
    let mut record = layout.allocate();

    let outcome = rowset.get_next_rows(0, 1).map_err(fetch).and_then(|rows| {
        let Some(row) = rows.first().copied() else {
            return Ok(false);
        };
        let data = rowset.get_data(row, accessor, &mut record[..]).map_err(fetch);
        rowset.release_rows(&rows);
        data.map(|_| true)
    });
    rowset.release_accessor(accessor);
    if !outcome? {
        return Ok(None);
    }

    let reader = RecordReader::new(&record);
    if reader.status(&field)? != DBSTATUS_S_OK {
        return Ok(None);
    }
    let len = reader.length(&field)?.unwrap_or(0).min(IDENTITY_WIDTH - 1);
    let value = reader.value(&field, len)?;
    Ok(Some(String::from_utf8_lossy(value).into_owned()))
}
