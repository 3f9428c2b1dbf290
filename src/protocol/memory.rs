//! In-memory data provider.
//!
//! Implements every provider trait over scripted tables, so the bridge can
//! run end to end without a database. Commands are matched by their exact
//! text; each execution is captured together with the parameter data the
//! provider received. Live rowsets and streams are counted so callers can
//! check that resources are released.

use crate::charset::{BuiltinCharsets, CharsetService, CodePage};
use crate::protocol::buffer::{RecordReader, RecordWriter};
use crate::protocol::constants::*;
use crate::protocol::provider::*;
use crate::protocol::status::{ErrorRecord, HResult, ProviderError, ProviderResult};
use crate::protocol::types::encode_timestamp;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::SeekFrom;
use std::rc::Rc;

/// A stored cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
}

impl Datum {
    fn text(&self) -> Option<String> {
        match self {
            Datum::Null | Datum::Bytes(_) => None,
            Datum::Int(v) => Some(v.to_string()),
            Datum::Float(v) => Some(v.to_string()),
            Datum::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Datum::Text(s) => Some(s.clone()),
            Datum::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        }
    }

    fn int(&self) -> Option<i64> {
        match self {
            Datum::Int(v) => Some(*v),
            Datum::Bool(b) => Some(*b as i64),
            Datum::Float(v) => Some(*v as i64),
            Datum::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn float(&self) -> Option<f64> {
        match self {
            Datum::Int(v) => Some(*v as f64),
            Datum::Float(v) => Some(*v),
            Datum::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int(v as i64)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Datum {
    fn from(v: Vec<u8>) -> Self {
        Datum::Bytes(v)
    }
}

impl From<NaiveDateTime> for Datum {
    fn from(v: NaiveDateTime) -> Self {
        Datum::Timestamp(v)
    }
}

/// Column of a scripted table.
#[derive(Debug, Clone)]
pub struct MemoryColumn {
    pub name: String,
    /// Metadata property this column stands for, in columns rowsets.
    pub property: Option<u32>,
    pub db_type: u16,
    pub size: usize,
    pub precision: u8,
    pub scale: u8,
    pub flags: u32,
    pub base_column: Option<String>,
    pub base_table: Option<String>,
    pub base_catalog: Option<String>,
    pub default_value: Option<String>,
    pub key: bool,
    pub unique: bool,
    pub auto_increment: bool,
}

impl MemoryColumn {
    pub fn new(name: &str, db_type: u16, size: usize) -> Self {
        Self {
            name: name.to_string(),
            property: None,
            db_type,
            size,
            precision: 0,
            scale: 0,
            flags: DBCOLUMNFLAGS_MAYBENULL | DBCOLUMNFLAGS_ISNULLABLE,
            base_column: None,
            base_table: None,
            base_catalog: None,
            default_value: None,
            key: false,
            unique: false,
            auto_increment: false,
        }
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, DBTYPE_I4, 4).precision(10).fixed()
    }

    pub fn bigint(name: &str) -> Self {
        Self::new(name, DBTYPE_I8, 8).precision(19).fixed()
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, DBTYPE_R8, 8).precision(15).fixed()
    }

    pub fn money(name: &str) -> Self {
        Self::new(name, DBTYPE_CY, 8).precision(19).fixed()
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, DBTYPE_BOOL, 2).fixed()
    }

    pub fn text(name: &str, size: usize) -> Self {
        Self::new(name, DBTYPE_STR, size)
    }

    pub fn wide(name: &str, size: usize) -> Self {
        Self::new(name, DBTYPE_WSTR, size)
    }

    pub fn binary(name: &str, size: usize) -> Self {
        Self::new(name, DBTYPE_BYTES, size)
    }

    pub fn timestamp(name: &str) -> Self {
        Self::new(name, DBTYPE_DBTIMESTAMP, TIMESTAMP_WIDTH).precision(23).fixed()
    }

    pub fn variant(name: &str) -> Self {
        Self::new(name, DBTYPE_VARIANT, VARIANT_WIDTH)
    }

    /// `ntext`-style long wide text.
    pub fn wide_long(name: &str) -> Self {
        Self::new(name, DBTYPE_WSTR, usize::MAX / 4).long()
    }

    /// `image`-style long binary.
    pub fn blob(name: &str) -> Self {
        Self::new(name, DBTYPE_BYTES, usize::MAX / 4).long()
    }

    pub fn precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.flags |= DBCOLUMNFLAGS_ISFIXEDLENGTH;
        self
    }

    pub fn long(mut self) -> Self {
        self.flags |= DBCOLUMNFLAGS_ISLONG;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.flags &= !(DBCOLUMNFLAGS_MAYBENULL | DBCOLUMNFLAGS_ISNULLABLE);
        self
    }

    pub fn by_ref(mut self) -> Self {
        self.db_type |= DBTYPE_BYREF;
        self
    }

    pub fn table(mut self, table: &str) -> Self {
        self.base_table = Some(table.to_string());
        self
    }

    pub fn catalog(mut self, catalog: &str) -> Self {
        self.base_catalog = Some(catalog.to_string());
        self
    }

    pub fn base_name(mut self, name: &str) -> Self {
        self.base_column = Some(name.to_string());
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    fn metadata(property: u32, db_type: u16, size: usize) -> Self {
        let mut column = Self::new("", db_type, size);
        column.property = Some(property);
        column
    }

    fn desc(&self, ordinal: usize) -> ColumnDesc {
        ColumnDesc {
            id: match self.property {
                Some(id) => ColumnId::Property(id),
                None => ColumnId::Name(self.name.clone()),
            },
            name: Some(wide(&self.name)),
            ordinal,
            db_type: self.db_type,
            column_size: self.size,
            precision: self.precision,
            scale: self.scale,
            flags: self.flags,
        }
    }
}

/// A scripted result table.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<MemoryColumn>,
    pub rows: Vec<Vec<Datum>>,
}

impl MemoryTable {
    pub fn new(columns: Vec<MemoryColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, row: Vec<Datum>) -> Self {
        self.rows.push(row);
        self
    }

    /// The columns rowset describing this table.
    fn columns_rowset(&self) -> MemoryTable {
        let text = |id| MemoryColumn::metadata(id, DBTYPE_WSTR, 128);
        let mut meta = MemoryTable::new(vec![
            text(DBCOLUMN_NAME),
            MemoryColumn::metadata(DBCOLUMN_NUMBER, DBTYPE_UI4, 4),
            text(DBCOLUMN_BASECATALOGNAME),
            text(DBCOLUMN_BASECOLUMNNAME),
            text(DBCOLUMN_BASETABLENAME),
            MemoryColumn::metadata(DBCOLUMN_COMPUTEMODE, DBTYPE_I4, 4),
            text(DBCOLUMN_DEFAULTVALUE),
            MemoryColumn::metadata(DBCOLUMN_ISAUTOINCREMENT, DBTYPE_BOOL, 2),
            MemoryColumn::metadata(DBCOLUMN_ISUNIQUE, DBTYPE_BOOL, 2),
            MemoryColumn::metadata(DBCOLUMN_KEYCOLUMN, DBTYPE_BOOL, 2),
        ]);
        let optional = |v: &Option<String>| v.as_deref().map(Datum::from).unwrap_or(Datum::Null);
        for (idx, column) in self.columns.iter().enumerate() {
            meta.rows.push(vec![
                Datum::from(column.name.as_str()),
                Datum::Int(idx as i64 + 1),
                optional(&column.base_catalog),
                optional(&column.base_column),
                optional(&column.base_table),
                Datum::Int(DBCOMPUTEMODE_NOTCOMPUTED as i64),
                optional(&column.default_value),
                Datum::Bool(column.auto_increment),
                Datum::Bool(column.unique),
                Datum::Bool(column.key),
            ]);
        }
        meta
    }
}

/// One member of a scripted execution.
#[derive(Debug, Clone)]
pub enum ScriptedResult {
    Rows(MemoryTable),
    Count(u64),
}

/// What executing a command text produces.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub results: Vec<ScriptedResult>,
    pub param_info: Option<Vec<ParamInfo>>,
    /// Values returned through output parameters, by ordinal.
    pub outputs: Vec<(usize, Datum)>,
    pub error: Option<ProviderError>,
    /// Report `DB_S_ERRORSOCCURRED` alongside the results.
    pub partial_failure: bool,
}

impl Script {
    pub fn rows(table: MemoryTable) -> Self {
        Self {
            results: vec![ScriptedResult::Rows(table)],
            ..Default::default()
        }
    }

    pub fn count(rows: u64) -> Self {
        Self {
            results: vec![ScriptedResult::Count(rows)],
            ..Default::default()
        }
    }

    pub fn multiple(results: Vec<ScriptedResult>) -> Self {
        Self {
            results,
            ..Default::default()
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_param_info(mut self, info: Vec<ParamInfo>) -> Self {
        self.param_info = Some(info);
        self
    }

    pub fn with_output(mut self, ordinal: usize, value: impl Into<Datum>) -> Self {
        self.outputs.push((ordinal, value.into()));
        self
    }

    pub fn with_partial_failure(mut self) -> Self {
        self.partial_failure = true;
        self
    }
}

/// Parameter slot as received by execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedParam {
    pub ordinal: usize,
    pub db_type: u16,
    pub param_io: u32,
    pub status: u32,
    pub length: Option<usize>,
    /// Slot bytes, or the full stream contents for stream parameters.
    pub data: Vec<u8>,
}

/// One execution as seen by the provider.
#[derive(Debug, Clone)]
pub struct ExecutedCommand {
    pub text: String,
    pub request: ExecuteRequest,
    pub params: Vec<CapturedParam>,
    pub rowset_properties: Vec<PropertySet>,
}

struct MemoryState {
    scripts: HashMap<String, Script>,
    executed: Vec<ExecutedCommand>,
    prepared: Vec<String>,
    param_descriptions: Vec<(Vec<usize>, Vec<ParamBindInfo>)>,
    init_properties: Vec<PropertySet>,
    created: Vec<String>,
    init_strings: Vec<String>,
    rejected: HashSet<u32>,
    info: HashMap<u32, PropValue>,
    supports_parameters: bool,
    supports_prepare: bool,
    supports_transactions: bool,
    supports_columns_rowset: bool,
    supports_provider_properties: bool,
    seekable_blobs: bool,
    narrow: CodePage,
    fail_initialize: Option<ProviderError>,
    in_transaction: bool,
    transaction_log: Vec<&'static str>,
    live_rowsets: Rc<Cell<usize>>,
    live_streams: Rc<Cell<usize>>,
}

/// In-memory provider; clones share state.
#[derive(Clone)]
pub struct MemoryProvider {
    state: Rc<RefCell<MemoryState>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        let mut info = HashMap::new();
        info.insert(DBPROP_DBMSNAME, PropValue::text("Microsoft SQL Server"));
        info.insert(DBPROP_DBMSVER, PropValue::text("16.00.1000"));
        info.insert(DBPROP_PROVIDERFRIENDLYNAME, PropValue::text("Memory Provider"));
        info.insert(DBPROP_PROVIDERVER, PropValue::text("1.0.0"));
        info.insert(DBPROP_MULTIPLERESULTS, PropValue::I4(DBPROPVAL_MR_SUPPORTED));
        Self {
            state: Rc::new(RefCell::new(MemoryState {
                scripts: HashMap::new(),
                executed: Vec::new(),
                prepared: Vec::new(),
                param_descriptions: Vec::new(),
                init_properties: Vec::new(),
                created: Vec::new(),
                init_strings: Vec::new(),
                rejected: HashSet::new(),
                info,
                supports_parameters: true,
                supports_prepare: true,
                supports_transactions: true,
                supports_columns_rowset: true,
                supports_provider_properties: true,
                seekable_blobs: false,
                narrow: CodePage::UTF8,
                fail_initialize: None,
                in_transaction: false,
                transaction_log: Vec::new(),
                live_rowsets: Rc::new(Cell::new(0)),
                live_streams: Rc::new(Cell::new(0)),
            })),
        }
    }

    /// Register what executing `sql` produces.
    pub fn script(&self, sql: &str, script: Script) -> &Self {
        self.state.borrow_mut().scripts.insert(sql.to_string(), script);
        self
    }

    /// Report every property `id` as not supported.
    pub fn reject_property(&self, id: u32) -> &Self {
        self.state.borrow_mut().rejected.insert(id);
        self
    }

    pub fn set_info(&self, id: u32, value: PropValue) -> &Self {
        self.state.borrow_mut().info.insert(id, value);
        self
    }

    pub fn without_transactions(&self) -> &Self {
        self.state.borrow_mut().supports_transactions = false;
        self
    }

    pub fn without_multiple_results(&self) -> &Self {
        self.set_info(DBPROP_MULTIPLERESULTS, PropValue::I4(DBPROPVAL_MR_NOTSUPPORTED))
    }

    pub fn without_parameters(&self) -> &Self {
        self.state.borrow_mut().supports_parameters = false;
        self
    }

    pub fn without_prepare(&self) -> &Self {
        self.state.borrow_mut().supports_prepare = false;
        self
    }

    pub fn without_columns_rowset(&self) -> &Self {
        self.state.borrow_mut().supports_columns_rowset = false;
        self
    }

    pub fn without_provider_properties(&self) -> &Self {
        self.state.borrow_mut().supports_provider_properties = false;
        self
    }

    pub fn with_seekable_blobs(&self) -> &Self {
        self.state.borrow_mut().seekable_blobs = true;
        self
    }

    /// Charset of narrow text the provider hands out.
    pub fn with_narrow_charset(&self, code_page: CodePage) -> &Self {
        self.state.borrow_mut().narrow = code_page;
        self
    }

    pub fn fail_initialize(&self, error: ProviderError) -> &Self {
        self.state.borrow_mut().fail_initialize = Some(error);
        self
    }

    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.state.borrow().executed.clone()
    }

    pub fn last_executed(&self) -> Option<ExecutedCommand> {
        self.state.borrow().executed.last().cloned()
    }

    pub fn prepared(&self) -> Vec<String> {
        self.state.borrow().prepared.clone()
    }

    pub fn param_descriptions(&self) -> Vec<(Vec<usize>, Vec<ParamBindInfo>)> {
        self.state.borrow().param_descriptions.clone()
    }

    pub fn init_properties(&self) -> Vec<PropertySet> {
        self.state.borrow().init_properties.clone()
    }

    /// Provider names passed to `create_instance`.
    pub fn created(&self) -> Vec<String> {
        self.state.borrow().created.clone()
    }

    pub fn init_strings(&self) -> Vec<String> {
        self.state.borrow().init_strings.clone()
    }

    pub fn transaction_log(&self) -> Vec<&'static str> {
        self.state.borrow().transaction_log.clone()
    }

    pub fn live_rowsets(&self) -> usize {
        self.state.borrow().live_rowsets.get()
    }

    pub fn live_streams(&self) -> usize {
        self.state.borrow().live_streams.get()
    }
}

impl DataInitialize for MemoryProvider {
    fn create_instance(&self, provider: &str) -> ProviderResult<Box<dyn DataSource>> {
        self.state.borrow_mut().created.push(provider.to_string());
        Ok(Box::new(MemoryDataSource::new(self.state.clone())))
    }

    fn data_source(&self, init_string: &[u16]) -> ProviderResult<Box<dyn DataSource>> {
        let text = from_wide(init_string);
        self.state.borrow_mut().init_strings.push(text.clone());
        let mut source = MemoryDataSource::new(self.state.clone());
        for part in text.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let entry = match key.trim().to_ascii_lowercase().as_str() {
                "data source" => (PropertySetId::DbInit, DBPROP_INIT_DATASOURCE, PropValue::text(value)),
                "initial catalog" => (PropertySetId::DbInit, DBPROP_INIT_CATALOG, PropValue::text(value)),
                "user id" => (PropertySetId::DbInit, DBPROP_AUTH_USERID, PropValue::text(value)),
                "password" => (PropertySetId::DbInit, DBPROP_AUTH_PASSWORD, PropValue::text(value)),
                "integrated security" => (PropertySetId::DbInit, DBPROP_AUTH_INTEGRATED, PropValue::text(value)),
                "connect timeout" => match value.parse() {
                    Ok(secs) => (PropertySetId::DbInit, DBPROP_INIT_TIMEOUT, PropValue::I4(secs)),
                    Err(_) => return Err(ProviderError::new(HResult::DB_E_BADVALUES)),
                },
                "ole db services" => match value.parse() {
                    Ok(bits) => (PropertySetId::DbInit, DBPROP_INIT_OLEDBSERVICES, PropValue::I4(bits)),
                    Err(_) => return Err(ProviderError::new(HResult::DB_E_BADVALUES)),
                },
                "application name" => (PropertySetId::ProviderInit, SSPROP_INIT_APPNAME, PropValue::text(value)),
                "use encryption for data" => (
                    PropertySetId::ProviderInit,
                    SSPROP_INIT_ENCRYPT,
                    PropValue::Bool(value.eq_ignore_ascii_case("true")),
                ),
                "auto translate" => (
                    PropertySetId::ProviderInit,
                    SSPROP_INIT_AUTOTRANSLATE,
                    PropValue::Bool(value.eq_ignore_ascii_case("true")),
                ),
                _ => continue,
            };
            source.props.insert((entry.0, entry.1), entry.2);
        }
        Ok(Box::new(source))
    }
}

struct MemoryDataSource {
    state: Rc<RefCell<MemoryState>>,
    props: HashMap<(PropertySetId, u32), PropValue>,
    initialized: bool,
}

impl MemoryDataSource {
    fn new(state: Rc<RefCell<MemoryState>>) -> Self {
        Self {
            state,
            props: HashMap::new(),
            initialized: false,
        }
    }
}

/// Mark unsupported properties; `DB_S_ERRORSOCCURRED` if any failed.
fn apply_statuses(state: &MemoryState, sets: &mut [PropertySet]) -> HResult {
    let mut failed = false;
    for set in sets.iter_mut() {
        let set_supported =
            set.set != PropertySetId::ProviderInit || state.supports_provider_properties;
        for prop in &mut set.properties {
            prop.status = if !set_supported || state.rejected.contains(&prop.id) {
                failed = true;
                PropStatus::NotSupported
            } else {
                PropStatus::Ok
            };
        }
    }
    if failed {
        HResult::DB_S_ERRORSOCCURRED
    } else {
        HResult::S_OK
    }
}

impl DataSource for MemoryDataSource {
    fn set_properties(&mut self, sets: &mut [PropertySet]) -> ProviderResult<HResult> {
        let mut state = self.state.borrow_mut();
        let status = apply_statuses(&state, sets);
        for set in sets.iter() {
            for prop in set.properties.iter().filter(|p| p.status == PropStatus::Ok) {
                self.props.insert((set.set, prop.id), prop.value.clone());
            }
        }
        state.init_properties.extend(sets.iter().cloned());
        Ok(status)
    }

    fn get_property(&self, set: PropertySetId, id: u32) -> Option<PropValue> {
        if let Some(value) = self.props.get(&(set, id)) {
            return Some(value.clone());
        }
        match set {
            PropertySetId::DataSourceInfo => self.state.borrow().info.get(&id).cloned(),
            _ => None,
        }
    }

    fn supports_property_set(&self, set: PropertySetId) -> bool {
        set != PropertySetId::ProviderInit || self.state.borrow().supports_provider_properties
    }

    fn initialize(&mut self) -> ProviderResult<()> {
        if let Some(err) = self.state.borrow().fail_initialize.clone() {
            return Err(err);
        }
        self.initialized = true;
        Ok(())
    }

    fn create_session(&mut self) -> ProviderResult<Box<dyn Session>> {
        if !self.initialized {
            return Err(ProviderError::new(HResult::E_UNEXPECTED));
        }
        Ok(Box::new(MemorySession {
            state: self.state.clone(),
        }))
    }
}

struct MemorySession {
    state: Rc<RefCell<MemoryState>>,
}

impl Session for MemorySession {
    fn create_command(&mut self) -> ProviderResult<Box<dyn Command>> {
        Ok(Box::new(MemoryCommand {
            state: self.state.clone(),
            text: None,
            accessors: HashMap::new(),
            next_accessor: 1,
            rowset_properties: Vec::new(),
            scrollable: false,
        }))
    }

    fn transactions(&mut self) -> Option<&mut dyn TransactionLocal> {
        if self.state.borrow().supports_transactions {
            Some(self)
        } else {
            None
        }
    }
}

fn no_transaction() -> ProviderError {
    ProviderError::new(HResult::E_UNEXPECTED)
        .with_record(ErrorRecord::new("No transaction is active.").with_sql_state("25000"))
}

impl TransactionLocal for MemorySession {
    fn start_transaction(&mut self) -> ProviderResult<()> {
        let mut state = self.state.borrow_mut();
        if state.in_transaction {
            return Err(ProviderError::new(HResult::E_UNEXPECTED)
                .with_record(ErrorRecord::new("A transaction is already active.").with_sql_state("25000")));
        }
        state.in_transaction = true;
        state.transaction_log.push("begin");
        Ok(())
    }

    fn commit(&mut self) -> ProviderResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.in_transaction {
            return Err(no_transaction());
        }
        state.in_transaction = false;
        state.transaction_log.push("commit");
        Ok(())
    }

    fn abort(&mut self) -> ProviderResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.in_transaction {
            return Err(no_transaction());
        }
        state.in_transaction = false;
        state.transaction_log.push("rollback");
        Ok(())
    }
}

type Accessor = (Vec<Binding>, usize);

struct MemoryCommand {
    state: Rc<RefCell<MemoryState>>,
    text: Option<String>,
    accessors: HashMap<u64, Accessor>,
    next_accessor: u64,
    rowset_properties: Vec<PropertySet>,
    scrollable: bool,
}

fn unknown_object(text: &str) -> ProviderError {
    ProviderError::new(HResult::E_FAIL).with_record(
        ErrorRecord::new(format!("Invalid object name '{}'.", text))
            .with_sql_state("42S02")
            .with_native_error(208),
    )
}

fn check_bindings(bindings: &[Binding], row_size: usize) -> ProviderResult<()> {
    for binding in bindings {
        let mut ends = vec![binding.status_offset + STATUS_WIDTH];
        if binding.has_part(DBPART_LENGTH) {
            ends.push(binding.length_offset + LENGTH_WIDTH);
        }
        if binding.has_part(DBPART_VALUE) {
            ends.push(binding.value_offset + binding.max_len);
        }
        if ends.into_iter().any(|end| end > row_size) {
            return Err(ProviderError::new(HResult::DB_E_BADBINDINFO));
        }
    }
    Ok(())
}

fn drain_stream(stream: &mut dyn SequentialStream) -> ProviderResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

impl MemoryCommand {
    fn capture(&self, params: &mut ParamData<'_>) -> ProviderResult<Vec<CapturedParam>> {
        let (bindings, _) = self
            .accessors
            .get(&params.accessor.0)
            .ok_or_else(|| ProviderError::new(HResult::DB_E_BADACCESSORHANDLE))?;
        let reader = RecordReader::new(&*params.buffer);
        let bad = |_| ProviderError::new(HResult::DB_E_BADBINDINFO);
        let mut captured = Vec::new();
        for binding in bindings {
            let status = reader.read_u32_le(binding.status_offset).map_err(bad)?;
            let length = if binding.has_part(DBPART_LENGTH) {
                Some(reader.read_u64_le(binding.length_offset).map_err(bad)? as usize)
            } else {
                None
            };
            let data = if binding.param_io & DBPARAMIO_INPUT == 0
                || !binding.has_part(DBPART_VALUE)
                || status == DBSTATUS_S_ISNULL
            {
                Vec::new()
            } else if binding.db_type == DBTYPE_IUNKNOWN {
                let index = reader.read_u64_le(binding.value_offset).map_err(bad)? as usize;
                match params.streams.get_mut(index).and_then(Option::take) {
                    Some(mut stream) => drain_stream(stream.as_mut())?,
                    None => return Err(ProviderError::new(HResult::DB_E_BADBINDINFO)),
                }
            } else {
                let len = length.unwrap_or(binding.max_len).min(binding.max_len);
                reader.slice(binding.value_offset, len).map_err(bad)?.to_vec()
            };
            captured.push(CapturedParam {
                ordinal: binding.ordinal,
                db_type: binding.db_type,
                param_io: binding.param_io,
                status,
                length,
                data,
            });
        }
        Ok(captured)
    }

    fn write_outputs(&self, script: &Script, params: &mut ParamData<'_>) -> ProviderResult<()> {
        let Some((bindings, _)) = self.accessors.get(&params.accessor.0) else {
            return Ok(());
        };
        let narrow = self.state.borrow().narrow;
        let seekable = self.state.borrow().seekable_blobs;
        let live = self.state.borrow().live_streams.clone();
        for (ordinal, datum) in &script.outputs {
            let Some(binding) = bindings
                .iter()
                .find(|b| b.ordinal == *ordinal && b.param_io & DBPARAMIO_OUTPUT != 0)
            else {
                continue;
            };
            if binding.db_type == DBTYPE_IUNKNOWN {
                let bad = |_| ProviderError::new(HResult::DB_E_BADBINDINFO);
                if *datum == Datum::Null {
                    RecordWriter::new(&mut *params.buffer)
                        .write_u32_le(binding.status_offset, DBSTATUS_S_ISNULL)
                        .map_err(bad)?;
                    continue;
                }
                let bytes = blob_bytes(datum, DBTYPE_STR, narrow);
                let index = RecordReader::new(&*params.buffer)
                    .read_u64_le(binding.value_offset)
                    .map_err(bad)? as usize;
                let mut writer = RecordWriter::new(&mut *params.buffer);
                writer.write_u32_le(binding.status_offset, DBSTATUS_S_OK).map_err(bad)?;
                if binding.has_part(DBPART_LENGTH) {
                    writer.write_u64_le(binding.length_offset, bytes.len() as u64).map_err(bad)?;
                }
                if let Some(slot) = params.streams.get_mut(index) {
                    *slot = Some(Box::new(
                        MemoryStream::new(Bytes::from(bytes), seekable).tracked(live.clone()),
                    ));
                }
            } else {
                let mut refs = HashMap::new();
                let mut next = 1;
                write_datum(binding, datum, &mut *params.buffer, narrow, &mut refs, &mut next)?;
            }
        }
        Ok(())
    }
}

impl Command for MemoryCommand {
    fn set_command_text(&mut self, text: &[u16]) -> ProviderResult<()> {
        self.text = Some(from_wide(text));
        Ok(())
    }

    fn parameters(&mut self) -> Option<&mut dyn CommandWithParameters> {
        if self.state.borrow().supports_parameters {
            Some(self)
        } else {
            None
        }
    }

    fn preparer(&mut self) -> Option<&mut dyn CommandPrepare> {
        if self.state.borrow().supports_prepare {
            Some(self)
        } else {
            None
        }
    }

    fn properties(&mut self) -> Option<&mut dyn CommandProperties> {
        Some(self)
    }

    fn execute(
        &mut self,
        request: ExecuteRequest,
        params: Option<ParamData<'_>>,
    ) -> ProviderResult<ExecuteOutcome> {
        let text = self
            .text
            .clone()
            .ok_or_else(|| ProviderError::new(HResult::DB_E_NOCOMMAND))?;
        let script = self.state.borrow().scripts.get(&text).cloned();

        let mut params = params;
        let captured = match params.as_mut() {
            Some(p) => self.capture(p)?,
            None => Vec::new(),
        };
        self.state.borrow_mut().executed.push(ExecutedCommand {
            text: text.clone(),
            request,
            params: captured,
            rowset_properties: self.rowset_properties.clone(),
        });

        let script = script.ok_or_else(|| unknown_object(&text))?;
        if let Some(err) = &script.error {
            return Err(err.clone());
        }
        if let Some(p) = params.as_mut() {
            self.write_outputs(&script, p)?;
        }

        let rows_affected = script.results.iter().find_map(|r| match r {
            ScriptedResult::Count(n) => Some(*n),
            ScriptedResult::Rows(_) => None,
        });
        let result = match request {
            ExecuteRequest::NoResult => ExecuteResult::None,
            ExecuteRequest::Rowset => script
                .results
                .iter()
                .find_map(|r| match r {
                    ScriptedResult::Rows(table) => Some(table.clone()),
                    ScriptedResult::Count(_) => None,
                })
                .map(|table| {
                    ExecuteResult::Rowset(Box::new(MemoryRowset::new(
                        self.state.clone(),
                        table,
                        self.scrollable,
                    )))
                })
                .unwrap_or(ExecuteResult::None),
            ExecuteRequest::MultipleResults => ExecuteResult::Multiple(Box::new(MemoryResults {
                state: self.state.clone(),
                queue: script.results.iter().cloned().collect(),
                scrollable: self.scrollable,
            })),
        };
        let rows_affected = match request {
            ExecuteRequest::MultipleResults => None,
            _ => rows_affected,
        };
        Ok(ExecuteOutcome {
            status: if script.partial_failure {
                HResult::DB_S_ERRORSOCCURRED
            } else {
                HResult::S_OK
            },
            rows_affected,
            result,
        })
    }
}

impl CommandWithParameters for MemoryCommand {
    fn parameter_info(&mut self) -> ProviderResult<Vec<ParamInfo>> {
        let text = self
            .text
            .as_ref()
            .ok_or_else(|| ProviderError::new(HResult::DB_E_NOCOMMAND))?;
        self.state
            .borrow()
            .scripts
            .get(text)
            .and_then(|s| s.param_info.clone())
            .ok_or_else(|| ProviderError::new(HResult::DB_E_NOTSUPPORTED))
    }

    fn set_parameter_info(&mut self, ordinals: &[usize], info: &[ParamBindInfo]) -> ProviderResult<()> {
        if ordinals.len() != info.len() {
            return Err(ProviderError::new(HResult::E_INVALIDARG));
        }
        self.state
            .borrow_mut()
            .param_descriptions
            .push((ordinals.to_vec(), info.to_vec()));
        Ok(())
    }

    fn create_accessor(&mut self, bindings: &[Binding], row_size: usize) -> ProviderResult<AccessorHandle> {
        check_bindings(bindings, row_size)?;
        let handle = self.next_accessor;
        self.next_accessor += 1;
        self.accessors.insert(handle, (bindings.to_vec(), row_size));
        Ok(AccessorHandle(handle))
    }

    fn release_accessor(&mut self, accessor: AccessorHandle) {
        self.accessors.remove(&accessor.0);
    }
}

impl CommandPrepare for MemoryCommand {
    fn prepare(&mut self) -> ProviderResult<()> {
        let text = self
            .text
            .clone()
            .ok_or_else(|| ProviderError::new(HResult::DB_E_NOCOMMAND))?;
        self.state.borrow_mut().prepared.push(text);
        Ok(())
    }
}

impl CommandProperties for MemoryCommand {
    fn set_properties(&mut self, sets: &mut [PropertySet]) -> ProviderResult<HResult> {
        let status = apply_statuses(&self.state.borrow(), sets);
        for set in sets.iter() {
            for prop in set.properties.iter().filter(|p| p.status == PropStatus::Ok) {
                if matches!(prop.id, DBPROP_CANSCROLLBACKWARDS | DBPROP_CANFETCHBACKWARDS)
                    && prop.value == PropValue::Bool(true)
                {
                    self.scrollable = true;
                }
            }
        }
        self.rowset_properties.extend(sets.iter().cloned());
        Ok(status)
    }
}

struct MemoryResults {
    state: Rc<RefCell<MemoryState>>,
    queue: VecDeque<ScriptedResult>,
    scrollable: bool,
}

impl MultipleResults for MemoryResults {
    fn next_result(&mut self) -> ProviderResult<Option<ResultMember>> {
        Ok(self.queue.pop_front().map(|member| match member {
            ScriptedResult::Rows(table) => ResultMember {
                rows_affected: None,
                rowset: Some(Box::new(MemoryRowset::new(
                    self.state.clone(),
                    table,
                    self.scrollable,
                ))),
            },
            ScriptedResult::Count(n) => ResultMember {
                rows_affected: Some(n),
                rowset: None,
            },
        }))
    }
}

struct MemoryRowset {
    state: Rc<RefCell<MemoryState>>,
    table: MemoryTable,
    position: usize,
    held: HashSet<u64>,
    accessors: HashMap<u64, Accessor>,
    next_accessor: u64,
    refs: HashMap<u64, Bytes>,
    next_token: u64,
    scrollable: bool,
    live: Rc<Cell<usize>>,
}

impl MemoryRowset {
    fn new(state: Rc<RefCell<MemoryState>>, table: MemoryTable, scrollable: bool) -> Self {
        let live = state.borrow().live_rowsets.clone();
        live.set(live.get() + 1);
        Self {
            state,
            table,
            position: 0,
            held: HashSet::new(),
            accessors: HashMap::new(),
            next_accessor: 1,
            refs: HashMap::new(),
            next_token: 1,
            scrollable,
            live,
        }
    }

    fn row(&self, row: RowHandle) -> ProviderResult<&[Datum]> {
        if !self.held.contains(&row.0) {
            return Err(ProviderError::new(HResult::DB_E_BADROWHANDLE));
        }
        self.table
            .rows
            .get((row.0 as usize).wrapping_sub(1))
            .map(Vec::as_slice)
            .ok_or_else(|| ProviderError::new(HResult::DB_E_BADROWHANDLE))
    }
}

impl Drop for MemoryRowset {
    fn drop(&mut self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}

impl Rowset for MemoryRowset {
    fn column_info(&self) -> ProviderResult<Vec<ColumnDesc>> {
        Ok(self
            .table
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| column.desc(idx + 1))
            .collect())
    }

    fn create_accessor(&mut self, bindings: &[Binding], row_size: usize) -> ProviderResult<AccessorHandle> {
        if bindings
            .iter()
            .any(|b| b.ordinal == 0 || b.ordinal > self.table.columns.len())
        {
            return Err(ProviderError::new(HResult::DB_E_BADBINDINFO));
        }
        let stream_bindings = bindings.iter().filter(|b| b.db_type == DBTYPE_IUNKNOWN).count();
        if stream_bindings == 0 {
            check_bindings(bindings, row_size)?;
        }
        let handle = self.next_accessor;
        self.next_accessor += 1;
        self.accessors.insert(handle, (bindings.to_vec(), row_size));
        Ok(AccessorHandle(handle))
    }

    fn release_accessor(&mut self, accessor: AccessorHandle) {
        self.accessors.remove(&accessor.0);
    }

    fn get_next_rows(&mut self, skip: i64, count: i64) -> ProviderResult<Vec<RowHandle>> {
        if !self.held.is_empty() {
            return Err(ProviderError::new(HResult::DB_E_ROWSNOTRELEASED));
        }
        if count < 0 && !self.scrollable {
            return Err(ProviderError::new(HResult::DB_E_CANTFETCHBACKWARDS));
        }
        if skip < 0 && !self.scrollable {
            return Err(ProviderError::new(HResult::DB_E_CANTSCROLLBACKWARDS));
        }
        let total = self.table.rows.len() as i64;
        let start = self.position as i64 + skip;
        if start < 0 {
            return Err(ProviderError::new(HResult::DB_E_BADSTARTPOSITION));
        }
        if start > total {
            self.position = total as usize;
            return Ok(Vec::new());
        }
        let handles: Vec<RowHandle> = if count >= 0 {
            let take = count.min(total - start);
            self.position = (start + take) as usize;
            (start..start + take).map(|idx| RowHandle(idx as u64 + 1)).collect()
        } else {
            let take = (-count).min(start);
            self.position = (start - take) as usize;
            (start - take..start)
                .rev()
                .map(|idx| RowHandle(idx as u64 + 1))
                .collect()
        };
        self.held.extend(handles.iter().map(|h| h.0));
        Ok(handles)
    }

    fn release_rows(&mut self, rows: &[RowHandle]) {
        for row in rows {
            self.held.remove(&row.0);
        }
    }

    fn restart_position(&mut self) -> ProviderResult<()> {
        if !self.held.is_empty() {
            return Err(ProviderError::new(HResult::DB_E_ROWSNOTRELEASED));
        }
        self.position = 0;
        Ok(())
    }

    fn get_data(&mut self, row: RowHandle, accessor: AccessorHandle, buffer: &mut [u8]) -> ProviderResult<()> {
        let cells = self.row(row)?.to_vec();
        let (bindings, _) = self
            .accessors
            .get(&accessor.0)
            .cloned()
            .ok_or_else(|| ProviderError::new(HResult::DB_E_BADACCESSORHANDLE))?;
        let narrow = self.state.borrow().narrow;
        let mut failed = false;
        for binding in &bindings {
            let datum = &cells[binding.ordinal - 1];
            if binding.db_type == DBTYPE_IUNKNOWN {
                return Err(ProviderError::new(HResult::DB_E_BADBINDINFO));
            }
            let status = write_datum(binding, datum, buffer, narrow, &mut self.refs, &mut self.next_token)?;
            failed |= status == DBSTATUS_E_CANTCONVERTVALUE;
        }
        if failed {
            return Err(ProviderError::new(HResult::DB_E_ERRORSOCCURRED));
        }
        Ok(())
    }

    fn get_blob(&mut self, row: RowHandle, accessor: AccessorHandle) -> ProviderResult<BlobCell> {
        let cells = self.row(row)?.to_vec();
        let (bindings, _) = self
            .accessors
            .get(&accessor.0)
            .ok_or_else(|| ProviderError::new(HResult::DB_E_BADACCESSORHANDLE))?;
        let binding = match bindings.as_slice() {
            [binding] if binding.db_type == DBTYPE_IUNKNOWN => binding,
            _ => return Err(ProviderError::new(HResult::DB_E_BADBINDINFO)),
        };
        let column = &self.table.columns[binding.ordinal - 1];
        let datum = &cells[binding.ordinal - 1];
        if *datum == Datum::Null {
            return Ok(BlobCell {
                status: DBSTATUS_S_ISNULL,
                length: 0,
                stream: None,
            });
        }
        let state = self.state.borrow();
        let bytes = blob_bytes(datum, column.db_type & !DBTYPE_BYREF, state.narrow);
        let length = bytes.len();
        let stream = MemoryStream::new(Bytes::from(bytes), state.seekable_blobs)
            .tracked(state.live_streams.clone());
        Ok(BlobCell {
            status: DBSTATUS_S_OK,
            length,
            stream: Some(Box::new(stream)),
        })
    }

    fn resolve_ref(&self, token: u64) -> Option<Bytes> {
        self.refs.get(&token).cloned()
    }

    fn columns_rowset(&mut self) -> Option<ProviderResult<Box<dyn Rowset>>> {
        if !self.state.borrow().supports_columns_rowset {
            return None;
        }
        let meta = self.table.columns_rowset();
        Some(Ok(Box::new(MemoryRowset::new(self.state.clone(), meta, false))))
    }
}

fn utf16_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn narrow_bytes(text: &str, code_page: CodePage) -> Vec<u8> {
    if code_page == CodePage::UTF8 {
        return text.as_bytes().to_vec();
    }
    match BuiltinCharsets.create_converter(CodePage::UTF8, code_page) {
        Some(converter) => {
            let mut out = vec![0u8; text.len() + 4];
            let step = converter.convert(text.as_bytes(), &mut out);
            out.truncate(step.produced);
            out
        }
        None => text.as_bytes().to_vec(),
    }
}

/// Bytes a long cell streams out, in the column's native form.
fn blob_bytes(datum: &Datum, db_type: u16, narrow: CodePage) -> Vec<u8> {
    match datum {
        Datum::Bytes(raw) => raw.clone(),
        other => {
            let text = other.text().unwrap_or_default();
            match db_type {
                DBTYPE_WSTR | DBTYPE_BSTR => utf16_bytes(&text),
                DBTYPE_BYTES => text.into_bytes(),
                _ => narrow_bytes(&text, narrow),
            }
        }
    }
}

fn ole_date(ts: &NaiveDateTime) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    let seconds = (*ts - epoch).num_milliseconds() as f64 / 1000.0;
    seconds / 86_400.0
}

/// Write one cell through a binding; returns the status written.
fn write_datum(
    binding: &Binding,
    datum: &Datum,
    buffer: &mut [u8],
    narrow: CodePage,
    refs: &mut HashMap<u64, Bytes>,
    next_token: &mut u64,
) -> ProviderResult<u32> {
    let bad = |_| ProviderError::new(HResult::DB_E_BADBINDINFO);
    let mut writer = RecordWriter::new(buffer);
    let value_at = binding.value_offset;
    let set_length = |writer: &mut RecordWriter<'_>, len: usize| -> ProviderResult<()> {
        if binding.has_part(DBPART_LENGTH) {
            writer.write_u64_le(binding.length_offset, len as u64).map_err(bad)?;
        }
        Ok(())
    };

    if *datum == Datum::Null {
        writer.write_u32_le(binding.status_offset, DBSTATUS_S_ISNULL).map_err(bad)?;
        set_length(&mut writer, 0)?;
        return Ok(DBSTATUS_S_ISNULL);
    }

    let base = binding.db_type & !DBTYPE_BYREF;
    let mut status = DBSTATUS_S_OK;
    let scalar: Option<Vec<u8>> = match base {
        DBTYPE_I4 => datum.int().map(|v| (v as i32).to_le_bytes().to_vec()),
        DBTYPE_I8 => datum.int().map(|v| v.to_le_bytes().to_vec()),
        DBTYPE_I2 => datum.int().map(|v| (v as i16).to_le_bytes().to_vec()),
        DBTYPE_UI1 => datum.int().map(|v| vec![v as u8]),
        DBTYPE_UI4 => datum.int().map(|v| (v as u32).to_le_bytes().to_vec()),
        DBTYPE_R8 => datum.float().map(|v| v.to_le_bytes().to_vec()),
        DBTYPE_BOOL => datum
            .int()
            .map(|v| (if v != 0 { -1i16 } else { 0 }).to_le_bytes().to_vec()),
        DBTYPE_DBTIMESTAMP => match datum {
            Datum::Timestamp(ts) => Some(encode_timestamp(ts).to_vec()),
            _ => None,
        },
        DBTYPE_VARIANT => {
            let mut slot = vec![0u8; VARIANT_WIDTH];
            let (tag, payload): (u16, Vec<u8>) = match datum {
                Datum::Int(v) => match i32::try_from(*v) {
                    Ok(small) => (VT_I4, small.to_le_bytes().to_vec()),
                    Err(_) => (VT_I8, v.to_le_bytes().to_vec()),
                },
                Datum::Float(v) => (VT_R8, v.to_le_bytes().to_vec()),
                Datum::Bool(b) => (VT_BOOL, (if *b { -1i16 } else { 0 }).to_le_bytes().to_vec()),
                Datum::Timestamp(ts) => (VT_DATE, ole_date(ts).to_le_bytes().to_vec()),
                Datum::Text(s) => {
                    let token = *next_token;
                    *next_token += 1;
                    refs.insert(token, Bytes::from(utf16_bytes(s)));
                    (VT_BSTR, token.to_le_bytes().to_vec())
                }
                Datum::Bytes(_) | Datum::Null => (VT_EMPTY, Vec::new()),
            };
            slot[0..2].copy_from_slice(&tag.to_le_bytes());
            slot[8..8 + payload.len()].copy_from_slice(&payload);
            (tag != VT_EMPTY).then_some(slot)
        }
        DBTYPE_STR | DBTYPE_WSTR | DBTYPE_BYTES => None,
        _ => None,
    };

    if let Some(bytes) = scalar {
        writer.write_bytes(value_at, &bytes).map_err(bad)?;
        writer.write_u32_le(binding.status_offset, status).map_err(bad)?;
        set_length(&mut writer, bytes.len())?;
        return Ok(status);
    }

    let (data, terminator) = match (base, datum) {
        (DBTYPE_STR, d) => (d.text().map(|t| narrow_bytes(&t, narrow)), 1),
        (DBTYPE_WSTR, d) => (d.text().map(|t| utf16_bytes(&t)), 2),
        (DBTYPE_BYTES, Datum::Bytes(raw)) => (Some(raw.clone()), 0),
        (DBTYPE_BYTES, d) => (d.text().map(String::into_bytes), 0),
        _ => (None, 0),
    };
    let Some(data) = data else {
        writer
            .write_u32_le(binding.status_offset, DBSTATUS_E_CANTCONVERTVALUE)
            .map_err(bad)?;
        return Ok(DBSTATUS_E_CANTCONVERTVALUE);
    };

    if binding.db_type & DBTYPE_BYREF != 0 {
        let token = *next_token;
        *next_token += 1;
        let len = data.len();
        refs.insert(token, Bytes::from(data));
        writer.write_u64_le(value_at, token).map_err(bad)?;
        writer.write_u32_le(binding.status_offset, status).map_err(bad)?;
        set_length(&mut writer, len)?;
        return Ok(status);
    }

    let capacity = binding.max_len.saturating_sub(terminator);
    let copied = data.len().min(capacity);
    if data.len() > capacity {
        status = DBSTATUS_S_TRUNCATED;
    }
    writer.write_bytes(value_at, &data[..copied]).map_err(bad)?;
    if terminator > 0 && copied + terminator <= binding.max_len {
        writer.zero(value_at + copied, terminator).map_err(bad)?;
    }
    writer.write_u32_le(binding.status_offset, status).map_err(bad)?;
    set_length(&mut writer, data.len())?;
    Ok(status)
}

/// Byte stream over memory, optionally seekable.
pub struct MemoryStream {
    data: Bytes,
    pos: usize,
    seekable: bool,
    live: Option<Rc<Cell<usize>>>,
}

impl MemoryStream {
    pub fn new(data: Bytes, seekable: bool) -> Self {
        Self {
            data,
            pos: 0,
            seekable,
            live: None,
        }
    }

    /// Count this stream in `counter` until it is dropped.
    pub fn tracked(mut self, counter: Rc<Cell<usize>>) -> Self {
        counter.set(counter.get() + 1);
        self.live = Some(counter);
        self
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.set(live.get().saturating_sub(1));
        }
    }
}

impl SequentialStream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> ProviderResult<usize> {
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn seekable(&mut self) -> Option<&mut dyn SeekableStream> {
        if self.seekable {
            Some(self)
        } else {
            None
        }
    }
}

impl SeekableStream for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> ProviderResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.data.len() as i64 + delta,
        };
        if target < 0 {
            return Err(ProviderError::new(HResult::E_INVALIDARG));
        }
        self.pos = target as usize;
        Ok(target as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::buffer::{BufferLayout, FieldSpec};

    fn people() -> MemoryTable {
        MemoryTable::new(vec![MemoryColumn::int("id"), MemoryColumn::text("name", 10)])
            .row(vec![1.into(), "ann".into()])
            .row(vec![2.into(), "bob".into()])
            .row(vec![3.into(), Datum::Null])
    }

    fn open_rowset(provider: &MemoryProvider, scrollable: bool) -> MemoryRowset {
        MemoryRowset::new(provider.state.clone(), people(), scrollable)
    }

    #[test]
    fn test_next_rows_positions() {
        let provider = MemoryProvider::new();
        let mut rowset = open_rowset(&provider, true);
        let rows = rowset.get_next_rows(0, 1).unwrap();
        assert_eq!(rows, vec![RowHandle(1)]);
        assert!(matches!(
            rowset.get_next_rows(0, 1),
            Err(ProviderError { status: HResult::DB_E_ROWSNOTRELEASED, .. })
        ));
        rowset.release_rows(&rows);
        assert_eq!(rowset.get_next_rows(1, 1).unwrap(), vec![RowHandle(3)]);
        rowset.release_rows(&[RowHandle(3)]);
        assert!(rowset.get_next_rows(0, 1).unwrap().is_empty());
        // Backward read from the end returns the last row.
        assert_eq!(rowset.get_next_rows(0, -1).unwrap(), vec![RowHandle(3)]);
        rowset.release_rows(&[RowHandle(3)]);
        assert!(rowset.get_next_rows(-5, 1).is_err());
    }

    #[test]
    fn test_forward_only_rejects_backward() {
        let provider = MemoryProvider::new();
        let mut rowset = open_rowset(&provider, false);
        assert!(rowset.get_next_rows(0, -1).is_err());
        assert!(rowset.get_next_rows(-1, 1).is_err());
        assert_eq!(provider.live_rowsets(), 1);
        drop(rowset);
        assert_eq!(provider.live_rowsets(), 0);
    }

    #[test]
    fn test_get_data_truncates_and_nulls() {
        let provider = MemoryProvider::new();
        let mut rowset = open_rowset(&provider, false);
        let mut layout = BufferLayout::new();
        let field = layout.place(FieldSpec::variable(3));
        let binding = Binding::for_field(2, DBTYPE_STR, &field, DBPARAMIO_NOTPARAM);
        let accessor = rowset.create_accessor(&[binding], layout.total_size()).unwrap();
        let mut record = layout.allocate();

        let rows = rowset.get_next_rows(0, 1).unwrap();
        rowset.get_data(rows[0], accessor, &mut record).unwrap();
        let reader = RecordReader::new(&record);
        assert_eq!(reader.status(&field).unwrap(), DBSTATUS_S_TRUNCATED);
        assert_eq!(reader.length(&field).unwrap(), Some(3));
        assert_eq!(reader.value(&field, 3).unwrap(), b"an\0");
        rowset.release_rows(&rows);

        let rows = rowset.get_next_rows(1, 1).unwrap();
        rowset.get_data(rows[0], accessor, &mut record).unwrap();
        assert_eq!(RecordReader::new(&record).status(&field).unwrap(), DBSTATUS_S_ISNULL);
    }

    #[test]
    fn test_seekable_stream() {
        let mut stream = MemoryStream::new(Bytes::from_static(b"hello"), true);
        let seek = stream.seekable().unwrap();
        assert_eq!(seek.seek(SeekFrom::End(-2)).unwrap(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert!(MemoryStream::new(Bytes::new(), false).seekable().is_none());
    }

    #[test]
    fn test_init_string_properties() {
        let provider = MemoryProvider::new();
        let source = provider
            .data_source(&wide("Provider=SQLOLEDB;Data Source=db1;Connect Timeout=15;Application Name=app"))
            .unwrap();
        assert_eq!(
            source.get_property(PropertySetId::DbInit, DBPROP_INIT_DATASOURCE),
            Some(PropValue::text("db1"))
        );
        assert_eq!(
            source.get_property(PropertySetId::DbInit, DBPROP_INIT_TIMEOUT),
            Some(PropValue::I4(15))
        );
        assert_eq!(
            source.get_property(PropertySetId::ProviderInit, SSPROP_INIT_APPNAME),
            Some(PropValue::text("app"))
        );
        assert!(provider.data_source(&wide("Connect Timeout=soon")).is_err());
    }
}
