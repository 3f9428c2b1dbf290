//! Statement lifecycle.
//!
//! A [`Statement`] owns one provider command. It rewrites and prepares the
//! query text, lays out parameter and row records, executes, and walks the
//! resulting rowsets through a [`StatementCursor`]. Every failure is also
//! recorded in the statement's [`ErrorContext`].

use crate::attributes::{get_flag_attribute, set_flag_attribute, AttrValue, Attribute, Flags};
use crate::charset::{ConversionContext, Direction};
use crate::cursor::{FetchOrientation, SharedRowset, StatementCursor};
use crate::diagnostics::{provider_failure, ErrorContext};
use crate::error::{Diagnostic, Error, ErrorKind, Result};
use crate::placeholder::rewrite_placeholders;
use crate::protocol::buffer::BufferLayout;
use crate::protocol::constants::*;
use crate::protocol::provider::{
    AccessorHandle, Binding, ColumnDesc, Command, ExecuteRequest, ExecuteResult, ParamData,
    ParamInfo, Property, PropertySet, PropertySetId, PropValue, RowHandle, Rowset, SequentialStream,
};
use crate::protocol::status::{HResult, ProviderError};
use crate::protocol::types::{
    match_column, read_columns_rowset, Column, ColumnBinding, ColumnInfo, ColumnMeta,
    ColumnMetadata, LogicalType, ParamDirection, ParameterBinding, Row, Value,
};
use bytes::BytesMut;
use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Size of the record a long column's stream accessor describes.
const BLOB_RECORD_SIZE: usize = STATUS_WIDTH + LENGTH_WIDTH + STREAM_SLOT_WIDTH;

/// Where a statement is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Created,
    Prepared,
    Executing,
    HasRowset,
    Fetching,
    NoRowset,
    NextResultSet,
    Closed,
}

impl StatementState {
    pub fn name(self) -> &'static str {
        match self {
            StatementState::Created => "created",
            StatementState::Prepared => "prepared",
            StatementState::Executing => "executing",
            StatementState::HasRowset => "positioned on a rowset",
            StatementState::Fetching => "fetching",
            StatementState::NoRowset => "without a rowset",
            StatementState::NextResultSet => "advancing results",
            StatementState::Closed => "closed",
        }
    }
}

/// Settings a statement inherits from its connection.
#[derive(Clone)]
pub struct StatementConfig {
    pub conv: ConversionContext,
    pub flags: Flags,
    /// Ask for a multiple-results object instead of a single rowset.
    pub multiple_results: bool,
    /// Skip the explicit prepare round trip.
    pub direct: bool,
}

/// A prepared query and the results of its last execution.
pub struct Statement {
    command: Box<dyn Command>,
    state: StatementState,
    query: String,
    markers: Vec<Option<String>>,
    supports_params: bool,
    text_set: bool,
    multiple_results: bool,
    conv: ConversionContext,
    flags: Flags,
    errors: ErrorContext,

    param_info: Option<Vec<ParamInfo>>,
    params: BTreeMap<usize, ParameterBinding>,
    param_accessor: Option<AccessorHandle>,
    param_record: BytesMut,
    param_streams: Vec<Option<Box<dyn SequentialStream>>>,

    descs: Vec<ColumnDesc>,
    columns: Vec<ColumnBinding>,
    column_info: Option<Arc<ColumnInfo>>,
    row_accessor: Option<AccessorHandle>,
    row_record: BytesMut,
    cursor: StatementCursor,
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("state", &self.state)
            .field("query", &self.query)
            .field("params", &self.params.len())
            .field("columns", &self.columns.len())
            .finish()
    }
}

impl Statement {
    /// Rewrite `sql`, hand it to `command` and, unless direct, prepare it.
    pub fn prepare(mut command: Box<dyn Command>, sql: &str, config: StatementConfig) -> Result<Self> {
        let supports_params = command.parameters().is_some();
        let (query, markers) = if supports_params {
            let parsed = rewrite_placeholders(sql)?;
            (parsed.text.into_owned(), parsed.markers)
        } else {
            (sql.to_string(), Vec::new())
        };

        let mut stmt = Self {
            command,
            state: StatementState::Created,
            query,
            markers,
            supports_params,
            text_set: false,
            multiple_results: config.multiple_results,
            conv: config.conv,
            flags: config.flags & Flags::STATEMENT_MASK,
            errors: ErrorContext::new(),
            param_info: None,
            params: BTreeMap::new(),
            param_accessor: None,
            param_record: BytesMut::new(),
            param_streams: Vec::new(),
            descs: Vec::new(),
            columns: Vec::new(),
            column_info: None,
            row_accessor: None,
            row_record: BytesMut::new(),
            cursor: StatementCursor::new(),
        };

        if supports_params {
            stmt.set_text()?;
            if !config.direct {
                stmt.prepare_command()?;
            }
        }
        stmt.state = StatementState::Prepared;
        debug!(
            query = %stmt.query,
            markers = stmt.markers.len(),
            params = supports_params,
            "statement prepared"
        );
        Ok(stmt)
    }

    fn set_text(&mut self) -> Result<()> {
        let text = self.conv.to_wide(self.query.as_bytes(), Direction::InputToQuery)?;
        if let Err(err) = self.command.set_command_text(&text) {
            return Err(provider_failure(ErrorKind::Prepare, &err));
        }
        self.text_set = true;
        Ok(())
    }

    fn prepare_command(&mut self) -> Result<()> {
        let Some(preparer) = self.command.preparer() else {
            return Ok(());
        };
        if let Err(err) = preparer.prepare() {
            return Err(provider_failure(ErrorKind::Prepare, &err));
        }
        if let Some(params) = self.command.parameters() {
            match params.parameter_info() {
                Ok(info) => self.param_info = Some(info),
                Err(err) => debug!(status = %err.status, "parameter descriptions unavailable"),
            }
        }
        Ok(())
    }

    /// Copy a failure into the error context.
    #[track_caller]
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.errors.record_error(err);
        }
        result
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.state == StatementState::Closed {
            return Err(Error::invalid_state(operation, self.state.name()));
        }
        Ok(())
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    /// Query text as sent to the provider.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Number of parameter markers found in the query.
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Outcome of the last operation.
    pub fn error_info(&self) -> &ErrorContext {
        &self.errors
    }

    /// Rows affected by the last execution, when the provider reported it.
    pub fn rows_affected(&self) -> Option<u64> {
        self.cursor.rows_affected()
    }

    // Parameters

    /// Bind an input value to a 1-based marker position.
    pub fn bind_param(&mut self, ordinal: usize, value: impl Into<Value>) -> Result<()> {
        self.bind_param_with(ordinal, value.into(), ParamDirection::Input, LogicalType::String, 0)
    }

    /// Bind a value with an explicit direction, shape hint and maximum
    /// output length (0 for the default).
    pub fn bind_param_with(
        &mut self,
        ordinal: usize,
        value: Value,
        direction: ParamDirection,
        hint: LogicalType,
        max_len: usize,
    ) -> Result<()> {
        self.errors.clear();
        let result = self.bind_inner(ordinal, value, direction, hint, max_len);
        self.track(result)
    }

    fn bind_inner(
        &mut self,
        ordinal: usize,
        value: Value,
        direction: ParamDirection,
        hint: LogicalType,
        max_len: usize,
    ) -> Result<()> {
        self.ensure_open("bind a parameter")?;
        if !self.supports_params {
            return Err(Error::unsupported("Provider does not support parameters"));
        }
        let declared = self.param_info.as_ref().map_or(0, Vec::len);
        if ordinal == 0 || ordinal > self.markers.len() || (declared > 0 && ordinal > declared) {
            return Err(Error::parameter(
                SQLSTATE_BAD_PARAMETER,
                format!("Invalid parameter number: {}", ordinal),
            ));
        }
        let mut param = ParameterBinding::new(ordinal, value, self.conv.clone())
            .with_direction(direction, hint, max_len);
        param.name = self.markers[ordinal - 1].clone();
        param.flags = self.flags & Flags::PARAM_MASK;
        trace!(ordinal, ?direction, kind = param.value.kind(), "parameter bound");
        self.params.insert(ordinal, param);
        Ok(())
    }

    /// Bind a value to every marker carrying `name`.
    pub fn bind_named(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.bind_named_with(name, value.into(), ParamDirection::Input, LogicalType::String, 0)
    }

    pub fn bind_named_with(
        &mut self,
        name: &str,
        value: Value,
        direction: ParamDirection,
        hint: LogicalType,
        max_len: usize,
    ) -> Result<()> {
        self.errors.clear();
        let wanted = name.trim_start_matches(':');
        let ordinals: Vec<usize> = self
            .markers
            .iter()
            .enumerate()
            .filter(|(_, marker)| marker.as_deref() == Some(wanted))
            .map(|(idx, _)| idx + 1)
            .collect();
        let result = match ordinals.split_last() {
            None => Err(Error::ParameterNotFound {
                name: name.to_string(),
            }),
            Some((last, rest)) => {
                let mut outcome = Ok(());
                for ordinal in rest {
                    let copy = match duplicate(&value) {
                        Some(copy) => copy,
                        None => {
                            outcome = Err(Error::parameter(
                                SQLSTATE_BAD_PARAMETER,
                                format!("Stream value cannot be bound to repeated marker :{}", wanted),
                            ));
                            break;
                        }
                    };
                    outcome = self.bind_inner(*ordinal, copy, direction, hint, max_len);
                    if outcome.is_err() {
                        break;
                    }
                }
                outcome.and_then(|_| self.bind_inner(*last, value, direction, hint, max_len))
            }
        };
        self.track(result)
    }

    /// Set a per-parameter option. Only charset options and the
    /// parameter flag options are accepted.
    pub fn set_param_option(&mut self, ordinal: usize, attr: Attribute, value: &AttrValue) -> Result<()> {
        self.errors.clear();
        let result = match self.params.get_mut(&ordinal) {
            None => Err(Error::ParameterNotFound {
                name: ordinal.to_string(),
            }),
            Some(param) => match attr.conversion_option() {
                Some(option) => param.conv.set_option(option, value.as_str()),
                None => set_flag_attribute(&mut param.flags, Flags::PARAM_MASK, attr, value).and_then(
                    |known| {
                        if known {
                            Ok(())
                        } else {
                            Err(Error::invalid_attribute(format!("{} is not a parameter option", attr)))
                        }
                    },
                ),
            },
        };
        self.track(result)
    }

    /// Current value of a bound parameter; outputs hold the provider's
    /// value after execute.
    pub fn param_value(&self, ordinal: usize) -> Option<&Value> {
        self.params.get(&ordinal).map(|p| &p.value)
    }

    pub fn param_value_mut(&mut self, ordinal: usize) -> Option<&mut Value> {
        self.params.get_mut(&ordinal).map(|p| &mut p.value)
    }

    /// Output value for a named parameter.
    pub fn named_value(&self, name: &str) -> Option<&Value> {
        let wanted = name.trim_start_matches(':');
        self.params
            .values()
            .find(|p| p.name.as_deref() == Some(wanted))
            .map(|p| &p.value)
    }

    // Execution

    /// Execute and position before the first row of the first rowset.
    pub fn execute(&mut self) -> Result<()> {
        self.errors.clear();
        let request = if self.multiple_results {
            ExecuteRequest::MultipleResults
        } else {
            ExecuteRequest::Rowset
        };
        let result = self.execute_inner(request);
        if result.is_err() && self.state != StatementState::Closed {
            self.state = StatementState::Prepared;
        }
        self.track(result)
    }

    /// Execute without asking for rows; returns the affected row count.
    pub fn execute_no_rowset(&mut self) -> Result<u64> {
        self.errors.clear();
        let result = self.execute_inner(ExecuteRequest::NoResult);
        if result.is_err() && self.state != StatementState::Closed {
            self.state = StatementState::Prepared;
        }
        let result = result.map(|_| self.cursor.rows_affected().unwrap_or(0));
        self.track(result)
    }

    fn execute_inner(&mut self, request: ExecuteRequest) -> Result<()> {
        self.ensure_open("execute")?;
        self.release_results();
        self.state = StatementState::Executing;

        self.bind_parameters()?;
        if request != ExecuteRequest::NoResult {
            self.apply_rowset_properties()?;
        }
        if !self.text_set {
            self.set_text()?;
        }

        let params = self.param_accessor.map(|accessor| ParamData {
            accessor,
            buffer: &mut self.param_record[..],
            streams: &mut self.param_streams,
        });
        let outcome = match self.command.execute(request, params) {
            Ok(outcome) => outcome,
            Err(err) => return Err(provider_failure(ErrorKind::Execute, &err)),
        };
        if outcome.status == HResult::DB_S_ERRORSOCCURRED {
            return Err(provider_failure(
                ErrorKind::Execute,
                &ProviderError::new(outcome.status),
            ));
        }
        self.cursor.set_rows_affected(outcome.rows_affected);

        for param in self.params.values_mut() {
            param.read_output(&self.param_record, &mut self.param_streams)?;
        }

        match outcome.result {
            ExecuteResult::Rowset(rowset) => self.attach(rowset)?,
            ExecuteResult::Multiple(results) => {
                self.cursor.set_results(Some(results));
                if !self.advance_results()? {
                    self.state = StatementState::NoRowset;
                }
            }
            ExecuteResult::None => self.state = StatementState::NoRowset,
        }
        debug!(
            state = self.state.name(),
            rows_affected = ?self.cursor.rows_affected(),
            columns = self.columns.len(),
            "statement executed"
        );
        Ok(())
    }

    /// Describe, lay out and write every bound parameter.
    fn bind_parameters(&mut self) -> Result<()> {
        if let Some(old) = self.param_accessor.take() {
            if let Some(params) = self.command.parameters() {
                params.release_accessor(old);
            }
        }
        self.param_streams.clear();
        if self.params.is_empty() {
            return Ok(());
        }

        let mut ordinals = Vec::with_capacity(self.params.len());
        let mut infos = Vec::with_capacity(self.params.len());
        for (ordinal, param) in self.params.iter_mut() {
            let declared = self
                .param_info
                .as_ref()
                .and_then(|info| info.iter().find(|p| p.ordinal == *ordinal));
            let info = param.prepare(declared)?.clone();
            ordinals.push(*ordinal);
            infos.push(info);
        }

        let mut layout = BufferLayout::new();
        for param in self.params.values_mut() {
            let field = layout.place(param.field_spec());
            param.set_field(field);
        }
        let bindings: Vec<Binding> = self.params.values().filter_map(|p| p.binding()).collect();
        self.param_record = layout.allocate();

        let Some(provider) = self.command.parameters() else {
            return Err(Error::unsupported("Provider does not support parameters"));
        };
        if let Err(err) = provider.set_parameter_info(&ordinals, &infos) {
            return Err(provider_failure(ErrorKind::ParameterBind, &err));
        }
        let accessor = match provider.create_accessor(&bindings, layout.total_size()) {
            Ok(accessor) => accessor,
            Err(err) => return Err(provider_failure(ErrorKind::ParameterBind, &err)),
        };
        self.param_accessor = Some(accessor);

        for param in self.params.values_mut() {
            param.write_input(&mut self.param_record[..], &mut self.param_streams)?;
        }
        trace!(count = ordinals.len(), size = layout.total_size(), "parameters written");
        Ok(())
    }

    /// Request the cursor shape the statement flags ask for.
    fn apply_rowset_properties(&mut self) -> Result<()> {
        let scrollable = self.flags.contains(Flags::SCROLLABLE);
        let server_side = self.flags.contains(Flags::SERVER_SIDE);
        let unique = !(self.flags & (Flags::UNIQUE_ROWS | Flags::ADD_TABLE | Flags::ADD_CATALOG)).is_empty();
        let Some(props) = self.command.properties() else {
            return Ok(());
        };

        if unique {
            let mut sets = [PropertySet::new(PropertySetId::Rowset)];
            sets[0].push(Property::optional(DBPROP_UNIQUEROWS, PropValue::Bool(true)));
            match props.set_properties(&mut sets) {
                Ok(status) if status == HResult::S_OK => {}
                Ok(status) => warn!(%status, "unique rows not available"),
                Err(err) => warn!(status = %err.status, "unique rows not available"),
            }
        }

        let mut sets = [PropertySet::new(PropertySetId::Rowset)];
        sets[0].push(Property::required(DBPROP_SERVERCURSOR, PropValue::Bool(server_side)));
        sets[0].push(Property::required(DBPROP_CANSCROLLBACKWARDS, PropValue::Bool(scrollable)));
        sets[0].push(Property::required(DBPROP_CANFETCHBACKWARDS, PropValue::Bool(scrollable)));
        if let Err(err) = props.set_properties(&mut sets) {
            return Err(provider_failure(ErrorKind::Execute, &err));
        }
        if let Some(prop) = sets[0].rejected_required() {
            return Err(Error::Execute(Diagnostic::new(
                HResult::E_FAIL,
                SQLSTATE_GENERAL,
                format!("Rowset property {:#x} is not supported by the provider", prop.id),
            )));
        }
        Ok(())
    }

    /// Pull result members until one carries a rowset.
    fn advance_results(&mut self) -> Result<bool> {
        loop {
            let next = match self.cursor.results_mut() {
                Some(results) => results.next_result(),
                None => return Ok(false),
            };
            let member = match next {
                Ok(member) => member,
                Err(err) => return Err(provider_failure(ErrorKind::Execute, &err)),
            };
            let Some(member) = member else {
                self.cursor.set_results(None);
                return Ok(false);
            };
            if let Some(rows) = member.rows_affected {
                self.cursor.add_rows_affected(rows);
            }
            if let Some(rowset) = member.rowset {
                self.attach(rowset)?;
                return Ok(true);
            }
        }
    }

    fn attach(&mut self, rowset: Box<dyn Rowset>) -> Result<()> {
        let shared = self.cursor.attach(rowset);
        self.bind_columns(&shared)?;
        self.state = StatementState::HasRowset;
        Ok(())
    }

    /// Plan every result column and build the row accessor.
    fn bind_columns(&mut self, shared: &SharedRowset) -> Result<()> {
        let mut rowset = shared.borrow_mut();
        let descs = match rowset.column_info() {
            Ok(descs) => descs,
            Err(err) => return Err(provider_failure(ErrorKind::Metadata, &err)),
        };
        let descs: Vec<ColumnDesc> = descs.into_iter().filter(|d| d.ordinal != 0).collect();

        let wants_metadata =
            !(self.flags & (Flags::UNIQUE_ROWS | Flags::ADD_TABLE | Flags::ADD_CATALOG)).is_empty();
        let extended = if wants_metadata {
            read_extended_metadata(&mut **rowset)
        } else {
            Vec::new()
        };

        let mut columns = Vec::with_capacity(descs.len());
        for desc in &descs {
            let mut column = ColumnBinding::plan(desc, self.flags, self.conv.clone());
            column.apply_metadata(match_column(&extended, desc.ordinal).cloned())?;
            columns.push(column);
        }
        self.columns = columns;
        self.descs = descs;
        self.build_row_accessor(&mut **rowset)?;
        self.refresh_column_info();
        Ok(())
    }

    fn refresh_column_info(&mut self) {
        let described = self.columns.iter().map(ColumnBinding::describe).collect();
        self.column_info = Some(Arc::new(ColumnInfo::new(described)));
    }

    /// Lay out the shared record and (re)create every accessor on `rowset`.
    fn build_row_accessor(&mut self, rowset: &mut dyn Rowset) -> Result<()> {
        let mut layout = BufferLayout::new();
        for column in &mut self.columns {
            column.field = column.field_spec().map(|spec| layout.place(spec));
        }
        let bindings: Vec<Binding> = self.columns.iter().filter_map(|c| c.binding()).collect();
        self.row_record = layout.allocate();

        if let Some(old) = self.row_accessor.take() {
            rowset.release_accessor(old);
        }
        if !bindings.is_empty() {
            match rowset.create_accessor(&bindings, layout.total_size()) {
                Ok(accessor) => self.row_accessor = Some(accessor),
                Err(err) => return Err(provider_failure(ErrorKind::Metadata, &err)),
            }
        }
        for column in &mut self.columns {
            if let Some(old) = column.blob_accessor.take() {
                rowset.release_accessor(old);
            }
            if column.long {
                match rowset.create_accessor(&[column.blob_binding()], BLOB_RECORD_SIZE) {
                    Ok(accessor) => column.blob_accessor = Some(accessor),
                    Err(err) => return Err(provider_failure(ErrorKind::Metadata, &err)),
                }
            }
        }
        trace!(
            columns = self.columns.len(),
            size = layout.total_size(),
            "row accessor built"
        );
        Ok(())
    }

    /// Release the current rowset, its accessors and column plans.
    fn release_rowset(&mut self) {
        if let Some(shared) = self.cursor.rowset().cloned() {
            self.cursor.release_current();
            let mut rowset = shared.borrow_mut();
            if let Some(accessor) = self.row_accessor.take() {
                rowset.release_accessor(accessor);
            }
            for column in &mut self.columns {
                if let Some(accessor) = column.blob_accessor.take() {
                    rowset.release_accessor(accessor);
                }
            }
        }
        self.cursor.release_rowset();
        self.columns.clear();
        self.descs.clear();
        self.column_info = None;
        self.row_accessor = None;
        self.row_record = BytesMut::new();
    }

    /// Release the rowset and the remaining result members.
    fn release_results(&mut self) {
        self.release_rowset();
        self.cursor.clear();
    }

    // Columns

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Descriptions of the current rowset's columns.
    pub fn columns(&self) -> Option<&Arc<ColumnInfo>> {
        self.column_info.as_ref()
    }

    /// Describe a 0-based column.
    pub fn describe(&mut self, index: usize) -> Result<Column> {
        self.errors.clear();
        let result = self.column(index).map(ColumnBinding::describe);
        self.track(result)
    }

    /// Native type, flags and extended metadata of a 0-based column.
    pub fn column_meta(&mut self, index: usize) -> Result<ColumnMeta> {
        self.errors.clear();
        let result = self.column(index).map(|column| {
            ColumnMeta::new(
                column.name.clone(),
                column.provider_type,
                column.column_flags,
                column.column_size,
                column.precision,
                column.scale,
                column.metadata.as_ref(),
            )
        });
        self.track(result)
    }

    fn column(&self, index: usize) -> Result<&ColumnBinding> {
        self.columns.get(index).ok_or(Error::ColumnIndexOutOfBounds {
            index,
            count: self.columns.len(),
        })
    }

    /// Set a per-column option and rebind the column.
    pub fn set_column_option(&mut self, index: usize, attr: Attribute, value: &AttrValue) -> Result<()> {
        self.errors.clear();
        let result = self.set_column_option_inner(index, attr, value);
        self.track(result)
    }

    fn set_column_option_inner(&mut self, index: usize, attr: Attribute, value: &AttrValue) -> Result<()> {
        self.ensure_open("set a column option")?;
        let count = self.columns.len();
        let (Some(column), Some(desc)) = (self.columns.get_mut(index), self.descs.get(index)) else {
            return Err(Error::ColumnIndexOutOfBounds { index, count });
        };
        let mut conv = column.conv.clone();
        let mut flags = column.flags;
        match attr.conversion_option() {
            Some(option) => conv.set_option(option, value.as_str())?,
            None => {
                if !set_flag_attribute(&mut flags, Flags::COLUMN_MASK, attr, value)? {
                    return Err(Error::invalid_attribute(format!("{} is not a column option", attr)));
                }
            }
        }
        let metadata = column.metadata.take();
        let mut replanned = ColumnBinding::plan(desc, flags, conv);
        replanned.apply_metadata(metadata)?;
        replanned.blob_accessor = column.blob_accessor.take();
        *column = replanned;

        let Some(shared) = self.cursor.rowset().cloned() else {
            return Ok(());
        };
        self.build_row_accessor(&mut **shared.borrow_mut())?;
        self.refresh_column_info();
        if let Some(row) = self.cursor.current() {
            self.load_row(&shared, row)?;
        }
        Ok(())
    }

    // Fetching

    /// Move the cursor. `Ok(false)` when no row is there or the statement
    /// has no rowset.
    pub fn fetch(&mut self, orientation: FetchOrientation) -> Result<bool> {
        self.errors.clear();
        let result = self.fetch_inner(orientation);
        self.track(result)
    }

    fn fetch_inner(&mut self, orientation: FetchOrientation) -> Result<bool> {
        self.ensure_open("fetch")?;
        let Some(shared) = self.cursor.rowset().cloned() else {
            return Ok(false);
        };
        self.state = StatementState::Fetching;
        let Some(plan) = self.cursor.plan_fetch(orientation)? else {
            return Ok(false);
        };
        let row = match self.cursor.execute_plan(&plan) {
            Ok(row) => row,
            Err(err) => return Err(provider_failure(ErrorKind::Fetch, &err)),
        };
        match row {
            Some(row) => {
                self.load_row(&shared, row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn load_row(&mut self, shared: &SharedRowset, row: RowHandle) -> Result<()> {
        let Some(accessor) = self.row_accessor else {
            return Ok(());
        };
        self.row_record.fill(0);
        if let Err(err) = shared.borrow_mut().get_data(row, accessor, &mut self.row_record[..]) {
            return Err(provider_failure(ErrorKind::Fetch, &err));
        }
        Ok(())
    }

    /// Fetch and decode a whole row.
    pub fn fetch_row(&mut self, orientation: FetchOrientation) -> Result<Option<Row>> {
        if !self.fetch(orientation)? {
            return Ok(None);
        }
        let mut values = Vec::with_capacity(self.columns.len());
        for index in 0..self.columns.len() {
            values.push(self.get_col(index)?);
        }
        let info = match &self.column_info {
            Some(info) => info.clone(),
            None => Arc::new(ColumnInfo::new(Vec::new())),
        };
        Ok(Some(Row::new(values, info)))
    }

    /// Fetch the next row.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        self.fetch_row(FetchOrientation::Next)
    }

    /// Read a 0-based column of the current row.
    pub fn get_col(&mut self, index: usize) -> Result<Value> {
        self.errors.clear();
        let result = self.get_col_inner(index);
        self.track(result)
    }

    fn get_col_inner(&self, index: usize) -> Result<Value> {
        let column = self.column(index)?;
        let (Some(row), Some(shared)) = (self.cursor.current(), self.cursor.rowset()) else {
            return Err(Error::invalid_state("read a column", self.state.name()));
        };
        if !column.long {
            let rowset = shared.borrow();
            return column.decode(&self.row_record, &|token| rowset.resolve_ref(token));
        }
        let Some(accessor) = column.blob_accessor else {
            return Err(Error::invalid_state("read a long column", self.state.name()));
        };
        let cell = match shared.borrow_mut().get_blob(row, accessor) {
            Ok(cell) => cell,
            Err(err) => return Err(provider_failure(ErrorKind::Fetch, &err)),
        };
        let keepalive: Rc<dyn Any> = shared.clone();
        column.open_blob(cell, keepalive)
    }

    /// Move to the next rowset, skipping members that carry only a count.
    pub fn next_rowset(&mut self) -> Result<bool> {
        self.errors.clear();
        let result = self.next_rowset_inner();
        self.track(result)
    }

    fn next_rowset_inner(&mut self) -> Result<bool> {
        self.ensure_open("advance to the next rowset")?;
        self.release_rowset();
        if self.cursor.results_mut().is_none() {
            self.state = StatementState::NoRowset;
            return Ok(false);
        }
        self.state = StatementState::NextResultSet;
        self.cursor.set_rows_affected(None);
        let found = self.advance_results()?;
        if !found {
            self.state = StatementState::NoRowset;
        }
        Ok(found)
    }

    // Attributes

    /// Set a statement option: a charset option or a statement flag.
    pub fn set_attribute(&mut self, attr: Attribute, value: &AttrValue) -> Result<()> {
        self.errors.clear();
        let result = match attr.conversion_option() {
            Some(option) => self.conv.set_option(option, value.as_str()),
            None => set_flag_attribute(&mut self.flags, Flags::STATEMENT_MASK, attr, value).and_then(|known| {
                if known {
                    Ok(())
                } else {
                    Err(Error::invalid_attribute(format!("{} is not a statement attribute", attr)))
                }
            }),
        };
        self.track(result)
    }

    pub fn get_attribute(&mut self, attr: Attribute) -> Result<AttrValue> {
        self.errors.clear();
        let result = match attr.conversion_option() {
            Some(option) => Ok(self
                .conv
                .option(option)
                .map_or(AttrValue::Null, |name| AttrValue::Str(name.to_string()))),
            None => match attr.flag() {
                Some(bits) if !Flags::STATEMENT_MASK.contains(bits) => Err(Error::invalid_attribute(
                    format!("{} is not a statement attribute", attr),
                )),
                _ => get_flag_attribute(self.flags, attr).ok_or_else(|| {
                    Error::invalid_attribute(format!("{} is not a statement attribute", attr))
                }),
            },
        };
        self.track(result)
    }

    /// Release every provider object. Long values already handed out stay
    /// readable.
    pub fn close(&mut self) {
        if self.state == StatementState::Closed {
            return;
        }
        self.release_results();
        if let Some(accessor) = self.param_accessor.take() {
            if let Some(params) = self.command.parameters() {
                params.release_accessor(accessor);
            }
        }
        self.param_streams.clear();
        self.params.clear();
        self.state = StatementState::Closed;
        debug!(query = %self.query, "statement closed");
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.close();
    }
}

/// Columns-rowset metadata; failures leave the plain column names.
fn read_extended_metadata(rowset: &mut dyn Rowset) -> Vec<ColumnMetadata> {
    match rowset.columns_rowset() {
        None => Vec::new(),
        Some(Err(err)) => {
            warn!(status = %err.status, "columns rowset unavailable");
            Vec::new()
        }
        Some(Ok(mut meta)) => match read_columns_rowset(&mut *meta) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "columns rowset unreadable");
                Vec::new()
            }
        },
    }
}

/// Copy a scalar value for binding to another marker.
fn duplicate(value: &Value) -> Option<Value> {
    match value {
        Value::Null => Some(Value::Null),
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Long(v) => Some(Value::Long(*v)),
        Value::Double(v) => Some(Value::Double(*v)),
        Value::Str(bytes) => Some(Value::Str(bytes.clone())),
        Value::Stream(_) => None,
    }
}
