//! Error context attached to connections and statements.
//!
//! Failed provider calls are rendered by [`render`] (provider records, the
//! static status table or the platform error text) into a SQL state and
//! message. Every error leaving a connection or statement operation then
//! lands in that object's context through [`ErrorContext::record_error`].

use crate::errmsg::status_text;
use crate::error::{Diagnostic, Error, ErrorKind};
use crate::protocol::constants::{SQLSTATE_GENERAL, SQLSTATE_PROVIDER, SQLSTATE_SUCCESS};
use crate::protocol::status::{ErrorRecord, HResult, ProviderError, FACILITY_WIN32};
use std::fmt;
use std::io;
use std::panic::Location;

/// Last operation outcome for a connection or statement.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    status: HResult,
    location: Option<&'static Location<'static>>,
    message: Option<String>,
    sql_state: String,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            status: HResult::S_OK,
            location: None,
            message: None,
            sql_state: SQLSTATE_SUCCESS.to_string(),
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation's error. Errors without a provider diagnostic
    /// are stored as `E_FAIL` with their own SQL state and text.
    #[track_caller]
    pub fn record_error(&mut self, err: &Error) -> Diagnostic {
        match err.diagnostic() {
            Some(diagnostic) => {
                self.set_error(diagnostic.status, &diagnostic.sql_state, diagnostic.message.clone())
            }
            None => self.set_error(HResult::E_FAIL, err.sql_state(), err.to_string()),
        }
    }

    /// Record a synthetic failure raised by the bridge itself.
    #[track_caller]
    pub fn set_error(
        &mut self,
        status: HResult,
        sql_state: &str,
        message: impl Into<String>,
    ) -> Diagnostic {
        self.status = status;
        self.location = Some(Location::caller());
        self.sql_state = sql_state.chars().take(5).collect();
        self.message = Some(message.into());
        Diagnostic::new(self.status, self.sql_state.clone(), self.message())
    }

    /// Reset to the success state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn status(&self) -> HResult {
        self.status
    }

    pub fn sql_state(&self) -> &str {
        &self.sql_state
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    /// Source location of the call that recorded the failure.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        self.location
    }

    pub fn is_error(&self) -> bool {
        self.status.is_failure()
    }

    /// Current failure as a diagnostic, `None` after success.
    pub fn diagnostic(&self) -> Option<Diagnostic> {
        if !self.is_error() {
            return None;
        }
        Some(Diagnostic::new(self.status, self.sql_state.clone(), self.message()))
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SQLSTATE[{}] [{}] {}", self.sql_state, self.status, self.message())
    }
}

/// Render a failure status into a SQL state and message.
pub fn render(status: HResult, records: &[ErrorRecord]) -> (String, String) {
    if let Some(first) = records.first() {
        let mut message = String::new();
        let mut previous: Option<&str> = None;
        for record in records {
            let text = record.description.trim();
            if text.is_empty() || previous == Some(text) {
                continue;
            }
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(text);
            previous = Some(text);
        }
        let sql_state = match first.sql_state.as_deref() {
            Some(state) if !state.is_empty() && state.len() <= 5 => state.to_string(),
            _ => SQLSTATE_PROVIDER.to_string(),
        };
        return (sql_state, message);
    }

    let message = if let Some(text) = status_text(status) {
        text.to_string()
    } else if status.facility() == FACILITY_WIN32 {
        io::Error::from_raw_os_error(status.code() as i32).to_string()
    } else {
        format!("Unknown error {}", status)
    };
    (SQLSTATE_GENERAL.to_string(), message)
}

/// Turn a failed provider call into an error of the given kind.
///
/// Composite "errors occurred" statuses are reported as a plain failure.
pub fn provider_failure(kind: ErrorKind, err: &ProviderError) -> Error {
    let status = if err.status.is_success() {
        HResult::E_FAIL
    } else {
        err.status.normalized()
    };
    let (sql_state, message) = render(status, &err.records);
    kind.wrap(Diagnostic::new(status, sql_state, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_success() {
        let ctx = ErrorContext::new();
        assert_eq!(ctx.sql_state(), "00000");
        assert!(!ctx.is_error());
        assert!(ctx.diagnostic().is_none());
    }

    #[test]
    fn test_provider_failure_normalizes_composite_status() {
        let err = provider_failure(
            ErrorKind::Execute,
            &ProviderError::new(HResult::DB_S_ERRORSOCCURRED),
        );
        assert!(matches!(err, Error::Execute(_)));
        assert_eq!(err.diagnostic().map(|d| d.status), Some(HResult::E_FAIL));
        assert_eq!(err.sql_state(), "HY000");
    }

    #[test]
    fn test_records_joined_without_consecutive_duplicates() {
        let failure = ProviderError::new(HResult::E_FAIL)
            .with_record(ErrorRecord::new("Invalid column name 'x'.").with_sql_state("42S22"))
            .with_record(ErrorRecord::new("Invalid column name 'x'."))
            .with_record(ErrorRecord::new("Statement(s) could not be prepared."));
        let err = provider_failure(ErrorKind::Prepare, &failure);
        let mut ctx = ErrorContext::new();
        let diagnostic = ctx.record_error(&err);
        assert_eq!(diagnostic.sql_state, "42S22");
        assert_eq!(
            diagnostic.message,
            "Invalid column name 'x'. Statement(s) could not be prepared."
        );
        assert!(ctx.location().is_some());
    }

    #[test]
    fn test_overlong_state_falls_back() {
        let records = vec![ErrorRecord::new("boom").with_sql_state("TOOLONG")];
        let (state, message) = render(HResult::E_FAIL, &records);
        assert_eq!(state, "58004");
        assert_eq!(message, "boom");
    }

    #[test]
    fn test_static_table_fallback() {
        let (state, message) = render(HResult::DB_E_CANNOTRESTART, &[]);
        assert_eq!(state, "HY000");
        assert_eq!(message, "Rowset position cannot be restarted.");
    }

    #[test]
    fn test_unknown_status_text() {
        let (_, message) = render(HResult(0x8123_0001_u32 as i32), &[]);
        assert_eq!(message, "Unknown error 0x81230001");
    }

    #[test]
    fn test_success_resets() {
        let mut ctx = ErrorContext::new();
        ctx.set_error(HResult::E_FAIL, "HY093", "Invalid parameter number");
        assert_eq!(ctx.to_string(), "SQLSTATE[HY093] [0x80004005] Invalid parameter number");
        ctx.clear();
        assert_eq!(ctx.sql_state(), "00000");
    }

    #[test]
    fn test_local_errors_recorded_with_their_state() {
        let mut ctx = ErrorContext::new();
        let err = Error::ColumnIndexOutOfBounds { index: 4, count: 2 };
        let diagnostic = ctx.record_error(&err);
        assert_eq!(diagnostic.status, HResult::E_FAIL);
        assert_eq!(ctx.sql_state(), err.sql_state());
        assert_eq!(ctx.message(), err.to_string());
        assert!(ctx.location().is_some_and(|l| l.file().ends_with("diagnostics.rs")));
    }
}
