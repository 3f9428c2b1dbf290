//! Cursor position tracking and fetch planning.
//!
//! Providers expose only relative movement: skip some rows, then read one
//! forward or backward. The statement keeps the logical 1-based row index
//! itself, plus the provider's next-fetch boundary, and turns each fetch
//! orientation into a restart/skip/count triple.

use crate::error::{Diagnostic, Error, Result};
use crate::protocol::constants::SQLSTATE_CURSOR_SCROLL;
use crate::protocol::provider::{MultipleResults, RowHandle, Rowset};
use crate::protocol::status::{HResult, ProviderResult};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

/// Direction of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrientation {
    /// Row 1, rewinding when the cursor has moved.
    First,
    /// 1-based row number.
    Absolute(u64),
    Prior,
    Next,
    /// Offset from the current row.
    Relative(i64),
    /// Not supported by the provider interface.
    Last,
}

/// Provider calls needed for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    /// Rewind to before the first row first.
    pub restart: bool,
    pub skip: i64,
    /// `1` reads forward, `-1` backward.
    pub count: i64,
    /// Logical index of the row the plan reads.
    pub target: i64,
}

/// Logical row index plus the provider's next-fetch boundary.
///
/// The boundary is the number of rows behind the provider position; `None`
/// once it is unknown (after a fetch that returned nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPosition {
    index: i64,
    boundary: Option<i64>,
}

impl Default for CursorPosition {
    fn default() -> Self {
        Self {
            index: 0,
            boundary: Some(0),
        }
    }
}

impl CursorPosition {
    /// Logical index of the current row; 0 before the first row.
    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn boundary(&self) -> Option<i64> {
        self.boundary
    }

    /// Work out the provider calls for `orientation`.
    ///
    /// `Ok(None)` means the target lies before the first row and no call is
    /// needed.
    pub fn plan(&self, orientation: FetchOrientation) -> Result<Option<FetchPlan>> {
        let target = match orientation {
            FetchOrientation::First => 1,
            FetchOrientation::Absolute(row) => i64::try_from(row).unwrap_or(i64::MAX),
            FetchOrientation::Next => self.index.saturating_add(1),
            FetchOrientation::Prior => self.index - 1,
            FetchOrientation::Relative(offset) => self.index.saturating_add(offset),
            FetchOrientation::Last => {
                return Err(Error::Fetch(Diagnostic::new(
                    HResult::E_NOTIMPL,
                    SQLSTATE_CURSOR_SCROLL,
                    "Cursor does not support scrolling to the last row.",
                )))
            }
        };
        if target < 1 {
            return Ok(None);
        }

        let restart = match (self.boundary, orientation) {
            (None, _) => true,
            (Some(b), FetchOrientation::First) => b != 0,
            (Some(b), FetchOrientation::Absolute(_)) => target - 1 < b,
            _ => false,
        };
        let boundary = if restart { 0 } else { self.boundary.unwrap_or(0) };

        let (skip, count) = if target > boundary {
            (target - 1 - boundary, 1)
        } else {
            (target - boundary, -1)
        };
        Ok(Some(FetchPlan {
            restart,
            skip,
            count,
            target,
        }))
    }

    /// Apply the outcome of a plan.
    pub fn advance(&mut self, plan: &FetchPlan, fetched: bool) {
        self.index = plan.target;
        self.boundary = match (fetched, plan.count > 0) {
            (false, _) => None,
            (true, true) => Some(plan.target),
            (true, false) => Some(plan.target - 1),
        };
    }

    /// Target before the first row: nothing to read.
    pub fn before_first(&mut self) {
        self.index = 0;
    }
}

/// Rowset shared between a statement and any blob streams opened on it.
pub type SharedRowset = Rc<RefCell<Box<dyn Rowset>>>;

/// The rowset a statement is reading and its position.
pub struct StatementCursor {
    rowset: Option<SharedRowset>,
    current: Option<RowHandle>,
    position: CursorPosition,
    results: Option<Box<dyn MultipleResults>>,
    rows_affected: Option<u64>,
}

impl Default for StatementCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementCursor {
    pub fn new() -> Self {
        Self {
            rowset: None,
            current: None,
            position: CursorPosition::default(),
            results: None,
            rows_affected: None,
        }
    }

    pub fn rowset(&self) -> Option<&SharedRowset> {
        self.rowset.as_ref()
    }

    /// Start reading a new rowset.
    pub fn attach(&mut self, rowset: Box<dyn Rowset>) -> SharedRowset {
        self.release_rowset();
        let shared: SharedRowset = Rc::new(RefCell::new(rowset));
        self.rowset = Some(shared.clone());
        shared
    }

    pub fn set_results(&mut self, results: Option<Box<dyn MultipleResults>>) {
        self.results = results;
    }

    pub fn results_mut(&mut self) -> Option<&mut Box<dyn MultipleResults>> {
        self.results.as_mut()
    }

    pub fn current(&self) -> Option<RowHandle> {
        self.current
    }

    pub fn position(&self) -> &CursorPosition {
        &self.position
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    pub fn set_rows_affected(&mut self, rows: Option<u64>) {
        self.rows_affected = rows;
    }

    /// Add a member's count to the running total.
    pub fn add_rows_affected(&mut self, rows: u64) {
        self.rows_affected = Some(self.rows_affected.unwrap_or(0) + rows);
    }

    /// Release the held row handle, if any.
    pub fn release_current(&mut self) {
        if let (Some(row), Some(rowset)) = (self.current.take(), &self.rowset) {
            rowset.borrow_mut().release_rows(&[row]);
        }
    }

    /// Drop the statement's hold on the rowset. Blob streams opened on it
    /// keep it alive until they close.
    pub fn release_rowset(&mut self) {
        self.release_current();
        self.rowset = None;
        self.position = CursorPosition::default();
    }

    /// Release everything, including the remaining result members.
    pub fn clear(&mut self) {
        self.release_rowset();
        self.results = None;
        self.rows_affected = None;
    }

    /// Release the held row and plan the move `orientation` names.
    ///
    /// `Ok(None)` when the target lies before the first row.
    pub fn plan_fetch(&mut self, orientation: FetchOrientation) -> Result<Option<FetchPlan>> {
        let plan = self.position.plan(orientation)?;
        self.release_current();
        match &plan {
            Some(plan) => debug!(?orientation, ?plan, "fetch planned"),
            None => self.position.before_first(),
        }
        Ok(plan)
    }

    /// Run a plan against the rowset.
    pub fn execute_plan(&mut self, plan: &FetchPlan) -> ProviderResult<Option<RowHandle>> {
        let Some(rowset) = self.rowset.clone() else {
            return Ok(None);
        };
        let mut rowset = rowset.borrow_mut();
        if plan.restart {
            rowset.restart_position()?;
            self.position = CursorPosition::default();
        }
        let handles = rowset.get_next_rows(plan.skip, plan.count)?;
        let row = handles.first().copied();
        if handles.len() > 1 {
            rowset.release_rows(&handles[1..]);
        }
        self.position.advance(plan, row.is_some());
        self.current = row;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(position: &mut CursorPosition, orientation: FetchOrientation, rows: i64) -> Option<FetchPlan> {
        let plan = position.plan(orientation).unwrap()?;
        let target = plan.target;
        position.advance(&plan, (1..=rows).contains(&target));
        Some(plan)
    }

    #[test]
    fn test_next_reads_forward_without_skipping() {
        let mut pos = CursorPosition::default();
        for expected in 1..=3 {
            let plan = run(&mut pos, FetchOrientation::Next, 3).unwrap();
            assert_eq!((plan.restart, plan.skip, plan.count), (false, 0, 1));
            assert_eq!(pos.index(), expected);
        }
        run(&mut pos, FetchOrientation::Next, 3);
        assert_eq!(pos.index(), 4);
        assert_eq!(pos.boundary(), None);
    }

    #[test]
    fn test_first_rewinds_after_moving() {
        let mut pos = CursorPosition::default();
        let plan = pos.plan(FetchOrientation::First).unwrap().unwrap();
        assert!(!plan.restart);
        run(&mut pos, FetchOrientation::Absolute(3), 5);
        let plan = run(&mut pos, FetchOrientation::First, 5).unwrap();
        assert!(plan.restart);
        assert_eq!((plan.skip, plan.count), (0, 1));
        assert_eq!(pos.index(), 1);
    }

    #[test]
    fn test_absolute_behind_boundary_restarts() {
        let mut pos = CursorPosition::default();
        run(&mut pos, FetchOrientation::Absolute(4), 5);
        assert_eq!(pos.boundary(), Some(4));
        let plan = run(&mut pos, FetchOrientation::Absolute(2), 5).unwrap();
        assert!(plan.restart);
        assert_eq!((plan.skip, plan.count), (1, 1));
        let plan = run(&mut pos, FetchOrientation::Absolute(5), 5).unwrap();
        assert!(!plan.restart);
        assert_eq!(plan.skip, 2);
    }

    #[test]
    fn test_prior_reads_backward() {
        let mut pos = CursorPosition::default();
        run(&mut pos, FetchOrientation::Absolute(3), 5);
        let plan = run(&mut pos, FetchOrientation::Prior, 5).unwrap();
        assert_eq!((plan.restart, plan.skip, plan.count), (false, -1, -1));
        assert_eq!(pos.index(), 2);
        assert_eq!(pos.boundary(), Some(1));
        // Next after a backward read skips the row just read.
        let plan = run(&mut pos, FetchOrientation::Next, 5).unwrap();
        assert_eq!((plan.skip, plan.count), (1, 1));
        assert_eq!(pos.index(), 3);
    }

    #[test]
    fn test_relative_and_before_first() {
        let mut pos = CursorPosition::default();
        run(&mut pos, FetchOrientation::Relative(2), 5);
        assert_eq!(pos.index(), 2);
        assert!(pos.plan(FetchOrientation::Relative(-2)).unwrap().is_none());
        assert!(pos.plan(FetchOrientation::Absolute(0)).unwrap().is_none());
    }

    #[test]
    fn test_unknown_boundary_restarts() {
        let mut pos = CursorPosition::default();
        run(&mut pos, FetchOrientation::Absolute(9), 3);
        assert_eq!(pos.boundary(), None);
        let plan = run(&mut pos, FetchOrientation::Prior, 9).unwrap();
        assert!(plan.restart);
        assert_eq!((plan.skip, plan.count, plan.target), (7, 1, 8));
    }

    #[test]
    fn test_last_is_unsupported() {
        let err = CursorPosition::default().plan(FetchOrientation::Last).unwrap_err();
        assert_eq!(err.sql_state(), "42872");
        let diagnostic = err.diagnostic().unwrap();
        assert_eq!(diagnostic.status, HResult::E_NOTIMPL);
        assert_eq!(diagnostic.message, "Cursor does not support scrolling to the last row.");
    }
}
