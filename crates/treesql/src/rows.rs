//! Streaming cursor over the results of a query.
use std::sync::Arc;

use bytes::Bytes;
use tracing::{trace, warn};
use treestore::TreeScan;

use crate::errors::{Result, TreeSqlError, internal};
use crate::expr::RowContext;
use crate::planner::QueryPlan;
use crate::value::{RowValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No rows read yet.
    Created,
    Iterating,
    /// All rows have been produced. Further reads keep returning
    /// `EndOfRows`.
    Exhausted,
    Closed,
}

/// Cursor producing output rows for a query.
///
/// Rows are filtered and projected one storage entry at a time. The
/// underlying scan is released on close, on drop, or after an internal
/// error.
#[derive(Debug)]
pub struct Rows {
    plan: Arc<QueryPlan>,
    scan: Option<Box<dyn TreeScan>>,
    args: Vec<Value>,
    row: RowContext,
    state: CursorState,
    /// Rows that passed the filter but were dropped by the offset.
    skipped: u64,
    emitted: u64,
}

impl Rows {
    pub(crate) fn new(plan: Arc<QueryPlan>, scan: Box<dyn TreeScan>, args: Vec<Value>) -> Self {
        Rows {
            plan,
            scan: Some(scan),
            args,
            row: RowContext::new(),
            state: CursorState::Created,
            skipped: 0,
            emitted: 0,
        }
    }

    /// Names of the output columns. Unnamed columns are empty strings.
    pub fn columns(&self) -> &[String] {
        &self.plan.columns
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Write the next row into `dest`, which must have one slot per output
    /// column.
    ///
    /// Returns `TreeSqlError::EndOfRows` once all rows have been read, and
    /// keeps returning it on every later call.
    pub fn next(&mut self, dest: &mut [RowValue]) -> Result<()> {
        match self.state {
            CursorState::Closed => return Err(TreeSqlError::Closed("rows")),
            CursorState::Exhausted => return Err(TreeSqlError::EndOfRows),
            CursorState::Created | CursorState::Iterating => (),
        }

        if dest.len() != self.plan.columns.len() {
            return Err(TreeSqlError::InvalidArgument(format!(
                "expected {} destination slots, got {}",
                self.plan.columns.len(),
                dest.len()
            )));
        }

        if self.plan.limit.is_some_and(|limit| self.emitted >= limit) {
            return Err(self.exhaust());
        }
        self.state = CursorState::Iterating;

        match self.read_next(dest) {
            Ok(true) => {
                self.emitted += 1;
                Ok(())
            }
            Ok(false) => Err(self.exhaust()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Read the next row into a freshly allocated vector, returning `None`
    /// at the end.
    pub fn next_row(&mut self) -> Result<Option<Vec<RowValue>>> {
        let mut row = vec![RowValue::default(); self.plan.columns.len()];
        match self.next(&mut row) {
            Ok(()) => Ok(Some(row)),
            Err(TreeSqlError::EndOfRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Iterate over the remaining rows.
    pub fn records(&mut self) -> Records<'_> {
        Records { rows: self }
    }

    /// Release the underlying scan. Closing more than once is fine.
    pub fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        self.state = CursorState::Closed;
        match self.scan.take() {
            Some(mut scan) => Ok(scan.close()?),
            None => Ok(()),
        }
    }

    /// Advance the scan until a row passes the filter and the offset, then
    /// project it into `dest`. Returns false when the scan runs out.
    fn read_next(&mut self, dest: &mut [RowValue]) -> Result<bool> {
        let plan = &self.plan;
        let scan = self
            .scan
            .as_mut()
            .ok_or_else(|| internal!("row cursor has no scan"))?;

        loop {
            if !scan.advance()? {
                return Ok(false);
            }
            self.row.fill(&plan.scan_columns, scan.current())?;

            if let Some(filter) = &plan.filter {
                match filter.eval(&self.row, &self.args)? {
                    Value::Boolean(true) => (),
                    Value::Boolean(false) => continue,
                    other => {
                        return Err(TreeSqlError::Eval(format!(
                            "filter must evaluate to a Boolean, got {}",
                            other.type_name()
                        )));
                    }
                }
            }

            if self.skipped < plan.offset {
                self.skipped += 1;
                continue;
            }

            let value = plan.projection.eval(&self.row, &self.args)?;
            write_output(value, dest)?;
            return Ok(true);
        }
    }

    fn exhaust(&mut self) -> TreeSqlError {
        if self.state != CursorState::Exhausted {
            trace!(emitted = self.emitted, "rows exhausted");
        }
        self.state = CursorState::Exhausted;
        TreeSqlError::EndOfRows
    }

    /// Internal errors are defects and stop the cursor for good. Anything
    /// else is returned as is.
    fn fail(&mut self, err: TreeSqlError) -> TreeSqlError {
        if matches!(err, TreeSqlError::Internal(_)) {
            warn!(%err, "halting row cursor");
            if let Err(close_err) = self.close() {
                warn!(%close_err, "failed to close scan after internal error");
            }
        }
        err
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(%e, "failed to close rows");
        }
    }
}

/// Iterator over the remaining rows of a cursor.
#[derive(Debug)]
pub struct Records<'a> {
    rows: &'a mut Rows,
}

impl Iterator for Records<'_> {
    type Item = Result<Vec<RowValue>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next_row().transpose()
    }
}

/// Unpack a projected value into the output slots.
///
/// A tuple fills one slot per element, anything else fills a single slot.
fn write_output(value: Value, dest: &mut [RowValue]) -> Result<()> {
    match value {
        Value::Tuple(values) => {
            if values.len() != dest.len() {
                return Err(internal!(
                    "projection produced {} values for {} output columns",
                    values.len(),
                    dest.len()
                ));
            }
            for (slot, value) in dest.iter_mut().zip(values) {
                *slot = to_row_value(value)?;
            }
        }
        value => {
            if dest.len() != 1 {
                return Err(internal!(
                    "projection produced 1 value for {} output columns",
                    dest.len()
                ));
            }
            dest[0] = to_row_value(value)?;
        }
    }
    Ok(())
}

fn to_row_value(value: Value) -> Result<RowValue> {
    Ok(match value {
        Value::Boolean(v) => RowValue::Boolean(v),
        Value::Int64(v) => RowValue::Int64(v),
        Value::UInt64(v) => RowValue::UInt64(v),
        Value::Float64(v) => RowValue::Float64(v),
        Value::Utf8(s) => RowValue::Bytes(Bytes::from(s)),
        Value::Binary(b) => RowValue::Bytes(Bytes::from(b)),
        Value::Tuple(_) => return Err(internal!("nested tuple in output row")),
    })
}

#[cfg(test)]
mod tests {
    use sqlparser::dialect::GenericDialect;
    use treestore::memory::{MemoryColumn, MemoryDataset, MemoryTree};

    use super::*;
    use crate::parser::parse_single_statement;
    use crate::planner::plan_statement;

    fn dataset() -> MemoryDataset {
        let tree = MemoryTree::try_new(
            "evts",
            vec![
                MemoryColumn::from_values("n", [1_i32, 3, 5, 7, 9]).unwrap(),
                MemoryColumn::from_values("x", [0.5_f32, 1.5, 2.5, 3.5, 4.5]).unwrap(),
                MemoryColumn::from_values("tag", ["a", "b", "c", "d", "e"]).unwrap(),
            ],
        )
        .unwrap();
        MemoryDataset::new("ds").with_tree(Arc::new(tree))
    }

    fn query(sql: &str, args: &[Value]) -> Rows {
        let stmt = parse_single_statement(&GenericDialect {}, sql).unwrap();
        let plan = Arc::new(plan_statement(&dataset(), stmt).unwrap());
        plan.execute(args).unwrap()
    }

    fn collect(rows: &mut Rows) -> Vec<Vec<RowValue>> {
        rows.records().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn filter_keeps_input_order() {
        let mut rows = query("SELECT n FROM evts WHERE n > 5", &[]);
        assert_eq!(
            vec![vec![RowValue::Int64(7)], vec![RowValue::Int64(9)]],
            collect(&mut rows)
        );
        assert_eq!(CursorState::Exhausted, rows.state());
    }

    #[test]
    fn state_transitions() {
        let mut rows = query("SELECT n FROM evts WHERE n = 9", &[]);
        assert_eq!(CursorState::Created, rows.state());

        let mut dest = vec![RowValue::default()];
        rows.next(&mut dest).unwrap();
        assert_eq!(CursorState::Iterating, rows.state());
        assert_eq!(RowValue::Int64(9), dest[0]);

        for _ in 0..3 {
            let err = rows.next(&mut dest).unwrap_err();
            assert!(err.is_end_of_rows());
        }
        assert_eq!(CursorState::Exhausted, rows.state());

        rows.close().unwrap();
        rows.close().unwrap();
        assert_eq!(CursorState::Closed, rows.state());
        assert!(matches!(
            rows.next(&mut dest).unwrap_err(),
            TreeSqlError::Closed(_)
        ));
    }

    #[test]
    fn close_mid_iteration() {
        let mut rows = query("SELECT n FROM evts", &[]);
        assert!(rows.next_row().unwrap().is_some());
        rows.close().unwrap();
        assert_eq!(CursorState::Closed, rows.state());
    }

    #[test]
    fn tuple_unpacked_into_slots() {
        let mut rows = query("SELECT * FROM evts WHERE n < 2", &[]);
        assert_eq!(&["n", "x", "tag"], rows.columns());
        let got = collect(&mut rows);
        assert_eq!(1, got.len());
        assert_eq!(RowValue::Int64(1), got[0][0]);
        assert_eq!(RowValue::Float64(0.5), got[0][1]);
        assert_eq!(Some("a"), got[0][2].as_str());
    }

    #[test]
    fn literal_projection_is_constant() {
        let mut rows = query("SELECT 40 + 2 FROM evts", &[]);
        let got = collect(&mut rows);
        assert_eq!(5, got.len());
        assert!(got.iter().all(|r| r == &vec![RowValue::Int64(42)]));
    }

    #[test]
    fn limit_and_offset() {
        let mut rows = query("SELECT n FROM evts WHERE n > 1 LIMIT 2 OFFSET 1", &[]);
        assert_eq!(
            vec![vec![RowValue::Int64(5)], vec![RowValue::Int64(7)]],
            collect(&mut rows)
        );

        let mut rows = query("SELECT n FROM evts LIMIT 0", &[]);
        assert!(collect(&mut rows).is_empty());
    }

    #[test]
    fn bound_arguments() {
        let mut rows = query(
            "SELECT tag FROM evts WHERE n >= ? AND x < ?",
            &[Value::from(3), Value::from(3.0)],
        );
        let got: Vec<_> = collect(&mut rows)
            .into_iter()
            .map(|r| r[0].as_str().unwrap().to_string())
            .collect();
        assert_eq!(vec!["b", "c"], got);
    }

    #[test]
    fn missing_arguments_rejected() {
        let stmt =
            parse_single_statement(&GenericDialect {}, "SELECT n FROM evts WHERE n > ?").unwrap();
        let plan = Arc::new(plan_statement(&dataset(), stmt).unwrap());
        let err = plan.execute(&[]).unwrap_err();
        assert!(matches!(err, TreeSqlError::InvalidArgument(_)));
    }

    #[test]
    fn non_boolean_filter() {
        let mut rows = query("SELECT n FROM evts WHERE n + 1", &[]);
        let err = rows.next_row().unwrap_err();
        assert!(matches!(err, TreeSqlError::Eval(_)));
        // Evaluation errors don't halt the cursor.
        assert_eq!(CursorState::Iterating, rows.state());
    }

    #[test]
    fn type_error_surfaces_during_next() {
        let mut rows = query("SELECT n FROM evts WHERE tag > 1", &[]);
        let err = rows.next_row().unwrap_err();
        assert!(matches!(err, TreeSqlError::Type(_)));
    }

    #[test]
    fn wrong_destination_size() {
        let mut rows = query("SELECT n, x FROM evts", &[]);
        let mut dest = vec![RowValue::default()];
        let err = rows.next(&mut dest).unwrap_err();
        assert!(matches!(err, TreeSqlError::InvalidArgument(_)));
    }

    #[test]
    fn output_arity_mismatch_is_internal() {
        let mut dest = vec![RowValue::default(); 2];
        let err = write_output(Value::Tuple(vec![Value::from(1)]), &mut dest).unwrap_err();
        assert!(matches!(err, TreeSqlError::Internal(_)));

        let err = write_output(Value::from(1), &mut dest).unwrap_err();
        assert!(matches!(err, TreeSqlError::Internal(_)));
    }

    #[test]
    fn long_non_matching_run() {
        let values: Vec<i64> = (0..200_000).collect();
        let tree = MemoryTree::try_new(
            "big",
            vec![MemoryColumn::from_values("v", values).unwrap()],
        )
        .unwrap();
        let ds = MemoryDataset::new("big").with_tree(Arc::new(tree));
        let stmt =
            parse_single_statement(&GenericDialect {}, "SELECT v FROM big WHERE v = 199999")
                .unwrap();
        let plan = Arc::new(plan_statement(&ds, stmt).unwrap());
        let mut rows = plan.execute(&[]).unwrap();
        assert_eq!(
            vec![vec![RowValue::Int64(199_999)]],
            collect(&mut rows)
        );
    }
}
