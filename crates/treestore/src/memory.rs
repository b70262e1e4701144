use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::dataset::{Branch, Dataset, DatasetObject, DatasetOpener, Tree, TreeScan};
use crate::datatype::DataType;
use crate::errors::{Result, StoreError, invalid_data};
use crate::scalar::ScalarValue;

/// Values for a single branch of a memory tree.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryColumn {
    pub branch: Branch,
    pub values: Vec<ScalarValue>,
}

impl MemoryColumn {
    pub fn new(name: impl Into<String>, datatype: DataType, values: Vec<ScalarValue>) -> Self {
        MemoryColumn {
            branch: Branch::new(name, datatype),
            values,
        }
    }

    /// Create a column from native values, inferring the datatype from the
    /// first value. Empty columns must use `new`.
    pub fn from_values<T: Into<ScalarValue>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<Self> {
        let name = name.into();
        let values: Vec<ScalarValue> = values.into_iter().map(Into::into).collect();
        let datatype = values
            .first()
            .map(|v| v.datatype())
            .ok_or_else(|| invalid_data!("cannot infer datatype for empty column {name:?}"))?;
        Ok(MemoryColumn::new(name, datatype, values))
    }
}

/// A tree held entirely in memory.
///
/// Every column list passed to `scan` is recorded, which lets callers check
/// which branches were actually read.
#[derive(Debug)]
pub struct MemoryTree {
    name: String,
    entries: usize,
    branches: Vec<Branch>,
    columns: Arc<Vec<Vec<ScalarValue>>>,
    scan_requests: Mutex<Vec<Vec<String>>>,
}

impl MemoryTree {
    pub fn try_new(name: impl Into<String>, columns: Vec<MemoryColumn>) -> Result<Self> {
        let name = name.into();
        let entries = columns.first().map(|c| c.values.len()).unwrap_or(0);

        let mut branches = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());

        for column in columns {
            if branches.iter().any(|b: &Branch| b.name == column.branch.name) {
                return Err(invalid_data!(
                    "duplicate branch {:?} in tree {name:?}",
                    column.branch.name
                ));
            }
            if column.values.len() != entries {
                return Err(invalid_data!(
                    "branch {:?} has {} entries, expected {entries}",
                    column.branch.name,
                    column.values.len(),
                ));
            }
            if let Some(v) = column
                .values
                .iter()
                .find(|v| v.datatype() != column.branch.datatype)
            {
                return Err(invalid_data!(
                    "branch {:?} of type {} holds value {v} of type {}",
                    column.branch.name,
                    column.branch.datatype,
                    v.datatype(),
                ));
            }

            branches.push(column.branch);
            data.push(column.values);
        }

        Ok(MemoryTree {
            name,
            entries,
            branches,
            columns: Arc::new(data),
            scan_requests: Mutex::new(Vec::new()),
        })
    }

    /// Column lists requested from this tree, in request order.
    pub fn scan_requests(&self) -> Vec<Vec<String>> {
        self.scan_requests.lock().clone()
    }
}

impl Tree for MemoryTree {
    fn name(&self) -> &str {
        &self.name
    }

    fn entries(&self) -> u64 {
        self.entries as u64
    }

    fn branches(&self) -> &[Branch] {
        &self.branches
    }

    fn scan(&self, columns: &[String]) -> Result<Box<dyn TreeScan>> {
        let indices = columns
            .iter()
            .map(|col| {
                self.branches
                    .iter()
                    .position(|b| &b.name == col)
                    .ok_or_else(|| StoreError::UnknownBranch {
                        tree: self.name.clone(),
                        branch: col.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        trace!(tree = %self.name, ?columns, "opening memory scan");
        self.scan_requests.lock().push(columns.to_vec());

        Ok(Box::new(MemoryScan {
            columns: self.columns.clone(),
            indices,
            entries: self.entries,
            next: 0,
            current: Vec::with_capacity(columns.len()),
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct MemoryScan {
    columns: Arc<Vec<Vec<ScalarValue>>>,
    /// Index into `columns` for each requested column.
    indices: Vec<usize>,
    entries: usize,
    /// Next entry to read.
    next: usize,
    current: Vec<ScalarValue>,
    closed: bool,
}

impl TreeScan for MemoryScan {
    fn advance(&mut self) -> Result<bool> {
        if self.closed || self.next >= self.entries {
            return Ok(false);
        }

        self.current.clear();
        for &idx in &self.indices {
            self.current.push(self.columns[idx][self.next].clone());
        }
        self.next += 1;

        Ok(true)
    }

    fn current(&self) -> &[ScalarValue] {
        &self.current
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.current.clear();
        Ok(())
    }
}

/// A dataset held entirely in memory.
#[derive(Debug)]
pub struct MemoryDataset {
    name: String,
    objects: Vec<DatasetObject>,
    closed: AtomicBool,
}

impl MemoryDataset {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryDataset {
            name: name.into(),
            objects: Vec::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_tree(mut self, tree: Arc<dyn Tree>) -> Self {
        self.objects.push(DatasetObject::Tree(tree));
        self
    }

    pub fn with_object(mut self, name: impl Into<String>, class: impl Into<String>) -> Self {
        self.objects.push(DatasetObject::Other {
            name: name.into(),
            class: class.into(),
        });
        self
    }

    /// A fresh, open dataset sharing this dataset's objects.
    fn reopen(&self) -> Self {
        MemoryDataset {
            name: self.name.clone(),
            objects: self.objects.clone(),
            closed: AtomicBool::new(false),
        }
    }
}

impl Dataset for MemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.name().to_string()).collect()
    }

    fn get(&self, key: &str) -> Result<DatasetObject> {
        if self.is_closed() {
            return Err(StoreError::Closed(self.name.clone()));
        }
        self.objects
            .iter()
            .find(|o| o.name() == key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                dataset: self.name.clone(),
                key: key.to_string(),
            })
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed(self.name.clone()));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Opens registered in-memory datasets by name.
///
/// Every open produces a new handle onto the registered objects, the way
/// opening a file twice produces two file handles.
#[derive(Debug, Default)]
pub struct MemoryOpener {
    datasets: RwLock<HashMap<String, MemoryDataset>>,
    opens: AtomicUsize,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dataset: MemoryDataset) {
        self.datasets.write().insert(dataset.name.clone(), dataset);
    }

    pub fn with_dataset(self, dataset: MemoryDataset) -> Self {
        self.register(dataset);
        self
    }

    /// Total number of successful opens.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DatasetOpener for MemoryOpener {
    fn open(&self, name: &str) -> Result<Arc<dyn Dataset>> {
        let datasets = self.datasets.read();
        let dataset = datasets
            .get(name)
            .ok_or_else(|| StoreError::UnknownDataset(name.to_string()))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(dataset.reopen()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tree() -> MemoryTree {
        MemoryTree::try_new(
            "events",
            vec![
                MemoryColumn::from_values("run", [1_i32, 1, 2]).unwrap(),
                MemoryColumn::from_values("energy", [1.5_f64, 2.5, 3.5]).unwrap(),
                MemoryColumn::from_values("label", ["a", "b", "c"]).unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn scan_requested_columns_in_order() {
        let tree = test_tree();
        let mut scan = tree
            .scan(&["label".to_string(), "run".to_string()])
            .unwrap();

        let mut rows = Vec::new();
        while scan.advance().unwrap() {
            rows.push(scan.current().to_vec());
        }

        assert_eq!(
            vec![
                vec![ScalarValue::from("a"), ScalarValue::Int32(1)],
                vec![ScalarValue::from("b"), ScalarValue::Int32(1)],
                vec![ScalarValue::from("c"), ScalarValue::Int32(2)],
            ],
            rows
        );
        assert_eq!(
            vec![vec!["label".to_string(), "run".to_string()]],
            tree.scan_requests()
        );
    }

    #[test]
    fn scan_zero_columns_counts_entries() {
        let tree = test_tree();
        let mut scan = tree.scan(&[]).unwrap();
        let mut count = 0;
        while scan.advance().unwrap() {
            assert!(scan.current().is_empty());
            count += 1;
        }
        assert_eq!(3, count);
    }

    #[test]
    fn scan_unknown_branch() {
        let tree = test_tree();
        let err = tree.scan(&["missing".to_string()]).unwrap_err();
        assert!(matches!(err, StoreError::UnknownBranch { .. }));
        assert!(tree.scan_requests().is_empty());
    }

    #[test]
    fn closed_scan_stops() {
        let tree = test_tree();
        let mut scan = tree.scan(&["run".to_string()]).unwrap();
        assert!(scan.advance().unwrap());
        scan.close().unwrap();
        scan.close().unwrap();
        assert!(!scan.advance().unwrap());
    }

    #[test]
    fn mismatched_lengths() {
        let err = MemoryTree::try_new(
            "bad",
            vec![
                MemoryColumn::from_values("a", [1_i32, 2]).unwrap(),
                MemoryColumn::from_values("b", [1_i32]).unwrap(),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[test]
    fn mismatched_types() {
        let err = MemoryTree::try_new(
            "bad",
            vec![MemoryColumn::new(
                "a",
                DataType::Int32,
                vec![ScalarValue::Int32(1), ScalarValue::Int64(2)],
            )],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[test]
    fn dataset_close_twice_errors() {
        let ds = MemoryDataset::new("ds").with_tree(Arc::new(test_tree()));
        assert!(ds.get("events").is_ok());
        ds.close().unwrap();
        assert!(ds.is_closed());
        assert!(matches!(ds.close(), Err(StoreError::Closed(_))));
        assert!(matches!(ds.get("events"), Err(StoreError::Closed(_))));
    }

    #[test]
    fn opener_produces_fresh_handles() {
        let opener = MemoryOpener::new()
            .with_dataset(MemoryDataset::new("ds").with_tree(Arc::new(test_tree())));

        let a = opener.open("ds").unwrap();
        a.close().unwrap();
        let b = opener.open("ds").unwrap();
        assert!(!b.is_closed());
        assert_eq!(2, opener.open_count());

        let err = opener.open("nope").unwrap_err();
        assert!(matches!(err, StoreError::UnknownDataset(_)));
    }
}
