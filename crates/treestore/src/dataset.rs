use std::fmt::Debug;
use std::sync::Arc;

use crate::datatype::DataType;
use crate::errors::Result;
use crate::scalar::ScalarValue;

/// A single typed column of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub datatype: DataType,
}

impl Branch {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Branch {
            name: name.into(),
            datatype,
        }
    }
}

/// An open dataset.
///
/// The name is the stable identity of the dataset, two handles with the same
/// name refer to the same backing store.
pub trait Dataset: Debug + Sync + Send {
    fn name(&self) -> &str;

    /// Keys of all objects in the dataset.
    fn keys(&self) -> Vec<String>;

    /// Get an object by key.
    fn get(&self, key: &str) -> Result<DatasetObject>;

    /// Close the dataset, releasing the backing store.
    ///
    /// Closing an already closed dataset errors.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// An object stored in a dataset.
#[derive(Debug, Clone)]
pub enum DatasetObject {
    Tree(Arc<dyn Tree>),
    /// Some object that isn't a tree (histograms, graphs, ...).
    Other { name: String, class: String },
}

impl DatasetObject {
    pub fn name(&self) -> &str {
        match self {
            DatasetObject::Tree(tree) => tree.name(),
            DatasetObject::Other { name, .. } => name,
        }
    }

    pub fn try_into_tree(self) -> Option<Arc<dyn Tree>> {
        match self {
            DatasetObject::Tree(tree) => Some(tree),
            DatasetObject::Other { .. } => None,
        }
    }
}

/// Columnar row storage.
pub trait Tree: Debug + Sync + Send {
    fn name(&self) -> &str;

    /// Number of entries (rows).
    fn entries(&self) -> u64;

    /// Branches in schema order.
    fn branches(&self) -> &[Branch];

    fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches().iter().find(|b| b.name == name)
    }

    /// Open a scan reading exactly the given columns.
    ///
    /// Values produced by the scan are in the same order as `columns`. Errors
    /// if a column doesn't exist.
    fn scan(&self, columns: &[String]) -> Result<Box<dyn TreeScan>>;
}

/// Row by row iteration over a set of branches.
pub trait TreeScan: Debug + Send {
    /// Move to the next entry, returning false once all entries are read.
    fn advance(&mut self) -> Result<bool>;

    /// Values for the current entry, one per requested column.
    ///
    /// Only valid after `advance` returned true.
    fn current(&self) -> &[ScalarValue];

    /// Release the scan. Closing more than once is fine.
    fn close(&mut self) -> Result<()>;
}

/// Resolves dataset names to open datasets.
pub trait DatasetOpener: Debug + Sync + Send {
    fn open(&self, name: &str) -> Result<Arc<dyn Dataset>>;
}
