use treestore::errors::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum TreeSqlError {
    #[error(transparent)]
    Parse(#[from] sqlparser::parser::ParserError),

    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("{0}: not implemented")]
    NotImplemented(&'static str),

    #[error("object {0:?} is not a tree")]
    NotATable(String),

    #[error("could not find column {column:?} in tree {tree:?}")]
    UnknownColumn { tree: String, column: String },

    #[error("could not open dataset {name:?}: {source}")]
    Open {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("could not close dataset {name:?}: {source}")]
    Close {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("type error: {0}")]
    Type(String),

    #[error("evaluation error: {0}")]
    Eval(String),

    /// Iteration is complete. Not a failure.
    #[error("end of rows")]
    EndOfRows,

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TreeSqlError {
    pub fn is_end_of_rows(&self) -> bool {
        matches!(self, TreeSqlError::EndOfRows)
    }
}

pub type Result<T, E = TreeSqlError> = std::result::Result<T, E>;

#[allow(unused_macros)]
macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::TreeSqlError::Internal(std::format!($($arg)*))
    };
}
pub(crate) use internal;

#[allow(unused_macros)]
macro_rules! unsupported {
    ($($arg:tt)*) => {
        crate::errors::TreeSqlError::UnsupportedQuery(std::format!($($arg)*))
    };
}
pub(crate) use unsupported;
