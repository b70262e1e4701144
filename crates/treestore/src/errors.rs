#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown dataset {0:?}")]
    UnknownDataset(String),

    #[error("could not find object {key:?} in dataset {dataset:?}")]
    NotFound { dataset: String, key: String },

    #[error("could not find branch {branch:?} in tree {tree:?}")]
    UnknownBranch { tree: String, branch: String },

    #[error("dataset {0:?} is closed")]
    Closed(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[allow(unused_macros)]
macro_rules! invalid_data {
    ($($arg:tt)*) => {
        crate::errors::StoreError::InvalidData(std::format!($($arg)*))
    };
}
pub(crate) use invalid_data;
