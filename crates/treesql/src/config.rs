use serde::{Deserialize, Serialize};
use sqlparser::dialect::{Dialect, dialect_from_str};

use crate::errors::{Result, TreeSqlError};

pub const DEFAULT_DIALECT: &str = "generic";

/// Configuration for a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// SQL dialect used when parsing statements, e.g. "generic", "mysql" or
    /// "postgresql".
    pub dialect: String,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            dialect: DEFAULT_DIALECT.to_string(),
        }
    }
}

impl DriverConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| TreeSqlError::Config(e.to_string()))
    }

    pub fn with_dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = dialect.into();
        self
    }

    pub(crate) fn sql_dialect(&self) -> Result<Box<dyn Dialect>> {
        dialect_from_str(&self.dialect)
            .ok_or_else(|| TreeSqlError::Config(format!("unknown SQL dialect {:?}", self.dialect)))
    }
}
