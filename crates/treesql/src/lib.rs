//! SQL queries over columnar tree datasets.
//!
//! Queries are limited to a single `SELECT` over a single tree. Only the
//! columns a query references are read from storage.
pub mod config;
pub mod deps;
pub mod driver;
pub mod errors;
pub mod expr;
pub mod parser;
pub mod planner;
pub mod rows;
pub mod value;

pub use config::DriverConfig;
pub use driver::{Connection, Driver, Statement};
pub use errors::{Result, TreeSqlError};
pub use rows::{CursorState, Rows};
pub use value::{RowValue, Value};
