use sqlparser::ast::Statement;
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;

use crate::errors::{Result, unsupported};

/// Parse sql text that must hold exactly one statement.
pub fn parse_single_statement(dialect: &dyn Dialect, sql: &str) -> Result<Statement> {
    let mut stmts = Parser::parse_sql(dialect, sql)?;
    match stmts.len() {
        1 => Ok(stmts.remove(0)),
        0 => Err(unsupported!("empty statement")),
        n => Err(unsupported!(
            "multi-statement batches are not supported (got {n} statements)"
        )),
    }
}
