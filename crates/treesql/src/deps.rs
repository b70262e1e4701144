//! Finds the columns a query needs to read from storage.
//!
//! This walks the parsed statement without compiling or evaluating anything,
//! so it runs before any expression is checked for support.
use std::ops::ControlFlow;

use indexmap::IndexSet;
use sqlparser::ast::{
    Expr as SqlExpr, Select, SelectItem, SelectItemQualifiedWildcardKind, visit_expressions,
};
use treestore::Tree;

use crate::errors::{Result, TreeSqlError, unsupported};
use crate::planner::object_name_last;

/// Ordered, de-duplicated set of column names.
#[derive(Debug, Default)]
struct ColumnSet {
    columns: IndexSet<String>,
}

impl ColumnSet {
    fn mark(&mut self, name: &str) {
        if name.is_empty() || self.columns.contains(name) {
            return;
        }
        self.columns.insert(name.to_string());
    }

    fn mark_all(&mut self, tree: &dyn Tree) {
        for b in tree.branches() {
            self.mark(&b.name);
        }
    }

    /// Mark every column an expression references.
    ///
    /// Subqueries are rejected rather than walked, their columns belong to
    /// other tables.
    fn mark_referenced(&mut self, expr: &SqlExpr) -> Result<()> {
        let flow = visit_expressions(expr, |expr| {
            match expr {
                SqlExpr::Identifier(ident) => self.mark(&ident.value),
                // Qualifiers are dropped, only the column part is kept.
                SqlExpr::CompoundIdentifier(idents) => {
                    if let Some(ident) = idents.last() {
                        self.mark(&ident.value)
                    }
                }
                SqlExpr::Subquery(_) | SqlExpr::InSubquery { .. } | SqlExpr::Exists { .. } => {
                    return ControlFlow::Break(expr.to_string());
                }
                _ => (),
            }
            ControlFlow::Continue(())
        });
        match flow {
            ControlFlow::Break(subquery) => {
                Err(unsupported!("subqueries are not supported: {subquery}"))
            }
            ControlFlow::Continue(()) => Ok(()),
        }
    }
}

/// Check that a qualified wildcard refers to the scanned tree.
pub(crate) fn check_wildcard_qualifier(
    kind: &SelectItemQualifiedWildcardKind,
    tree: &dyn Tree,
    alias: Option<&str>,
) -> Result<()> {
    match kind {
        SelectItemQualifiedWildcardKind::ObjectName(name) => {
            let qualifier = object_name_last(name)?;
            if qualifier == tree.name() || Some(qualifier.as_str()) == alias {
                Ok(())
            } else {
                Err(unsupported!(
                    "star-expression with other table name {qualifier:?} not supported"
                ))
            }
        }
        SelectItemQualifiedWildcardKind::Expr(expr) => {
            Err(unsupported!("star-expression on {expr} not supported"))
        }
    }
}

/// Collect the columns referenced by the projection list and the filter of a
/// select.
///
/// Columns are returned in the order they're first referenced, projection
/// before filter. A wildcard references every branch in schema order. Every
/// returned name is guaranteed to exist in the tree.
pub fn collect_scan_columns(
    select: &Select,
    tree: &dyn Tree,
    alias: Option<&str>,
) -> Result<Vec<String>> {
    let mut set = ColumnSet::default();

    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                set.mark_referenced(expr)?
            }
            SelectItem::Wildcard(_) => set.mark_all(tree),
            SelectItem::QualifiedWildcard(kind, _) => {
                check_wildcard_qualifier(kind, tree, alias)?;
                set.mark_all(tree);
            }
        }
    }

    if let Some(filter) = &select.selection {
        set.mark_referenced(filter)?;
    }

    for name in &set.columns {
        if tree.branch(name).is_none() {
            return Err(TreeSqlError::UnknownColumn {
                tree: tree.name().to_string(),
                column: name.clone(),
            });
        }
    }

    Ok(set.columns.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use sqlparser::ast::{SetExpr, Statement};
    use sqlparser::dialect::GenericDialect;
    use treestore::memory::{MemoryColumn, MemoryTree};

    use super::*;
    use crate::parser::parse_single_statement;

    fn tree() -> MemoryTree {
        MemoryTree::try_new(
            "evts",
            vec![
                MemoryColumn::from_values("run", [1_i32, 2]).unwrap(),
                MemoryColumn::from_values("pt", [1.0_f32, 2.0]).unwrap(),
                MemoryColumn::from_values("eta", [0.1_f64, 0.2]).unwrap(),
                MemoryColumn::from_values("name", ["a", "b"]).unwrap(),
            ],
        )
        .unwrap()
    }

    fn columns(sql: &str) -> Result<Vec<String>> {
        let stmt = parse_single_statement(&GenericDialect {}, sql).unwrap();
        let Statement::Query(query) = stmt else {
            panic!("not a query");
        };
        let SetExpr::Select(select) = query.body.as_ref() else {
            panic!("not a select");
        };
        collect_scan_columns(select, &tree(), Some("e"))
    }

    #[test]
    fn single_column() {
        assert_eq!(vec!["pt"], columns("SELECT pt FROM evts").unwrap());
    }

    #[test]
    fn projection_then_filter_order() {
        assert_eq!(
            vec!["eta", "pt", "run"],
            columns("SELECT eta, pt FROM evts WHERE run > 1 AND pt > 2").unwrap()
        );
    }

    #[test]
    fn deduplicated() {
        assert_eq!(
            vec!["pt"],
            columns("SELECT pt + pt FROM evts WHERE pt > 1").unwrap()
        );
    }

    #[test]
    fn wildcard_schema_order() {
        assert_eq!(
            vec!["run", "pt", "eta", "name"],
            columns("SELECT * FROM evts WHERE eta < 1").unwrap()
        );
        assert_eq!(
            vec!["run", "pt", "eta", "name"],
            columns("SELECT e.* FROM evts AS e").unwrap()
        );
    }

    #[test]
    fn qualifiers_stripped() {
        assert_eq!(
            vec!["pt", "eta"],
            columns("SELECT evts.pt FROM evts WHERE e.eta > 0").unwrap()
        );
    }

    #[test]
    fn nested_expressions() {
        assert_eq!(
            vec!["name", "run", "eta"],
            columns("SELECT (name, -run) FROM evts WHERE eta IN (1, 2) OR NOT (run BETWEEN 1 AND 2)")
                .unwrap()
        );
    }

    #[test]
    fn literal_projection_reads_nothing() {
        assert!(columns("SELECT 1 FROM evts").unwrap().is_empty());
    }

    #[test]
    fn unknown_filter_column() {
        let err = columns("SELECT pt FROM evts WHERE phi > 0").unwrap_err();
        match err {
            TreeSqlError::UnknownColumn { tree, column } => {
                assert_eq!("evts", tree);
                assert_eq!("phi", column);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn subqueries_rejected() {
        for sql in [
            "SELECT pt FROM evts WHERE run IN (SELECT zz FROM other)",
            "SELECT pt FROM evts WHERE EXISTS (SELECT zz FROM other)",
            "SELECT (SELECT zz FROM other) FROM evts",
        ] {
            let err = columns(sql).unwrap_err();
            assert!(
                matches!(err, TreeSqlError::UnsupportedQuery(_)),
                "sql: {sql}, err: {err}"
            );
        }
    }

    #[test]
    fn wildcard_other_table() {
        let err = columns("SELECT other.* FROM evts").unwrap_err();
        assert!(matches!(err, TreeSqlError::UnsupportedQuery(_)));
    }
}
