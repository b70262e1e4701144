//! Compiles a parsed SELECT statement into a query plan.
use std::sync::Arc;

use sqlparser::ast::{
    BinaryOperator as SqlBinaryOperator, Expr as SqlExpr, GroupByExpr,
    LimitClause, ObjectName, ObjectNamePart, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, UnaryOperator as SqlUnaryOperator, Value as SqlValue,
};
use tracing::trace;
use treestore::errors::StoreError;
use treestore::{Dataset, Tree};

use crate::deps::{check_wildcard_qualifier, collect_scan_columns};
use crate::errors::{Result, TreeSqlError, unsupported};
use crate::expr::{BinaryOperator, Expr, UnaryOperator};
use crate::rows::Rows;
use crate::value::Value;

/// A compiled single-table query.
///
/// Plans are immutable once built and can be executed any number of times.
#[derive(Debug)]
pub struct QueryPlan {
    pub tree: Arc<dyn Tree>,
    /// Columns read from storage, in scan order.
    pub scan_columns: Vec<String>,
    /// Output column names. Unnamed outputs have an empty name.
    pub columns: Vec<String>,
    /// Evaluates to a single value when there's one output column, and to a
    /// tuple of one value per output column otherwise.
    pub projection: Expr,
    pub filter: Option<Expr>,
    pub limit: Option<u64>,
    pub offset: u64,
    /// Number of bound arguments the plan expects.
    pub num_inputs: usize,
}

impl QueryPlan {
    /// Open a storage scan over exactly the needed columns and return a
    /// cursor over the results.
    pub fn execute(self: &Arc<Self>, args: &[Value]) -> Result<Rows> {
        if args.len() < self.num_inputs {
            return Err(TreeSqlError::InvalidArgument(format!(
                "query expects {} bound arguments, got {}",
                self.num_inputs,
                args.len()
            )));
        }
        let scan = self.tree.scan(&self.scan_columns)?;
        Ok(Rows::new(self.clone(), scan, args.to_vec()))
    }
}

/// Compile a statement against a dataset.
pub fn plan_statement(dataset: &dyn Dataset, stmt: Statement) -> Result<QueryPlan> {
    let query = match stmt {
        Statement::Query(query) => query,
        other => {
            return Err(unsupported!(
                "only SELECT statements are supported, got: {other}"
            ));
        }
    };
    plan_query(dataset, *query)
}

fn plan_query(dataset: &dyn Dataset, query: Query) -> Result<QueryPlan> {
    if query.with.is_some() {
        return Err(unsupported!("WITH clauses are not supported"));
    }
    if query.order_by.is_some() {
        return Err(unsupported!("ORDER BY is not supported"));
    }
    if query.fetch.is_some() {
        return Err(unsupported!("FETCH is not supported"));
    }
    let (limit, offset) = limit_offset(query.limit_clause.as_ref())?;

    let select = match *query.body {
        SetExpr::Select(select) => select,
        other => {
            return Err(unsupported!(
                "only simple SELECT queries are supported, got: {other}"
            ));
        }
    };

    if select.distinct.is_some() {
        return Err(unsupported!("DISTINCT is not supported"));
    }
    if !matches!(&select.group_by, GroupByExpr::Expressions(exprs, _) if exprs.is_empty()) {
        return Err(unsupported!("GROUP BY is not supported"));
    }
    if select.having.is_some() {
        return Err(unsupported!("HAVING is not supported"));
    }

    let (table, alias) = table_name(&select)?;
    let object = match dataset.get(&table) {
        Ok(object) => object,
        Err(StoreError::NotFound { .. }) => return Err(TreeSqlError::NotATable(table)),
        Err(e) => return Err(e.into()),
    };
    let tree = object
        .try_into_tree()
        .ok_or_else(|| TreeSqlError::NotATable(table.clone()))?;

    let scan_columns = collect_scan_columns(&select, tree.as_ref(), alias.as_deref())?;

    let mut compiler = ExprCompiler::default();
    let (columns, mut outputs) = compiler.compile_projection(&select, tree.as_ref(), alias.as_deref())?;
    let projection = match outputs.len() {
        1 => outputs.swap_remove(0),
        _ => Expr::Tuple(outputs),
    };

    let filter = select
        .selection
        .as_ref()
        .map(|expr| compiler.compile(expr))
        .transpose()?;

    trace!(
        tree = %table,
        ?scan_columns,
        ?columns,
        %projection,
        filter = ?filter.as_ref().map(|f| f.to_string()),
        "compiled query"
    );

    Ok(QueryPlan {
        tree,
        scan_columns,
        columns,
        projection,
        filter,
        limit,
        offset,
        num_inputs: compiler.num_inputs(),
    })
}

/// Resolve the single table a select reads from, along with its alias.
fn table_name(select: &Select) -> Result<(String, Option<String>)> {
    if select.from.len() != 1 {
        return Err(unsupported!(
            "invalid number of tables (got={}, want=1)",
            select.from.len()
        ));
    }
    let from = &select.from[0];
    if !from.joins.is_empty() {
        return Err(unsupported!("joins are not supported"));
    }

    match &from.relation {
        TableFactor::Table {
            name, alias, args, ..
        } => {
            if args.is_some() {
                return Err(unsupported!("table functions are not supported"));
            }
            let alias = alias.as_ref().map(|a| a.name.value.clone());
            Ok((object_name_last(name)?, alias))
        }
        other => Err(unsupported!("unknown FROM expression: {other}")),
    }
}

/// The last, unqualified part of an object name.
pub(crate) fn object_name_last(name: &ObjectName) -> Result<String> {
    match name.0.last() {
        Some(ObjectNamePart::Identifier(ident)) => Ok(ident.value.clone()),
        _ => Err(unsupported!("invalid object name: {name}")),
    }
}

fn limit_offset(clause: Option<&LimitClause>) -> Result<(Option<u64>, u64)> {
    let Some(clause) = clause else {
        return Ok((None, 0));
    };
    match clause {
        LimitClause::LimitOffset {
            limit,
            offset,
            limit_by,
        } => {
            if !limit_by.is_empty() {
                return Err(unsupported!("LIMIT BY is not supported"));
            }
            let limit = limit.as_ref().map(literal_count).transpose()?;
            let offset = offset
                .as_ref()
                .map(|o| literal_count(&o.value))
                .transpose()?
                .unwrap_or(0);
            Ok((limit, offset))
        }
        LimitClause::OffsetCommaLimit { offset, limit } => {
            Ok((Some(literal_count(limit)?), literal_count(offset)?))
        }
    }
}

fn literal_count(expr: &SqlExpr) -> Result<u64> {
    if let SqlExpr::Value(v) = expr {
        if let SqlValue::Number(n, _) = &v.value {
            if let Ok(n) = n.parse::<u64>() {
                return Ok(n);
            }
        }
    }
    Err(unsupported!(
        "LIMIT and OFFSET must be non-negative integer literals, got: {expr}"
    ))
}

/// Name for an output column. Only plain column references get one.
fn output_name(expr: &SqlExpr) -> String {
    match expr {
        SqlExpr::Identifier(ident) => ident.value.clone(),
        SqlExpr::CompoundIdentifier(idents) => idents
            .last()
            .map(|ident| ident.value.clone())
            .unwrap_or_default(),
        SqlExpr::Nested(inner) => output_name(inner),
        _ => String::new(),
    }
}

/// Compiles sql expressions into expressions, tracking bound argument
/// placeholders along the way.
#[derive(Debug, Default)]
struct ExprCompiler {
    /// Number of anonymous `?` placeholders seen so far.
    anonymous: usize,
    /// One past the highest placeholder index seen.
    num_inputs: usize,
}

impl ExprCompiler {
    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Compile the projection list into output names and output expressions.
    ///
    /// A row value (`SELECT (a, b)`) expands into one output per element.
    fn compile_projection(
        &mut self,
        select: &Select,
        tree: &dyn Tree,
        alias: Option<&str>,
    ) -> Result<(Vec<String>, Vec<Expr>)> {
        let mut names = Vec::new();
        let mut outputs = Vec::new();

        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => {
                    for b in tree.branches() {
                        names.push(b.name.clone());
                        outputs.push(Expr::Column(b.name.clone()));
                    }
                }
                SelectItem::QualifiedWildcard(kind, _) => {
                    check_wildcard_qualifier(kind, tree, alias)?;
                    for b in tree.branches() {
                        names.push(b.name.clone());
                        outputs.push(Expr::Column(b.name.clone()));
                    }
                }
                SelectItem::UnnamedExpr(SqlExpr::Tuple(exprs)) => {
                    for expr in exprs {
                        names.push(output_name(expr));
                        outputs.push(self.compile_output(expr)?);
                    }
                }
                SelectItem::UnnamedExpr(expr) => {
                    names.push(output_name(expr));
                    outputs.push(self.compile_output(expr)?);
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    names.push(alias.value.clone());
                    outputs.push(self.compile_output(expr)?);
                }
            }
        }

        if outputs.is_empty() {
            return Err(unsupported!("query has no output columns"));
        }

        Ok((names, outputs))
    }

    fn compile_output(&mut self, expr: &SqlExpr) -> Result<Expr> {
        let compiled = self.compile(expr)?;
        if matches!(compiled, Expr::Tuple(_)) {
            return Err(unsupported!("nested row values in projection: {expr}"));
        }
        Ok(compiled)
    }

    fn compile(&mut self, expr: &SqlExpr) -> Result<Expr> {
        Ok(match expr {
            SqlExpr::Identifier(ident) => Expr::Column(ident.value.clone()),
            SqlExpr::CompoundIdentifier(idents) => match idents.last() {
                Some(ident) => Expr::Column(ident.value.clone()),
                None => return Err(unsupported!("empty identifier")),
            },
            SqlExpr::Value(v) => self.compile_value(&v.value)?,
            SqlExpr::Nested(inner) => self.compile(inner)?,
            SqlExpr::UnaryOp { op, expr } => {
                let op = match op {
                    SqlUnaryOperator::Plus => UnaryOperator::Plus,
                    SqlUnaryOperator::Minus => UnaryOperator::Minus,
                    SqlUnaryOperator::Not => UnaryOperator::Not,
                    other => return Err(unsupported!("unary operator {other}")),
                };
                Expr::unary(op, self.compile(expr)?)
            }
            SqlExpr::BinaryOp { left, op, right } => {
                let op = binary_operator(op)?;
                let left = self.compile(left)?;
                let right = self.compile(right)?;
                Expr::binary(op, left, right)
            }
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let left = self.compile(expr)?;
                let list = list
                    .iter()
                    .map(|e| self.compile(e))
                    .collect::<Result<Vec<_>>>()?;
                let op = if *negated {
                    BinaryOperator::NotIn
                } else {
                    BinaryOperator::In
                };
                Expr::binary(op, left, Expr::Tuple(list))
            }
            SqlExpr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let value = self.compile(expr)?;
                let low = self.compile(low)?;
                let high = self.compile(high)?;
                if *negated {
                    Expr::binary(
                        BinaryOperator::Or,
                        Expr::binary(BinaryOperator::Lt, value.clone(), low),
                        Expr::binary(BinaryOperator::Gt, value, high),
                    )
                } else {
                    Expr::binary(
                        BinaryOperator::And,
                        Expr::binary(BinaryOperator::GtEq, value.clone(), low),
                        Expr::binary(BinaryOperator::LtEq, value, high),
                    )
                }
            }
            SqlExpr::Tuple(exprs) => Expr::Tuple(
                exprs
                    .iter()
                    .map(|e| self.compile(e))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => return Err(unsupported!("invalid expression: {other}")),
        })
    }

    fn compile_value(&mut self, value: &SqlValue) -> Result<Expr> {
        Ok(match value {
            SqlValue::Number(n, _) => Expr::Literal(parse_number(n)?),
            SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
                Expr::Literal(Value::Utf8(s.clone()))
            }
            SqlValue::Boolean(b) => Expr::Literal(Value::Boolean(*b)),
            SqlValue::Placeholder(p) => Expr::Placeholder(self.placeholder_index(p)?),
            other => return Err(unsupported!("literal {other}")),
        })
    }

    /// Resolve a placeholder to a zero-based argument index.
    ///
    /// `?` placeholders are numbered in order of appearance, `?N`, `$N` and
    /// `:vN` are explicit and one-based.
    fn placeholder_index(&mut self, placeholder: &str) -> Result<usize> {
        let idx = if placeholder == "?" {
            let idx = self.anonymous;
            self.anonymous += 1;
            idx
        } else {
            let digits = placeholder
                .strip_prefix(":v")
                .or_else(|| placeholder.strip_prefix('$'))
                .or_else(|| placeholder.strip_prefix('?'))
                .ok_or_else(|| unsupported!("placeholder {placeholder}"))?;
            match digits.parse::<usize>() {
                Ok(n) if n > 0 => n - 1,
                _ => return Err(unsupported!("placeholder {placeholder}")),
            }
        };
        self.num_inputs = self.num_inputs.max(idx + 1);
        Ok(idx)
    }
}

fn binary_operator(op: &SqlBinaryOperator) -> Result<BinaryOperator> {
    Ok(match op {
        SqlBinaryOperator::Eq => BinaryOperator::Eq,
        SqlBinaryOperator::NotEq => BinaryOperator::NotEq,
        SqlBinaryOperator::Lt => BinaryOperator::Lt,
        SqlBinaryOperator::LtEq => BinaryOperator::LtEq,
        SqlBinaryOperator::Gt => BinaryOperator::Gt,
        SqlBinaryOperator::GtEq => BinaryOperator::GtEq,
        SqlBinaryOperator::And => BinaryOperator::And,
        SqlBinaryOperator::Or => BinaryOperator::Or,
        SqlBinaryOperator::Plus => BinaryOperator::Plus,
        SqlBinaryOperator::Minus => BinaryOperator::Minus,
        SqlBinaryOperator::Multiply => BinaryOperator::Multiply,
        SqlBinaryOperator::Divide => BinaryOperator::Divide,
        SqlBinaryOperator::Modulo => BinaryOperator::Modulo,
        other => return Err(unsupported!("invalid binary-expression operator {other}")),
    })
}

/// Integers that fit in an i64 stay signed, larger ones become unsigned.
/// Anything else is read as a float.
fn parse_number(n: &str) -> Result<Value> {
    if let Ok(v) = n.parse::<i64>() {
        return Ok(Value::Int64(v));
    }
    if let Ok(v) = n.parse::<u64>() {
        return Ok(Value::UInt64(v));
    }
    n.parse::<f64>()
        .map(Value::Float64)
        .map_err(|_| unsupported!("invalid number literal {n}"))
}

#[cfg(test)]
mod tests {
    use sqlparser::dialect::GenericDialect;
    use treestore::memory::{MemoryColumn, MemoryDataset, MemoryTree};

    use super::*;
    use crate::parser::parse_single_statement;

    fn dataset() -> MemoryDataset {
        let tree = MemoryTree::try_new(
            "evts",
            vec![
                MemoryColumn::from_values("run", [1_i32, 2, 3]).unwrap(),
                MemoryColumn::from_values("pt", [10.0_f64, 20.0, 30.0]).unwrap(),
                MemoryColumn::from_values("name", ["a", "b", "c"]).unwrap(),
            ],
        )
        .unwrap();
        MemoryDataset::new("ds")
            .with_tree(Arc::new(tree))
            .with_object("h1", "TH1F")
    }

    fn plan(sql: &str) -> Result<QueryPlan> {
        let stmt = parse_single_statement(&GenericDialect {}, sql)?;
        plan_statement(&dataset(), stmt)
    }

    #[test]
    fn simple_column() {
        let plan = plan("SELECT pt FROM evts").unwrap();
        assert_eq!(vec!["pt"], plan.scan_columns);
        assert_eq!(vec!["pt"], plan.columns);
        assert_eq!(Expr::column("pt"), plan.projection);
        assert!(plan.filter.is_none());
    }

    #[test]
    fn star_is_tuple_in_schema_order() {
        let plan = plan("SELECT * FROM evts").unwrap();
        assert_eq!(vec!["run", "pt", "name"], plan.columns);
        assert_eq!(
            Expr::Tuple(vec![
                Expr::column("run"),
                Expr::column("pt"),
                Expr::column("name")
            ]),
            plan.projection
        );
    }

    #[test]
    fn multiple_projections() {
        let plan = plan("SELECT name, pt * 2, run AS r FROM evts").unwrap();
        assert_eq!(vec!["name", "", "r"], plan.columns);
        assert_eq!(vec!["name", "pt", "run"], plan.scan_columns);
        assert!(matches!(plan.projection, Expr::Tuple(ref exprs) if exprs.len() == 3));
    }

    #[test]
    fn row_value_expands() {
        let plan = plan("SELECT (evts.run, pt + 1) FROM evts").unwrap();
        assert_eq!(vec!["run", ""], plan.columns);
    }

    #[test]
    fn nested_row_value_rejected() {
        let err = plan("SELECT ((run, pt), name) FROM evts").unwrap_err();
        assert!(matches!(err, TreeSqlError::UnsupportedQuery(_)));
    }

    #[test]
    fn filter_compiled() {
        let plan = plan("SELECT pt FROM evts WHERE run > 1").unwrap();
        assert_eq!(vec!["pt", "run"], plan.scan_columns);
        assert_eq!(
            Some(Expr::binary(
                BinaryOperator::Gt,
                Expr::column("run"),
                Expr::lit(1)
            )),
            plan.filter
        );
    }

    #[test]
    fn between_folds() {
        let plan = plan("SELECT pt FROM evts WHERE run NOT BETWEEN 1 AND 2").unwrap();
        assert_eq!(
            Some(Expr::binary(
                BinaryOperator::Or,
                Expr::binary(BinaryOperator::Lt, Expr::column("run"), Expr::lit(1)),
                Expr::binary(BinaryOperator::Gt, Expr::column("run"), Expr::lit(2)),
            )),
            plan.filter
        );
    }

    #[test]
    fn placeholders() {
        let anonymous = plan("SELECT pt FROM evts WHERE run > ? AND pt < ?").unwrap();
        assert_eq!(2, anonymous.num_inputs);

        let numbered = plan("SELECT pt FROM evts WHERE run > $2").unwrap();
        assert_eq!(2, numbered.num_inputs);
        assert_eq!(
            Some(Expr::binary(
                BinaryOperator::Gt,
                Expr::column("run"),
                Expr::Placeholder(1)
            )),
            numbered.filter
        );
    }

    #[test]
    fn limit_offset_literals() {
        let limited = plan("SELECT pt FROM evts LIMIT 2 OFFSET 1").unwrap();
        assert_eq!(Some(2), limited.limit);
        assert_eq!(1, limited.offset);

        let err = plan("SELECT pt FROM evts LIMIT run").unwrap_err();
        assert!(matches!(err, TreeSqlError::UnsupportedQuery(_)));
    }

    #[test]
    fn number_literals() {
        assert_eq!(Value::Int64(0), parse_number("0").unwrap());
        assert_eq!(Value::UInt64(u64::MAX), parse_number("18446744073709551615").unwrap());
        assert_eq!(Value::Float64(1.5), parse_number("1.5").unwrap());
        assert_eq!(Value::Float64(1000.0), parse_number("1e3").unwrap());
    }

    #[test]
    fn not_a_tree() {
        let err = plan("SELECT * FROM h1").unwrap_err();
        assert!(matches!(err, TreeSqlError::NotATable(name) if name == "h1"));
    }

    #[test]
    fn missing_table() {
        let err = plan("SELECT * FROM nope").unwrap_err();
        assert!(matches!(err, TreeSqlError::NotATable(name) if name == "nope"));
    }

    #[test]
    fn unsupported_shapes() {
        for sql in [
            "SELECT pt FROM evts, evts",
            "SELECT pt FROM evts e1 JOIN evts e2 ON e1.run = e2.run",
            "SELECT 1",
            "SELECT pt FROM evts ORDER BY pt",
            "SELECT DISTINCT pt FROM evts",
            "SELECT run FROM evts GROUP BY run",
            "WITH x AS (SELECT pt FROM evts) SELECT pt FROM x",
            "SELECT pt FROM evts UNION SELECT pt FROM evts",
            "SELECT pt FROM evts WHERE name LIKE 'a%'",
            "SELECT upper(name) FROM evts",
            "SELECT pt FROM evts WHERE run IN (SELECT zz FROM other)",
            "SELECT pt FROM evts WHERE EXISTS (SELECT 1 FROM other)",
            "SELECT (SELECT zz FROM other) FROM evts",
            "INSERT INTO evts VALUES (1, 2.0, 'd')",
        ] {
            let err = plan(sql).unwrap_err();
            assert!(
                matches!(err, TreeSqlError::UnsupportedQuery(_)),
                "sql: {sql}, err: {err}"
            );
        }
    }

    #[test]
    fn unknown_column_before_compile() {
        let err = plan("SELECT pt FROM evts WHERE phi > 0").unwrap_err();
        assert!(matches!(err, TreeSqlError::UnknownColumn { .. }));
    }
}
