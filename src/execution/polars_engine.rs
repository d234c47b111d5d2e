//! Polars Warehouse - local CSV/Parquet tables queried through Polars SQL
//!
//! Every `*.csv` and `*.parquet` file in the data directory becomes a table
//! named after its file stem. Relations in a query resolve by their last
//! name part, case-insensitively, so `DB.SALES.ORDERS` reads `orders.csv`.
//! Used for offline runs and tests.

use super::{ColumnInfo, QualifiedName, ResultSet, Warehouse, WarehouseError};
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use polars::prelude::*;
use polars::sql::SQLContext;
use sqlparser::ast::{visit_relations_mut, Ident, ObjectName};
use sqlparser::dialect::SnowflakeDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

pub struct PolarsWarehouse {
    data_dir: PathBuf,
    tables: RwLock<HashMap<String, DataFrame>>,
}

impl PolarsWarehouse {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let tables = load_tables(&data_dir)?;
        info!(
            "📂 Loaded {} local tables from {}",
            tables.len(),
            data_dir.display()
        );
        Ok(Self {
            data_dir,
            tables: RwLock::new(tables),
        })
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn lookup(&self, table: &str) -> Option<DataFrame> {
        let tables = self.tables.read().ok()?;
        tables.get(table).cloned().or_else(|| {
            tables
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(table))
                .map(|(_, df)| df.clone())
        })
    }
}

fn load_tables(dir: &Path) -> Result<HashMap<String, DataFrame>> {
    let mut tables = HashMap::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let frame = match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => LazyCsvReader::new(&path)
                .with_has_header(true)
                .finish()
                .map_err(|e| ChatError::Polars(format!("Failed to load CSV {}: {}", path.display(), e)))?,
            Some("parquet") => LazyFrame::scan_parquet(&path, ScanArgsParquet::default())
                .map_err(|e| ChatError::Polars(format!("Failed to load Parquet {}: {}", path.display(), e)))?,
            _ => continue,
        };

        tables.insert(stem.to_string(), frame.collect()?);
    }

    Ok(tables)
}

/// Point every relation whose last name part matches a loaded table at that
/// table. Text that does not parse is returned unchanged.
fn resolve_relations(sql: &str, tables: &[String]) -> String {
    let mut statements = match Parser::parse_sql(&SnowflakeDialect {}, sql) {
        Ok(statements) => statements,
        Err(_) => return sql.to_string(),
    };

    let mut rewritten = false;
    for statement in statements.iter_mut() {
        let _ = visit_relations_mut(statement, |relation: &mut ObjectName| {
            let target = relation
                .0
                .last()
                .and_then(|last| tables.iter().find(|t| t.eq_ignore_ascii_case(&last.value)));
            if let Some(table) = target {
                let exact = relation.0.len() == 1 && relation.0[0].value == *table;
                if !exact {
                    *relation = ObjectName(vec![Ident::with_quote('"', table.clone())]);
                    rewritten = true;
                }
            }
            ControlFlow::<()>::Continue(())
        });
    }

    if !rewritten {
        return sql.to_string();
    }
    let resolved = statements
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    debug!("Resolved local relations: {}", resolved);
    resolved
}

#[async_trait]
impl Warehouse for PolarsWarehouse {
    fn name(&self) -> &'static str {
        "polars"
    }

    async fn run(&self, sql: &str) -> std::result::Result<ResultSet, WarehouseError> {
        let mut ctx = SQLContext::new();
        let names: Vec<String> = {
            let tables = self
                .tables
                .read()
                .map_err(|_| WarehouseError::Connection("table registry poisoned".to_string()))?;
            for (name, df) in tables.iter() {
                ctx.register(name, df.clone().lazy());
            }
            tables.keys().cloned().collect()
        };

        let sql = resolve_relations(sql.trim().trim_end_matches(';'), &names);
        let df = ctx
            .execute(&sql)
            .and_then(|lf| lf.collect())
            .map_err(|e| WarehouseError::Programming(e.to_string()))?;

        ResultSet::from_dataframe(&df).map_err(|e| WarehouseError::Programming(e.to_string()))
    }

    async fn reconnect(&self) -> std::result::Result<(), WarehouseError> {
        let reloaded = load_tables(&self.data_dir).map_err(|e| WarehouseError::Connection(e.to_string()))?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| WarehouseError::Connection("table registry poisoned".to_string()))?;
        *tables = reloaded;
        Ok(())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let name = QualifiedName::parse(table)?;
        let df = self
            .lookup(&name.table)
            .ok_or_else(|| ChatError::Config(format!("Unknown local table: {}", name.table)))?;

        Ok(df
            .get_columns()
            .iter()
            .map(|s| ColumnInfo {
                name: s.name().to_string(),
                data_type: s.dtype().to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> Vec<String> {
        vec!["orders".to_string(), "customers".to_string()]
    }

    #[test]
    fn test_resolves_qualified_and_uppercase_names() {
        let sql = resolve_relations("SELECT COUNT(*) FROM DB.SALES.ORDERS", &tables());
        assert_eq!(sql, r#"SELECT COUNT(*) FROM "orders""#);

        let sql = resolve_relations("SELECT o.X FROM ORDERS AS o JOIN Customers c ON o.ID = c.ID", &tables());
        assert!(sql.contains(r#"FROM "orders" AS o"#));
        assert!(sql.contains(r#"JOIN "customers" AS c"#));
    }

    #[test]
    fn test_leaves_exact_and_unknown_names_alone() {
        let sql = "SELECT * FROM orders";
        assert_eq!(resolve_relations(sql, &tables()), sql);

        let cte = "WITH recent AS (SELECT * FROM orders) SELECT * FROM recent";
        assert_eq!(resolve_relations(cte, &tables()), cte);
    }
}
