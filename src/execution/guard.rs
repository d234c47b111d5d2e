//! Read-only statement guard
//!
//! Candidates are parsed with the Snowflake dialect before they reach the
//! store. Anything that parses to something other than a single query is
//! rejected as an execution failure so the loop can regenerate it. Text the
//! parser does not understand is passed through to the engine only when it
//! opens like a query (`SELECT`, `WITH` or a parenthesis).

use sqlparser::ast::Statement;
use sqlparser::dialect::SnowflakeDialect;
use sqlparser::parser::Parser;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryGuard;

impl QueryGuard {
    pub fn new() -> Self {
        Self
    }

    /// `Err` carries the message fed back to the next generation attempt.
    pub fn check(&self, sql: &str) -> Result<(), String> {
        if sql.trim().trim_end_matches(';').trim().is_empty() {
            return Err("The generated SQL block is empty".to_string());
        }

        let statements = match Parser::parse_sql(&SnowflakeDialect {}, sql) {
            Ok(statements) => statements,
            Err(e) if opens_like_query(sql) => {
                debug!("Guard could not parse candidate, passing through: {}", e);
                return Ok(());
            }
            Err(e) => {
                return Err(format!(
                    "Only read-only SELECT queries are allowed and the statement could not be verified ({}); rewrite it as a single SELECT",
                    e
                ));
            }
        };

        match statements.as_slice() {
            [Statement::Query(_)] => Ok(()),
            [_] => Err("Only read-only SELECT queries are allowed; rewrite the statement as a single SELECT".to_string()),
            _ => Err(format!(
                "Expected exactly one statement per SQL block, found {}",
                statements.len()
            )),
        }
    }
}

/// First keyword after leading comments and whitespace is `SELECT`/`WITH`,
/// or the text starts with `(`.
fn opens_like_query(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            break;
        }
    }

    if rest.starts_with('(') {
        return true;
    }
    let keyword: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    keyword.eq_ignore_ascii_case("select") || keyword.eq_ignore_ascii_case("with")
}
