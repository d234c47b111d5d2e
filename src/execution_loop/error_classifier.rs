//! Error Classifier
//!
//! Sorts engine error messages into a small taxonomy used for log lines and
//! for the hint appended to the error-feedback prompt.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL error classification taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    ColumnNotFound,
    TableNotFound,
    AmbiguousColumn,
    InvalidAggregation,
    SyntaxError,
    TypeMismatch,
    PermissionDenied,
    Timeout,
    NoQueryProduced,
    Other,
}

impl SqlErrorClass {
    /// Extra instruction for the regeneration prompt
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            SqlErrorClass::ColumnNotFound => {
                Some("a column does not exist; use only the names listed in <columns>, spelled exactly.")
            }
            SqlErrorClass::TableNotFound => {
                Some("the table does not exist; use the fully qualified name from <tableName>.")
            }
            SqlErrorClass::AmbiguousColumn => Some("qualify the ambiguous column with its table."),
            SqlErrorClass::InvalidAggregation => Some(
                "every selected column that is not aggregated must appear in GROUP BY.",
            ),
            SqlErrorClass::SyntaxError => Some("check keywords, commas and parentheses for Snowflake syntax."),
            SqlErrorClass::TypeMismatch => Some("cast values explicitly so compared types match."),
            SqlErrorClass::NoQueryProduced => Some("answer with a ```sql block."),
            SqlErrorClass::Timeout => Some("make the query cheaper, e.g. filter earlier."),
            SqlErrorClass::PermissionDenied | SqlErrorClass::Other => None,
        }
    }
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlErrorClass::ColumnNotFound => "ColumnNotFound",
            SqlErrorClass::TableNotFound => "TableNotFound",
            SqlErrorClass::AmbiguousColumn => "AmbiguousColumn",
            SqlErrorClass::InvalidAggregation => "InvalidAggregation",
            SqlErrorClass::SyntaxError => "SyntaxError",
            SqlErrorClass::TypeMismatch => "TypeMismatch",
            SqlErrorClass::PermissionDenied => "PermissionDenied",
            SqlErrorClass::Timeout => "Timeout",
            SqlErrorClass::NoQueryProduced => "NoQueryProduced",
            SqlErrorClass::Other => "Other",
        };
        write!(f, "{}", name)
    }
}

/// Error classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an engine error message into the taxonomy
    pub fn classify_message(&self, message: &str) -> SqlErrorClass {
        let msg = message.to_lowercase();

        if msg.contains("no ```sql block") || msg.contains("no sql block") {
            return SqlErrorClass::NoQueryProduced;
        }

        if msg.contains("timed out") || msg.contains("timeout") || (msg.contains("exceeded") && msg.contains("generation")) {
            return SqlErrorClass::Timeout;
        }

        if msg.contains("ambiguous") && msg.contains("column") {
            return SqlErrorClass::AmbiguousColumn;
        }

        if msg.contains("invalid identifier")
            || (msg.contains("column") && (msg.contains("not found") || msg.contains("does not exist")))
        {
            return SqlErrorClass::ColumnNotFound;
        }

        if (msg.contains("table") || msg.contains("object"))
            && (msg.contains("not found") || msg.contains("does not exist"))
        {
            return SqlErrorClass::TableNotFound;
        }

        if msg.contains("not a valid group by expression") || msg.contains("aggregate") || msg.contains("group by") {
            return SqlErrorClass::InvalidAggregation;
        }

        if msg.contains("syntax error") || msg.contains("unexpected") {
            return SqlErrorClass::SyntaxError;
        }

        if msg.contains("is not recognized")
            || msg.contains("cannot be cast")
            || msg.contains("type mismatch")
            || msg.contains("invalid type")
        {
            return SqlErrorClass::TypeMismatch;
        }

        if msg.contains("insufficient privileges") || msg.contains("not authorized") || msg.contains("permission") {
            return SqlErrorClass::PermissionDenied;
        }

        SqlErrorClass::Other
    }
}
