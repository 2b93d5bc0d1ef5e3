//! Core identifier and token types shared across the task orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a replication task, stable and externally assigned.
pub type TaskId = String;

/// Identifier of the single consumption swimlane feeding a task.
///
/// One task owns exactly one swimlane at a time.
pub type SwimlaneId = String;

/// Opaque checkpoint token marking how far a swimlane has been consumed.
///
/// The orchestrator never interprets the token beyond checking for blankness; its
/// structure belongs to the consumer and the cluster layer that persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position(String);

impl Position {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the token is empty or all whitespace.
    ///
    /// The cluster layer may hand back a blank token for a swimlane that was registered
    /// but never checkpointed; callers treat that the same as no token at all.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Position {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for Position {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// A fully qualified (schema, table) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Returns the `schema.table` key under which per-table state is stored.
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}
