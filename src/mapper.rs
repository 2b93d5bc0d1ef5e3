//! Table routing configuration and its wildcard fallback resolution.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::TaskId;

/// Routing rule for a (schema, table) pair.
///
/// Describes where rows of a source table land in the target. An empty `schema` or
/// `table` on the rule itself means the rule was registered under a wildcard key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapper {
    pub schema: String,
    pub table: String,
    pub target_schema: String,
    pub target_table: String,
}

impl TableMapper {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        target_schema: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            target_schema: target_schema.into(),
            target_table: target_table.into(),
        }
    }
}

/// Mapper rules for all tasks on this node, keyed by `taskId:schema:table`.
///
/// A rule can be registered with an empty schema and/or table component, which acts as
/// a wildcard during [`MapperConfig::resolve`].
#[derive(Debug, Clone, Default)]
pub struct MapperConfig {
    mappers: HashMap<String, Arc<TableMapper>>,
}

impl MapperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule under the given key components. Empty components act as
    /// wildcards at resolution time.
    pub fn insert(&mut self, task_id: &TaskId, schema: &str, table: &str, mapper: TableMapper) {
        self.mappers
            .insert(mapper_key(task_id, schema, table), Arc::new(mapper));
    }

    /// Removes a previously registered rule.
    pub fn remove(&mut self, task_id: &TaskId, schema: &str, table: &str) {
        self.mappers.remove(&mapper_key(task_id, schema, table));
    }

    /// Resolves the rule for a (schema, table) pair, first match wins:
    /// exact schema+table, then wildcard schema, then wildcard table, then fully
    /// wildcard. Absence of any match yields `None`, which is not an error by itself.
    pub fn resolve(&self, task_id: &TaskId, schema: &str, table: &str) -> Option<Arc<TableMapper>> {
        let keys = [
            mapper_key(task_id, schema, table),
            mapper_key(task_id, "", table),
            mapper_key(task_id, schema, ""),
            mapper_key(task_id, "", ""),
        ];

        keys.iter()
            .find_map(|key| self.mappers.get(key))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

fn mapper_key(task_id: &TaskId, schema: &str, table: &str) -> String {
    format!("{task_id}:{schema}:{table}")
}
