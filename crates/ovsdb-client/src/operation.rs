//! Transaction operations (RFC 7047 §5.2).
//!
//! Operations are plain data: building one performs no I/O. A list of them
//! is submitted atomically with [`crate::OvsDbClient::transact`].

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::value;

/// A `where` clause term: `[column, function, value]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    column: String,
    function: &'static str,
    value: Value,
}

impl Condition {
    /// `column == value`.
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            function: "==",
            value,
        }
    }

    /// Matches the row with the given `_uuid`.
    pub fn uuid_eq(uuid: &str) -> Self {
        Self::eq("_uuid", value::uuid(uuid))
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn function(&self) -> &str {
        self.function
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn to_value(&self) -> Value {
        json!([self.column, self.function, self.value])
    }
}

/// Mutators supported by the `mutate` operation on set and map columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutator {
    /// Add elements to a set or map.
    Insert,
    /// Remove elements from a set or map.
    Delete,
}

impl Mutator {
    fn as_str(&self) -> &'static str {
        match self {
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        }
    }
}

/// One `[column, mutator, value]` mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    column: String,
    mutator: Mutator,
    value: Value,
}

impl Mutation {
    pub fn new(column: impl Into<String>, mutator: Mutator, value: Value) -> Self {
        Self {
            column: column.into(),
            mutator,
            value,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn mutator(&self) -> Mutator {
        self.mutator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn to_value(&self) -> Value {
        json!([self.column, self.mutator.as_str(), self.value])
    }
}

/// A single database operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        table: String,
        row: Map<String, Value>,
        uuid_name: Option<String>,
    },
    Mutate {
        table: String,
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    },
    Delete {
        table: String,
        conditions: Vec<Condition>,
    },
    Select {
        table: String,
        conditions: Vec<Condition>,
        columns: Option<Vec<String>>,
    },
}

impl Operation {
    /// Inserts `row` into `table`.
    pub fn insert(table: impl Into<String>, row: Map<String, Value>) -> Self {
        Operation::Insert {
            table: table.into(),
            row,
            uuid_name: None,
        }
    }

    /// Names the row being inserted so later operations in the same
    /// transaction can reference it with [`value::named_uuid`].
    ///
    /// Has no effect on other operation kinds.
    pub fn with_uuid_name(mut self, name: impl Into<String>) -> Self {
        if let Operation::Insert { uuid_name, .. } = &mut self {
            *uuid_name = Some(name.into());
        }
        self
    }

    pub fn mutate(
        table: impl Into<String>,
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    ) -> Self {
        Operation::Mutate {
            table: table.into(),
            conditions,
            mutations,
        }
    }

    pub fn delete(table: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Operation::Delete {
            table: table.into(),
            conditions,
        }
    }

    pub fn select(table: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Operation::Select {
            table: table.into(),
            conditions,
            columns: None,
        }
    }

    /// Operation name as it appears on the wire.
    pub fn op_name(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Mutate { .. } => "mutate",
            Operation::Delete { .. } => "delete",
            Operation::Select { .. } => "select",
        }
    }

    /// Table the operation applies to.
    pub fn table(&self) -> &str {
        match self {
            Operation::Insert { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Select { table, .. } => table,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut ret = Map::new();
        ret.insert("op".to_string(), Value::from(self.op_name()));
        ret.insert("table".to_string(), Value::from(self.table()));
        match self {
            Operation::Insert { row, uuid_name, .. } => {
                ret.insert("row".to_string(), Value::Object(row.clone()));
                if let Some(name) = uuid_name {
                    ret.insert("uuid-name".to_string(), Value::from(name.as_str()));
                }
            }
            Operation::Mutate {
                conditions,
                mutations,
                ..
            } => {
                ret.insert("where".to_string(), conditions_value(conditions));
                ret.insert(
                    "mutations".to_string(),
                    Value::Array(mutations.iter().map(Mutation::to_value).collect()),
                );
            }
            Operation::Delete { conditions, .. } => {
                ret.insert("where".to_string(), conditions_value(conditions));
            }
            Operation::Select {
                conditions,
                columns,
                ..
            } => {
                ret.insert("where".to_string(), conditions_value(conditions));
                if let Some(columns) = columns {
                    ret.insert("columns".to_string(), json!(columns));
                }
            }
        }
        Value::Object(ret)
    }
}

fn conditions_value(conditions: &[Condition]) -> Value {
    Value::Array(conditions.iter().map(Condition::to_value).collect())
}

/// Result of one operation in a transaction.
///
/// A failed operation carries `error` (and usually `details`). Operations
/// after a failed one are not executed and come back as `null`, which
/// deserializes to an empty result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OperationResult {
    #[serde(default)]
    pub uuid: Option<Value>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub rows: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl OperationResult {
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    /// Uuid assigned to an inserted row.
    pub fn inserted_uuid(&self) -> Option<&str> {
        self.uuid.as_ref().and_then(value::as_uuid)
    }
}
