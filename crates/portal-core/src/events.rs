use serde::Serialize;
use serde_json::Value;

use crate::models::Record;

/// Full children of a subscribed node, keyed by child id.
pub type Snapshot = Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildChange {
    Added,
    Changed,
    Removed,
}

/// Child-level change under a subscribed node. For `Removed` the value is the
/// last known child value.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent {
    pub change: ChildChange,
    pub id: String,
    pub value: Value,
}

impl ChildEvent {
    pub fn added(id: impl Into<String>, value: Value) -> Self {
        Self {
            change: ChildChange::Added,
            id: id.into(),
            value,
        }
    }

    pub fn changed(id: impl Into<String>, value: Value) -> Self {
        Self {
            change: ChildChange::Changed,
            id: id.into(),
            value,
        }
    }

    pub fn removed(id: impl Into<String>) -> Self {
        Self {
            change: ChildChange::Removed,
            id: id.into(),
            value: Value::Null,
        }
    }
}

/// Anything the aggregator can be fed, tagged with the source path it came from.
#[derive(Debug, Clone)]
pub enum SourceUpdate {
    Snapshot { path: String, children: Snapshot },
    Child { path: String, event: ChildEvent },
    /// The stream for `path` stopped delivering.
    Closed { path: String },
}
