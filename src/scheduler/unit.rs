use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::group::{POD_GROUP_MIN_AVAILABLE, POD_GROUP_NAME};

/// A schedulable unit of work, identified by namespace and name and carrying
/// the labels that declare its group membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Uuid,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Absent priority is treated as 0.
    pub priority: Option<i32>,
    /// Node the unit has been bound to, if any
    pub assigned_node: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Unit {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            priority: None,
            assigned_node: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Declare membership of `group` with the given minimum member count.
    pub fn with_group(self, group: &str, min_members: impl ToString) -> Self {
        self.with_label(POD_GROUP_NAME, group)
            .with_label(POD_GROUP_MIN_AVAILABLE, min_members.to_string())
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn assigned_to(mut self, node: impl Into<String>) -> Self {
        self.assigned_node = Some(node.into());
        self
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned_node.as_deref().is_some_and(|n| !n.is_empty())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Group label value, empty when the unit carries none.
    pub fn group_label(&self) -> &str {
        self.label(POD_GROUP_NAME).unwrap_or_default()
    }

    /// True if the unit lives in `namespace` and carries `group_name` as its group label.
    pub fn same_group(&self, namespace: &str, group_name: &str) -> bool {
        self.namespace == namespace && self.group_label() == group_name
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A unit as it sits in the host's admission queue.
#[derive(Debug, Clone)]
pub struct QueuedUnit {
    pub unit: Unit,
    pub initial_attempt: Instant,
}

impl QueuedUnit {
    pub fn new(unit: Unit, initial_attempt: Instant) -> Self {
        Self {
            unit,
            initial_attempt,
        }
    }
}

/// Deletion notification delivered by the host's event source.
///
/// A tombstone is produced when the deletion was missed and only the last
/// known state of the unit survives.
#[derive(Debug, Clone)]
pub enum DeletedUnit {
    Live(Unit),
    Tombstone { key: String, last_known: Unit },
}

impl DeletedUnit {
    pub fn unit(&self) -> &Unit {
        match self {
            DeletedUnit::Live(unit) => unit,
            DeletedUnit::Tombstone { last_known, .. } => last_known,
        }
    }
}
