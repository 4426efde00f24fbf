use std::time::Duration;

use thiserror::Error;

use crate::group::GroupKey;

/// Reason a unit was turned away before placement. The `Display` text is the
/// reason reported to the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unschedulable {
    #[error("group min-members do not match: unit declares {declared}, group {group} has {registered}")]
    MinMembersMismatch {
        group: GroupKey,
        declared: usize,
        registered: usize,
    },

    #[error("priorities do not match: unit has {unit_priority}, group {group} has {group_priority}")]
    PriorityMismatch {
        group: GroupKey,
        unit_priority: i32,
        group_priority: i32,
    },

    #[error("group {group} has {total} members, less than min-members {required}")]
    InsufficientMembers {
        group: GroupKey,
        total: usize,
        required: usize,
    },

    #[error("no nodes available")]
    NoNodesAvailable,
}

/// Decision at the admission point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Admit,
    Wait(Duration),
}

impl Permit {
    pub fn is_admit(&self) -> bool {
        matches!(self, Permit::Admit)
    }
}
