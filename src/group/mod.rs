//! Group identity and the registry of group records.
//!
//! A unit declares membership of a group through two labels:
//! [`POD_GROUP_NAME`] and [`POD_GROUP_MIN_AVAILABLE`]. Both must be present
//! and the minimum must parse as a positive integer, otherwise the unit is
//! scheduled on its own.
//!
//! # Components
//!
//! - [`GroupDeclaration`]: parsed group labels of a single unit
//! - [`GroupRegistry`]: concurrent map from [`GroupKey`] to [`GroupRecord`]
//! - [`gc`]: periodic eviction of records marked for deletion

pub mod gc;
pub mod registry;

use std::fmt;

use serde::Serialize;

use crate::error::{CoschedError, Result};
use crate::scheduler::Unit;

pub use registry::{GroupRecord, GroupRegistry, GroupSummary};

/// Label naming the group a unit belongs to.
pub const POD_GROUP_NAME: &str = "pod-group.scheduling.sigs.k8s.io/name";
/// Label holding the minimum number of members to admit together.
pub const POD_GROUP_MIN_AVAILABLE: &str = "pod-group.scheduling.sigs.k8s.io/min-available";

/// Registry key of a group: `<namespace>/<group-name>`. Empty for ungrouped units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(namespace: &str, group_name: &str) -> Self {
        Self(format!("{}/{}", namespace, group_name))
    }

    pub fn ungrouped() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Group parameters declared by a single unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDeclaration {
    pub name: String,
    pub min_members: usize,
}

impl GroupDeclaration {
    /// Parse the group labels of `unit`.
    ///
    /// Returns `Ok(None)` when either label is missing or empty, and an error
    /// when the minimum is present but not a positive integer.
    pub fn from_unit(unit: &Unit) -> Result<Option<Self>> {
        let name = match unit.label(POD_GROUP_NAME) {
            Some(name) if !name.is_empty() => name,
            _ => return Ok(None),
        };
        let raw = match unit.label(POD_GROUP_MIN_AVAILABLE) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(None),
        };

        let value: i64 = raw
            .parse()
            .map_err(|source| CoschedError::InvalidMinMembers {
                unit: unit.to_string(),
                value: raw.to_string(),
                source,
            })?;
        if value < 1 {
            return Err(CoschedError::NonPositiveMinMembers {
                unit: unit.to_string(),
                value,
            });
        }
        let min_members = usize::try_from(value).map_err(|_| {
            CoschedError::Internal(format!("min-members {} does not fit in usize", value))
        })?;

        Ok(Some(Self {
            name: name.to_string(),
            min_members,
        }))
    }

    pub fn key(&self, namespace: &str) -> GroupKey {
        GroupKey::new(namespace, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_declaration() {
        let unit = Unit::new("ns", "a").with_group("g", 3);
        let decl = GroupDeclaration::from_unit(&unit).unwrap().unwrap();
        assert_eq!(decl.name, "g");
        assert_eq!(decl.min_members, 3);
        assert_eq!(decl.key("ns").as_str(), "ns/g");
    }

    #[test]
    fn missing_labels_mean_ungrouped() {
        let plain = Unit::new("ns", "a");
        assert!(GroupDeclaration::from_unit(&plain).unwrap().is_none());

        let no_min = Unit::new("ns", "a").with_label(POD_GROUP_NAME, "g");
        assert!(GroupDeclaration::from_unit(&no_min).unwrap().is_none());

        let empty_name = Unit::new("ns", "a").with_group("", 2);
        assert!(GroupDeclaration::from_unit(&empty_name).unwrap().is_none());

        let empty_min = Unit::new("ns", "a").with_group("g", "");
        assert!(GroupDeclaration::from_unit(&empty_min).unwrap().is_none());
    }

    #[test]
    fn garbage_min_members_is_an_error() {
        let unit = Unit::new("ns", "a").with_group("g", "three");
        let err = GroupDeclaration::from_unit(&unit).unwrap_err();
        assert!(matches!(err, CoschedError::InvalidMinMembers { .. }));
    }

    #[test]
    fn non_positive_min_members_is_an_error() {
        for value in ["0", "-2"] {
            let unit = Unit::new("ns", "a").with_group("g", value);
            let err = GroupDeclaration::from_unit(&unit).unwrap_err();
            assert!(matches!(err, CoschedError::NonPositiveMinMembers { .. }));
        }
    }
}
