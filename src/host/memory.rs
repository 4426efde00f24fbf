use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{CoschedError, Result};
use crate::host::{LabelSelector, PlacementSnapshot, UnitLister};
use crate::scheduler::{DeletedUnit, Unit};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// In-memory store of every known unit, assigned or not.
///
/// Serves both the unit listing and the placement snapshot, and publishes a
/// [`DeletedUnit`] event whenever a unit is removed.
#[derive(Debug)]
pub struct InMemoryCluster {
    units: RwLock<HashMap<Uuid, Unit>>,
    deletions: broadcast::Sender<DeletedUnit>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        let (deletions, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            units: RwLock::new(HashMap::new()),
            deletions,
        }
    }

    pub fn subscribe_deletions(&self) -> broadcast::Receiver<DeletedUnit> {
        self.deletions.subscribe()
    }

    pub fn add_unit(&self, unit: Unit) -> Result<()> {
        self.write()?.insert(unit.id, unit);
        Ok(())
    }

    pub fn get_unit(&self, id: &Uuid) -> Result<Option<Unit>> {
        Ok(self.read()?.get(id).cloned())
    }

    /// Record the placement of a unit. Returns false if the unit is unknown.
    pub fn bind(&self, id: &Uuid, node: &str) -> Result<bool> {
        let mut units = self.write()?;
        match units.get_mut(id) {
            Some(unit) => {
                unit.assigned_node = Some(node.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a unit and publish its deletion.
    pub fn delete(&self, id: &Uuid) -> Result<Option<Unit>> {
        let removed = self.write()?.remove(id);
        if let Some(unit) = &removed {
            // No subscribers is fine.
            let _ = self.deletions.send(DeletedUnit::Live(unit.clone()));
        }
        Ok(removed)
    }

    /// Publish a tombstone for a unit whose deletion was missed.
    pub fn publish_tombstone(&self, last_known: Unit) {
        let key = last_known.to_string();
        let _ = self
            .deletions
            .send(DeletedUnit::Tombstone { key, last_known });
    }

    pub fn len(&self) -> usize {
        self.read().map(|u| u.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Uuid, Unit>>> {
        self.units
            .read()
            .map_err(|_| CoschedError::Internal("unit store lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Unit>>> {
        self.units
            .write()
            .map_err(|_| CoschedError::Internal("unit store lock poisoned".into()))
    }
}

impl UnitLister for InMemoryCluster {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Unit>> {
        Ok(self
            .read()?
            .values()
            .filter(|u| u.namespace == namespace && selector.matches(&u.labels))
            .cloned()
            .collect())
    }
}

impl PlacementSnapshot for InMemoryCluster {
    fn filtered_list(&self, predicate: &dyn Fn(&Unit) -> bool) -> Result<Vec<Unit>> {
        Ok(self
            .read()?
            .values()
            .filter(|u| predicate(u))
            .cloned()
            .collect())
    }
}
