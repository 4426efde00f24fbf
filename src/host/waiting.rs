use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::host::{ParkedUnit, ParkedUnits};
use crate::scheduler::Unit;

/// How a parked unit's wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Allowed { by: String },
    Rejected { by: String },
    TimedOut,
}

#[derive(Debug)]
struct ParkedEntry {
    unit: Unit,
    tx: oneshot::Sender<WaitOutcome>,
}

/// Units held at the admission point, each waiting for an explicit allow,
/// an explicit reject, or its timeout.
///
/// Resolution removes the entry from the map first, so whichever of
/// allow/reject/timeout gets there first wins and the rest are no-ops.
#[derive(Debug, Default)]
pub struct WaitingRoom {
    parked: DashMap<Uuid, ParkedEntry>,
}

impl WaitingRoom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `unit` for at most `timeout`. The unit is visible to
    /// [`ParkedUnits::for_each_parked`] as soon as this returns.
    pub fn park(self: &Arc<Self>, unit: Unit, timeout: Duration) -> ParkTicket {
        let (tx, rx) = oneshot::channel();
        let id = unit.id;
        tracing::debug!(unit = %unit, timeout_ms = timeout.as_millis() as u64, "Unit parked");
        self.parked.insert(id, ParkedEntry { unit, tx });
        ParkTicket {
            id,
            rx,
            timeout,
            room: Arc::clone(self),
        }
    }

    pub fn allow(&self, id: &Uuid, actor: &str) -> bool {
        self.resolve(
            id,
            WaitOutcome::Allowed {
                by: actor.to_string(),
            },
        )
    }

    pub fn reject(&self, id: &Uuid, actor: &str) -> bool {
        self.resolve(
            id,
            WaitOutcome::Rejected {
                by: actor.to_string(),
            },
        )
    }

    pub fn is_parked(&self, id: &Uuid) -> bool {
        self.parked.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    fn resolve(&self, id: &Uuid, outcome: WaitOutcome) -> bool {
        match self.parked.remove(id) {
            Some((_, entry)) => {
                tracing::debug!(unit = %entry.unit, outcome = ?outcome, "Parked unit resolved");
                // The ticket may already be gone; nothing to deliver then.
                let _ = entry.tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Pending wait of one parked unit.
#[derive(Debug)]
pub struct ParkTicket {
    id: Uuid,
    rx: oneshot::Receiver<WaitOutcome>,
    timeout: Duration,
    room: Arc<WaitingRoom>,
}

impl ParkTicket {
    pub fn unit_id(&self) -> Uuid {
        self.id
    }

    /// Wait until the unit is allowed, rejected, or its timeout elapses.
    pub async fn wait(mut self) -> WaitOutcome {
        match tokio::time::timeout(self.timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => WaitOutcome::Rejected {
                by: "waiting-room".to_string(),
            },
            Err(_) => {
                if self.room.parked.remove(&self.id).is_some() {
                    return WaitOutcome::TimedOut;
                }
                // Resolved concurrently with the timeout; the resolver holds
                // the sender and delivers right after removing the entry.
                self.rx.await.unwrap_or(WaitOutcome::TimedOut)
            }
        }
    }
}

struct ParkedHandle<'a> {
    unit: Unit,
    room: &'a WaitingRoom,
}

impl ParkedUnit for ParkedHandle<'_> {
    fn unit(&self) -> &Unit {
        &self.unit
    }

    fn allow(&self, actor: &str) {
        self.room.allow(&self.unit.id, actor);
    }

    fn reject(&self, actor: &str) {
        self.room.reject(&self.unit.id, actor);
    }
}

impl ParkedUnits for WaitingRoom {
    fn for_each_parked(&self, f: &mut dyn FnMut(&dyn ParkedUnit)) {
        // Snapshot first: resolving a unit removes it from the map.
        let units: Vec<Unit> = self.parked.iter().map(|e| e.unit.clone()).collect();
        for unit in units {
            f(&ParkedHandle { unit, room: self });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_resolves_ticket() {
        let room = Arc::new(WaitingRoom::new());
        let unit = Unit::new("ns", "a");
        let id = unit.id;
        let ticket = room.park(unit, Duration::from_secs(10));

        assert!(room.is_parked(&id));
        assert!(room.allow(&id, "test"));
        assert!(!room.allow(&id, "test"));
        assert!(!room.reject(&id, "test"));
        assert_eq!(
            ticket.wait().await,
            WaitOutcome::Allowed {
                by: "test".to_string()
            }
        );
        assert!(room.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_unit() {
        let room = Arc::new(WaitingRoom::new());
        let unit = Unit::new("ns", "a");
        let id = unit.id;
        let ticket = room.park(unit, Duration::from_millis(50));

        assert_eq!(ticket.wait().await, WaitOutcome::TimedOut);
        assert!(!room.is_parked(&id));
        assert!(!room.reject(&id, "late"));
    }

    #[tokio::test]
    async fn handles_can_resolve_during_iteration() {
        let room = Arc::new(WaitingRoom::new());
        let a = room.park(Unit::new("ns", "a"), Duration::from_secs(10));
        let b = room.park(Unit::new("ns", "b"), Duration::from_secs(10));

        assert_eq!(room.count_parked(&|_| true), 2);
        room.for_each_parked(&mut |parked| parked.reject("test"));

        assert!(room.is_empty());
        assert!(matches!(a.wait().await, WaitOutcome::Rejected { .. }));
        assert!(matches!(b.wait().await, WaitOutcome::Rejected { .. }));
    }
}
