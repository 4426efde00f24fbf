use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::CoschedulingConfig;
use crate::error::CoschedError;
use crate::group::gc::GarbageCollector;
use crate::group::{GroupDeclaration, GroupKey, GroupRecord, GroupRegistry, POD_GROUP_NAME};
use crate::host::{LabelSelector, ParkedUnits, PlacementSnapshot, UnitLister};
use crate::scheduler::status::{Permit, Unschedulable};
use crate::scheduler::unit::{DeletedUnit, QueuedUnit, Unit};

/// Name used as the actor on every allow/reject issued to parked units.
pub const PLUGIN_NAME: &str = "Coscheduling";

/// Group record of a unit together with the unit's own declaration.
#[derive(Debug)]
pub struct Resolution {
    /// Registered record, or a transient singleton record for ungrouped units
    pub record: GroupRecord,
    /// The unit's own min-members, 0 if ungrouped
    pub declared_min_members: usize,
    /// Set when the unit's min-members label could not be parsed
    pub declaration_error: Option<CoschedError>,
}

/// Gang-scheduling coordinator.
///
/// Decides whether and when a unit may proceed, never where. Units declaring
/// the same group are held at the admission point until enough of them have
/// arrived, then released together. A unit whose wait fails takes its parked
/// siblings down with it.
pub struct Coscheduler {
    registry: Arc<GroupRegistry>,
    lister: Arc<dyn UnitLister>,
    snapshot: Arc<dyn PlacementSnapshot>,
    parked: Arc<dyn ParkedUnits>,
    clock: Arc<dyn Clock>,
    config: CoschedulingConfig,
}

impl Coscheduler {
    pub fn new(
        config: CoschedulingConfig,
        lister: Arc<dyn UnitLister>,
        snapshot: Arc<dyn PlacementSnapshot>,
        parked: Arc<dyn ParkedUnits>,
    ) -> Self {
        Self {
            registry: Arc::new(GroupRegistry::new()),
            lister,
            snapshot,
            parked,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CoschedulingConfig {
        &self.config
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Map `unit` to its group record, registering the group on first sight.
    ///
    /// Ungrouped units (including those with an invalid declaration) get a
    /// transient record with an empty key that is never stored.
    pub fn resolve(&self, unit: &Unit, observed_at: Instant) -> Resolution {
        let (declaration, declaration_error) = match GroupDeclaration::from_unit(unit) {
            Ok(declaration) => (declaration, None),
            Err(e) => (None, Some(e)),
        };

        let Some(declaration) = declaration else {
            return Resolution {
                record: GroupRecord {
                    key: GroupKey::ungrouped(),
                    name: String::new(),
                    priority: unit.effective_priority(),
                    created_at: observed_at,
                    min_members: 0,
                    marked_for_deletion_at: None,
                },
                declared_min_members: 0,
                declaration_error,
            };
        };

        let key = declaration.key(&unit.namespace);
        let record = self.registry.get_or_insert_with(key.clone(), || {
            tracing::debug!(group = %key, min_members = declaration.min_members, "Group registered");
            GroupRecord {
                key: key.clone(),
                name: declaration.name.clone(),
                priority: unit.effective_priority(),
                created_at: observed_at,
                min_members: declaration.min_members,
                marked_for_deletion_at: None,
            }
        });

        Resolution {
            record,
            declared_min_members: declaration.min_members,
            declaration_error: None,
        }
    }

    /// Queue order: higher group priority, then earlier group creation, then
    /// smaller group key.
    pub fn compare(&self, a: &QueuedUnit, b: &QueuedUnit) -> Ordering {
        let group_a = self.resolve(&a.unit, a.initial_attempt).record;
        let group_b = self.resolve(&b.unit, b.initial_attempt).record;

        group_b
            .priority
            .cmp(&group_a.priority)
            .then_with(|| group_a.created_at.cmp(&group_b.created_at))
            .then_with(|| group_a.key.cmp(&group_b.key))
    }

    pub fn less(&self, a: &QueuedUnit, b: &QueuedUnit) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    pub fn sort_queue(&self, queue: &mut [QueuedUnit]) {
        queue.sort_by(|a, b| self.compare(a, b));
    }

    /// Checks run before the host searches for a placement:
    /// 1. the unit agrees with its group on min-members and priority
    /// 2. enough members of the group exist to ever reach quorum
    pub fn pre_filter(&self, unit: &Unit) -> Result<(), Unschedulable> {
        let Resolution {
            record,
            declared_min_members,
            declaration_error,
        } = self.resolve(unit, self.clock.now());

        if let Some(e) = declaration_error {
            tracing::warn!(unit = %unit, error = %e, "Invalid group declaration, scheduling unit on its own");
        }
        if !record.is_grouped() {
            return Ok(());
        }

        if declared_min_members != record.min_members {
            tracing::debug!(
                unit = %unit,
                group = %record.key,
                declared = declared_min_members,
                registered = record.min_members,
                "Unit min-members differs from its group"
            );
            return Err(Unschedulable::MinMembersMismatch {
                group: record.key,
                declared: declared_min_members,
                registered: record.min_members,
            });
        }

        let unit_priority = unit.effective_priority();
        if unit_priority != record.priority {
            tracing::debug!(
                unit = %unit,
                group = %record.key,
                unit_priority,
                group_priority = record.priority,
                "Unit priority differs from its group"
            );
            return Err(Unschedulable::PriorityMismatch {
                group: record.key,
                unit_priority,
                group_priority: record.priority,
            });
        }

        let total = self.total_members(&record.name, &unit.namespace);
        if total < record.min_members {
            tracing::debug!(
                unit = %unit,
                group = %record.key,
                total,
                min_members = record.min_members,
                "Group has fewer members than min-members"
            );
            return Err(Unschedulable::InsufficientMembers {
                group: record.key,
                total,
                required: record.min_members,
            });
        }

        Ok(())
    }

    /// Admission point for a unit tentatively placed on `node`.
    ///
    /// Counts bound and parked siblings plus the unit itself. Below quorum the
    /// unit is told to wait; at quorum every parked sibling is allowed and the
    /// group is marked for deletion.
    pub fn permit(&self, unit: &Unit, node: &str) -> Permit {
        let record = self.resolve(unit, self.clock.now()).record;
        if !record.is_grouped() {
            return Permit::Admit;
        }

        let namespace = unit.namespace.as_str();
        let bound = self.bound_members(&record.name, namespace);
        let waiting = self.parked_members(&record.name, namespace, unit);
        let current = bound + waiting + 1;

        if current < record.min_members {
            tracing::debug!(
                unit = %unit,
                group = %record.key,
                node,
                bound,
                waiting,
                min_members = record.min_members,
                "Group below min-members, unit must wait"
            );
            return Permit::Wait(self.config.admission_wait());
        }

        tracing::info!(
            unit = %unit,
            group = %record.key,
            node,
            bound,
            waiting,
            min_members = record.min_members,
            "Group reached min-members, releasing parked members"
        );
        self.parked.for_each_parked(&mut |parked| {
            let sibling = parked.unit();
            if sibling.id != unit.id && sibling.same_group(namespace, &record.name) {
                tracing::debug!(group = %record.key, unit = %sibling, "Allowing parked unit");
                parked.allow(PLUGIN_NAME);
            }
        });
        self.registry.mark_for_deletion(&record.key, self.clock.now());

        Permit::Admit
    }

    /// Called when a unit that reached the admission point is withdrawn.
    /// Rejects every parked unit of the same group.
    pub fn unreserve(&self, unit: &Unit, node: &str) {
        let record = self.resolve(unit, self.clock.now()).record;
        if !record.is_grouped() {
            return;
        }

        let namespace = unit.namespace.as_str();
        let mut rejected = 0usize;
        self.parked.for_each_parked(&mut |parked| {
            if parked.unit().same_group(namespace, &record.name) {
                tracing::debug!(group = %record.key, unit = %parked.unit(), "Rejecting parked unit");
                parked.reject(PLUGIN_NAME);
                rejected += 1;
            }
        });
        if rejected > 0 {
            tracing::info!(unit = %unit, group = %record.key, node, rejected, "Group rolled back");
        }
    }

    /// Handle removal of a unit from the active set. Only unassigned units
    /// count; their group is marked for deletion.
    pub fn on_unit_deleted(&self, deleted: &DeletedUnit) {
        let unit = deleted.unit();
        if unit.is_assigned() {
            return;
        }
        if let Ok(Some(declaration)) = GroupDeclaration::from_unit(unit) {
            let key = declaration.key(&unit.namespace);
            if self.registry.mark_for_deletion(&key, self.clock.now()) {
                tracing::debug!(group = %key, unit = %unit, "Group marked for deletion");
            }
        }
    }

    /// Apply deletion events until the channel closes or `shutdown` fires.
    pub fn watch_deletions(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<DeletedUnit>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let coscheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(deleted) => coscheduler.on_unit_deleted(&deleted),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Deletion events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    pub fn garbage_collector(&self) -> GarbageCollector {
        GarbageCollector::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            self.config.gc_interval,
            self.config.expiration,
        )
    }

    /// Run one GC sweep now and return the evicted keys.
    pub fn collect_garbage(&self) -> Vec<GroupKey> {
        self.garbage_collector().sweep()
    }

    pub fn spawn_gc(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.garbage_collector().spawn(shutdown)
    }

    fn total_members(&self, group_name: &str, namespace: &str) -> usize {
        let selector = LabelSelector::new().with(POD_GROUP_NAME, group_name);
        match self.lister.list(namespace, &selector) {
            Ok(units) => units.len(),
            Err(e) => {
                tracing::warn!(group = group_name, namespace, error = %e, "Failed to list group members");
                0
            }
        }
    }

    fn bound_members(&self, group_name: &str, namespace: &str) -> usize {
        match self
            .snapshot
            .filtered_list(&|u| u.is_assigned() && u.same_group(namespace, group_name))
        {
            Ok(units) => units.len(),
            Err(e) => {
                tracing::warn!(group = group_name, namespace, error = %e, "Failed to list bound group members");
                0
            }
        }
    }

    fn parked_members(&self, group_name: &str, namespace: &str, unit: &Unit) -> usize {
        self.parked
            .count_parked(&|u| u.id != unit.id && u.same_group(namespace, group_name))
    }
}

impl std::fmt::Debug for Coscheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coscheduler")
            .field("groups", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
