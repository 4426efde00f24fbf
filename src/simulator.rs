use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::SimulatorConfig;
use crate::error::Result;
use crate::host::waiting::ParkTicket;
use crate::host::{InMemoryCluster, WaitOutcome, WaitingRoom};
use crate::scheduler::{Coscheduler, Permit, QueuedUnit, Unit, Unschedulable};

/// Final result of scheduling one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Bound { node: String },
    Unschedulable { reason: String },
    Rejected { reason: String },
}

impl std::fmt::Display for ScheduleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleOutcome::Bound { node } => write!(f, "bound to {}", node),
            ScheduleOutcome::Unschedulable { reason } => write!(f, "unschedulable: {}", reason),
            ScheduleOutcome::Rejected { reason } => write!(f, "rejected: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReport {
    pub unit: String,
    pub group: String,
    #[serde(flatten)]
    pub outcome: ScheduleOutcome,
    pub finished_at: DateTime<Utc>,
}

/// Result of the serialized part of scheduling.
enum CycleResult {
    Done(ScheduleOutcome),
    Admitted { node: String },
    Parked { node: String, ticket: ParkTicket },
}

/// In-process host that drives the coordinator the way a real scheduler does.
///
/// The scheduling cycle (pre-filter, node pick, permit, parking) runs one unit
/// at a time. Waiting for release and binding run concurrently per unit.
pub struct Simulator {
    config: SimulatorConfig,
    cluster: Arc<InMemoryCluster>,
    waiting: Arc<WaitingRoom>,
    coscheduler: Arc<Coscheduler>,
    clock: Arc<dyn Clock>,
    cycle: Mutex<()>,
    next_node: AtomicUsize,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SimulatorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.coscheduling.validate()?;

        let cluster = Arc::new(InMemoryCluster::new());
        let waiting = Arc::new(WaitingRoom::new());
        let coscheduler = Coscheduler::new(
            config.coscheduling.clone(),
            cluster.clone(),
            cluster.clone(),
            waiting.clone(),
        )
        .with_clock(clock.clone());

        Ok(Self {
            config,
            cluster,
            waiting,
            coscheduler: Arc::new(coscheduler),
            clock,
            cycle: Mutex::new(()),
            next_node: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn cluster(&self) -> &Arc<InMemoryCluster> {
        &self.cluster
    }

    pub fn waiting(&self) -> &Arc<WaitingRoom> {
        &self.waiting
    }

    pub fn coscheduler(&self) -> &Arc<Coscheduler> {
        &self.coscheduler
    }

    /// Start the registry GC and the deletion-event watcher.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.coscheduler.spawn_gc(shutdown.clone()),
            self.coscheduler
                .watch_deletions(self.cluster.subscribe_deletions(), shutdown),
        ]
    }

    /// Add a unit to the cluster and return its queue entry.
    pub fn submit(&self, unit: Unit) -> Result<QueuedUnit> {
        self.cluster.add_unit(unit.clone())?;
        Ok(QueuedUnit::new(unit, self.clock.now()))
    }

    /// Schedule one unit to completion.
    pub async fn schedule_one(&self, unit: &Unit) -> ScheduleOutcome {
        let result = self.scheduling_cycle(unit).await;
        self.binding_cycle(unit, result).await
    }

    /// Schedule `queue` in coordinator order. Scheduling cycles run in order;
    /// waits run concurrently.
    pub async fn run_batch(self: &Arc<Self>, mut queue: Vec<QueuedUnit>) -> Vec<ScheduleReport> {
        self.coscheduler.sort_queue(&mut queue);

        let mut handles = Vec::with_capacity(queue.len());
        for queued in queue {
            let result = self.scheduling_cycle(&queued.unit).await;
            let simulator = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let outcome = simulator.binding_cycle(&queued.unit, result).await;
                ScheduleReport {
                    unit: queued.unit.to_string(),
                    group: queued.unit.group_label().to_string(),
                    outcome,
                    finished_at: Utc::now(),
                }
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!(error = %e, "Binding task failed"),
            }
        }
        reports
    }

    async fn scheduling_cycle(&self, unit: &Unit) -> CycleResult {
        let _cycle = self.cycle.lock().await;

        if let Err(reason) = self.coscheduler.pre_filter(unit) {
            return CycleResult::Done(ScheduleOutcome::Unschedulable {
                reason: reason.to_string(),
            });
        }

        let Some(node) = self.pick_node() else {
            return CycleResult::Done(ScheduleOutcome::Unschedulable {
                reason: Unschedulable::NoNodesAvailable.to_string(),
            });
        };

        match self.coscheduler.permit(unit, &node) {
            Permit::Admit => CycleResult::Admitted { node },
            Permit::Wait(timeout) => {
                let ticket = self.waiting.park(unit.clone(), timeout);
                CycleResult::Parked { node, ticket }
            }
        }
    }

    async fn binding_cycle(&self, unit: &Unit, result: CycleResult) -> ScheduleOutcome {
        let node = match result {
            CycleResult::Done(outcome) => return outcome,
            CycleResult::Admitted { node } => node,
            CycleResult::Parked { node, ticket } => match ticket.wait().await {
                WaitOutcome::Allowed { .. } => node,
                WaitOutcome::Rejected { by } => {
                    self.coscheduler.unreserve(unit, &node);
                    return ScheduleOutcome::Rejected {
                        reason: format!("rejected by {}", by),
                    };
                }
                WaitOutcome::TimedOut => {
                    self.coscheduler.unreserve(unit, &node);
                    return ScheduleOutcome::Rejected {
                        reason: "timed out waiting for group".to_string(),
                    };
                }
            },
        };

        match self.cluster.bind(&unit.id, &node) {
            Ok(true) => {
                tracing::info!(unit = %unit, node = %node, "Unit bound");
                ScheduleOutcome::Bound { node }
            }
            Ok(false) => {
                self.coscheduler.unreserve(unit, &node);
                ScheduleOutcome::Rejected {
                    reason: "unit no longer exists".to_string(),
                }
            }
            Err(e) => {
                self.coscheduler.unreserve(unit, &node);
                ScheduleOutcome::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn pick_node(&self) -> Option<String> {
        if self.config.nodes.is_empty() {
            return None;
        }
        let i = self.next_node.fetch_add(1, Ordering::Relaxed) % self.config.nodes.len();
        self.config.nodes.get(i).cloned()
    }
}
