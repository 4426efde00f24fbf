pub mod coscheduler;
pub mod status;
pub mod unit;

pub use coscheduler::{Coscheduler, Resolution, PLUGIN_NAME};
pub use status::{Permit, Unschedulable};
pub use unit::{DeletedUnit, QueuedUnit, Unit};
