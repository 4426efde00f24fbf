pub mod clock;
pub mod config;
pub mod error;
pub mod group;
pub mod host;
pub mod scheduler;
pub mod shutdown;
pub mod simulator;
