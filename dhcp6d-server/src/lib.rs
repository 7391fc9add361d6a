//! The dhcp6d server: listeners, workers, control channel, statistics

pub mod config;
pub mod control;
pub mod listeners;
pub mod master;
pub mod privileges;
pub mod stats;
pub mod worker;

pub use config::ServerConfig;
pub use control::{ControlCommand, ControlServer};
pub use master::Master;
pub use stats::{StatsRegistry, StatsSnapshot, WorkerCounters};
