//! Health monitoring: parallel probes, worst-status aggregation and
//! threshold alerts with a per-condition cooldown.

mod models;
mod monitor;
pub mod probes;

pub use models::*;
pub use monitor::{HealthMonitor, DEFAULT_ALERT_COOLDOWN};
pub use probes::{
    ApplicationProbe, DatastoreProbe, DiskProbe, HealthProbe, JobErrorRateProbe, MemoryProbe,
    NetworkProbe, SystemLoadProbe,
};
