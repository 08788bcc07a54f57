//! Long-lived supervisor tasks (§5 "one long-lived supervisor task per
//! subsystem"): the Swap Proxy Supervisor (component H) and the Watchdog
//! (component I).

pub mod swap_supervisor;
pub mod watchdog;

pub use swap_supervisor::{PlannedModel, SwapSupervisorActor};
pub use watchdog::{ServiceProbe, WatchdogActor};
