//! Services - monitoring logic and its drivers
//!
//! - `fleet` - Route and entity registry with corridor overlays
//! - `motion` - Simulated movement along a route
//! - `status` - On/off-route classification and alert de-duplication
//! - `monitor` - Owned monitor state, ticks, live fixes, events
//! - `scheduler` - Periodic tick task with start/stop
//! - `permission` - Location authorization state and auto-start
//! - `feed` - Applies live fixes under the monitor lock

pub mod feed;
pub mod fleet;
pub mod monitor;
pub mod motion;
pub mod permission;
pub mod scheduler;
pub mod status;

pub use monitor::{Monitor, MonitorEvent, SharedMonitor};
pub use permission::{AuthorizationStatus, PermissionState};
pub use scheduler::{LoopState, MonitorLoop};
pub use status::{AlertSink, LogAlertSink};
