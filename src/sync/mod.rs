pub mod fleet;
pub mod worker;

pub use fleet::{FleetReport, resolve_devices, run_fleet};
pub use worker::{DeviceReport, DeviceStatus, sync_device};
