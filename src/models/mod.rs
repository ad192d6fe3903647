pub mod client;
pub mod delta;
pub mod result;
pub mod scan;
pub mod task;

pub use client::{Client, ClientState, Heartbeat};
pub use delta::{DeltaReport, HostPortDelta, ServiceChange};
pub use result::{Completeness, HostRecord, HostState, ScanResult, ServiceInfo};
pub use scan::ScanDefinition;
pub use task::{ScanTask, TaskState};
