//! Process-level primitives: health probing, port ownership and termination
//!
//! These carry no retry logic. Polling and backoff belong to the callers in
//! [`crate::backend`].

mod inspector;
mod port;
mod probe;

pub use inspector::{ProcessInfo, ProcessInspector, SystemInspector, Termination};
pub use port::listening_pids;
pub use probe::{HealthProbe, HttpProbe, DEFAULT_PROBE_TIMEOUT};
