//! Outbound sync of results taken on this device.
//!
//! Results are written locally first and delivered to the remote API by a
//! drain, either on demand or when connectivity comes back.

mod connectivity;
mod queue;

pub use connectivity::ConnectivityMonitor;
pub use queue::SyncQueue;
