//! Client for the remote study API.
//!
//! [`StudyClient`] talks to the network only; [`CachedStudyClient`] keeps
//! prepared subjects readable while offline.

mod cached_client;
mod client;
mod types;

pub use cached_client::{CacheResult, CacheSource, CachedStudyClient};
pub use client::StudyClient;
