//! Request interceptor with per-request caching strategies.
//!
//! - Static assets (scripts, styles, images, fonts) are served cache-first
//! - API calls and pages are served network-first with a cached fallback
//! - Cross-origin requests, mutations and development hosts pass through
//!
//! Cached entries are tagged with a cache generation; activation evicts every
//! generation the running version does not use.

mod engine;
mod request;
mod strategy;
mod transport;

pub use engine::{CacheGenerations, Interceptor};
pub use request::{Request, Response, ResponseSource, OFFLINE_MESSAGE};
pub use strategy::Classifier;
pub use transport::{HttpTransport, Transport};
