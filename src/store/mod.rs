//! Local persistent store for offline use.
//!
//! Six collections live in one SQLite database:
//! - cached static assets and API responses, tagged with a cache generation
//! - flashcard and test snapshots fetched from the remote API
//! - test results taken on this device, with their sync descriptors
//!
//! When the database cannot be opened the store runs in online-only mode.

mod layer;
mod records;
mod schema;
mod storage;

pub use layer::OfflineStore;
pub use records::{
  CachedApiResponse, CachedAsset, Flashcard, Question, Snapshot, SyncDescriptor, Test, TestResult,
};
pub use storage::{RecordFilter, SqliteStorage};
