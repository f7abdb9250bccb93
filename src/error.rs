//! Error taxonomy for the offline layer.
//!
//! Store and sync operations return these to their callers. The interceptor
//! never does: it converts every failure into a fallback response.

use thiserror::Error;

/// Errors raised by the offline store, the sync queue and the lifecycle manager.
#[derive(Error, Debug)]
pub enum OfflineError {
  /// The request could not reach the remote host
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),

  /// No stored copy exists for the requested identity
  #[error("no cached copy for {0}")]
  CacheMiss(String),

  /// The embedded store failed to open; running in online-only mode
  #[error("offline storage is unavailable: {0}")]
  StorageInitFailure(String),

  /// The remote API answered with a non-success status
  #[error("{url} returned HTTP {status}")]
  UnexpectedStatus { status: u16, url: String },

  /// The remote API rejected a queued submission or was unreachable
  #[error("sync delivery failed for record {record_id}: {reason}")]
  SyncDeliveryFailure { record_id: i64, reason: String },

  /// The disk backing the store is full
  #[error("offline storage quota exceeded")]
  QuotaExceeded,

  /// A record failed write-time validation
  #[error("invalid {collection} record: {reason}")]
  InvalidRecord {
    collection: &'static str,
    reason: String,
  },

  /// Any other SQLite failure
  #[error("storage error: {0}")]
  Storage(rusqlite::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage connection lock poisoned")]
  LockPoisoned,

  /// A blocking storage task panicked or was cancelled
  #[error("storage task failed: {0}")]
  TaskFailed(String),

  /// No install prompt has been captured
  #[error("install is not available")]
  InstallUnavailable,

  /// A lifecycle operation was requested from the wrong state
  #[error("cannot {action} while {state}")]
  InvalidTransition { action: &'static str, state: String },
}

impl From<rusqlite::Error> for OfflineError {
  fn from(e: rusqlite::Error) -> Self {
    match e.sqlite_error_code() {
      Some(rusqlite::ErrorCode::DiskFull) => OfflineError::QuotaExceeded,
      _ => OfflineError::Storage(e),
    }
  }
}

impl OfflineError {
  /// Shorthand for a validation failure.
  pub fn invalid(collection: &'static str, reason: impl Into<String>) -> Self {
    OfflineError::InvalidRecord {
      collection,
      reason: reason.into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_disk_full_maps_to_quota_exceeded() {
    let err = rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
      None,
    );
    assert!(matches!(OfflineError::from(err), OfflineError::QuotaExceeded));
  }

  #[test]
  fn test_other_sqlite_errors_stay_storage() {
    let err = rusqlite::Error::QueryReturnedNoRows;
    assert!(matches!(OfflineError::from(err), OfflineError::Storage(_)));
  }
}
