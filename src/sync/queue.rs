use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::StudyClient;
use crate::error::OfflineError;
use crate::event::{AppEvent, EventBus};
use crate::store::{OfflineStore, RecordFilter, SyncDescriptor, TestResult};

type Result<T> = std::result::Result<T, OfflineError>;

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub synced: usize,
  pub failed: usize,
  /// Another drain was already running; nothing was attempted
  pub skipped_concurrent: bool,
}

impl DrainReport {
  pub fn is_clean(&self) -> bool {
    self.failed == 0 && !self.skipped_concurrent
  }
}

/// Records results locally and replays them against the remote API.
#[derive(Clone)]
pub struct SyncQueue {
  store: OfflineStore,
  client: StudyClient,
  events: EventBus,
  drain_lock: Arc<Mutex<()>>,
}

impl SyncQueue {
  pub fn new(store: OfflineStore, client: StudyClient, events: EventBus) -> Self {
    Self {
      store,
      client,
      events,
      drain_lock: Arc::new(Mutex::new(())),
    }
  }

  /// Store a finished test as an unsynced result plus its sync descriptor.
  ///
  /// The two writes are independent. A result whose descriptor could not be
  /// written is still picked up by the next drain.
  pub async fn record_result(
    &self,
    test_id: i64,
    score: u32,
    answers: BTreeMap<i64, String>,
  ) -> Result<TestResult> {
    let result = self
      .store
      .append(TestResult::new(test_id, score, answers))
      .await?;
    let record_id = result
      .id
      .ok_or_else(|| OfflineError::invalid("test_results", "append returned no key"))?;

    if let Err(e) = self
      .store
      .append(SyncDescriptor::for_result(&result, record_id))
      .await
    {
      warn!(record_id, "could not queue sync descriptor: {}", e);
    }
    info!(record_id, test_id, score, "recorded test result");

    Ok(result)
  }

  /// Number of results still waiting for delivery.
  pub async fn pending_count(&self) -> Result<usize> {
    Ok(
      self
        .store
        .get_all::<TestResult>(RecordFilter::Unsynced)
        .await?
        .len(),
    )
  }

  /// Submit every unsynced result in creation order.
  ///
  /// A failed submission leaves its record unsynced for the next drain and
  /// does not stop the others. Only one drain runs at a time.
  pub async fn drain(&self) -> Result<DrainReport> {
    let Ok(_guard) = self.drain_lock.try_lock() else {
      debug!("drain already running, skipping");
      return Ok(DrainReport {
        skipped_concurrent: true,
        ..DrainReport::default()
      });
    };

    let pending: Vec<TestResult> = self.store.get_all(RecordFilter::Unsynced).await?;
    if pending.is_empty() {
      debug!("nothing to sync");
      return Ok(DrainReport::default());
    }

    let mut report = DrainReport {
      attempted: pending.len(),
      ..DrainReport::default()
    };

    for result in pending {
      let Some(record_id) = result.id else {
        continue;
      };

      match self.client.submit_test_result(&result).await {
        Ok(()) => match self.store.mark_synced::<TestResult>(record_id).await {
          Ok(()) => report.synced += 1,
          Err(e) => {
            // Delivered but still unsynced locally; the next drain resends it
            warn!(record_id, "could not mark result synced: {}", e);
            report.failed += 1;
          }
        },
        Err(e) => {
          warn!(record_id, "sync delivery failed: {}", e);
          report.failed += 1;
        }
      }
    }

    info!(
      attempted = report.attempted,
      synced = report.synced,
      failed = report.failed,
      "drain finished"
    );
    self.events.emit(AppEvent::SyncFinished {
      synced: report.synced,
      failed: report.failed,
    });

    Ok(report)
  }

  /// Drain whenever connectivity is restored.
  ///
  /// A lagged receiver may have missed a reconnect, so it drains as well.
  pub fn spawn_reconnect_drain(&self) -> JoinHandle<()> {
    let queue = self.clone();
    let mut rx = self.events.subscribe();

    tokio::spawn(async move {
      loop {
        match rx.recv().await {
          Ok(AppEvent::ConnectivityChanged { online: true }) => queue.drain_logged().await,
          Ok(_) => {}
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            debug!(missed, "event receiver lagged, draining");
            queue.drain_logged().await;
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    })
  }

  async fn drain_logged(&self) {
    if let Err(e) = self.drain().await {
      warn!("reconnect drain failed: {}", e);
    }
  }
}
