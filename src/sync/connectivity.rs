use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::api::StudyClient;
use crate::event::{AppEvent, EventBus};

/// Tracks whether the remote API is reachable.
///
/// Starts out offline, so the first successful probe announces a reconnect and
/// anything recorded during a previous run gets drained.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  client: StudyClient,
  events: EventBus,
  online: Arc<AtomicBool>,
}

impl ConnectivityMonitor {
  pub fn new(client: StudyClient, events: EventBus) -> Self {
    Self {
      client,
      events,
      online: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Probe once; emits `ConnectivityChanged` when the state flips.
  pub async fn probe_once(&self) -> bool {
    let online = self.client.is_reachable().await;
    let was_online = self.online.swap(online, Ordering::SeqCst);
    if was_online != online {
      info!(online, "connectivity changed");
      self.events.emit(AppEvent::ConnectivityChanged { online });
    }
    online
  }

  /// Probe on a fixed interval until the task is dropped.
  pub async fn run(self, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      interval.tick().await;
      self.probe_once().await;
    }
  }
}
