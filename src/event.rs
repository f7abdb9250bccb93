use tokio::sync::broadcast;

/// Application-wide notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
  /// Connectivity to the remote API changed
  ConnectivityChanged { online: bool },
  /// A newer application version was detected
  UpdateAvailable { version: String },
  /// The platform offered to install the app
  InstallAvailable,
  /// The offline store could not be opened; running online-only
  StorageUnavailable { reason: String },
  /// A drain finished
  SyncFinished { synced: usize, failed: usize },
}

/// Shared broadcast channel for application events.
///
/// Events sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
  tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity);
    Self { tx }
  }

  pub fn emit(&self, event: AppEvent) {
    // No receivers is not an error
    let _ = self.tx.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
    self.tx.subscribe()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribers_receive_events() {
    let bus = EventBus::default();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.emit(AppEvent::InstallAvailable);

    assert_eq!(a.recv().await.unwrap(), AppEvent::InstallAvailable);
    assert_eq!(b.recv().await.unwrap(), AppEvent::InstallAvailable);
  }

  #[test]
  fn test_emit_without_subscribers_is_silent() {
    let bus = EventBus::default();
    bus.emit(AppEvent::ConnectivityChanged { online: false });
  }
}
