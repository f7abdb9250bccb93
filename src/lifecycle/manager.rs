use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use url::Url;

use super::install::{InstallOutcome, InstallPrompt};
use crate::api::StudyClient;
use crate::error::OfflineError;
use crate::event::{AppEvent, EventBus};
use crate::intercept::Interceptor;
use crate::store::OfflineStore;

type Result<T> = std::result::Result<T, OfflineError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
  Unregistered,
  Registering,
  Active,
  UpdateAvailable { version: String },
  Updating { version: String },
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LifecycleState::Unregistered => f.write_str("unregistered"),
      LifecycleState::Registering => f.write_str("registering"),
      LifecycleState::Active => f.write_str("active"),
      LifecycleState::UpdateAvailable { version } => write!(f, "update {} available", version),
      LifecycleState::Updating { version } => write!(f, "updating to {}", version),
    }
  }
}

/// The new version is installed on the next full restart; nothing is swapped in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reload {
  pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
  UpToDate,
  /// Newer version known, user declined for now
  Deferred { version: String },
  ReloadRequired(Reload),
}

/// Asks the user whether to switch to a newer version.
#[async_trait]
pub trait UpdatePrompt: Send + Sync {
  async fn confirm(&self, version: &str) -> bool;
}

struct Inner {
  state: LifecycleState,
  announced_version: Option<String>,
  install_prompt: Option<Box<dyn InstallPrompt>>,
  install_announced: bool,
}

/// Governs when the interceptor is active and which version it serves.
pub struct LifecycleManager {
  interceptor: Interceptor,
  store: OfflineStore,
  client: StudyClient,
  events: EventBus,
  version: String,
  update_prompt: Option<Arc<dyn UpdatePrompt>>,
  inner: Mutex<Inner>,
}

impl LifecycleManager {
  pub fn new(
    interceptor: Interceptor,
    store: OfflineStore,
    client: StudyClient,
    events: EventBus,
    version: impl Into<String>,
  ) -> Self {
    Self {
      interceptor,
      store,
      client,
      events,
      version: version.into(),
      update_prompt: None,
      inner: Mutex::new(Inner {
        state: LifecycleState::Unregistered,
        announced_version: None,
        install_prompt: None,
        install_announced: false,
      }),
    }
  }

  /// Ask through `prompt` before switching versions instead of confirming automatically.
  pub fn with_update_prompt(mut self, prompt: Arc<dyn UpdatePrompt>) -> Self {
    self.update_prompt = Some(prompt);
    self
  }

  fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
    self.inner.lock().map_err(|_| OfflineError::LockPoisoned)
  }

  pub fn state(&self) -> Result<LifecycleState> {
    Ok(self.lock()?.state.clone())
  }

  fn set_state(&self, state: LifecycleState) -> Result<()> {
    info!(%state, "lifecycle state");
    self.lock()?.state = state;
    Ok(())
  }

  /// Register the interceptor for the running version.
  ///
  /// On the first start of a new version, stale cache generations are purged
  /// before the app shell is precached. Development origins stay unregistered.
  pub async fn register(&self, precache: &[Url]) -> Result<LifecycleState> {
    if self.interceptor.classifier().is_dev_mode() {
      info!("development origin, interceptor not registered");
      return self.state();
    }

    {
      let mut inner = self.lock()?;
      if inner.state != LifecycleState::Unregistered {
        return Err(OfflineError::InvalidTransition {
          action: "register",
          state: inner.state.to_string(),
        });
      }
      inner.state = LifecycleState::Registering;
    }

    let activated = match self.store.activated_version().await {
      Ok(version) => version,
      Err(e) => {
        warn!("could not read activated version: {}", e);
        None
      }
    };
    if activated.as_deref() != Some(self.version.as_str()) {
      let evicted = self.interceptor.activate().await;
      info!(
        from = activated.as_deref().unwrap_or("none"),
        to = %self.version,
        evicted,
        "activated new version"
      );
      if let Err(e) = self.store.set_activated_version(&self.version).await {
        warn!("could not store activated version: {}", e);
      }
    }

    let cached = self.interceptor.precache(precache).await;
    debug!(cached, "precached app shell");

    self.set_state(LifecycleState::Active)?;
    Ok(LifecycleState::Active)
  }

  /// Compare the running version with the one the server publishes.
  ///
  /// `UpdateAvailable` is emitted once per detected version. Without an
  /// update prompt the update is confirmed right away.
  pub async fn check_for_update(&self) -> Result<UpdateCheck> {
    match self.state()? {
      LifecycleState::Active | LifecycleState::UpdateAvailable { .. } => {}
      state => {
        return Err(OfflineError::InvalidTransition {
          action: "check for updates",
          state: state.to_string(),
        })
      }
    }

    let latest = self.client.latest_version().await?;
    if latest == self.version {
      let mut inner = self.lock()?;
      if let LifecycleState::UpdateAvailable { version } = &inner.state {
        info!(withdrawn = %version, "pending update withdrawn");
        inner.state = LifecycleState::Active;
        inner.announced_version = None;
      }
      debug!(version = %latest, "up to date");
      return Ok(UpdateCheck::UpToDate);
    }

    let announce = {
      let mut inner = self.lock()?;
      inner.state = LifecycleState::UpdateAvailable {
        version: latest.clone(),
      };
      let first = inner.announced_version.as_deref() != Some(latest.as_str());
      inner.announced_version = Some(latest.clone());
      first
    };
    if announce {
      info!(current = %self.version, available = %latest, "update available");
      self.events.emit(AppEvent::UpdateAvailable {
        version: latest.clone(),
      });
    }

    let confirmed = match &self.update_prompt {
      Some(prompt) => prompt.confirm(&latest).await,
      None => true,
    };
    if confirmed {
      Ok(UpdateCheck::ReloadRequired(self.confirm_update()?))
    } else {
      Ok(UpdateCheck::Deferred { version: latest })
    }
  }

  /// Accept the pending update. The caller restarts to complete it.
  pub fn confirm_update(&self) -> Result<Reload> {
    let mut inner = self.lock()?;
    let LifecycleState::UpdateAvailable { version } = &inner.state else {
      return Err(OfflineError::InvalidTransition {
        action: "confirm update",
        state: inner.state.to_string(),
      });
    };

    let version = version.clone();
    inner.state = LifecycleState::Updating {
      version: version.clone(),
    };
    info!(%version, "update confirmed, reload required");
    Ok(Reload { version })
  }

  /// Buffer the platform's install capability.
  ///
  /// Only the first capture is kept; `InstallAvailable` fires once.
  pub fn capture_install_prompt(&self, prompt: Box<dyn InstallPrompt>) -> Result<bool> {
    let mut inner = self.lock()?;
    if inner.install_prompt.is_some() || inner.install_announced {
      return Ok(false);
    }
    inner.install_prompt = Some(prompt);
    inner.install_announced = true;
    drop(inner);

    self.events.emit(AppEvent::InstallAvailable);
    Ok(true)
  }

  pub fn can_install(&self) -> Result<bool> {
    Ok(self.lock()?.install_prompt.is_some())
  }

  /// Replay the buffered install capability. It is consumed either way.
  pub fn prompt_install(&self) -> Result<InstallOutcome> {
    let prompt = self
      .lock()?
      .install_prompt
      .take()
      .ok_or(OfflineError::InstallUnavailable)?;

    let outcome = prompt.prompt()?;
    info!(?outcome, "install prompt answered");
    Ok(outcome)
  }

  /// The platform reports the app as installed.
  pub fn installed(&self) -> Result<()> {
    let mut inner = self.lock()?;
    inner.install_prompt = None;
    inner.install_announced = true;
    Ok(())
  }
}
