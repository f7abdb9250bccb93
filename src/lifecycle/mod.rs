//! Registration, versioning and install capability of the offline layer.

mod install;
mod manager;

pub use install::{DesktopEntryInstaller, InstallOutcome, InstallPrompt};
pub use manager::{LifecycleManager, LifecycleState, UpdateCheck, UpdatePrompt};
