use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::OfflineError;

/// What the user chose when offered the install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
  Accepted,
  Dismissed,
}

/// Platform capability to install the app as a launcher entry.
///
/// Captured once by the lifecycle manager and replayed when the user asks.
pub trait InstallPrompt: Send + Sync {
  fn prompt(&self) -> Result<InstallOutcome, OfflineError>;
}

/// Installs an XDG desktop entry for the application.
#[derive(Debug, Clone)]
pub struct DesktopEntryInstaller {
  applications_dir: PathBuf,
  exec: PathBuf,
  name: String,
}

impl DesktopEntryInstaller {
  pub fn new(applications_dir: PathBuf, exec: PathBuf, name: impl Into<String>) -> Self {
    Self {
      applications_dir,
      exec,
      name: name.into(),
    }
  }

  /// Installer for the current user, if the platform has a data directory
  /// and the running executable can be located.
  pub fn detect() -> Option<Self> {
    let dir = dirs::data_dir()?.join("applications");
    let exec = std::env::current_exe().ok()?;
    Some(Self::new(dir, exec, "StudySync"))
  }

  pub fn entry_path(&self) -> PathBuf {
    self.applications_dir.join("studysync.desktop")
  }

  pub fn is_installed(&self) -> bool {
    self.entry_path().exists()
  }

  fn entry(&self) -> String {
    format!(
      "[Desktop Entry]\nType=Application\nName={}\nExec={} watch\nTerminal=true\nCategories=Education;\n",
      self.name,
      quote_exec(&self.exec)
    )
  }
}

impl InstallPrompt for DesktopEntryInstaller {
  fn prompt(&self) -> Result<InstallOutcome, OfflineError> {
    std::fs::create_dir_all(&self.applications_dir)
      .and_then(|_| std::fs::write(self.entry_path(), self.entry()))
      .map_err(|e| OfflineError::TaskFailed(format!("writing desktop entry: {}", e)))?;
    info!(path = %self.entry_path().display(), "installed desktop entry");
    Ok(InstallOutcome::Accepted)
  }
}

fn quote_exec(path: &Path) -> String {
  let path = path.display().to_string();
  if path.contains(' ') {
    format!("\"{}\"", path)
  } else {
    path
  }
}
