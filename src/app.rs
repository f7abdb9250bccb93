use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::api::{CacheResult, CacheSource, CachedStudyClient, StudyClient};
use crate::commands::Command;
use crate::config::Config;
use crate::error::OfflineError;
use crate::event::{AppEvent, EventBus};
use crate::intercept::{
  Classifier, HttpTransport, Interceptor, Request, ResponseSource, Transport, OFFLINE_MESSAGE,
};
use crate::lifecycle::{
  DesktopEntryInstaller, InstallOutcome, InstallPrompt, LifecycleManager, LifecycleState,
  UpdateCheck, UpdatePrompt,
};
use crate::store::{OfflineStore, RecordFilter, TestResult};
use crate::sync::{ConnectivityMonitor, SyncQueue};

/// Services of the offline layer, constructed once per process.
pub struct App {
  config: Config,
  events: EventBus,
  store: OfflineStore,
  interceptor: Interceptor,
  study: CachedStudyClient,
  queue: SyncQueue,
  lifecycle: LifecycleManager,
  monitor: ConnectivityMonitor,
  storage_announced: AtomicBool,
}

/// Asks on the terminal before switching to a new version.
struct TerminalPrompt;

#[async_trait]
impl UpdatePrompt for TerminalPrompt {
  async fn confirm(&self, version: &str) -> bool {
    let question = format!("Version {} is available. Update now?", version);
    tokio::task::spawn_blocking(move || ask(&question))
      .await
      .unwrap_or(false)
  }
}

/// Confirms on the terminal before writing the launcher entry.
struct TerminalInstall(DesktopEntryInstaller);

impl InstallPrompt for TerminalInstall {
  fn prompt(&self) -> std::result::Result<InstallOutcome, OfflineError> {
    if ask("Add a StudySync launcher to your applications menu?") {
      self.0.prompt()
    } else {
      Ok(InstallOutcome::Dismissed)
    }
  }
}

/// Yes/no question on stdin; anything but "n" is yes.
fn ask(question: &str) -> bool {
  print!("{} [Y/n] ", question);
  let _ = std::io::stdout().flush();
  let mut answer = String::new();
  match std::io::stdin().read_line(&mut answer) {
    Ok(_) => !answer.trim().eq_ignore_ascii_case("n"),
    Err(_) => false,
  }
}

impl App {
  /// `interactive` asks before applying updates instead of confirming them.
  pub fn new(config: Config, db_override: Option<PathBuf>, interactive: bool) -> Result<Self> {
    let events = EventBus::default();
    let store = open_store(&config, db_override)?;

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.connect_timeout())?);
    let classifier = Classifier::new(
      &config.origin_url()?,
      &config.api.prefix,
      &config.app.dev_hosts,
    );
    let interceptor = Interceptor::new(
      transport.clone(),
      store.clone(),
      classifier,
      config.generations(),
      &config.offline_page()?,
    );

    let client = StudyClient::new(transport, config.api_base()?, Config::get_api_token());
    let study = CachedStudyClient::new(client.clone(), store.clone());
    let queue = SyncQueue::new(store.clone(), client.clone(), events.clone());
    let mut lifecycle = LifecycleManager::new(
      interceptor.clone(),
      store.clone(),
      client.clone(),
      events.clone(),
      config.app.version.clone(),
    );
    if interactive {
      lifecycle = lifecycle.with_update_prompt(Arc::new(TerminalPrompt));
    }
    let monitor = ConnectivityMonitor::new(client, events.clone());

    Ok(Self {
      config,
      events,
      store,
      interceptor,
      study,
      queue,
      lifecycle,
      monitor,
      storage_announced: AtomicBool::new(false),
    })
  }

  /// Subscribe to application events.
  ///
  /// The first subscriber also receives `StorageUnavailable` when the app
  /// started in online-only mode.
  pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
    let rx = self.events.subscribe();
    if let Some(reason) = self.store.unavailable_reason() {
      if !self.storage_announced.swap(true, Ordering::SeqCst) {
        self.events.emit(AppEvent::StorageUnavailable {
          reason: reason.to_string(),
        });
      }
    }
    rx
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Prepare { subject } => self.prepare(subject).await,
      Command::Cards { subject } => {
        let cards = self.study.flashcards(subject).await?;
        print_source(&cards);
        for card in &cards.data {
          println!("{:>6}  {}  ->  {}", card.id, card.front, card.back);
        }
        Ok(())
      }
      Command::Tests { subject } => {
        let tests = self.study.tests(subject).await?;
        print_source(&tests);
        for test in &tests.data {
          println!("{:>6}  {} ({} questions)", test.id, test.title, test.questions.len());
        }
        Ok(())
      }
      Command::Record {
        test_id,
        score,
        answers,
      } => self.record(test_id, score, answers.into_iter().collect()).await,
      Command::Results => self.results().await,
      Command::Stats => self.stats().await,
      Command::Clear { yes } => {
        if !yes {
          return Err(eyre!("This deletes all offline data. Re-run with --yes to confirm."));
        }
        self.store.clear_all().await?;
        println!("Offline data cleared.");
        Ok(())
      }
      Command::Drain => self.drain().await,
      Command::Fetch { url, navigate } => self.fetch(&url, navigate).await,
      Command::Update => self.update().await,
      Command::Install => self.install(),
      Command::Watch => self.watch().await,
    }
  }

  async fn prepare(&self, subject: i64) -> Result<()> {
    match self.study.prepare_subject(subject).await {
      Ok(prepared) => {
        println!(
          "Subject {} is available offline: {} flashcards, {} tests.",
          subject, prepared.flashcards, prepared.tests
        );
        Ok(())
      }
      Err(OfflineError::NetworkUnavailable(_)) => Err(eyre!(
        "Could not download subject {}. {}",
        subject,
        OFFLINE_MESSAGE
      )),
      Err(e) => Err(e.into()),
    }
  }

  async fn record(&self, test_id: i64, score: u32, answers: BTreeMap<i64, String>) -> Result<()> {
    let result = self.queue.record_result(test_id, score, answers).await?;
    println!(
      "Saved result #{} for test {} ({}%).",
      result.id.unwrap_or_default(),
      test_id,
      score
    );

    if self.monitor.probe_once().await {
      self.drain().await
    } else {
      println!(
        "Offline: {} result(s) waiting to sync.",
        self.queue.pending_count().await?
      );
      Ok(())
    }
  }

  async fn results(&self) -> Result<()> {
    let results: Vec<TestResult> = self.store.get_all(RecordFilter::All).await?;
    if results.is_empty() {
      println!("No results recorded on this device.");
    }
    for result in &results {
      println!(
        "{:>6}  test {:<6} {:>3}%  {}  {}",
        result.id.unwrap_or_default(),
        result.test_id,
        result.score,
        result.created_at.format("%Y-%m-%d %H:%M"),
        if result.synced { "synced" } else { "pending" }
      );
    }
    Ok(())
  }

  async fn stats(&self) -> Result<()> {
    let online = self.monitor.probe_once().await;
    let stats = self.store.get_stats().await?;

    println!("Connection:     {}", if online { "online" } else { "offline" });
    if !self.store.is_available() {
      println!("Storage:        unavailable (online-only mode)");
    }
    println!("Static assets:  {}", stats.static_assets);
    println!("API responses:  {}", stats.api_responses);
    println!("Flashcards:     {}", stats.flashcards);
    println!("Tests:          {}", stats.tests);
    println!("Unsynced:       {}", stats.test_results);
    println!("Sync queue:     {}", stats.sync_queue);
    if stats.is_empty() {
      println!("Nothing is stored for offline use yet. Run `studysync prepare <subject>`.");
    }
    Ok(())
  }

  async fn drain(&self) -> Result<()> {
    let report = self.queue.drain().await?;
    if report.skipped_concurrent {
      println!("A sync is already running.");
    } else if report.attempted == 0 {
      println!("Nothing to sync.");
    } else if report.is_clean() {
      println!("Synced {} result(s).", report.synced);
    } else {
      println!(
        "Synced {} of {} result(s). {}",
        report.synced, report.attempted, OFFLINE_MESSAGE
      );
    }
    Ok(())
  }

  async fn register(&self) -> Result<LifecycleState> {
    Ok(self.lifecycle.register(&self.config.precache_urls()?).await?)
  }

  async fn fetch(&self, url: &str, navigate: bool) -> Result<()> {
    let url = self
      .config
      .origin_url()?
      .join(url)
      .map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
    self.register().await?;

    let request = if navigate {
      Request::navigate(url)
    } else {
      Request::get(url)
    };
    let strategy = self.interceptor.classifier().classify(&request);
    let response = self.interceptor.handle(request).await;

    let source = match response.source {
      ResponseSource::Network => "network",
      ResponseSource::Cache => "offline cache",
      ResponseSource::OfflineFallback => "offline page",
      ResponseSource::Synthetic => "generated offline response",
      ResponseSource::Passthrough => "network, not intercepted",
    };
    eprintln!(
      "{} from {} ({:?}){}",
      response.status,
      source,
      strategy,
      if response.is_offline() { " [offline]" } else { "" }
    );
    println!("{}", response.text());
    Ok(())
  }

  async fn update(&self) -> Result<()> {
    if self.register().await? == LifecycleState::Unregistered {
      println!("Development origin: updates are not tracked.");
      return Ok(());
    }

    match self.lifecycle.check_for_update().await {
      Ok(UpdateCheck::UpToDate) => println!("Version {} is up to date.", self.config.app.version),
      Ok(UpdateCheck::Deferred { version }) => {
        println!("Version {} is available. Run `studysync update` when ready.", version)
      }
      Ok(UpdateCheck::ReloadRequired(reload)) => println!(
        "Version {} is ready. Restart studysync to finish updating.",
        reload.version
      ),
      Err(OfflineError::NetworkUnavailable(_)) => {
        println!("Could not check for updates. {}", OFFLINE_MESSAGE)
      }
      Err(e) => return Err(e.into()),
    }
    Ok(())
  }

  fn install(&self) -> Result<()> {
    let installer =
      DesktopEntryInstaller::detect().ok_or_else(|| eyre!("Install is not supported here"))?;
    if installer.is_installed() {
      self.lifecycle.installed()?;
      println!("Already installed at {}.", installer.entry_path().display());
      return Ok(());
    }

    let entry = installer.entry_path();
    self.lifecycle.capture_install_prompt(Box::new(TerminalInstall(installer)))?;
    if !self.lifecycle.can_install()? {
      return Err(OfflineError::InstallUnavailable.into());
    }
    match self.lifecycle.prompt_install()? {
      InstallOutcome::Accepted => println!("Installed launcher at {}.", entry.display()),
      InstallOutcome::Dismissed => println!("Install dismissed."),
    }
    Ok(())
  }

  async fn watch(&self) -> Result<()> {
    let mut rx = self.subscribe();
    let state = self.register().await?;
    let drainer = self.queue.spawn_reconnect_drain();
    let monitor = tokio::spawn(self.monitor.clone().run(self.config.probe_interval()));
    info!("watching connectivity");
    println!("Watching connectivity ({}). Press Ctrl-C to stop.", state);

    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        event = rx.recv() => match event {
          Ok(event) => self.on_event(event, &state).await,
          Err(broadcast::error::RecvError::Lagged(_)) => {}
          Err(broadcast::error::RecvError::Closed) => break,
        },
      }
    }

    monitor.abort();
    drainer.abort();
    Ok(())
  }

  async fn on_event(&self, event: AppEvent, state: &LifecycleState) {
    match event {
      AppEvent::ConnectivityChanged { online: true } => {
        println!("Online.");
        if *state != LifecycleState::Unregistered {
          if let Ok(UpdateCheck::ReloadRequired(reload)) = self.lifecycle.check_for_update().await {
            println!("Version {} is ready. Restart to finish updating.", reload.version);
          }
        }
      }
      AppEvent::ConnectivityChanged { online: false } => println!("Offline. {}", OFFLINE_MESSAGE),
      AppEvent::UpdateAvailable { version } => println!("Update available: {}", version),
      AppEvent::InstallAvailable => println!("Install available: run `studysync install`."),
      AppEvent::StorageUnavailable { reason } => println!("Offline storage unavailable: {}", reason),
      AppEvent::SyncFinished { synced, failed } => {
        if failed == 0 {
          println!("Synced {} result(s).", synced);
        } else {
          println!("Synced {}, {} failed. {}", synced, failed, OFFLINE_MESSAGE);
        }
      }
    }
  }
}

/// Open the offline store, or fall back to online-only mode.
fn open_store(config: &Config, db_override: Option<PathBuf>) -> Result<OfflineStore> {
  let path = match db_override {
    Some(path) => path,
    None => config.database_path()?,
  };

  match OfflineStore::open(&path) {
    Ok(store) => {
      info!(path = %path.display(), "opened offline store");
      Ok(store)
    }
    Err(e) => {
      error!(path = %path.display(), "offline store unavailable, running online-only: {}", e);
      eprintln!("Offline storage is unavailable ({}). Running online-only.", e);
      Ok(OfflineStore::unavailable(e.to_string()))
    }
  }
}

fn print_source<T>(result: &CacheResult<T>) {
  if result.source == CacheSource::Offline {
    match result.synced_at {
      Some(at) => println!("(offline copy from {})", at.format("%Y-%m-%d %H:%M")),
      None => println!("(offline copy)"),
    }
  }
}
