//! presence-sync CLI
//!
//! Local entry point: one-shot sync, long-running watch, and offline helpers
//! for location tags and game log replays.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use presence_sync::{
    api::{ApiClient, HttpTransport, PushStream},
    error::{AppError, Result},
    location::LocationContext,
    models::Config,
    pipeline::{LiveEventRouter, ReconcileInterval, Routed, SyncReport, SyncSession},
    registry::Registry,
    services::{
        Bucket, Feed, FriendRoster, GameLogParser, RawLogEntry,
        feed::{load_history, save_history},
        roster::{load_preferences, save_preferences},
    },
    storage::LocalStore,
};

/// Delay before reconnecting a dropped push stream
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// presence-sync - local mirror of a social presence service
#[derive(Parser, Debug)]
#[command(
    name = "presence-sync",
    version,
    about = "Mirror friends, notifications and favorites into a local cache"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration file
    Validate,

    /// Parse a location tag and print it as JSON
    Location {
        tag: String,
    },

    /// Classify a JSON-lines game log and print one event per line
    ReplayLog {
        file: PathBuf,

        /// Source name used for per-source context
        #[arg(long, default_value = "replay")]
        source: String,
    },

    /// Run one full reconciliation and print a summary
    Sync,

    /// Sync, then follow the push stream with periodic reconciliation
    Watch,
}

/// Initialize logging based on verbosity flag and configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Caches plus the consumers that hang off the bus.
struct App {
    session: SyncSession<HttpTransport>,
    roster: Rc<RefCell<FriendRoster>>,
    feed: Rc<RefCell<Feed>>,
    store: LocalStore,
}

impl App {
    async fn new(config: &Config) -> Result<Self> {
        let registry = Registry::new();
        let client = Rc::new(ApiClient::from_config(&config.api)?);
        let store = LocalStore::new(&config.storage.dir);

        let mut roster = FriendRoster::new();
        roster.apply_preferences(&load_preferences(&store).await?);
        let roster = Rc::new(RefCell::new(roster));
        FriendRoster::attach(&roster, &registry.bus);

        let mut feed = Feed::new(config.feed.max_entries);
        feed.restore(load_history(&store).await?);
        let feed = Rc::new(RefCell::new(feed));
        Feed::attach(&feed, &registry.bus);

        let session = SyncSession::new(registry, client, config.sync.clone(), &config.favorites);
        Ok(Self {
            session,
            roster,
            feed,
            store,
        })
    }

    async fn persist(&self) -> Result<()> {
        let preferences = self.roster.borrow().preferences();
        save_preferences(&self.store, &preferences).await?;
        let history: Vec<_> = self.feed.borrow().entries().cloned().collect();
        save_history(&self.store, &history).await
    }

    fn print_summary(&self, report: &SyncReport) {
        if let Some(friends) = &report.friends {
            log::info!(
                "Friends: {} (+{} -{})",
                friends.seen,
                friends.added.len(),
                friends.removed.len()
            );
        }
        for pass in &report.passes {
            log::info!(
                "{}: {} seen in {} pages, +{} ~{} -{}",
                pass.kind,
                pass.observed,
                pass.pages,
                pass.diff.added.len(),
                pass.diff.updated.len(),
                pass.diff.removed.len()
            );
        }
        for (kind, error) in &report.failures {
            log::error!("{} failed: {}", kind, error);
        }

        let roster = self.roster.borrow();
        for (bucket, len) in roster.lengths() {
            log::info!("Roster {}: {}", bucket, len);
        }

        let binder = self.session.binder();
        for slot in binder.slots().iter().filter(|s| s.is_bound()) {
            log::info!(
                "Slot {} '{}': {}/{}",
                slot.id,
                slot.display_name,
                slot.count,
                slot.capacity
            );
        }
    }
}

/// Main entry point for the CLI application.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = Config::load(&cli.config);
    let level = match &loaded {
        Ok(config) => config.logging.level.clone(),
        Err(_) => "info".to_string(),
    };
    init_logging(cli.verbose, &level);

    let config = match (&cli.command, loaded) {
        (Command::Validate, loaded) => {
            log::info!("Validating {}...", cli.config.display());
            return validate(loaded?);
        }
        (_, Ok(config)) => config,
        (_, Err(e)) => {
            log::warn!(
                "Config load failed from {}: {}. Using defaults.",
                cli.config.display(),
                e
            );
            Config::default()
        }
    };

    match cli.command {
        Command::Validate => {}

        Command::Location { tag } => {
            let parsed = LocationContext::parse(&tag);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }

        Command::ReplayLog { file, source } => replay_log(&file, &source)?,

        Command::Sync => {
            config.validate()?;
            let app = App::new(&config).await?;
            let report = app.session.refresh_all().await?;
            app.print_summary(&report);
            app.persist().await?;
        }

        Command::Watch => {
            config.validate()?;
            watch(&config).await?;
        }
    }

    Ok(())
}

fn validate(config: Config) -> Result<()> {
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }
    log::info!("✓ Config OK");
    Ok(())
}

fn replay_log(file: &Path, source: &str) -> Result<()> {
    let content = std::fs::read_to_string(file)?;
    let mut parser = GameLogParser::new();
    let (mut printed, mut skipped) = (0usize, 0usize);

    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = RawLogEntry::from_json(line).and_then(|entry| parser.parse(source, &entry));
        match record {
            Ok(Some(record)) => {
                println!("{}", serde_json::to_string(&record)?);
                printed += 1;
            }
            Ok(None) => skipped += 1,
            Err(e) => log::warn!("{}:{}: {}", file.display(), n + 1, e),
        }
    }

    log::info!("{} events, {} repeated lines skipped", printed, skipped);
    Ok(())
}

async fn watch(config: &Config) -> Result<()> {
    let token = config
        .api
        .auth_token
        .clone()
        .ok_or_else(|| AppError::config("api.auth_token is required for watch"))?;

    let app = App::new(config).await?;
    let router = LiveEventRouter::new(Rc::clone(app.session.registry()));
    let mut interval = ReconcileInterval::from_config(&config.sync);

    reconcile(&app, &mut interval).await;

    loop {
        let mut stream = match PushStream::connect(&config.api.websocket_url, &token).await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("Push stream connect failed: {}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        router.reset();

        let mut next_round = Box::pin(tokio::time::sleep(interval.current()));
        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(message)) => match router.route(&message) {
                        Ok(Routed::Applied) if message.kind.starts_with("favorite-") => {
                            app.session.rebind();
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("Could not apply {}: {}", message.kind, e),
                    },
                    Some(Err(e)) => {
                        log::warn!("Push stream error: {}", e);
                        break;
                    }
                    None => {
                        log::warn!("Push stream closed");
                        break;
                    }
                },
                _ = &mut next_round => {
                    reconcile(&app, &mut interval).await;
                    next_round = Box::pin(tokio::time::sleep(interval.current()));
                }
            }
        }

        // The caches catch up on whatever was missed while disconnected.
        tokio::time::sleep(RECONNECT_DELAY).await;
        reconcile(&app, &mut interval).await;
    }
}

/// One reconciliation round. Failures are logged and retried on the next
/// round; the push stream keeps running in between.
async fn reconcile(app: &App, interval: &mut ReconcileInterval) {
    let result = app.session.refresh_all().await;
    interval.after_round(&result);
    let Ok(report) = result else {
        return;
    };
    app.print_summary(&report);
    log::debug!(
        "Online now: {}",
        app.roster.borrow().bucket_len(Bucket::Online) + app.roster.borrow().bucket_len(Bucket::VipOnline)
    );
    if let Err(e) = app.persist().await {
        log::error!("Could not save roster preferences or feed history: {}", e);
    }
}
