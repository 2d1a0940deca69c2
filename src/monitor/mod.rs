// Log monitor
//
// Keeps the set of running pollers reconciled against the authoritative
// CT log list.

pub mod client;
pub mod log_list;
pub mod poller;
pub mod stats;

pub use client::{LogClient, LogEntry};
pub use log_list::CtLog;
pub use poller::Poller;
pub use stats::StatsTracker;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::hub::Hub;
use crate::Result;

/// Interval between log list refreshes
pub const LOG_LIST_REFRESH: Duration = Duration::from_secs(15 * 60);

/// Interval between statistics summaries
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Never emit cert_pem regardless of subscriber demand
    pub nocert: bool,
    /// Authoritative log list location
    pub log_list_url: String,
    /// Interval between tree-head polls
    pub poll_interval: Duration,
    /// Interval between log list refreshes
    pub refresh_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            nocert: false,
            log_list_url: log_list::LOG_LIST_URL.to_string(),
            poll_interval: poller::POLL_INTERVAL,
            refresh_interval: LOG_LIST_REFRESH,
        }
    }
}

/// Reconciles running pollers against the periodically refreshed log list.
///
/// Each poller owns a child token of the monitor's root; cancelling the
/// child stops exactly that poller, cancelling the root stops everything.
pub struct LogMonitor {
    hub: Arc<Hub>,
    config: MonitorConfig,
    root: CancellationToken,
    client: reqwest::Client,
    active: Mutex<HashMap<String, CancellationToken>>,
    stats: StatsTracker,
}

impl LogMonitor {
    pub fn new(hub: Arc<Hub>, config: MonitorConfig, root: CancellationToken) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(client::USER_AGENT)
            .build()?;

        Ok(Self {
            hub,
            config,
            root,
            client,
            active: Mutex::new(HashMap::new()),
            stats: StatsTracker::new(),
        })
    }

    /// Fetch the log list and start pollers.
    ///
    /// The initial fetch is synchronous and fatal on failure; afterwards a
    /// background task refreshes the roster, preserving it when a refresh
    /// fails.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.refresh().await?;

        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.periodic_refresh().await });

        let reporter = Arc::clone(self);
        tokio::spawn(async move { reporter.stats_reporter().await });

        Ok(())
    }

    async fn periodic_refresh(&self) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.root.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "failed to refresh log list, keeping current roster");
                    }
                }
            }
        }
    }

    async fn stats_reporter(&self) {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.root.cancelled() => return,
                _ = ticker.tick() => self.stats.log_summary(),
            }
        }
    }

    async fn refresh(&self) -> Result<()> {
        let logs = log_list::fetch_log_list(&self.client, &self.config.log_list_url).await?;
        self.reconcile(logs).await;
        Ok(())
    }

    /// Bring the running pollers in line with `logs`.
    ///
    /// Pollers for vanished URLs are cancelled; new URLs get a poller bound
    /// to a fresh child token. A poller that is already running is never
    /// restarted, so a changed description alone has no effect.
    pub async fn reconcile(&self, logs: Vec<CtLog>) {
        let mut active = self.active.lock().await;

        let desired: HashSet<&str> = logs.iter().map(|log| log.url.as_str()).collect();

        active.retain(|url, cancel| {
            if desired.contains(url.as_str()) {
                true
            } else {
                info!(url = %url, "removing CT log");
                cancel.cancel();
                false
            }
        });

        for log in logs {
            if active.contains_key(&log.url) {
                continue;
            }

            info!(log = %log.description, url = %log.url, "adding CT log");

            let child = self.root.child_token();
            active.insert(log.url.clone(), child.clone());

            let poller = Poller::new(
                Arc::clone(&self.hub),
                log,
                self.config.nocert,
                self.config.poll_interval,
                self.stats.clone(),
            );
            tokio::spawn(async move { poller.run(child).await });
        }

        info!(count = active.len(), "monitoring CT logs");
    }

    /// URLs with a running poller
    pub async fn active_urls(&self) -> Vec<String> {
        self.active.lock().await.keys().cloned().collect()
    }

    /// Number of running pollers
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
