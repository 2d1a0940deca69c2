// Log poller
//
// Per-log cursor loop: fetch the tree head, fetch appended entries in
// windows, publish parsed records to the hub.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hub::Hub;
use crate::monitor::client::LogClient;
use crate::monitor::log_list::CtLog;
use crate::monitor::stats::StatsTracker;
use crate::parser::{self, CertRecord, ParsedCert};

/// Window size for get-entries requests
pub const BATCH_SIZE: u64 = 512;

/// Default interval between tree-head polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound for the error backoff
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Tails one CT log, publishing every newly appended certificate.
///
/// The cursor starts at the tree size observed on the first successful
/// tree-head fetch, so only entries appended after startup are delivered.
/// Upstream errors are transient: the loop backs off and retries, and the
/// cursor never moves backwards. Only cancellation ends the poller.
pub struct Poller {
    hub: Arc<Hub>,
    log: CtLog,
    nocert: bool,
    poll_interval: Duration,
    stats: StatsTracker,
}

impl Poller {
    pub fn new(
        hub: Arc<Hub>,
        log: CtLog,
        nocert: bool,
        poll_interval: Duration,
        stats: StatsTracker,
    ) -> Self {
        Self {
            hub,
            log,
            nocert,
            poll_interval,
            stats,
        }
    }

    /// Run the cursor loop until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        info!(log = %self.log.description, url = %self.log.url, "starting poller");

        let client = match LogClient::new() {
            Ok(client) => client,
            Err(e) => {
                error!(log = %self.log.description, error = %e, "failed to build HTTP client");
                return;
            }
        };

        let mut cursor: u64 = 0;
        let mut backoff = self.poll_interval;
        let mut initialized = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let tree_size = match client.get_tree_size(&self.log.url).await {
                Ok(size) => size,
                Err(e) => {
                    warn!(log = %self.log.description, error = %e, "failed to fetch tree head");
                    self.stats.record_fetch_failure(&self.log.url);
                    if sleep_or_cancelled(backoff, &cancel).await {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };
            backoff = self.poll_interval;

            if !initialized {
                // Deliver only entries appended after startup.
                cursor = tree_size;
                initialized = true;
                self.stats.record_position(&self.log.url, cursor, tree_size);
                if sleep_or_cancelled(self.poll_interval, &cancel).await {
                    break;
                }
                continue;
            }

            if cursor >= tree_size {
                if sleep_or_cancelled(self.poll_interval, &cancel).await {
                    break;
                }
                continue;
            }

            let mut start = cursor;
            while start < tree_size {
                let end = (start + BATCH_SIZE - 1).min(tree_size - 1);

                let entries = match client.get_entries(&self.log.url, start, end).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        // Retry this window against fresh tree-head data on
                        // the next outer iteration; the cursor stays put.
                        warn!(
                            log = %self.log.description,
                            start, end, error = %e,
                            "failed to fetch entries"
                        );
                        self.stats.record_fetch_failure(&self.log.url);
                        break;
                    }
                };

                let mut published = 0u64;
                for entry in &entries {
                    let certs = parser::parse_certificates(&entry.leaf_input, &entry.extra_data)
                        .unwrap_or_default();

                    for cert in certs {
                        if let Some(msg) = self.build_record(&cert).await {
                            if self.hub.publish(msg).await.is_err() {
                                debug!(log = %self.log.description, "hub closed, stopping poller");
                                return;
                            }
                            published += 1;
                        }
                    }
                }

                start = end + 1;
                cursor = start;
                self.stats.record_published(&self.log.url, published);
                self.stats.record_position(&self.log.url, cursor, tree_size);
            }

            if sleep_or_cancelled(self.poll_interval, &cancel).await {
                break;
            }
        }

        info!(log = %self.log.description, "poller stopped");
    }

    /// Serialize one certificate into a record line, honoring suppression
    async fn build_record(&self, cert: &ParsedCert) -> Option<Vec<u8>> {
        let needs_cert = self.hub.needs_cert_data().await;

        let include_pem = !self.nocert && needs_cert;
        let include_fingerprint = if self.nocert {
            self.hub.wants_fingerprint().await
        } else {
            needs_cert
        };

        let record = CertRecord {
            cert_pem: include_pem.then(|| parser::cert_to_pem(&cert.der)),
            cert_fingerprint: include_fingerprint.then(|| parser::fingerprint(&cert.der)),
            subject: cert.subject.clone(),
            sans: cert.sans.clone(),
            issuer: cert.issuer.clone(),
            not_before: parser::format_rfc3339(cert.not_before),
            not_after: parser::format_rfc3339(cert.not_after),
            source: self.log.description.clone(),
            timestamp: Utc::now().timestamp(),
        };

        match serde_json::to_vec(&record) {
            Ok(mut data) => {
                data.push(b'\n');
                Some(data)
            }
            Err(e) => {
                debug!(log = %self.log.description, error = %e, "failed to serialize record");
                None
            }
        }
    }
}

/// Sleep for `duration`, returning true if cancellation fired first
async fn sleep_or_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
