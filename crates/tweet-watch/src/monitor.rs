//! Monitor loop - one gate-fetch-filter-notify-persist cycle.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use notify::{Message, Notifier};

use crate::config::{MonitorWindow, WatchConfig};
use crate::error::WatchResult;
use crate::filter::KeywordFilter;
use crate::quota::{Clock, CredentialRotator, CredentialStatus, QuotaLedger};
use crate::storage::DedupStore;
use crate::twitter::{Item, TimelineApi};

/// Steps of a cycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    GateCheck,
    Fetching,
    Filtering,
    Notifying,
    Persisting,
}

/// How a cycle ended, when it did not abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Local time was outside the monitoring window; nothing was touched.
    SkippedOutOfWindow,
    /// The timeline had nothing newer than the marker.
    SkippedNoNewItems,
    /// Items were examined and state persisted.
    Completed(CycleReport),
}

/// Counters for a completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items returned by the timeline.
    pub fetched: usize,
    /// Items not seen in an earlier cycle.
    pub examined: usize,
    /// Items queued for notification.
    pub matched: usize,
    /// Notifications delivered.
    pub notified: usize,
    /// Notifications that failed.
    pub notify_failures: usize,
    /// Whether the dedup store was written.
    pub persisted: bool,
    /// Quota ledger writes that failed during the cycle, including the
    /// final flush.
    pub ledger_write_failures: usize,
}

/// An item queued for notification with the keywords it matched.
#[derive(Debug, Clone)]
struct Alert {
    item: Item,
    keywords: Vec<String>,
}

/// Per-cycle knobs taken from the configuration.
#[derive(Debug, Clone)]
struct Settings {
    handle: String,
    window: MonitorWindow,
    max_results: u32,
    send_interval: Duration,
    mentioned: Vec<String>,
}

/// Orchestrates a single polling cycle.
pub struct Monitor<C: TimelineApi> {
    settings: Settings,
    client: C,
    rotator: CredentialRotator,
    dedup: DedupStore,
    filter: KeywordFilter,
    notifier: Notifier,
    clock: Clock,
    phase: Phase,
}

impl<C: TimelineApi> Monitor<C> {
    /// Validate `config` and load persisted state from its state directory.
    pub fn new(config: &WatchConfig, client: C, notifier: Notifier) -> WatchResult<Self> {
        config.validate()?;

        let ledger = QuotaLedger::load(&config.ledger_path(), config.quota);
        let rotator = CredentialRotator::new(config.credentials.clone(), ledger)?;
        let dedup = DedupStore::load(&config.dedup_path(), config.retention);

        Ok(Self {
            settings: Settings {
                handle: config.target_handle.clone(),
                window: config.window,
                max_results: config.max_results,
                send_interval: config.send_interval,
                mentioned: config.mentioned.clone(),
            },
            client,
            rotator,
            dedup,
            filter: KeywordFilter::new(&config.keywords),
            notifier,
            clock: Utc::now,
            phase: Phase::Idle,
        })
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current phase; `Idle` between cycles.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The dedup store.
    #[must_use]
    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    /// Per-credential usage snapshot.
    pub fn credential_status(&mut self) -> Vec<CredentialStatus> {
        let now = (self.clock)();
        self.rotator.status(now)
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "Cycle phase");
        self.phase = phase;
    }

    /// Run one cycle.
    ///
    /// An `Err` is an aborted cycle: the dedup store is not written, while
    /// the quota ledger keeps whatever attempts were made.
    pub async fn run_cycle(&mut self) -> WatchResult<CycleOutcome> {
        let result = self.cycle().await;
        if let Err(e) = &result {
            tracing::error!(phase = ?self.phase, error = %e, "Cycle aborted");
        }
        self.enter(Phase::Idle);
        result
    }

    async fn cycle(&mut self) -> WatchResult<CycleOutcome> {
        self.enter(Phase::GateCheck);
        let now = (self.clock)();
        if !self.settings.window.contains(now) {
            tracing::info!(
                local_time = %now.with_timezone(&self.settings.window.offset()).format("%H:%M"),
                start_hour = self.settings.window.start_hour,
                end_hour = self.settings.window.end_hour,
                "Outside monitoring window, skipping"
            );
            return Ok(CycleOutcome::SkippedOutOfWindow);
        }

        for status in self.rotator.status(now) {
            tracing::info!(
                credential = status.index,
                token = %status.masked_token,
                usable = status.usable,
                used = status.usage_count,
                limit = status.limit,
                last_error = ?status.last_error.as_ref().map(|e| e.error),
                "Credential status"
            );
        }

        self.enter(Phase::Fetching);
        self.rotator.take_failed_writes();
        let mut items = self.fetch().await?;
        let mut report = CycleReport {
            fetched: items.len(),
            ..CycleReport::default()
        };
        if items.is_empty() {
            tracing::info!(handle = %self.settings.handle, "No new items");
            return Ok(CycleOutcome::SkippedNoNewItems);
        }

        self.enter(Phase::Filtering);
        // Timelines arrive newest first; alerts go out oldest first.
        items.reverse();
        items.sort_by_key(|item| item.created_at);
        let alerts = self.filter_items(&items, &mut report);

        self.enter(Phase::Notifying);
        self.notify(&alerts, &mut report).await;

        self.enter(Phase::Persisting);
        report.persisted = match self.dedup.flush((self.clock)()) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist dedup state");
                false
            }
        };
        let final_flush_failed = match self.rotator.flush() {
            Ok(()) => false,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist quota ledger");
                true
            }
        };
        report.ledger_write_failures =
            self.rotator.take_failed_writes() + usize::from(final_flush_failed);

        tracing::info!(
            fetched = report.fetched,
            examined = report.examined,
            matched = report.matched,
            notified = report.notified,
            notify_failures = report.notify_failures,
            ledger_write_failures = report.ledger_write_failures,
            "Cycle complete"
        );
        Ok(CycleOutcome::Completed(report))
    }

    async fn fetch(&mut self) -> WatchResult<Vec<Item>> {
        let clock = self.clock;
        let client = &self.client;
        let rotator = &mut self.rotator;
        let handle = self.settings.handle.as_str();
        let max_results = self.settings.max_results;

        let user_id = rotator
            .execute(clock, "lookup_user", move |credential| async move {
                client.fetch_user_id(handle, &credential).await
            })
            .await?;

        let user_id = user_id.as_str();
        let since_id = self.dedup.last_item_id();
        let items = rotator
            .execute(clock, "recent_items", move |credential| async move {
                client
                    .fetch_recent_items(user_id, since_id, max_results, &credential)
                    .await
            })
            .await?;

        tracing::info!(
            handle,
            user_id,
            since_id = since_id.unwrap_or("-"),
            count = items.len(),
            "Fetched timeline"
        );
        Ok(items)
    }

    /// Examine items oldest first, queueing keyword matches that were never
    /// announced. Every examined item is marked processed, match or not.
    fn filter_items(&mut self, items: &[Item], report: &mut CycleReport) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for item in items {
            if self.dedup.is_processed(&item.id) {
                tracing::debug!(item_id = %item.id, "Already processed");
                continue;
            }
            report.examined += 1;

            let keywords = self.filter.matches(&item.text);
            if !keywords.is_empty() && !self.dedup.is_notified(&item.id) {
                tracing::info!(item_id = %item.id, keywords = ?keywords, "Keyword match");
                self.dedup.mark_notified(&item.id);
                alerts.push(Alert {
                    item: item.clone(),
                    keywords,
                });
            }
            self.dedup.mark_processed(&item.id);
        }

        if let Some(newest) = items.last() {
            self.dedup.set_last_item_id(&newest.id);
        }
        report.matched = alerts.len();
        alerts
    }

    async fn notify(&mut self, alerts: &[Alert], report: &mut CycleReport) {
        let offset = self.settings.window.offset();

        for (i, alert) in alerts.iter().enumerate() {
            if i > 0 && !self.settings.send_interval.is_zero() {
                tokio::time::sleep(self.settings.send_interval).await;
            }

            let message = Message::text(format_alert(
                &alert.item,
                &alert.keywords,
                &self.settings.handle,
                offset,
            ))
            .with_mentions(self.settings.mentioned.clone());

            match self.notifier.send(&message).await {
                Ok(()) => {
                    tracing::info!(item_id = %alert.item.id, "Notification sent");
                    report.notified += 1;
                }
                Err(e) => {
                    tracing::error!(item_id = %alert.item.id, error = %e, "Notification failed");
                    report.notify_failures += 1;
                }
            }
        }
    }
}

/// Render the chat message for a matched item.
#[must_use]
pub fn format_alert(item: &Item, keywords: &[String], handle: &str, offset: FixedOffset) -> String {
    let local: DateTime<FixedOffset> = item.created_at.with_timezone(&offset);
    format!(
        "🚀 Keyword alert from @{handle}\n\n\
         📝 {text}\n\n\
         🏷️ Keywords: {keywords}\n\n\
         🕐 {time} (UTC{offset})\n\n\
         🔗 {url}",
        text = item.text,
        keywords = keywords.join(", "),
        time = local.format("%Y-%m-%d %H:%M:%S"),
        url = item.permalink(handle),
    )
}
