//! End-to-end monitor cycles against mocked timeline and webhook servers.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tweet_watch::quota::{AttemptOutcome, CredentialRotator, QuotaLedger};
use tweet_watch::{
    CycleOutcome, DedupStore, FailureKind, Monitor, Phase, TwitterClient, WatchConfig,
    WatchError,
};

const TOKENS: [&str; 3] = [
    "token-0-aaaaaaaaaaaa",
    "token-1-bbbbbbbbbbbb",
    "token-2-cccccccccccc",
];

/// 12:00 in UTC+8.
fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 4, 0, 0).unwrap()
}

/// 09:00 in UTC+8.
fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 1, 0, 0).unwrap()
}

struct Harness {
    api: MockServer,
    hook: MockServer,
    dir: TempDir,
    config: WatchConfig,
}

impl Harness {
    async fn new() -> Self {
        let api = MockServer::start().await;
        let hook = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        let tokens = TOKENS.join(",");
        let mut config = WatchConfig::from_lookup(|key| match key {
            "TWITTER_BEARER_TOKENS" => Some(tokens.clone()),
            _ => None,
        })
        .unwrap();
        config.state_dir = dir.path().to_path_buf();
        config.api_base_url = api.uri();
        config.webhook_url = Some(format!("{}/hook", hook.uri()));
        config.send_interval = Duration::ZERO;

        Self {
            api,
            hook,
            dir,
            config,
        }
    }

    fn monitor(&self, clock: fn() -> DateTime<Utc>) -> Monitor<TwitterClient> {
        let client = TwitterClient::new(self.api.uri(), Duration::from_secs(5)).unwrap();
        Monitor::new(&self.config, client, self.config.notifier())
            .unwrap()
            .with_clock(clock)
    }

    async fn mount_user(&self) {
        Mock::given(method("GET"))
            .and(path("/users/by/username/binancezh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "1234", "name": "Binance", "username": "binancezh"}
            })))
            .mount(&self.api)
            .await;
    }

    async fn mount_timeline(&self, items: Value) {
        Mock::given(method("GET"))
            .and(path("/users/1234/tweets"))
            .and(query_param_is_missing("since_id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": items })))
            .mount(&self.api)
            .await;
    }

    async fn mount_hook(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(
                ResponseTemplate::new(status).set_body_json(json!({"errcode": 0, "errmsg": "ok"})),
            )
            .mount(&self.hook)
            .await;
    }

    async fn hook_messages(&self) -> Vec<String> {
        self.hook
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|request| {
                let body: Value = serde_json::from_slice(&request.body).unwrap();
                body["text"]["content"].as_str().unwrap().to_string()
            })
            .collect()
    }

    fn dedup(&self) -> DedupStore {
        DedupStore::load(&self.config.dedup_path(), self.config.retention)
    }

    fn ledger(&self) -> QuotaLedger {
        QuotaLedger::load(&self.config.ledger_path(), self.config.quota)
    }
}

#[test]
fn exhausted_credential_is_skipped_after_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token_usage.json");
    let policy = tweet_watch::QuotaPolicy::default();
    assert_eq!(policy.limit, 90);

    let mut ledger = QuotaLedger::load(&path, policy);
    for i in 0..90 {
        ledger.record_attempt(0, noon() - chrono::Duration::seconds(i), AttemptOutcome::Success);
    }
    ledger.flush().unwrap();

    let reloaded = QuotaLedger::load(&path, policy);
    let mut rotator =
        CredentialRotator::new(vec![TOKENS[0].to_string(), TOKENS[1].to_string()], reloaded)
            .unwrap();
    assert_eq!(rotator.next_usable(noon()).unwrap().index(), 1);
}

#[tokio::test]
async fn outside_window_touches_nothing() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&harness.api)
        .await;

    let mut monitor = harness.monitor(morning);
    let outcome = monitor.run_cycle().await.unwrap();

    assert_eq!(outcome, CycleOutcome::SkippedOutOfWindow);
    assert_eq!(monitor.phase(), Phase::Idle);
    assert!(monitor.dedup().processed().is_empty());
    assert!(!harness.config.ledger_path().exists());
    assert!(!harness.config.dedup_path().exists());
    assert_eq!(std::fs::read_dir(harness.dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn already_notified_item_is_not_requeued() {
    let harness = Harness::new().await;
    let mut seeded = harness.dedup();
    seeded.mark_notified("100");
    seeded.flush(noon()).unwrap();

    harness.mount_user().await;
    harness
        .mount_timeline(json!([
            {"id": "101", "text": "alpha airdrop live", "created_at": "2025-06-01T03:30:00.000Z"},
            {"id": "100", "text": "alpha is back", "created_at": "2025-06-01T03:00:00.000Z"}
        ]))
        .await;
    harness.mount_hook(200).await;

    let outcome = harness.monitor(noon).run_cycle().await.unwrap();

    let CycleOutcome::Completed(report) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(report.fetched, 2);
    assert_eq!(report.matched, 1);
    assert_eq!(report.notified, 1);
    assert!(report.persisted);

    let messages = harness.hook_messages().await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("https://twitter.com/binancezh/status/101"));

    let dedup = harness.dedup();
    assert!(dedup.is_notified("101"));
    assert!(dedup.is_processed("101"));
    assert!(dedup.is_processed("100"));
    assert_eq!(dedup.last_item_id(), Some("101"));
}

#[tokio::test]
async fn all_rate_limited_aborts_without_touching_dedup() {
    let harness = Harness::new().await;
    let mut seeded = harness.dedup();
    seeded.mark_processed("42");
    seeded.flush(noon()).unwrap();
    let before = std::fs::read(harness.config.dedup_path()).unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&harness.api)
        .await;

    let err = harness.monitor(noon).run_cycle().await.unwrap_err();

    assert!(matches!(err, WatchError::CredentialsExhausted { attempted: 3 }));
    assert_eq!(std::fs::read(harness.config.dedup_path()).unwrap(), before);

    let ledger = harness.ledger();
    for index in 0..TOKENS.len() {
        let record = ledger.record(index).unwrap();
        assert_eq!(
            record.last_error.as_ref().unwrap().error,
            FailureKind::RateLimited
        );
        assert!(record.requests.is_empty());
    }
}

#[tokio::test]
async fn alerts_go_out_oldest_first_and_marker_advances() {
    let harness = Harness::new().await;
    harness.mount_user().await;
    harness
        .mount_timeline(json!([
            {"id": "103", "text": "Alpha points round 3", "created_at": "2025-06-01T03:40:00.000Z"},
            {"id": "102", "text": "weekly market recap", "created_at": "2025-06-01T03:20:00.000Z"},
            {"id": "101", "text": "新的空投活动", "created_at": "2025-06-01T03:00:00.000Z"}
        ]))
        .await;
    Mock::given(method("GET"))
        .and(path("/users/1234/tweets"))
        .and(query_param("since_id", "103"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"meta": {"result_count": 0}})))
        .mount(&harness.api)
        .await;
    harness.mount_hook(200).await;

    let outcome = harness.monitor(noon).run_cycle().await.unwrap();
    let CycleOutcome::Completed(report) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(report.examined, 3);
    assert_eq!(report.matched, 2);

    let messages = harness.hook_messages().await;
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("status/101"));
    assert!(messages[0].contains("空投"));
    assert!(messages[1].contains("status/103"));
    assert!(messages[1].contains("alpha, points, alpha points"));

    let dedup = harness.dedup();
    assert_eq!(dedup.last_item_id(), Some("103"));
    assert!(dedup.is_processed("102"));
    assert!(!dedup.is_notified("102"));
    let written = dedup.last_update().unwrap();

    // Nothing newer on the next cycle: no alerts and no dedup write.
    let outcome = harness.monitor(noon).run_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::SkippedNoNewItems);
    assert_eq!(harness.hook_messages().await.len(), 2);
    assert_eq!(harness.dedup().last_update(), Some(written));
}

#[tokio::test]
async fn processed_item_is_never_reflagged() {
    let harness = Harness::new().await;
    let mut seeded = harness.dedup();
    seeded.mark_processed("300");
    seeded.flush(noon()).unwrap();

    harness.mount_user().await;
    harness
        .mount_timeline(json!([
            {"id": "300", "text": "now with alpha points", "created_at": "2025-06-01T03:00:00.000Z"}
        ]))
        .await;
    harness.mount_hook(200).await;

    let outcome = harness.monitor(noon).run_cycle().await.unwrap();

    let CycleOutcome::Completed(report) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(report.examined, 0);
    assert_eq!(report.matched, 0);
    assert!(harness.hook_messages().await.is_empty());
    assert!(!harness.dedup().is_notified("300"));
}

#[tokio::test]
async fn rejected_credential_rotates_within_cycle() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(header("authorization", format!("Bearer {}", TOKENS[0]).as_str()))
        .respond_with(ResponseTemplate::new(401))
        .mount(&harness.api)
        .await;
    harness.mount_user().await;
    harness.mount_timeline(json!([])).await;

    let mut monitor = harness.monitor(noon);
    let outcome = monitor.run_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::SkippedNoNewItems);

    let status = monitor.credential_status();
    assert!(status[0].last_error.is_some());
    assert!(status.iter().all(|s| s.usable));

    let ledger = harness.ledger();
    assert_eq!(
        ledger.record(0).unwrap().last_error.as_ref().unwrap().error,
        FailureKind::Unauthorized
    );
    // User lookup on credential 1, timeline on credential 2.
    assert_eq!(ledger.record(1).unwrap().requests.len(), 1);
    assert_eq!(ledger.record(2).unwrap().requests.len(), 1);
}

#[tokio::test]
async fn unwritable_ledger_is_reported() {
    let harness = Harness::new().await;
    let ledger_path = harness.config.ledger_path();
    std::fs::create_dir(&ledger_path).unwrap();
    std::fs::write(ledger_path.join("occupied"), b"x").unwrap();

    harness.mount_user().await;
    harness
        .mount_timeline(json!([
            {"id": "400", "text": "market update", "created_at": "2025-06-01T03:00:00.000Z"}
        ]))
        .await;

    let outcome = harness.monitor(noon).run_cycle().await.unwrap();

    let CycleOutcome::Completed(report) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    // Two request attempts plus the final flush.
    assert_eq!(report.ledger_write_failures, 3);
    assert!(report.persisted);
    assert!(ledger_path.is_dir());
    assert!(harness.dedup().is_processed("400"));
}

#[tokio::test]
async fn failed_notification_does_not_abort_cycle() {
    let harness = Harness::new().await;
    harness.mount_user().await;
    harness
        .mount_timeline(json!([
            {"id": "200", "text": "reward pool open", "created_at": "2025-06-01T03:00:00.000Z"}
        ]))
        .await;
    harness.mount_hook(500).await;

    let outcome = harness.monitor(noon).run_cycle().await.unwrap();

    let CycleOutcome::Completed(report) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(report.matched, 1);
    assert_eq!(report.notified, 0);
    assert_eq!(report.notify_failures, 1);
    assert!(report.persisted);

    // A failed alert is not retried on later cycles.
    let dedup = harness.dedup();
    assert!(dedup.is_processed("200"));
    assert!(dedup.is_notified("200"));
}
