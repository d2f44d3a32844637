//! Round-robin credential selection over the quota ledger.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::ledger::{AttemptOutcome, LastError, QuotaLedger};
use crate::error::{RemoteFailure, WatchError, WatchResult};

/// Source of the current time.
pub type Clock = fn() -> DateTime<Utc>;

/// An API bearer token and its position in the pool.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    token: String,
}

impl Credential {
    /// Position in the pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The secret itself.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Token with everything but the edges hidden, safe for logs.
    #[must_use]
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        if chars.len() > 14 {
            let head: String = chars[..10].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{head}...{tail}")
        } else {
            "*".repeat(chars.len())
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("token", &self.masked())
            .finish()
    }
}

/// No credential in the pool has quota left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no usable credential in pool")]
pub struct Exhausted;

/// Snapshot of one credential for status reports.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    /// Position in the pool.
    pub index: usize,
    /// Masked token.
    pub masked_token: String,
    /// Whether it would be selected now.
    pub usable: bool,
    /// Requests inside the current window.
    pub usage_count: usize,
    /// Window limit.
    pub limit: usize,
    /// Most recent failure.
    pub last_error: Option<LastError>,
}

/// Owns the credential pool, the rotation cursor and the quota ledger.
#[derive(Debug)]
pub struct CredentialRotator {
    pool: Vec<Credential>,
    cursor: usize,
    ledger: QuotaLedger,
    failed_writes: usize,
}

impl CredentialRotator {
    /// Build a rotator over `tokens` in the given order.
    pub fn new(tokens: Vec<String>, ledger: QuotaLedger) -> WatchResult<Self> {
        if tokens.is_empty() {
            return Err(WatchError::Config(
                "credential pool is empty".to_string(),
            ));
        }

        let pool = tokens
            .into_iter()
            .enumerate()
            .map(|(index, token)| Credential { index, token })
            .collect();

        Ok(Self {
            pool,
            cursor: 0,
            ledger,
            failed_writes: 0,
        })
    }

    /// Number of credentials in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Whether the pool is empty (never true for a constructed rotator).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// The underlying ledger.
    #[must_use]
    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Pick the next credential with quota left, starting at the cursor and
    /// wrapping around once.
    ///
    /// The cursor moves past the chosen credential, so consecutive calls with
    /// every credential usable visit the whole pool before repeating.
    pub fn next_usable(&mut self, now: DateTime<Utc>) -> Result<Credential, Exhausted> {
        self.next_usable_except(now, &[])
    }

    fn next_usable_except(
        &mut self,
        now: DateTime<Utc>,
        skip: &[usize],
    ) -> Result<Credential, Exhausted> {
        let len = self.pool.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            if skip.contains(&index) || !self.ledger.usable(index, now) {
                continue;
            }
            self.cursor = (index + 1) % len;
            if offset > 0 {
                tracing::info!(credential = index, pool = len, "Switched credential");
            }
            return Ok(self.pool[index].clone());
        }

        tracing::warn!(pool = len, "All credentials are over quota");
        Err(Exhausted)
    }

    /// Record a completed attempt and persist the ledger.
    ///
    /// The in-memory ledger stays authoritative when the flush fails; the
    /// failure is returned and counted in [`Self::failed_writes`].
    pub fn record(
        &mut self,
        credential: &Credential,
        now: DateTime<Utc>,
        outcome: AttemptOutcome,
    ) -> WatchResult<()> {
        self.ledger.record_attempt(credential.index, now, outcome);
        let result = self.ledger.flush();
        if let Err(e) = &result {
            tracing::error!(credential = credential.index, error = %e, "Failed to persist quota ledger");
            self.failed_writes += 1;
        }
        result
    }

    /// Ledger writes that failed since the counter was last taken.
    #[must_use]
    pub fn failed_writes(&self) -> usize {
        self.failed_writes
    }

    /// Return the failed-write count and reset it.
    pub fn take_failed_writes(&mut self) -> usize {
        std::mem::take(&mut self.failed_writes)
    }

    /// Run one logical request, rotating to the next credential on
    /// credential-specific failures.
    ///
    /// At most one attempt per credential in the pool is made. Transient and
    /// malformed failures end the request immediately.
    pub async fn execute<T, F, Fut>(&mut self, clock: Clock, label: &str, mut request: F) -> WatchResult<T>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T, RemoteFailure>>,
    {
        let max_attempts = self.pool.len();
        let mut rejected: Vec<usize> = Vec::with_capacity(max_attempts);

        for attempt in 1..=max_attempts {
            let Ok(credential) = self.next_usable_except(clock(), &rejected) else {
                return Err(WatchError::CredentialsExhausted {
                    attempted: attempt - 1,
                });
            };

            tracing::debug!(request = label, credential = credential.index, attempt, "Sending request");

            match request(credential.clone()).await {
                Ok(value) => {
                    // Write failures are counted in `failed_writes`.
                    let _ = self.record(&credential, clock(), AttemptOutcome::Success);
                    return Ok(value);
                }
                Err(failure) if failure.rotates() => {
                    tracing::warn!(
                        request = label,
                        credential = credential.index,
                        attempt,
                        error = %failure,
                        "Credential rejected, rotating"
                    );
                    let _ = self.record(&credential, clock(), AttemptOutcome::Failed(failure.kind()));
                    rejected.push(credential.index);
                }
                Err(failure) => {
                    tracing::error!(
                        request = label,
                        credential = credential.index,
                        error = %failure,
                        "Request failed"
                    );
                    let _ = self.record(&credential, clock(), AttemptOutcome::Failed(failure.kind()));
                    return Err(failure.into());
                }
            }
        }

        Err(WatchError::CredentialsExhausted {
            attempted: max_attempts,
        })
    }

    /// Per-credential usage snapshot.
    pub fn status(&mut self, now: DateTime<Utc>) -> Vec<CredentialStatus> {
        let limit = self.ledger.policy().limit;
        let mut report = Vec::with_capacity(self.pool.len());
        for credential in &self.pool {
            let usage_count = self.ledger.usage_count(credential.index, now);
            report.push(CredentialStatus {
                index: credential.index,
                masked_token: credential.masked(),
                usable: usage_count < limit,
                usage_count,
                limit,
                last_error: self.ledger.record(credential.index).and_then(|r| r.last_error.clone()),
            });
        }
        report
    }

    /// Persist the ledger.
    pub fn flush(&self) -> WatchResult<()> {
        self.ledger.flush()
    }
}
