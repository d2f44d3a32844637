//! Credential pool management.
//!
//! A [`QuotaLedger`] counts requests per credential inside a sliding window;
//! a [`CredentialRotator`] picks credentials round-robin among those with
//! quota left and retries a request across the pool on credential-specific
//! failures.

mod ledger;
mod rotator;

pub use ledger::{
    AttemptOutcome, LastError, QuotaLedger, QuotaPolicy, QuotaRecord, DEFAULT_HEADROOM_PERCENT,
    DEFAULT_PROVIDER_CAP, WINDOW_SECS,
};
pub use rotator::{Clock, Credential, CredentialRotator, CredentialStatus, Exhausted};
