//! Per-account minimum-interval throttle.
//!
//! Pure with respect to its inputs apart from reading the wall clock; the
//! account's throttle state lives on the account record itself and is only
//! advanced by the engine after a confirmed successful send.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use waveline_core::types::Account;

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleVerdict {
    pub can_send: bool,
    /// Whole seconds to wait before the account may send, rounded up so the
    /// caller never wakes before the interval has actually elapsed.
    pub wait_secs: u64,
}

impl ThrottleVerdict {
    fn allow() -> Self {
        Self {
            can_send: true,
            wait_secs: 0,
        }
    }

    fn wait(wait_secs: u64) -> Self {
        Self {
            can_send: false,
            wait_secs,
        }
    }
}

/// Check an account against its minimum send interval.
pub fn check(account: &Account) -> ThrottleVerdict {
    check_at(account, Utc::now())
}

fn check_at(account: &Account, now: DateTime<Utc>) -> ThrottleVerdict {
    let raw = match account.last_sent.as_deref() {
        Some(raw) => raw,
        None => return ThrottleVerdict::allow(),
    };

    let last_sent = match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(error) => {
            // Fail open: a timestamp we cannot read counts as no history.
            warn!(
                account_id = account.id,
                last_sent = raw,
                %error,
                "Unreadable last_sent timestamp, allowing send"
            );
            return ThrottleVerdict::allow();
        }
    };

    let delay = Duration::seconds(i64::from(account.delay_secs));
    let elapsed = now.signed_duration_since(last_sent);
    if elapsed >= delay {
        return ThrottleVerdict::allow();
    }

    let remaining = delay - elapsed;
    let mut wait_secs = remaining.num_seconds();
    if Duration::seconds(wait_secs) < remaining {
        wait_secs += 1;
    }
    ThrottleVerdict::wait(wait_secs.max(1) as u64)
}
