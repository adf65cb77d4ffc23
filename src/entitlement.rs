use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::accounts::Account;

/// Daily questions for premium subscribers and accounts inside the grace window.
pub const PREMIUM_DAILY_LIMIT: i32 = 5;
/// Daily questions for everyone else.
pub const FREE_DAILY_LIMIT: i32 = 1;
/// Length of the new-account grace window.
pub const NEW_ACCOUNT_GRACE_HOURS: i64 = 24;

/// Counter reset the caller must fold into its next atomic account update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyReset {
    pub date: NaiveDate,
}

/// key: entitlement-decision -> daily quota for one account at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub daily_limit: i32,
    pub is_new_account: bool,
    pub is_premium: bool,
    pub answered_today: i32,
    pub remaining: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<DailyReset>,
}

/// Expected, user-facing condition: the account has used today's questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("daily question limit of {daily_limit} reached")]
pub struct QuotaExhausted {
    pub daily_limit: i32,
}

impl QuotaDecision {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn ensure_available(&self) -> Result<(), QuotaExhausted> {
        if self.is_exhausted() {
            return Err(QuotaExhausted {
                daily_limit: self.daily_limit,
            });
        }
        Ok(())
    }
}

/// key: entitlement-policy -> fixed business rule, no per-call knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct EntitlementPolicy;

impl EntitlementPolicy {
    pub fn quota(&self, account: &Account, now: DateTime<Utc>, today: NaiveDate) -> QuotaDecision {
        let is_new_account = is_new_account(account.created_at, now);
        let is_premium = premium_active(account, now);
        let daily_limit = if is_premium || is_new_account {
            PREMIUM_DAILY_LIMIT
        } else {
            FREE_DAILY_LIMIT
        };

        let (answered_today, reset) = if account.last_quota_date == Some(today) {
            (account.daily_questions_answered, None)
        } else {
            (0, Some(DailyReset { date: today }))
        };

        QuotaDecision {
            daily_limit,
            is_new_account,
            is_premium,
            answered_today,
            remaining: (daily_limit - answered_today).max(0),
            reset,
        }
    }
}

/// A missing creation time counts as "just created".
pub fn is_new_account(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let created_at = created_at.unwrap_or(now);
    now.signed_duration_since(created_at) < Duration::hours(NEW_ACCOUNT_GRACE_HOURS)
}

pub fn premium_active(account: &Account, now: DateTime<Utc>) -> bool {
    account.is_premium
        && account
            .premium_expires_at
            .map(|expires_at| expires_at > now)
            .unwrap_or(true)
}
