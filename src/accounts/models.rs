use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// XP needed to climb one level.
pub const XP_PER_LEVEL: i64 = 100;

/// key: account-model -> identity-owned account state used by quota decisions
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub created_at: Option<DateTime<Utc>>,
    pub is_premium: bool,
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub level: i32,
    pub total_xp: i64,
    pub daily_xp: i64,
    pub daily_questions_answered: i32,
    pub last_quota_date: Option<NaiveDate>,
    pub streak_days: i32,
    pub last_active_date: Option<NaiveDate>,
}

impl Account {
    /// A fresh account as the identity service would hand it over.
    pub fn new(id: Uuid, email: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            email: email.into(),
            created_at: Some(created_at),
            is_premium: false,
            premium_expires_at: None,
            level: 1,
            total_xp: 0,
            daily_xp: 0,
            daily_questions_answered: 0,
            last_quota_date: None,
            streak_days: 0,
            last_active_date: None,
        }
    }

    /// Zeroes the daily counters when they belong to another day. Returns whether
    /// anything changed.
    pub fn reset_if_stale(&mut self, today: NaiveDate) -> bool {
        if self.last_quota_date == Some(today) {
            return false;
        }
        self.daily_questions_answered = 0;
        self.daily_xp = 0;
        self.last_quota_date = Some(today);
        true
    }

    /// Applies one answered question. Callers must hold exclusive access to the
    /// account and have already applied [`Account::reset_if_stale`].
    pub fn apply_answer(&mut self, xp_delta: i64, today: NaiveDate) {
        self.daily_questions_answered += 1;
        self.daily_xp += xp_delta;
        self.total_xp += xp_delta;
        self.level = level_for_xp(self.total_xp);
        self.streak_days = next_streak(self.streak_days, self.last_active_date, today);
        self.last_active_date = Some(today);
    }
}

pub fn level_for_xp(total_xp: i64) -> i32 {
    let level = total_xp.max(0) / XP_PER_LEVEL + 1;
    i32::try_from(level).unwrap_or(i32::MAX)
}

/// Streak after activity on `today` given the previous active day.
pub fn next_streak(current: i32, last_active: Option<NaiveDate>, today: NaiveDate) -> i32 {
    match last_active {
        Some(day) if day == today => current.max(1),
        Some(day) if day.succ_opt() == Some(today) => current + 1,
        _ => 1,
    }
}

/// Idempotency key plus payload for one answered question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnswerCredit {
    pub session_id: Uuid,
    pub question_id: Uuid,
    pub xp_delta: i64,
}

/// Outcome of the atomic answer credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// XP and the answered count were applied together.
    Recorded(Account),
    /// The same credit key was applied earlier; nothing changed.
    Duplicate(Account),
    /// The daily limit was already used up; nothing changed.
    LimitReached(Account),
}

impl CreditOutcome {
    pub fn account(&self) -> &Account {
        match self {
            CreditOutcome::Recorded(account)
            | CreditOutcome::Duplicate(account)
            | CreditOutcome::LimitReached(account) => account,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct XpHistoryEntry {
    pub day: NaiveDate,
    pub xp: i64,
}

/// key: progress-view -> dashboard/progress payload
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub account_id: Uuid,
    pub level: i32,
    pub total_xp: i64,
    pub daily_xp: i64,
    pub daily_questions_answered: i32,
    pub streak_days: i32,
    pub is_premium: bool,
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub xp_history: Vec<XpHistoryEntry>,
}

/// Fills gaps so the history always covers `days` consecutive days ending today.
pub fn fill_history(entries: &[XpHistoryEntry], today: NaiveDate, days: u32) -> Vec<XpHistoryEntry> {
    (0..days)
        .rev()
        .filter_map(|back| today.checked_sub_days(chrono::Days::new(u64::from(back))))
        .map(|day| XpHistoryEntry {
            day,
            xp: entries
                .iter()
                .find(|entry| entry.day == day)
                .map(|entry| entry.xp)
                .unwrap_or(0),
        })
        .collect()
}
