use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::models::{Account, AnswerCredit, CreditOutcome, XpHistoryEntry};

/// key: account-store -> atomic counter/xp mutations
///
/// Every mutating method is a single atomic unit per account. `None` means the
/// account does not exist.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn fetch(&self, account_id: Uuid) -> Result<Option<Account>>;

    /// Zeroes the daily counters when `last_quota_date != today` and returns the
    /// account as it stands after the (possibly no-op) reset, in one step.
    async fn reset_daily_counters(
        &self,
        account_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<Account>>;

    /// The account as quota decisions see it: the lazy reset and the read are
    /// one step.
    async fn quota_snapshot(&self, account_id: Uuid, today: NaiveDate) -> Result<Option<Account>> {
        self.reset_daily_counters(account_id, today).await
    }

    /// Credits XP and increments the answered count together, after the lazy
    /// reset, only while `daily_questions_answered < daily_limit`. A credit key
    /// that was already applied is reported as a duplicate and changes nothing.
    async fn record_answer(
        &self,
        account_id: Uuid,
        credit: &AnswerCredit,
        today: NaiveDate,
        daily_limit: i32,
    ) -> Result<Option<CreditOutcome>>;

    /// `Some(until)` marks the account premium until that instant, `None` clears it.
    async fn set_premium(
        &self,
        account_id: Uuid,
        premium_until: Option<DateTime<Utc>>,
    ) -> Result<Option<Account>>;

    async fn xp_history(&self, account_id: Uuid, since: NaiveDate) -> Result<Vec<XpHistoryEntry>>;
}

#[derive(Debug, Default)]
struct AccountEntry {
    account: Option<Account>,
    credits: HashSet<(Uuid, Uuid)>,
    history: BTreeMap<NaiveDate, i64>,
}

/// In-process store. The DashMap entry lock is the isolation boundary for every
/// mutation on one account.
#[derive(Clone, Default)]
pub struct InMemoryAccountStore {
    accounts: Arc<DashMap<Uuid, AccountEntry>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: Account) {
        let mut entry = self.accounts.entry(account.id).or_default();
        entry.account = Some(account);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn fetch(&self, account_id: Uuid) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .get(&account_id)
            .and_then(|entry| entry.account.clone()))
    }

    async fn reset_daily_counters(
        &self,
        account_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<Account>> {
        let Some(mut guard) = self.accounts.get_mut(&account_id) else {
            return Ok(None);
        };
        let Some(account) = guard.value_mut().account.as_mut() else {
            return Ok(None);
        };
        account.reset_if_stale(today);
        Ok(Some(account.clone()))
    }

    async fn record_answer(
        &self,
        account_id: Uuid,
        credit: &AnswerCredit,
        today: NaiveDate,
        daily_limit: i32,
    ) -> Result<Option<CreditOutcome>> {
        let Some(mut guard) = self.accounts.get_mut(&account_id) else {
            return Ok(None);
        };
        let entry = guard.value_mut();
        let Some(account) = entry.account.as_mut() else {
            return Ok(None);
        };

        let key = (credit.session_id, credit.question_id);
        if entry.credits.contains(&key) {
            return Ok(Some(CreditOutcome::Duplicate(account.clone())));
        }

        account.reset_if_stale(today);
        if account.daily_questions_answered >= daily_limit {
            return Ok(Some(CreditOutcome::LimitReached(account.clone())));
        }

        account.apply_answer(credit.xp_delta, today);
        entry.credits.insert(key);
        *entry.history.entry(today).or_insert(0) += credit.xp_delta;
        Ok(Some(CreditOutcome::Recorded(account.clone())))
    }

    async fn set_premium(
        &self,
        account_id: Uuid,
        premium_until: Option<DateTime<Utc>>,
    ) -> Result<Option<Account>> {
        let Some(mut guard) = self.accounts.get_mut(&account_id) else {
            return Ok(None);
        };
        let Some(account) = guard.value_mut().account.as_mut() else {
            return Ok(None);
        };
        account.is_premium = premium_until.is_some();
        account.premium_expires_at = premium_until;
        Ok(Some(account.clone()))
    }

    async fn xp_history(&self, account_id: Uuid, since: NaiveDate) -> Result<Vec<XpHistoryEntry>> {
        Ok(self
            .accounts
            .get(&account_id)
            .map(|entry| {
                entry
                    .history
                    .range(since..)
                    .map(|(day, xp)| XpHistoryEntry { day: *day, xp: *xp })
                    .collect()
            })
            .unwrap_or_default())
    }
}
