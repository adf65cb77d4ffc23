use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::accounts::AccountStore;
use crate::clock::ClockSource;

use super::models::{BillingInterval, PaymentProvider, SubscriptionEvent, SubscriptionRecord};
use super::store::SubscriptionStore;

/// key: ledger-errors -> payment integrity failures, never silently premium
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("payment must be confirmed with the provider before activation")]
    VerificationRequired,
    #[error("{} could not confirm the payment: {reason}", .provider.as_str())]
    VerificationFailed {
        provider: PaymentProvider,
        reason: String,
    },
    #[error("payment verification with {} timed out", .0.as_str())]
    VerificationTimeout(PaymentProvider),
    #[error("{} could not start checkout: {reason}", .provider.as_str())]
    CheckoutUnavailable {
        provider: PaymentProvider,
        reason: String,
    },
    #[error("payment belongs to a different account")]
    AccountMismatch,
    #[error("payment reference was already applied to another account")]
    ReferenceConflict,
    #[error("no gateway configured for {}", .0.as_str())]
    UnsupportedProvider(PaymentProvider),
    #[error("account {0} not found")]
    AccountNotFound(Uuid),
    #[error("subscription store error: {0}")]
    Store(anyhow::Error),
}

/// End of the paid period after applying a payment verified at `verified_at`.
///
/// An active period is extended from its current end (or `now`, whichever is
/// later); otherwise a new period starts at the verification time.
pub fn next_period_end(
    existing: Option<&SubscriptionRecord>,
    interval: BillingInterval,
    verified_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match existing.filter(|record| record.is_active(now)) {
        Some(record) => record.current_period_end.max(now) + interval.period(),
        None => verified_at + interval.period(),
    }
}

/// key: subscription-ledger -> idempotent activation/renewal
pub struct SubscriptionLedger {
    store: Arc<dyn SubscriptionStore>,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn ClockSource>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SubscriptionLedger {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            store,
            accounts,
            clock,
            locks: DashMap::new(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn ClockSource> {
        &self.clock
    }

    /// Applies a payment event. Replaying a reference returns the stored record
    /// unchanged.
    pub async fn apply(&self, event: SubscriptionEvent) -> Result<SubscriptionRecord, LedgerError> {
        let account_id = event.account_id;
        let lock = self.lock_for(account_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_locked(event).await
        };
        self.release_lock(account_id, lock);
        result
    }

    async fn apply_locked(
        &self,
        event: SubscriptionEvent,
    ) -> Result<SubscriptionRecord, LedgerError> {
        let account_id = event.account_id;
        let existing = self.store.load(account_id).await.map_err(LedgerError::Store)?;
        if let Some(record) = existing
            .as_ref()
            .filter(|record| record.applied_references.contains(&event.provider_reference))
        {
            info!(
                %account_id,
                reference = %event.provider_reference,
                "payment reference already applied"
            );
            self.sync_account(record).await?;
            return Ok(record.clone());
        }

        match self
            .store
            .owner_of(&event.provider_reference)
            .await
            .map_err(LedgerError::Store)?
        {
            Some(owner) if owner != account_id => {
                warn!(
                    %account_id,
                    %owner,
                    reference = %event.provider_reference,
                    "payment reference claimed by another account"
                );
                return Err(LedgerError::ReferenceConflict);
            }
            _ => {}
        }

        let verified_at = event.verified_at.ok_or(LedgerError::VerificationRequired)?;
        if self
            .accounts
            .fetch(account_id)
            .await
            .map_err(LedgerError::Store)?
            .is_none()
        {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        let now = self.clock.now();
        let current_period_end = next_period_end(existing.as_ref(), event.interval, verified_at, now);
        let mut applied_references = existing
            .map(|record| record.applied_references)
            .unwrap_or_else(BTreeSet::new);
        applied_references.insert(event.provider_reference.clone());

        let record = SubscriptionRecord {
            account_id,
            is_premium: true,
            current_period_end,
            applied_references,
            last_provider: event.provider,
            currency: event.currency.clone(),
            interval: event.interval,
        };

        let claimed = self
            .store
            .commit(&record, &event.provider_reference)
            .await
            .map_err(LedgerError::Store)?;
        if !claimed {
            // Another process applied the same reference between load and commit.
            let current = self
                .store
                .load(account_id)
                .await
                .map_err(LedgerError::Store)?
                .ok_or(LedgerError::ReferenceConflict)?;
            self.sync_account(&current).await?;
            return Ok(current);
        }

        self.sync_account(&record).await?;
        info!(
            %account_id,
            provider = event.provider.as_str(),
            reference = %event.provider_reference,
            interval = event.interval.as_str(),
            currency = %event.currency,
            period_end = %record.current_period_end,
            "subscription activated"
        );
        Ok(record)
    }

    pub async fn record(&self, account_id: Uuid) -> Result<Option<SubscriptionRecord>, LedgerError> {
        self.store.load(account_id).await.map_err(LedgerError::Store)
    }

    /// Record a reference was applied to, if it was.
    pub async fn find_applied(
        &self,
        reference: &str,
    ) -> Result<Option<SubscriptionRecord>, LedgerError> {
        let Some(owner) = self
            .store
            .owner_of(reference)
            .await
            .map_err(LedgerError::Store)?
        else {
            return Ok(None);
        };
        self.record(owner).await
    }

    /// Clears premium on records whose period has ended. Returns the number of
    /// accounts downgraded.
    pub async fn expire_lapsed(&self, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let candidates = self.store.lapsed(now).await.map_err(LedgerError::Store)?;
        let mut expired = 0;
        for account_id in candidates {
            let lock = self.lock_for(account_id);
            let downgraded = {
                let _guard = lock.lock().await;
                self.expire_locked(account_id, now).await
            };
            self.release_lock(account_id, lock);
            if downgraded? {
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn expire_locked(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        let Some(mut record) = self.store.load(account_id).await.map_err(LedgerError::Store)? else {
            return Ok(false);
        };
        if !record.is_premium || record.is_active(now) {
            return Ok(false);
        }
        record.is_premium = false;
        self.store.save(&record).await.map_err(LedgerError::Store)?;
        self.accounts
            .set_premium(account_id, None)
            .await
            .map_err(LedgerError::Store)?;
        info!(%account_id, period_end = %record.current_period_end, "subscription expired");
        Ok(true)
    }

    /// Accounts with a ledger operation in flight.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, account_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(account_id).or_default().value().clone()
    }

    /// Drops the account's lock once no other caller holds or waits on it.
    fn release_lock(&self, account_id: Uuid, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(&account_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn sync_account(&self, record: &SubscriptionRecord) -> Result<(), LedgerError> {
        if !record.is_active(self.clock.now()) {
            return Ok(());
        }
        self.accounts
            .set_premium(record.account_id, Some(record.current_period_end))
            .await
            .map_err(LedgerError::Store)?
            .ok_or(LedgerError::AccountNotFound(record.account_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(end: DateTime<Utc>) -> SubscriptionRecord {
        SubscriptionRecord {
            account_id: Uuid::new_v4(),
            is_premium: true,
            current_period_end: end,
            applied_references: BTreeSet::new(),
            last_provider: PaymentProvider::CheckoutSession,
            currency: "cad".into(),
            interval: BillingInterval::Month,
        }
    }

    #[test]
    fn first_period_starts_at_verification() {
        let verified = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let end = next_period_end(None, BillingInterval::Month, verified, verified);
        assert_eq!(end, verified + Duration::days(30));
    }

    #[test]
    fn active_period_is_extended_from_its_end() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let existing = record(now + Duration::days(10));
        let end = next_period_end(Some(&existing), BillingInterval::Year, now, now);
        assert_eq!(end, now + Duration::days(10) + Duration::days(365));
    }

    #[test]
    fn lapsed_period_restarts_from_verification() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let existing = record(now - Duration::days(3));
        let end = next_period_end(Some(&existing), BillingInterval::Month, now, now);
        assert_eq!(end, now + Duration::days(30));
    }
}
