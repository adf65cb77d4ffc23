use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use quizline::accounts::{Account, AccountStore, InMemoryAccountStore};
use quizline::billing::{
    run_subscription_expiry_tick, BillingInterval, InMemorySubscriptionStore, LedgerError,
    PaymentProvider, SubscriptionEvent, SubscriptionLedger,
};
use quizline::clock::{ClockSource, ManualClock};
use quizline::quiz::{InMemoryQuestionBank, SessionRunner};
use uuid::Uuid;

// key: subscription-ledger-tests -> idempotent activation, renewal, expiry

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

struct Harness {
    accounts: InMemoryAccountStore,
    clock: Arc<ManualClock>,
    ledger: Arc<SubscriptionLedger>,
}

fn harness() -> Harness {
    let accounts = InMemoryAccountStore::new();
    let clock = Arc::new(ManualClock::new(now()));
    let ledger = Arc::new(SubscriptionLedger::new(
        Arc::new(InMemorySubscriptionStore::new()),
        Arc::new(accounts.clone()),
        clock.clone(),
    ));
    Harness {
        accounts,
        clock,
        ledger,
    }
}

fn account(h: &Harness) -> Uuid {
    let id = Uuid::new_v4();
    h.accounts.insert(Account::new(
        id,
        format!("{id}@example.com"),
        now() - Duration::days(90),
    ));
    id
}

fn verified(account_id: Uuid, reference: &str, interval: BillingInterval, at: DateTime<Utc>) -> SubscriptionEvent {
    SubscriptionEvent {
        provider: PaymentProvider::ReferenceVerified,
        provider_reference: reference.to_string(),
        account_id,
        currency: "ngn".to_string(),
        interval,
        verified_at: Some(at),
    }
}

#[tokio::test]
async fn replayed_reference_leaves_record_unchanged() {
    let h = harness();
    let account_id = account(&h);
    let event = verified(account_id, "qz_ref_1", BillingInterval::Month, now());

    let first = h.ledger.apply(event.clone()).await.unwrap();
    h.clock.advance(Duration::hours(3));
    let second = h.ledger.apply(event).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.current_period_end, now() + Duration::days(30));
    assert_eq!(first.applied_references.len(), 1);

    let account = h.accounts.fetch(account_id).await.unwrap().unwrap();
    assert!(account.is_premium);
    assert_eq!(account.premium_expires_at, Some(now() + Duration::days(30)));
}

#[tokio::test]
async fn unverified_event_is_refused() {
    let h = harness();
    let account_id = account(&h);
    let mut event = verified(account_id, "qz_ref_2", BillingInterval::Year, now());
    event.verified_at = None;

    let result = h.ledger.apply(event).await;
    assert!(matches!(result, Err(LedgerError::VerificationRequired)));
    assert!(h.ledger.record(account_id).await.unwrap().is_none());
    let account = h.accounts.fetch(account_id).await.unwrap().unwrap();
    assert!(!account.is_premium);
}

#[tokio::test]
async fn yearly_renewal_extends_from_current_end() {
    let h = harness();
    let account_id = account(&h);

    h.clock.set(now() - Duration::days(20));
    h.ledger
        .apply(verified(
            account_id,
            "qz_month",
            BillingInterval::Month,
            now() - Duration::days(20),
        ))
        .await
        .unwrap();

    h.clock.set(now());
    let renewed = h
        .ledger
        .apply(verified(account_id, "qz_year", BillingInterval::Year, now()))
        .await
        .unwrap();

    assert_eq!(
        renewed.current_period_end,
        now() + Duration::days(10) + Duration::days(365)
    );
    assert_eq!(renewed.interval, BillingInterval::Year);
    assert_eq!(renewed.applied_references.len(), 2);
}

#[tokio::test]
async fn lapsed_subscription_restarts_at_verification() {
    let h = harness();
    let account_id = account(&h);

    h.clock.set(now() - Duration::days(40));
    h.ledger
        .apply(verified(
            account_id,
            "qz_old",
            BillingInterval::Month,
            now() - Duration::days(40),
        ))
        .await
        .unwrap();

    h.clock.set(now());
    let record = h
        .ledger
        .apply(verified(account_id, "qz_new", BillingInterval::Month, now()))
        .await
        .unwrap();
    assert_eq!(record.current_period_end, now() + Duration::days(30));
    assert!(record.is_active(now()));
}

#[tokio::test]
async fn concurrent_deliveries_apply_once() {
    let h = harness();
    let account_id = account(&h);
    let event = verified(account_id, "qz_race", BillingInterval::Month, now());

    let (a, b) = tokio::join!(h.ledger.apply(event.clone()), h.ledger.apply(event.clone()));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a, b);
    assert_eq!(a.current_period_end, now() + Duration::days(30));
    assert_eq!(a.applied_references.len(), 1);
}

#[tokio::test]
async fn account_locks_are_released_after_use() {
    let h = harness();
    let accounts: Vec<Uuid> = (0..4).map(|_| account(&h)).collect();
    h.clock.set(now() - Duration::days(40));
    for (index, account_id) in accounts.iter().enumerate() {
        let event = verified(
            *account_id,
            &format!("qz_lock_{index}"),
            BillingInterval::Month,
            now() - Duration::days(40),
        );
        let (a, b) = tokio::join!(h.ledger.apply(event.clone()), h.ledger.apply(event));
        assert_eq!(a.unwrap(), b.unwrap());
    }
    let refused = h
        .ledger
        .apply(verified(Uuid::new_v4(), "qz_lock_ghost", BillingInterval::Month, now()))
        .await;
    assert!(refused.is_err());
    assert_eq!(h.ledger.tracked_locks(), 0);

    h.clock.set(now());
    let expired = run_subscription_expiry_tick(&h.ledger, now()).await.unwrap();
    assert_eq!(expired, 4);
    assert_eq!(h.ledger.tracked_locks(), 0);
}

#[tokio::test]
async fn reference_cannot_move_between_accounts() {
    let h = harness();
    let owner = account(&h);
    let other = account(&h);
    h.ledger
        .apply(verified(owner, "qz_shared", BillingInterval::Month, now()))
        .await
        .unwrap();

    let result = h
        .ledger
        .apply(verified(other, "qz_shared", BillingInterval::Month, now()))
        .await;
    assert!(matches!(result, Err(LedgerError::ReferenceConflict)));
    assert!(h.ledger.record(other).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_account_is_not_activated() {
    let h = harness();
    let result = h
        .ledger
        .apply(verified(Uuid::new_v4(), "qz_ghost", BillingInterval::Month, now()))
        .await;
    assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
    assert!(h.ledger.find_applied("qz_ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn expiry_tick_downgrades_lapsed_accounts() {
    let h = harness();
    let lapsed = account(&h);
    let current = account(&h);

    h.clock.set(now() - Duration::days(40));
    h.ledger
        .apply(verified(
            lapsed,
            "qz_lapsed",
            BillingInterval::Month,
            now() - Duration::days(40),
        ))
        .await
        .unwrap();
    h.clock.set(now());
    h.ledger
        .apply(verified(current, "qz_current", BillingInterval::Year, now()))
        .await
        .unwrap();

    let expired = run_subscription_expiry_tick(&h.ledger, now()).await.unwrap();
    assert_eq!(expired, 1);

    let record = h.ledger.record(lapsed).await.unwrap().unwrap();
    assert!(!record.is_premium);
    let account = h.accounts.fetch(lapsed).await.unwrap().unwrap();
    assert!(!account.is_premium);
    assert_eq!(account.premium_expires_at, None);
    assert!(h.accounts.fetch(current).await.unwrap().unwrap().is_premium);

    assert_eq!(run_subscription_expiry_tick(&h.ledger, now()).await.unwrap(), 0);
}

#[tokio::test]
async fn activation_lifts_daily_limit() {
    let h = harness();
    let account_id = account(&h);
    let runner = SessionRunner::new(
        Arc::new(h.accounts.clone()),
        Arc::new(InMemoryQuestionBank::new(Vec::new())),
        h.clock.clone(),
    );
    assert_eq!(runner.quota(account_id).await.unwrap().daily_limit, 1);

    h.ledger
        .apply(verified(account_id, "qz_upgrade", BillingInterval::Month, h.clock.now()))
        .await
        .unwrap();

    let decision = runner.quota(account_id).await.unwrap();
    assert!(decision.is_premium);
    assert_eq!(decision.daily_limit, 5);
}
