use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::models::{BillingInterval, PaymentProvider, SubscriptionRecord};

/// key: subscription-store -> ledger persistence with claim-once references
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn load(&self, account_id: Uuid) -> Result<Option<SubscriptionRecord>>;

    /// Account a reference was applied to, if any.
    async fn owner_of(&self, reference: &str) -> Result<Option<Uuid>>;

    /// Claims `reference` and writes `record` in one step. Returns `false`, having
    /// written nothing, when the reference was claimed before.
    async fn commit(&self, record: &SubscriptionRecord, reference: &str) -> Result<bool>;

    /// Overwrites a record without claiming a reference (expiry).
    async fn save(&self, record: &SubscriptionRecord) -> Result<()>;

    /// Accounts still flagged premium whose period ended before `now`.
    async fn lapsed(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

#[derive(Clone, Default)]
pub struct InMemorySubscriptionStore {
    records: Arc<DashMap<Uuid, SubscriptionRecord>>,
    references: Arc<DashMap<String, Uuid>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn load(&self, account_id: Uuid) -> Result<Option<SubscriptionRecord>> {
        Ok(self.records.get(&account_id).map(|record| record.clone()))
    }

    async fn owner_of(&self, reference: &str) -> Result<Option<Uuid>> {
        Ok(self.references.get(reference).map(|owner| *owner))
    }

    async fn commit(&self, record: &SubscriptionRecord, reference: &str) -> Result<bool> {
        match self.references.entry(reference.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(record.account_id);
                self.records.insert(record.account_id, record.clone());
                Ok(true)
            }
        }
    }

    async fn save(&self, record: &SubscriptionRecord) -> Result<()> {
        self.records.insert(record.account_id, record.clone());
        Ok(())
    }

    async fn lapsed(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(self
            .records
            .iter()
            .filter(|record| record.is_premium && record.current_period_end <= now)
            .map(|record| record.account_id)
            .collect())
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    account_id: Uuid,
    is_premium: bool,
    current_period_end: DateTime<Utc>,
    last_provider: String,
    currency: String,
    billing_interval: String,
}

/// key: subscription-store-postgres -> unique reference rows as the claim
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_record(row: SubscriptionRow, references: Vec<String>) -> Result<SubscriptionRecord> {
    Ok(SubscriptionRecord {
        account_id: row.account_id,
        is_premium: row.is_premium,
        current_period_end: row.current_period_end,
        applied_references: references.into_iter().collect::<BTreeSet<_>>(),
        last_provider: PaymentProvider::parse(&row.last_provider)
            .ok_or_else(|| anyhow!("unknown payment provider `{}`", row.last_provider))?,
        currency: row.currency,
        interval: BillingInterval::parse(&row.billing_interval)
            .ok_or_else(|| anyhow!("unknown billing interval `{}`", row.billing_interval))?,
    })
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn load(&self, account_id: Uuid) -> Result<Option<SubscriptionRecord>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT account_id, is_premium, current_period_end, last_provider, currency, billing_interval
            FROM subscriptions
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let references: Vec<String> = sqlx::query_scalar(
            "SELECT reference FROM subscription_references WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        into_record(row, references).map(Some)
    }

    async fn owner_of(&self, reference: &str) -> Result<Option<Uuid>> {
        let owner = sqlx::query_scalar(
            "SELECT account_id FROM subscription_references WHERE reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(owner)
    }

    async fn commit(&self, record: &SubscriptionRecord, reference: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query(
            r#"
            INSERT INTO subscription_references (reference, account_id, provider)
            VALUES ($1, $2, $3)
            ON CONFLICT (reference) DO NOTHING
            "#,
        )
        .bind(reference)
        .bind(record.account_id)
        .bind(record.last_provider.as_str())
        .execute(&mut tx)
        .await?
        .rows_affected();
        if claimed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        upsert(&mut tx, record).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn save(&self, record: &SubscriptionRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn lapsed(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let accounts = sqlx::query_scalar(
            "SELECT account_id FROM subscriptions WHERE is_premium = TRUE AND current_period_end <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }
}

async fn upsert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record: &SubscriptionRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO subscriptions (
            account_id,
            is_premium,
            current_period_end,
            last_provider,
            currency,
            billing_interval
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (account_id)
        DO UPDATE SET
            is_premium = EXCLUDED.is_premium,
            current_period_end = EXCLUDED.current_period_end,
            last_provider = EXCLUDED.last_provider,
            currency = EXCLUDED.currency,
            billing_interval = EXCLUDED.billing_interval,
            updated_at = NOW()
        "#,
    )
    .bind(record.account_id)
    .bind(record.is_premium)
    .bind(record.current_period_end)
    .bind(record.last_provider.as_str())
    .bind(&record.currency)
    .bind(record.interval.as_str())
    .execute(&mut *tx)
    .await?;
    Ok(())
}
