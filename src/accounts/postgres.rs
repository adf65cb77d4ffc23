use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{Account, AnswerCredit, CreditOutcome, XpHistoryEntry};
use super::store::AccountStore;

/// key: account-store-postgres -> row-locked counter updates
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn fetch(&self, account_id: Uuid) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn reset_daily_counters(
        &self,
        account_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts SET
                daily_questions_answered = CASE
                    WHEN last_quota_date IS DISTINCT FROM $2 THEN 0
                    ELSE daily_questions_answered
                END,
                daily_xp = CASE
                    WHEN last_quota_date IS DISTINCT FROM $2 THEN 0
                    ELSE daily_xp
                END,
                last_quota_date = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(today)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn record_answer(
        &self,
        account_id: Uuid,
        credit: &AnswerCredit,
        today: NaiveDate,
        daily_limit: i32,
    ) -> Result<Option<CreditOutcome>> {
        let mut tx = self.pool.begin().await?;

        let locked =
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_optional(&mut tx)
                .await?;
        let Some(mut account) = locked else {
            tx.rollback().await?;
            return Ok(None);
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO answer_credits (session_id, question_id, account_id, xp_delta)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id, question_id) DO NOTHING
            "#,
        )
        .bind(credit.session_id)
        .bind(credit.question_id)
        .bind(account_id)
        .bind(credit.xp_delta)
        .execute(&mut tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(Some(CreditOutcome::Duplicate(account)));
        }

        account.reset_if_stale(today);
        if account.daily_questions_answered >= daily_limit {
            tx.rollback().await?;
            return Ok(Some(CreditOutcome::LimitReached(account)));
        }
        account.apply_answer(credit.xp_delta, today);

        let updated = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts SET
                level = $2,
                total_xp = $3,
                daily_xp = $4,
                daily_questions_answered = $5,
                last_quota_date = $6,
                streak_days = $7,
                last_active_date = $8
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(account.level)
        .bind(account.total_xp)
        .bind(account.daily_xp)
        .bind(account.daily_questions_answered)
        .bind(account.last_quota_date)
        .bind(account.streak_days)
        .bind(account.last_active_date)
        .fetch_one(&mut tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO account_xp_history (account_id, day, xp)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id, day)
            DO UPDATE SET xp = account_xp_history.xp + EXCLUDED.xp
            "#,
        )
        .bind(account_id)
        .bind(today)
        .bind(credit.xp_delta)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(Some(CreditOutcome::Recorded(updated)))
    }

    async fn set_premium(
        &self,
        account_id: Uuid,
        premium_until: Option<DateTime<Utc>>,
    ) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "UPDATE accounts SET is_premium = $2, premium_expires_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(account_id)
        .bind(premium_until.is_some())
        .bind(premium_until)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn xp_history(&self, account_id: Uuid, since: NaiveDate) -> Result<Vec<XpHistoryEntry>> {
        let rows = sqlx::query_as::<_, XpHistoryEntry>(
            "SELECT day, xp FROM account_xp_history WHERE account_id = $1 AND day >= $2 ORDER BY day ASC",
        )
        .bind(account_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
