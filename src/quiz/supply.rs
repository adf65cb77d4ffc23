use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::models::{Question, QuestionOption};

/// key: question-supply -> bank collaborator
#[async_trait]
pub trait QuestionSupply: Send + Sync {
    /// Returns at most `limit` questions for today's challenge.
    async fn fetch_daily_questions(&self, account_id: Uuid, limit: usize) -> Result<Vec<Question>>;

    /// Reports a question whose options do not carry exactly one correct answer.
    /// Repeat reports for the same question collapse into one flag.
    async fn flag_integrity_fault(&self, question_id: Uuid, correct_options: usize) -> Result<()>;
}

/// Bank held in memory. Each account walks the bank in order so consecutive
/// challenges do not repeat until the bank wraps.
#[derive(Clone, Default)]
pub struct InMemoryQuestionBank {
    questions: Arc<Vec<Question>>,
    cursors: Arc<DashMap<Uuid, usize>>,
    flags: Arc<DashMap<Uuid, usize>>,
}

impl InMemoryQuestionBank {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions: Arc::new(questions),
            cursors: Arc::new(DashMap::new()),
            flags: Arc::new(DashMap::new()),
        }
    }

    pub fn flagged(&self) -> HashMap<Uuid, usize> {
        self.flags
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }
}

#[async_trait]
impl QuestionSupply for InMemoryQuestionBank {
    async fn fetch_daily_questions(&self, account_id: Uuid, limit: usize) -> Result<Vec<Question>> {
        let total = self.questions.len();
        if total == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let take = limit.min(total);
        let mut cursor = self.cursors.entry(account_id).or_insert(0);
        let start = *cursor % total;
        let picked = (0..take)
            .map(|offset| self.questions[(start + offset) % total].clone())
            .collect();
        *cursor = (start + take) % total;
        Ok(picked)
    }

    async fn flag_integrity_fault(&self, question_id: Uuid, correct_options: usize) -> Result<()> {
        self.flags.insert(question_id, correct_options);
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct QuestionRow {
    id: Uuid,
    text: String,
    category: String,
    explanation: String,
}

#[derive(Debug, FromRow)]
struct OptionRow {
    id: Uuid,
    question_id: Uuid,
    text: String,
    is_correct: bool,
}

/// key: question-supply-postgres -> random active questions
#[derive(Clone)]
pub struct PgQuestionBank {
    pool: PgPool,
}

impl PgQuestionBank {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionSupply for PgQuestionBank {
    async fn fetch_daily_questions(&self, _account_id: Uuid, limit: usize) -> Result<Vec<Question>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, text, category, explanation
            FROM questions
            WHERE active = TRUE
            ORDER BY random()
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let options = sqlx::query_as::<_, OptionRow>(
            r#"
            SELECT id, question_id, text, is_correct
            FROM question_options
            WHERE question_id = ANY($1)
            ORDER BY question_id, position ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<QuestionOption>> = HashMap::new();
        for option in options {
            grouped
                .entry(option.question_id)
                .or_default()
                .push(QuestionOption {
                    id: option.id,
                    text: option.text,
                    is_correct: option.is_correct,
                });
        }

        Ok(rows
            .into_iter()
            .map(|row| Question {
                options: grouped.remove(&row.id).unwrap_or_default(),
                id: row.id,
                text: row.text,
                category: row.category,
                explanation: row.explanation,
            })
            .collect())
    }

    async fn flag_integrity_fault(&self, question_id: Uuid, correct_options: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO question_integrity_flags (question_id, correct_options)
            VALUES ($1, $2)
            ON CONFLICT (question_id) DO UPDATE
            SET correct_options = EXCLUDED.correct_options,
                reports = question_integrity_flags.reports + 1,
                flagged_at = NOW()
            "#,
        )
        .bind(question_id)
        .bind(i32::try_from(correct_options).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
