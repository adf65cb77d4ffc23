use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::accounts::{Account, InMemoryAccountStore};
use crate::quiz::{InMemoryQuestionBank, Question};

/// key: memory-seed -> accounts and questions for in-memory runs
///
/// Read from the JSON file named by `MEMORY_SEED_FILE`:
///
/// ```json
/// {
///   "accounts": [{ "id": "...", "email": "dev@example.com" }],
///   "questions": [{ "id": "...", "text": "...", "category": "general",
///                   "explanation": "...", "options": [{ "id": "...", "text": "...", "is_correct": true }] }]
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct MemorySeed {
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
pub struct SeedAccount {
    pub id: Uuid,
    pub email: String,
    /// Missing means the account is created at start-up and counts as new.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MemorySeed {
    pub fn from_json(raw: &str) -> Result<Self> {
        let seed: MemorySeed = serde_json::from_str(raw).context("invalid memory seed")?;
        if let Some(question) = seed
            .questions
            .iter()
            .find(|question| question.options.is_empty())
        {
            anyhow::bail!("seed question {} has no options", question.id);
        }
        Ok(seed)
    }

    pub fn load(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read memory seed from {path}"))?;
        Self::from_json(&raw)
    }

    pub fn into_stores(self, now: DateTime<Utc>) -> (InMemoryAccountStore, InMemoryQuestionBank) {
        let accounts = InMemoryAccountStore::new();
        for seeded in self.accounts {
            accounts.insert(Account::new(
                seeded.id,
                seeded.email,
                seeded.created_at.unwrap_or(now),
            ));
        }
        (accounts, InMemoryQuestionBank::new(self.questions))
    }
}
