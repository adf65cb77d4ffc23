use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// XP for a correct answer. Wrong answers earn nothing and cost nothing.
pub const XP_PER_CORRECT_ANSWER: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: Uuid,
    pub text: String,
    pub is_correct: bool,
}

/// key: question-model -> bank item served in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub category: String,
    pub options: Vec<QuestionOption>,
    pub explanation: String,
}

impl Question {
    pub fn correct_option_count(&self) -> usize {
        self.options.iter().filter(|option| option.is_correct).count()
    }

    /// The single correct option, or `None` when the bank data is broken.
    pub fn correct_option(&self) -> Option<&QuestionOption> {
        let mut correct = self.options.iter().filter(|option| option.is_correct);
        match (correct.next(), correct.next()) {
            (Some(option), None) => Some(option),
            _ => None,
        }
    }

    pub fn option(&self, option_id: Uuid) -> Option<&QuestionOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    pub fn view(&self) -> QuestionView {
        QuestionView {
            id: self.id,
            text: self.text.clone(),
            category: self.category.clone(),
            options: self
                .options
                .iter()
                .map(|option| OptionView {
                    id: option.id,
                    text: option.text.clone(),
                })
                .collect(),
        }
    }
}

/// Client-facing question without the answer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: Uuid,
    pub text: String,
    pub category: String,
    pub options: Vec<OptionView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionView {
    pub id: Uuid,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: Uuid,
    pub chosen_option_id: Uuid,
    pub correct: bool,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    CompletedNaturally,
    CompletedByLimit,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::CompletedNaturally => "completed_naturally",
            SessionStatus::CompletedByLimit => "completed_by_limit",
        }
    }
}

/// How (and whether) the step that produced a result ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Continues,
    Natural,
    Limit,
}

/// key: session-step -> what the caller needs to render next question or upsell
#[derive(Debug, Clone, Serialize)]
pub struct SessionStepResult {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub correct: bool,
    pub correct_option_id: Option<Uuid>,
    pub explanation: String,
    pub score: u32,
    pub xp_awarded: i64,
    pub answered: usize,
    pub remaining_today: i32,
    pub termination: Termination,
    pub upsell: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_question: Option<QuestionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub account_id: Uuid,
    pub status: SessionStatus,
    pub score: u32,
    pub answered: usize,
    pub total_questions: usize,
    pub percentage: u32,
    pub xp_earned: i64,
    pub upsell: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Session handed to the client when a challenge starts.
#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    pub session_id: Uuid,
    pub remaining_today: i32,
    pub daily_limit: i32,
    pub questions: Vec<QuestionView>,
}
