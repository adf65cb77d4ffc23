pub mod api;
pub mod models;
pub mod runner;
pub mod session;
pub mod supply;

use thiserror::Error;
use uuid::Uuid;

use crate::entitlement::QuotaExhausted;

pub use models::{
    AnswerRecord, Question, QuestionOption, QuestionView, SessionStatus, SessionStepResult,
    SessionSummary, StartedSession, Termination, XP_PER_CORRECT_ANSWER,
};
pub use runner::{spawn_session_pruner, SessionRunner};
pub use session::{Grading, QuizSession};
pub use supply::{InMemoryQuestionBank, PgQuestionBank, QuestionSupply};

/// key: quiz-errors -> client desync vs. expected upsell vs. store failure
#[derive(Debug, Error)]
pub enum QuizError {
    #[error(transparent)]
    QuotaExhausted(#[from] QuotaExhausted),
    #[error("no questions available for this session")]
    EmptyQuestionSet,
    #[error("session is {0:?} and accepts no more answers")]
    InvalidState(SessionStatus),
    #[error("question {received} is not the current question {expected}")]
    QuestionMismatch { expected: Uuid, received: Uuid },
    #[error("option {0} does not belong to the current question")]
    InvalidOption(Uuid),
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("account {0} not found")]
    AccountNotFound(Uuid),
    #[error("account store error: {0}")]
    Store(anyhow::Error),
}
