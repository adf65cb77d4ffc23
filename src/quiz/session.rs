use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::{
    AnswerRecord, Question, SessionStatus, SessionSummary, Termination, XP_PER_CORRECT_ANSWER,
};
use super::QuizError;

/// Result of validating a submitted option against the current question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grading {
    pub question_id: Uuid,
    pub option_id: Uuid,
    pub correct: bool,
    pub correct_option_id: Option<Uuid>,
    /// Set when the question does not have exactly one correct option.
    pub integrity_fault: Option<usize>,
}

impl Grading {
    pub fn xp_delta(&self) -> i64 {
        if self.correct {
            XP_PER_CORRECT_ANSWER
        } else {
            0
        }
    }
}

/// key: quiz-session -> one attempt, questions fixed at creation
#[derive(Debug, Clone)]
pub struct QuizSession {
    id: Uuid,
    account_id: Uuid,
    questions: Vec<Question>,
    current_index: usize,
    answers: Vec<AnswerRecord>,
    score: u32,
    status: SessionStatus,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl QuizSession {
    pub fn new(
        account_id: Uuid,
        questions: Vec<Question>,
        started_at: DateTime<Utc>,
    ) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::EmptyQuestionSet);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            account_id,
            questions,
            current_index: 0,
            answers: Vec::new(),
            score: 0,
            status: SessionStatus::InProgress,
            started_at,
            finished_at: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn answers(&self) -> &[AnswerRecord] {
        &self.answers
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn current_question(&self) -> Option<&Question> {
        if self.status.is_terminal() {
            return None;
        }
        self.questions.get(self.current_index)
    }

    /// Validates a submission without changing the session.
    pub fn grade(&self, question_id: Uuid, option_id: Uuid) -> Result<Grading, QuizError> {
        if self.status.is_terminal() {
            return Err(QuizError::InvalidState(self.status));
        }
        let question = self
            .questions
            .get(self.current_index)
            .ok_or(QuizError::InvalidState(self.status))?;
        if question.id != question_id {
            return Err(QuizError::QuestionMismatch {
                expected: question.id,
                received: question_id,
            });
        }
        let chosen = question
            .option(option_id)
            .ok_or(QuizError::InvalidOption(option_id))?;

        let correct_option = question.correct_option();
        let integrity_fault = match correct_option {
            Some(_) => None,
            None => Some(question.correct_option_count()),
        };

        Ok(Grading {
            question_id,
            option_id,
            correct: correct_option.is_some() && chosen.is_correct,
            correct_option_id: correct_option.map(|option| option.id),
            integrity_fault,
        })
    }

    /// Appends a graded answer and moves past the question.
    pub fn record(&mut self, grading: &Grading, answered_at: DateTime<Utc>) {
        self.answers.push(AnswerRecord {
            question_id: grading.question_id,
            chosen_option_id: grading.option_id,
            correct: grading.correct,
            answered_at,
        });
        if grading.correct {
            self.score += 1;
        }
        self.current_index += 1;
    }

    /// Decides whether the session ends after the latest answer. Running out of
    /// questions wins over running out of quota.
    pub fn settle(&mut self, remaining_today: i32, at: DateTime<Utc>) -> Termination {
        if self.current_index >= self.questions.len() {
            self.finish(SessionStatus::CompletedNaturally, at);
            Termination::Natural
        } else if remaining_today <= 0 {
            self.finish(SessionStatus::CompletedByLimit, at);
            Termination::Limit
        } else {
            Termination::Continues
        }
    }

    /// Moves to a terminal state. Terminal states are final.
    pub fn finish(&mut self, status: SessionStatus, at: DateTime<Utc>) {
        if self.status.is_terminal() || !status.is_terminal() {
            return;
        }
        self.status = status;
        self.finished_at = Some(at);
    }

    pub fn summary(&self) -> SessionSummary {
        let total = self.questions.len();
        let percentage = if total == 0 {
            0
        } else {
            (f64::from(self.score) * 100.0 / total as f64).round() as u32
        };
        SessionSummary {
            session_id: self.id,
            account_id: self.account_id,
            status: self.status,
            score: self.score,
            answered: self.answers.len(),
            total_questions: total,
            percentage,
            xp_earned: i64::from(self.score) * XP_PER_CORRECT_ANSWER,
            upsell: self.status == SessionStatus::CompletedByLimit,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
