use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::{fill_history, Account, AccountStore, AnswerCredit, CreditOutcome, ProgressSnapshot};
use crate::clock::ClockSource;
use crate::entitlement::{
    premium_active, EntitlementPolicy, QuotaDecision, QuotaExhausted, PREMIUM_DAILY_LIMIT,
};

use super::models::{Question, SessionStatus, SessionStepResult, SessionSummary, Termination};
use super::session::QuizSession;
use super::supply::QuestionSupply;
use super::QuizError;

/// In-progress sessions older than this are treated as abandoned.
const ABANDONED_AFTER_HOURS: i64 = 24;
/// Days covered by the progress XP history, today included.
const PROGRESS_HISTORY_DAYS: u32 = 7;

/// key: session-runner -> drives sessions, one writer per session
pub struct SessionRunner {
    accounts: Arc<dyn AccountStore>,
    supply: Arc<dyn QuestionSupply>,
    clock: Arc<dyn ClockSource>,
    policy: EntitlementPolicy,
    sessions: DashMap<Uuid, Arc<Mutex<QuizSession>>>,
}

impl SessionRunner {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        supply: Arc<dyn QuestionSupply>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            accounts,
            supply,
            clock,
            policy: EntitlementPolicy,
            sessions: DashMap::new(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn ClockSource> {
        &self.clock
    }

    /// Current quota with the lazy day reset applied in the same store step.
    pub async fn quota(&self, account_id: Uuid) -> Result<QuotaDecision, QuizError> {
        let now = self.clock.now();
        let today = self.clock.today(now);
        let account = self.refreshed_account(account_id, now).await?;
        Ok(self.policy.quota(&account, now, today))
    }

    /// Level, streak and the recent XP history with the day reset applied.
    pub async fn progress(&self, account_id: Uuid) -> Result<ProgressSnapshot, QuizError> {
        let now = self.clock.now();
        let today = self.clock.today(now);
        let account = self.refreshed_account(account_id, now).await?;
        let since = today
            .checked_sub_days(chrono::Days::new(u64::from(PROGRESS_HISTORY_DAYS - 1)))
            .unwrap_or(today);
        let entries = self
            .accounts
            .xp_history(account_id, since)
            .await
            .map_err(QuizError::Store)?;
        let is_premium = premium_active(&account, now);

        Ok(ProgressSnapshot {
            account_id,
            level: account.level,
            total_xp: account.total_xp,
            daily_xp: account.daily_xp,
            daily_questions_answered: account.daily_questions_answered,
            streak_days: account.streak_days,
            is_premium,
            premium_expires_at: account.premium_expires_at,
            xp_history: fill_history(&entries, today, PROGRESS_HISTORY_DAYS),
        })
    }

    /// Starts today's challenge: checks the quota before asking the bank for
    /// anything, then never asks for more than the remaining allowance.
    pub async fn start_daily(
        &self,
        account_id: Uuid,
    ) -> Result<(QuizSession, QuotaDecision), QuizError> {
        let decision = self.quota(account_id).await?;
        if let Err(exhausted) = decision.ensure_available() {
            info!(%account_id, daily_limit = decision.daily_limit, "daily limit reached before fetch");
            return Err(exhausted.into());
        }

        let limit = usize::try_from(decision.remaining)
            .unwrap_or(0)
            .min(PREMIUM_DAILY_LIMIT as usize);
        let questions = self
            .supply
            .fetch_daily_questions(account_id, limit)
            .await
            .map_err(QuizError::Store)?;
        let session = self.start(account_id, questions).await?;
        Ok((session, decision))
    }

    /// Registers a new session over a fixed question list.
    pub async fn start(
        &self,
        account_id: Uuid,
        questions: Vec<Question>,
    ) -> Result<QuizSession, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::EmptyQuestionSet);
        }

        let decision = self.quota(account_id).await?;
        if let Err(exhausted) = decision.ensure_available() {
            info!(%account_id, daily_limit = decision.daily_limit, "session start refused, daily limit reached");
            return Err(exhausted.into());
        }

        let session = QuizSession::new(account_id, questions, self.clock.now())?;
        self.sessions
            .insert(session.id(), Arc::new(Mutex::new(session.clone())));
        info!(
            session_id = %session.id(),
            %account_id,
            questions = session.questions().len(),
            remaining = decision.remaining,
            "quiz session started"
        );
        Ok(session)
    }

    /// Answers the current question of a session.
    ///
    /// The quota is checked again before the credit and once more after it; the
    /// XP credit and answered-count increment are a single store operation keyed
    /// by `(session_id, question_id)`.
    pub async fn answer(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        option_id: Uuid,
    ) -> Result<SessionStepResult, QuizError> {
        let handle = self.handle(session_id)?;
        let mut session = handle.lock().await;

        let grading = session.grade(question_id, option_id)?;

        let account_id = session.account_id();
        let now = self.clock.now();
        let today = self.clock.today(now);
        let before = self.refreshed_account(account_id, now).await?;
        let decision = self.policy.quota(&before, now, today);
        if decision.is_exhausted() {
            session.finish(SessionStatus::CompletedByLimit, now);
            info!(%session_id, %account_id, "daily limit reached mid-session");
            return Err(QuotaExhausted {
                daily_limit: decision.daily_limit,
            }
            .into());
        }

        let credit = AnswerCredit {
            session_id,
            question_id,
            xp_delta: grading.xp_delta(),
        };
        let outcome = self
            .accounts
            .record_answer(account_id, &credit, today, decision.daily_limit)
            .await
            .map_err(QuizError::Store)?
            .ok_or(QuizError::AccountNotFound(account_id))?;
        let newly_credited = matches!(outcome, CreditOutcome::Recorded(_));
        let after = match outcome {
            CreditOutcome::Recorded(account) => account,
            CreditOutcome::Duplicate(account) => {
                warn!(%session_id, %question_id, "answer credit already applied, not crediting again");
                account
            }
            CreditOutcome::LimitReached(_) => {
                session.finish(SessionStatus::CompletedByLimit, now);
                info!(%session_id, %account_id, "daily limit consumed concurrently");
                return Err(QuotaExhausted {
                    daily_limit: decision.daily_limit,
                }
                .into());
            }
        };

        // Only an answer that was actually credited reports the bank fault.
        if let (true, Some(correct_options)) = (newly_credited, grading.integrity_fault) {
            warn!(
                %session_id,
                %question_id,
                correct_options,
                "question does not have exactly one correct option; graded as incorrect"
            );
            if let Err(err) = self
                .supply
                .flag_integrity_fault(question_id, correct_options)
                .await
            {
                warn!(?err, %question_id, "failed to flag question integrity fault");
            }
        }

        let explanation = session
            .current_question()
            .map(|question| question.explanation.clone())
            .unwrap_or_default();
        session.record(&grading, now);

        let settled_at = self.clock.now();
        let after_decision = self
            .policy
            .quota(&after, settled_at, self.clock.today(settled_at));
        let termination = session.settle(after_decision.remaining, settled_at);

        match termination {
            Termination::Continues => debug!(
                %session_id,
                answered = session.answers().len(),
                remaining = after_decision.remaining,
                "answer recorded"
            ),
            Termination::Natural | Termination::Limit => info!(
                %session_id,
                %account_id,
                status = session.status().as_str(),
                score = session.score(),
                answered = session.answers().len(),
                "quiz session finished"
            ),
        }

        Ok(SessionStepResult {
            session_id,
            status: session.status(),
            correct: grading.correct,
            correct_option_id: grading.correct_option_id,
            explanation,
            score: session.score(),
            xp_awarded: credit.xp_delta,
            answered: session.answers().len(),
            remaining_today: after_decision.remaining,
            termination,
            upsell: termination == Termination::Limit,
            next_question: session.current_question().map(|question| question.view()),
        })
    }

    pub async fn summary(&self, session_id: Uuid) -> Result<SessionSummary, QuizError> {
        Ok(self.snapshot(session_id).await?.summary())
    }

    /// Copy of the session as it stands after any in-flight answer.
    pub async fn snapshot(&self, session_id: Uuid) -> Result<QuizSession, QuizError> {
        let handle = self.handle(session_id)?;
        let session = handle.lock().await;
        Ok(session.clone())
    }

    pub async fn owner(&self, session_id: Uuid) -> Result<Uuid, QuizError> {
        Ok(self.snapshot(session_id).await?.account_id())
    }

    /// Drops finished sessions past `retention` and abandoned ones. Sessions with
    /// an answer in flight are left alone.
    pub fn prune(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => match session.finished_at() {
                Some(finished_at) => finished_at + retention > now,
                None => session.started_at() + Duration::hours(ABANDONED_AFTER_HOURS) > now,
            },
            Err(_) => true,
        });
        before - self.sessions.len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn handle(&self, session_id: Uuid) -> Result<Arc<Mutex<QuizSession>>, QuizError> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
            .ok_or(QuizError::SessionNotFound(session_id))
    }

    async fn refreshed_account(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Account, QuizError> {
        self.accounts
            .quota_snapshot(account_id, self.clock.today(now))
            .await
            .map_err(QuizError::Store)?
            .ok_or(QuizError::AccountNotFound(account_id))
    }
}

/// key: session-pruner -> periodic retention sweep
pub fn spawn_session_pruner(runner: Arc<SessionRunner>, interval_secs: u64, retention: Duration) {
    tokio::spawn(async move {
        let mut ticker = time::interval(TokioDuration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let now = runner.clock().now();
            let removed = runner.prune(now, retention);
            if removed > 0 {
                debug!(removed, remaining = runner.active_sessions(), "pruned quiz sessions");
            }
        }
    });
}
