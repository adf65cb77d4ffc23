use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use quizline::accounts::{Account, AccountStore, InMemoryAccountStore};
use quizline::clock::ManualClock;
use quizline::quiz::{
    InMemoryQuestionBank, Question, QuestionOption, QuizError, SessionRunner, SessionStatus,
    Termination,
};
use quizline::seed::MemorySeed;
use uuid::Uuid;

// key: quiz-flow-tests -> session lifecycle against in-memory stores

fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 14, 9, 30, 0).unwrap()
}

fn question(text: &str, correct: &[usize]) -> Question {
    Question {
        id: Uuid::new_v4(),
        text: text.to_string(),
        category: "general".to_string(),
        options: (0..4)
            .map(|index| QuestionOption {
                id: Uuid::new_v4(),
                text: format!("option {index}"),
                is_correct: correct.contains(&index),
            })
            .collect(),
        explanation: format!("{text} explained"),
    }
}

fn bank(count: usize) -> Vec<Question> {
    (0..count)
        .map(|index| question(&format!("question {index}"), &[index % 4]))
        .collect()
}

fn correct_option(question: &Question) -> Uuid {
    question
        .options
        .iter()
        .find(|option| option.is_correct)
        .map(|option| option.id)
        .unwrap()
}

fn wrong_option(question: &Question) -> Uuid {
    question
        .options
        .iter()
        .find(|option| !option.is_correct)
        .map(|option| option.id)
        .unwrap()
}

struct Harness {
    accounts: InMemoryAccountStore,
    bank: InMemoryQuestionBank,
    clock: Arc<ManualClock>,
    runner: Arc<SessionRunner>,
}

fn harness(questions: Vec<Question>) -> Harness {
    let accounts = InMemoryAccountStore::new();
    let bank = InMemoryQuestionBank::new(questions);
    let clock = Arc::new(ManualClock::new(start_of_test()));
    let runner = Arc::new(SessionRunner::new(
        Arc::new(accounts.clone()),
        Arc::new(bank.clone()),
        clock.clone(),
    ));
    Harness {
        accounts,
        bank,
        clock,
        runner,
    }
}

fn new_account(harness: &Harness) -> Uuid {
    let id = Uuid::new_v4();
    harness
        .accounts
        .insert(Account::new(id, format!("{id}@example.com"), start_of_test()));
    id
}

fn old_free_account(harness: &Harness) -> Uuid {
    let id = Uuid::new_v4();
    harness.accounts.insert(Account::new(
        id,
        format!("{id}@example.com"),
        start_of_test() - Duration::days(10),
    ));
    id
}

#[tokio::test]
async fn new_account_answers_full_batch_naturally() {
    let h = harness(bank(5));
    let account_id = new_account(&h);

    let (session, decision) = h.runner.start_daily(account_id).await.unwrap();
    assert_eq!(decision.daily_limit, 5);
    assert_eq!(session.questions().len(), 5);

    let mut last = None;
    for question in session.questions() {
        let step = h
            .runner
            .answer(session.id(), question.id, correct_option(question))
            .await
            .unwrap();
        assert!(step.correct);
        last = Some(step);
    }

    let last = last.unwrap();
    assert_eq!(last.status, SessionStatus::CompletedNaturally);
    assert_eq!(last.termination, Termination::Natural);
    assert_eq!(last.score, 5);
    assert!(!last.upsell);

    let summary = h.runner.summary(session.id()).await.unwrap();
    assert_eq!(summary.xp_earned, 50);
    assert_eq!(summary.percentage, 100);
    assert!(!summary.upsell);

    let account = h.accounts.fetch(account_id).await.unwrap().unwrap();
    assert_eq!(account.total_xp, 50);
    assert_eq!(account.daily_questions_answered, 5);
    assert_eq!(account.streak_days, 1);
}

#[tokio::test]
async fn free_account_stops_after_one_answer() {
    let h = harness(Vec::new());
    let account_id = old_free_account(&h);
    let questions = bank(5);

    let session = h.runner.start(account_id, questions.clone()).await.unwrap();
    let step = h
        .runner
        .answer(session.id(), questions[0].id, wrong_option(&questions[0]))
        .await
        .unwrap();

    assert!(!step.correct);
    assert_eq!(step.status, SessionStatus::CompletedByLimit);
    assert_eq!(step.termination, Termination::Limit);
    assert_eq!(step.answered, 1);
    assert_eq!(step.remaining_today, 0);
    assert!(step.upsell);
    assert!(step.next_question.is_none());

    let late = h
        .runner
        .answer(session.id(), questions[1].id, correct_option(&questions[1]))
        .await;
    assert!(matches!(
        late,
        Err(QuizError::InvalidState(SessionStatus::CompletedByLimit))
    ));

    let snapshot = h.runner.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.answers().len(), snapshot.current_index());
    assert_eq!(snapshot.answers().len(), 1);
}

#[tokio::test]
async fn exhausted_quota_refuses_new_challenge() {
    let h = harness(bank(5));
    let account_id = old_free_account(&h);

    let (session, decision) = h.runner.start_daily(account_id).await.unwrap();
    assert_eq!(decision.daily_limit, 1);
    assert_eq!(session.questions().len(), 1);
    let question = &session.questions()[0];
    let step = h
        .runner
        .answer(session.id(), question.id, correct_option(question))
        .await
        .unwrap();
    assert_eq!(step.status, SessionStatus::CompletedNaturally);

    let again = h.runner.start_daily(account_id).await;
    assert!(matches!(again, Err(QuizError::QuotaExhausted(_))));
}

#[tokio::test]
async fn repeated_question_is_a_mismatch_without_extra_xp() {
    let h = harness(bank(5));
    let account_id = new_account(&h);
    let (session, _) = h.runner.start_daily(account_id).await.unwrap();
    let first = session.questions()[0].clone();

    h.runner
        .answer(session.id(), first.id, correct_option(&first))
        .await
        .unwrap();
    let repeat = h
        .runner
        .answer(session.id(), first.id, correct_option(&first))
        .await;

    assert!(matches!(repeat, Err(QuizError::QuestionMismatch { .. })));
    let account = h.accounts.fetch(account_id).await.unwrap().unwrap();
    assert_eq!(account.total_xp, 10);
    assert_eq!(account.daily_questions_answered, 1);
}

#[tokio::test]
async fn foreign_option_is_rejected() {
    let h = harness(bank(5));
    let account_id = new_account(&h);
    let (session, _) = h.runner.start_daily(account_id).await.unwrap();
    let first = &session.questions()[0];

    let result = h.runner.answer(session.id(), first.id, Uuid::new_v4()).await;
    assert!(matches!(result, Err(QuizError::InvalidOption(_))));
    let snapshot = h.runner.snapshot(session.id()).await.unwrap();
    assert_eq!(snapshot.current_index(), 0);
}

#[tokio::test]
async fn broken_question_is_graded_wrong_and_flagged() {
    let broken = question("two answers", &[0, 1]);
    let h = harness(vec![broken.clone()]);
    let account_id = new_account(&h);
    let (session, _) = h.runner.start_daily(account_id).await.unwrap();

    let step = h
        .runner
        .answer(session.id(), broken.id, broken.options[0].id)
        .await
        .unwrap();

    assert!(!step.correct);
    assert_eq!(step.correct_option_id, None);
    assert_eq!(step.xp_awarded, 0);
    assert_eq!(h.bank.flagged().get(&broken.id), Some(&2));
}

#[tokio::test]
async fn quota_resets_on_a_new_day() {
    let h = harness(bank(5));
    let account_id = old_free_account(&h);
    let (session, _) = h.runner.start_daily(account_id).await.unwrap();
    let question = &session.questions()[0];
    h.runner
        .answer(session.id(), question.id, correct_option(question))
        .await
        .unwrap();
    assert_eq!(h.runner.quota(account_id).await.unwrap().remaining, 0);

    h.clock.advance(Duration::days(1));
    let decision = h.runner.quota(account_id).await.unwrap();
    assert_eq!(decision.answered_today, 0);
    assert_eq!(decision.remaining, decision.daily_limit);

    let (next, _) = h.runner.start_daily(account_id).await.unwrap();
    let question = &next.questions()[0];
    h.runner
        .answer(next.id(), question.id, correct_option(question))
        .await
        .unwrap();

    let progress = h.runner.progress(account_id).await.unwrap();
    assert_eq!(progress.streak_days, 2);
    assert_eq!(progress.total_xp, 20);
    assert_eq!(progress.xp_history.len(), 7);
    assert_eq!(progress.xp_history[6].xp, 10);
    assert_eq!(progress.xp_history[5].xp, 10);
    assert_eq!(progress.xp_history[4].xp, 0);
}

#[tokio::test]
async fn lapsing_premium_ends_session_at_next_answer() {
    let h = harness(Vec::new());
    let account_id = Uuid::new_v4();
    let mut account = Account::new(
        account_id,
        "premium@example.com",
        start_of_test() - Duration::days(40),
    );
    account.is_premium = true;
    account.premium_expires_at = Some(start_of_test() + Duration::minutes(1));
    h.accounts.insert(account);

    let questions = bank(5);
    let session = h.runner.start(account_id, questions.clone()).await.unwrap();
    let step = h
        .runner
        .answer(session.id(), questions[0].id, correct_option(&questions[0]))
        .await
        .unwrap();
    assert_eq!(step.termination, Termination::Continues);
    assert_eq!(step.remaining_today, 4);

    h.clock.advance(Duration::minutes(2));
    let result = h
        .runner
        .answer(session.id(), questions[1].id, correct_option(&questions[1]))
        .await;
    assert!(matches!(result, Err(QuizError::QuotaExhausted(_))));

    let summary = h.runner.summary(session.id()).await.unwrap();
    assert_eq!(summary.status, SessionStatus::CompletedByLimit);
    assert_eq!(summary.answered, 1);
    assert!(summary.upsell);
}

#[tokio::test]
async fn parallel_sessions_share_one_free_answer() {
    let h = harness(Vec::new());
    let account_id = old_free_account(&h);
    let first_questions = bank(3);
    let second_questions = bank(3);
    let first = h.runner.start(account_id, first_questions.clone()).await.unwrap();
    let second = h.runner.start(account_id, second_questions.clone()).await.unwrap();

    let (a, b) = tokio::join!(
        h.runner.answer(
            first.id(),
            first_questions[0].id,
            correct_option(&first_questions[0])
        ),
        h.runner.answer(
            second.id(),
            second_questions[0].id,
            correct_option(&second_questions[0])
        ),
    );

    let accepted = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(accepted, 1);
    assert!([a, b]
        .into_iter()
        .any(|result| matches!(result, Err(QuizError::QuotaExhausted(_)))));
    let account = h.accounts.fetch(account_id).await.unwrap().unwrap();
    assert_eq!(account.daily_questions_answered, 1);
    assert_eq!(account.total_xp, 10);
}

#[tokio::test]
async fn duplicate_answers_on_one_session_credit_once() {
    let h = harness(bank(5));
    let account_id = new_account(&h);
    let (session, _) = h.runner.start_daily(account_id).await.unwrap();
    let question = session.questions()[0].clone();
    let option = correct_option(&question);

    let (a, b) = tokio::join!(
        h.runner.answer(session.id(), question.id, option),
        h.runner.answer(session.id(), question.id, option),
    );

    let accepted = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(accepted, 1);
    assert!([a, b]
        .into_iter()
        .any(|result| matches!(result, Err(QuizError::QuestionMismatch { .. }))));
    let account = h.accounts.fetch(account_id).await.unwrap().unwrap();
    assert_eq!(account.total_xp, 10);
    assert_eq!(account.daily_questions_answered, 1);
    assert_eq!(h.runner.summary(session.id()).await.unwrap().answered, 1);
}

#[tokio::test]
async fn refused_answer_does_not_flag_broken_question() {
    let h = harness(Vec::new());
    let account_id = old_free_account(&h);
    let healthy = bank(1);
    let broken = question("two answers", &[0, 1]);
    let first = h.runner.start(account_id, healthy.clone()).await.unwrap();
    let second = h.runner.start(account_id, vec![broken.clone()]).await.unwrap();

    h.runner
        .answer(first.id(), healthy[0].id, correct_option(&healthy[0]))
        .await
        .unwrap();
    let refused = h
        .runner
        .answer(second.id(), broken.id, broken.options[0].id)
        .await;

    assert!(matches!(refused, Err(QuizError::QuotaExhausted(_))));
    assert!(h.bank.flagged().is_empty());
}

#[tokio::test]
async fn finished_sessions_are_pruned_after_retention() {
    let h = harness(bank(1));
    let account_id = new_account(&h);
    let (session, _) = h.runner.start_daily(account_id).await.unwrap();
    let question = &session.questions()[0];
    h.runner
        .answer(session.id(), question.id, correct_option(question))
        .await
        .unwrap();

    let retention = Duration::hours(1);
    assert_eq!(h.runner.prune(start_of_test(), retention), 0);
    assert_eq!(h.runner.prune(start_of_test() + Duration::hours(2), retention), 1);
    assert!(matches!(
        h.runner.summary(session.id()).await,
        Err(QuizError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn unknown_account_is_reported() {
    let h = harness(bank(5));
    let result = h.runner.start_daily(Uuid::new_v4()).await;
    assert!(matches!(result, Err(QuizError::AccountNotFound(_))));
}

#[tokio::test]
async fn seeded_memory_stores_serve_a_daily_challenge() {
    let seed = MemorySeed::load(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/memory_seed.json"))
        .unwrap();
    let (accounts, bank) = seed.into_stores(start_of_test());
    let runner = SessionRunner::new(
        Arc::new(accounts),
        Arc::new(bank),
        Arc::new(ManualClock::new(start_of_test())),
    );
    let dev = Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap();
    let veteran = Uuid::parse_str("00000000-0000-4000-8000-000000000002").unwrap();

    let (session, decision) = runner.start_daily(dev).await.unwrap();
    assert_eq!(decision.daily_limit, 5);
    assert_eq!(session.questions().len(), 5);
    let question = &session.questions()[0];
    let step = runner
        .answer(session.id(), question.id, correct_option(question))
        .await
        .unwrap();
    assert!(step.correct);

    let (session, decision) = runner.start_daily(veteran).await.unwrap();
    assert_eq!(decision.daily_limit, 1);
    assert_eq!(session.questions().len(), 1);
}
