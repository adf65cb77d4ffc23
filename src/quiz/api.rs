use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::accounts::ProgressSnapshot;
use crate::entitlement::QuotaDecision;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

use super::{QuizError, SessionRunner, SessionStepResult, SessionSummary, StartedSession};

/// key: quiz-api -> daily challenge endpoints
pub async fn get_quota(
    user: AuthUser,
    Extension(runner): Extension<Arc<SessionRunner>>,
) -> AppResult<Json<QuotaDecision>> {
    Ok(Json(runner.quota(user.account_id).await?))
}

pub async fn get_progress(
    user: AuthUser,
    Extension(runner): Extension<Arc<SessionRunner>>,
) -> AppResult<Json<ProgressSnapshot>> {
    Ok(Json(runner.progress(user.account_id).await?))
}

pub async fn start_session(
    user: AuthUser,
    Extension(runner): Extension<Arc<SessionRunner>>,
) -> AppResult<(StatusCode, Json<StartedSession>)> {
    let (session, decision) = runner.start_daily(user.account_id).await?;
    let started = StartedSession {
        session_id: session.id(),
        remaining_today: decision.remaining,
        daily_limit: decision.daily_limit,
        questions: session.questions().iter().map(|question| question.view()).collect(),
    };
    Ok((StatusCode::CREATED, Json(started)))
}

pub async fn get_session(
    user: AuthUser,
    Extension(runner): Extension<Arc<SessionRunner>>,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<SessionSummary>> {
    ensure_owner(&runner, session_id, user.account_id).await?;
    Ok(Json(runner.summary(session_id).await?))
}

pub async fn submit_answer(
    user: AuthUser,
    Extension(runner): Extension<Arc<SessionRunner>>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<AnswerPayload>,
) -> AppResult<Json<SessionStepResult>> {
    ensure_owner(&runner, session_id, user.account_id).await?;
    let step = runner
        .answer(session_id, payload.question_id, payload.option_id)
        .await?;
    Ok(Json(step))
}

/// Someone else's session is reported as missing.
async fn ensure_owner(
    runner: &SessionRunner,
    session_id: Uuid,
    account_id: Uuid,
) -> Result<(), AppError> {
    let owner = runner.owner(session_id).await?;
    if owner != account_id {
        return Err(QuizError::SessionNotFound(session_id).into());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct AnswerPayload {
    pub question_id: Uuid,
    pub option_id: Uuid,
}
