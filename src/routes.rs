use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};

use crate::accounts::AccountStore;
use crate::billing::{self, PaymentReconciler, ReconciliationHandle};
use crate::pricing::CurrencyResolver;
use crate::quiz::{api as quiz_api, SessionRunner};
use crate::webhooks::{self, WebhookVerifier};

pub async fn root() -> &'static str {
    "Quizline API"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/quota", get(quiz_api::get_quota))
        .route("/api/progress", get(quiz_api::get_progress))
        .route("/api/quiz/sessions", post(quiz_api::start_session))
        .route("/api/quiz/sessions/:id", get(quiz_api::get_session))
        .route(
            "/api/quiz/sessions/:id/answers",
            post(quiz_api::submit_answer),
        )
        .route("/api/billing/pricing", get(billing::billing_get_pricing))
        .route("/api/billing/checkout", post(billing::billing_start_checkout))
        .route("/api/billing/verify", post(billing::billing_verify_payment))
        .route(
            "/api/billing/subscription",
            get(billing::billing_get_subscription),
        )
        .route(
            "/api/billing/webhooks/checkout",
            post(webhooks::checkout_webhook),
        )
        .route(
            "/api/billing/webhooks/reference",
            post(webhooks::reference_webhook),
        )
}

/// key: app-services -> shared handles injected as extensions
#[derive(Clone)]
pub struct Services {
    pub accounts: Arc<dyn AccountStore>,
    pub runner: Arc<SessionRunner>,
    pub reconciler: Arc<PaymentReconciler>,
    pub reconciliation: ReconciliationHandle,
    pub currency: Arc<dyn CurrencyResolver>,
    pub webhooks: WebhookVerifier,
}

impl Services {
    pub fn attach(self, router: Router) -> Router {
        router
            .layer(Extension(self.accounts))
            .layer(Extension(self.runner))
            .layer(Extension(self.reconciler))
            .layer(Extension(self.reconciliation))
            .layer(Extension(self.currency))
            .layer(Extension(self.webhooks))
    }
}
