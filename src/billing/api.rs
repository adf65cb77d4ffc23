use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Extension},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::accounts::AccountStore;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::pricing::{self, Currency, CurrencyResolver, PriceQuote};

use super::{
    BillingInterval, CheckoutHandle, CheckoutRequest, PaymentProvider, PaymentReconciler,
    SubscriptionRecord,
};

/// First hop of `X-Forwarded-For`, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
}

/// key: billing-api -> rest endpoints
pub async fn get_pricing(
    Extension(resolver): Extension<Arc<dyn CurrencyResolver>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Json<PriceQuote> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let currency = resolver.resolve(client_ip(&headers, peer)).await;
    Json(pricing::quote(currency))
}

pub async fn start_checkout(
    user: AuthUser,
    Extension(reconciler): Extension<Arc<PaymentReconciler>>,
    Extension(accounts): Extension<Arc<dyn AccountStore>>,
    Json(payload): Json<CheckoutPayload>,
) -> AppResult<Json<CheckoutHandle>> {
    let account = accounts
        .fetch(user.account_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let provider = payload
        .provider
        .unwrap_or_else(|| PaymentProvider::for_currency(payload.currency));
    let request = CheckoutRequest {
        account_id: account.id,
        email: account.email,
        currency: payload.currency,
        interval: payload.interval,
        amount_minor: pricing::price_minor(payload.currency, payload.interval),
    };
    let handle = reconciler.initialize(provider, &request).await?;
    Ok(Json(handle))
}

/// Client return path after paying.
pub async fn verify_payment(
    user: AuthUser,
    Extension(reconciler): Extension<Arc<PaymentReconciler>>,
    Json(payload): Json<VerifyPayload>,
) -> AppResult<Json<SubscriptionEnvelope>> {
    let record = reconciler
        .confirm(payload.provider, &payload.reference, Some(user.account_id))
        .await?;
    Ok(Json(SubscriptionEnvelope::new(record, reconciler.as_ref())))
}

pub async fn get_subscription(
    user: AuthUser,
    Extension(reconciler): Extension<Arc<PaymentReconciler>>,
) -> AppResult<Json<Option<SubscriptionEnvelope>>> {
    let record = reconciler.ledger().record(user.account_id).await?;
    Ok(Json(
        record.map(|record| SubscriptionEnvelope::new(record, reconciler.as_ref())),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutPayload {
    pub currency: Currency,
    pub interval: BillingInterval,
    #[serde(default)]
    pub provider: Option<PaymentProvider>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPayload {
    pub provider: PaymentProvider,
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionEnvelope {
    pub subscription: SubscriptionRecord,
    pub active: bool,
}

impl SubscriptionEnvelope {
    fn new(subscription: SubscriptionRecord, reconciler: &PaymentReconciler) -> Self {
        let active = subscription.is_active(reconciler.ledger().clock().now());
        Self {
            subscription,
            active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("102.89.4.7, 10.0.0.1"),
        );
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(
            client_ip(&headers, Some(peer)),
            Some("102.89.4.7".parse().unwrap())
        );
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer)),
            Some("127.0.0.1".parse().unwrap())
        );
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }
}
