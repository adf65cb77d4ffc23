use std::sync::Arc;

use axum::{body::Bytes, extract::Extension, http::HeaderMap, http::StatusCode};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Sha256, Sha512};
use tracing::{debug, info, warn};

use crate::billing::{validate_reference, PaymentProvider, ReconciliationHandle, ReconciliationJob};
use crate::clock::ClockSource;
use crate::error::{AppError, AppResult};

/// Oldest checkout-signature timestamp still accepted.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// key: webhook-verifier -> provider signing secrets
#[derive(Clone)]
pub struct WebhookVerifier {
    checkout_secret: Option<String>,
    reference_secret: Option<String>,
    clock: Arc<dyn ClockSource>,
}

impl WebhookVerifier {
    pub fn new(
        checkout_secret: Option<String>,
        reference_secret: Option<String>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            checkout_secret,
            reference_secret,
            clock,
        }
    }

    /// `t=<unix>,v1=<hex>` header signing `"{t}.{body}"` with HMAC-SHA256.
    pub fn verify_checkout(&self, header: &str, body: &[u8]) -> AppResult<()> {
        let secret = self
            .checkout_secret
            .as_deref()
            .ok_or_else(|| AppError::Unavailable("checkout webhooks are not configured".into()))?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(AppError::BadRequest("Bad signature".into()))?;
        let signed_at = Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .ok_or(AppError::BadRequest("Bad signature".into()))?;
        if (self.clock.now() - signed_at).num_seconds().abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(AppError::Unauthorized);
        }

        let valid = signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
                return false;
            };
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(body);
            mac.verify_slice(&expected).is_ok()
        });
        if valid {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }

    /// Hex HMAC-SHA512 of the raw body keyed with the provider secret key.
    pub fn verify_reference(&self, header: &str, body: &[u8]) -> AppResult<()> {
        let secret = self
            .reference_secret
            .as_deref()
            .ok_or_else(|| AppError::Unavailable("reference webhooks are not configured".into()))?;
        let expected =
            hex::decode(header.trim()).map_err(|_| AppError::BadRequest("Bad signature".into()))?;
        let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("invalid webhook signing key")))?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| AppError::Unauthorized)
    }
}

fn signature_header<'a>(headers: &'a HeaderMap, name: &str) -> AppResult<&'a str> {
    headers
        .get(name)
        .ok_or(AppError::BadRequest("Missing signature".into()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("Bad signature".into()))
}

#[derive(Debug, Deserialize)]
struct CheckoutEvent {
    #[serde(rename = "type")]
    kind: String,
    data: CheckoutEventData,
}

#[derive(Debug, Deserialize)]
struct CheckoutEventData {
    object: CheckoutEventObject,
}

#[derive(Debug, Deserialize)]
struct CheckoutEventObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ReferenceEvent {
    event: String,
    data: ReferenceEventData,
}

#[derive(Debug, Deserialize)]
struct ReferenceEventData {
    reference: String,
}

async fn enqueue(
    reconciliation: &ReconciliationHandle,
    provider: PaymentProvider,
    reference: String,
) -> AppResult<StatusCode> {
    validate_reference(&reference).map_err(|err| AppError::BadRequest(err.to_string()))?;
    info!(provider = provider.as_str(), %reference, "payment webhook accepted");
    reconciliation
        .dispatch(ReconciliationJob::Verify {
            provider,
            reference,
        })
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// key: webhooks-billing -> checkout-session provider entrypoint
pub async fn checkout_webhook(
    Extension(verifier): Extension<WebhookVerifier>,
    Extension(reconciliation): Extension<ReconciliationHandle>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let signature = signature_header(&headers, "stripe-signature")?;
    if let Err(err) = verifier.verify_checkout(signature, &body) {
        warn!(error = %err, "checkout webhook signature rejected");
        return Err(err);
    }

    let event: CheckoutEvent = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("invalid webhook payload: {err}")))?;
    match event.kind.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            enqueue(
                &reconciliation,
                PaymentProvider::CheckoutSession,
                event.data.object.id,
            )
            .await
        }
        other => {
            debug!(event = other, "ignoring checkout webhook event");
            Ok(StatusCode::OK)
        }
    }
}

/// key: webhooks-billing -> reference provider entrypoint
pub async fn reference_webhook(
    Extension(verifier): Extension<WebhookVerifier>,
    Extension(reconciliation): Extension<ReconciliationHandle>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let signature = signature_header(&headers, "x-paystack-signature")?;
    if let Err(err) = verifier.verify_reference(signature, &body) {
        warn!(error = %err, "reference webhook signature rejected");
        return Err(err);
    }

    let event: ReferenceEvent = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("invalid webhook payload: {err}")))?;
    match event.event.as_str() {
        "charge.success" => {
            enqueue(
                &reconciliation,
                PaymentProvider::ReferenceVerified,
                event.data.reference,
            )
            .await
        }
        other => {
            debug!(event = other, "ignoring reference webhook event");
            Ok(StatusCode::OK)
        }
    }
}
