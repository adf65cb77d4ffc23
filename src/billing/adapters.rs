use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use super::models::{BillingInterval, CheckoutHandle, CheckoutRequest, PaymentProvider, VerifiedPayment};

const PROVIDER_HTTP_TIMEOUT_SECS: u64 = 10;
const MAX_REFERENCE_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum VerificationError {
    /// The provider answered and the payment is not complete.
    #[error("payment not confirmed: {0}")]
    Rejected(String),
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider response unusable: {0}")]
    Malformed(String),
}

/// key: payment-gateway -> provider integration
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Creates the provider-side payment and returns where to send the user.
    async fn initialize(&self, request: &CheckoutRequest) -> Result<CheckoutHandle>;

    /// Looks the payment up server-side. Anything short of a completed payment
    /// is an error.
    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, VerificationError>;
}

/// References end up in provider URLs, so only plain tokens are accepted.
pub fn validate_reference(reference: &str) -> Result<(), VerificationError> {
    let valid = !reference.is_empty()
        && reference.len() <= MAX_REFERENCE_LEN
        && reference
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(VerificationError::Malformed(format!(
            "invalid payment reference `{reference}`"
        )))
    }
}

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
        .build()
        .context("failed to build payment provider client")
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Default, Deserialize)]
struct PaymentMetadata {
    #[serde(default)]
    account_id: Option<String>,
    #[serde(default)]
    interval: Option<String>,
}

impl PaymentMetadata {
    fn account_id(&self) -> Result<Uuid, VerificationError> {
        self.account_id
            .as_deref()
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or_else(|| VerificationError::Malformed("payment carries no account id".into()))
    }

    fn interval(&self) -> Result<BillingInterval, VerificationError> {
        self.interval
            .as_deref()
            .and_then(BillingInterval::parse)
            .ok_or_else(|| VerificationError::Malformed("payment carries no billing interval".into()))
    }
}

/// key: gateway-checkout-session -> hosted checkout session provider
pub struct CheckoutSessionGateway {
    client: Client,
    base_url: String,
    secret_key: String,
    success_url: Url,
    cancel_url: Url,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: PaymentMetadata,
}

impl CheckoutSessionGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into(),
            secret_key: secret_key.into(),
            success_url: Url::parse(success_url)
                .with_context(|| format!("invalid payment success url `{success_url}`"))?,
            cancel_url: Url::parse(cancel_url)
                .with_context(|| format!("invalid payment cancel url `{cancel_url}`"))?,
        })
    }

    /// The provider substitutes the session id into the literal placeholder, so it
    /// is appended unencoded.
    fn success_url(&self) -> String {
        let separator = if self.success_url.query().is_some() { '&' } else { '?' };
        format!("{}{separator}reference={{CHECKOUT_SESSION_ID}}", self.success_url)
    }
}

#[async_trait]
impl PaymentGateway for CheckoutSessionGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::CheckoutSession
    }

    async fn initialize(&self, request: &CheckoutRequest) -> Result<CheckoutHandle> {
        let account_id = request.account_id.to_string();
        let form = [
            ("mode", "payment".to_string()),
            ("success_url", self.success_url()),
            ("cancel_url", self.cancel_url.to_string()),
            ("customer_email", request.email.clone()),
            ("client_reference_id", account_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                request.currency.code().to_ascii_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                request.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]",
                format!("Premium ({})", request.interval.as_str()),
            ),
            ("metadata[account_id]", account_id),
            ("metadata[interval]", request.interval.as_str().to_string()),
        ];

        let session: CheckoutSessionResponse = self
            .client
            .post(endpoint(&self.base_url, "/v1/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let redirect_url = session
            .url
            .ok_or_else(|| anyhow!("checkout session {} has no redirect url", session.id))?;
        Ok(CheckoutHandle {
            provider: self.provider(),
            reference: session.id,
            redirect_url,
        })
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, VerificationError> {
        validate_reference(reference)?;
        let response = self
            .client
            .get(endpoint(
                &self.base_url,
                &format!("/v1/checkout/sessions/{reference}"),
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(VerificationError::Rejected(format!(
                "unknown checkout session `{reference}`"
            )));
        }
        let session: CheckoutSessionResponse = response.error_for_status()?.json().await?;

        let status = session.payment_status.as_deref().unwrap_or("unknown");
        if status != "paid" {
            return Err(VerificationError::Rejected(format!(
                "checkout session payment status is `{status}`"
            )));
        }

        Ok(VerifiedPayment {
            provider: self.provider(),
            reference: session.id,
            account_id: session.metadata.account_id()?,
            currency: session
                .currency
                .map(|currency| currency.to_ascii_lowercase())
                .unwrap_or_else(|| "cad".to_string()),
            interval: session.metadata.interval()?,
            paid_at: None,
        })
    }
}

/// key: gateway-reference -> initialize/verify-by-reference provider
pub struct ReferenceGateway {
    client: Client,
    base_url: String,
    secret_key: String,
    callback_url: Url,
}

#[derive(Debug, Deserialize)]
struct ProviderEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializedTransaction {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifiedTransaction {
    status: String,
    reference: String,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<PaymentMetadata>,
}

impl ReferenceGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        callback_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into(),
            secret_key: secret_key.into(),
            callback_url: Url::parse(callback_url)
                .with_context(|| format!("invalid payment callback url `{callback_url}`"))?,
        })
    }
}

#[async_trait]
impl PaymentGateway for ReferenceGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::ReferenceVerified
    }

    async fn initialize(&self, request: &CheckoutRequest) -> Result<CheckoutHandle> {
        let reference = format!("qz_{}", Uuid::new_v4().simple());
        let payload = json!({
            "email": request.email,
            "amount": request.amount_minor,
            "currency": request.currency.code(),
            "reference": reference,
            "callback_url": self.callback_url.as_str(),
            "metadata": {
                "account_id": request.account_id.to_string(),
                "interval": request.interval.as_str(),
            },
        });

        let envelope: ProviderEnvelope<InitializedTransaction> = self
            .client
            .post(endpoint(&self.base_url, "/transaction/initialize"))
            .bearer_auth(&self.secret_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let message = envelope.message.unwrap_or_default();
        match envelope.data {
            Some(transaction) if envelope.status => Ok(CheckoutHandle {
                provider: self.provider(),
                reference: transaction.reference,
                redirect_url: transaction.authorization_url,
            }),
            _ => Err(anyhow!("transaction initialize refused: {message}")),
        }
    }

    async fn verify(&self, reference: &str) -> Result<VerifiedPayment, VerificationError> {
        validate_reference(reference)?;
        let response = self
            .client
            .get(endpoint(
                &self.base_url,
                &format!("/transaction/verify/{reference}"),
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND || response.status() == StatusCode::BAD_REQUEST
        {
            return Err(VerificationError::Rejected(format!(
                "unknown transaction reference `{reference}`"
            )));
        }
        let envelope: ProviderEnvelope<VerifiedTransaction> =
            response.error_for_status()?.json().await?;

        let message = envelope.message.unwrap_or_default();
        let transaction = match envelope.data {
            Some(transaction) if envelope.status => transaction,
            _ => return Err(VerificationError::Rejected(message)),
        };
        if transaction.status != "success" {
            return Err(VerificationError::Rejected(format!(
                "transaction status is `{}`",
                transaction.status
            )));
        }

        let metadata = transaction.metadata.unwrap_or_default();
        Ok(VerifiedPayment {
            provider: self.provider(),
            reference: transaction.reference,
            account_id: metadata.account_id()?,
            currency: transaction
                .currency
                .map(|currency| currency.to_ascii_lowercase())
                .unwrap_or_else(|| "ngn".to_string()),
            interval: metadata.interval()?,
            paid_at: transaction.paid_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_plain_tokens() {
        assert!(validate_reference("cs_test_a1B2c3").is_ok());
        assert!(validate_reference("qz_5f0e.retry-1").is_ok());
        assert!(validate_reference("").is_err());
        assert!(validate_reference("../admin").is_err());
        assert!(validate_reference("ref?x=1").is_err());
        assert!(validate_reference(&"a".repeat(MAX_REFERENCE_LEN + 1)).is_err());
    }

    #[test]
    fn success_url_keeps_placeholder_literal() {
        let gateway = CheckoutSessionGateway::new(
            "http://localhost:1",
            "sk_test",
            "https://app.test/billing/return?provider=checkout_session",
            "https://app.test/billing",
        )
        .unwrap();
        assert_eq!(
            gateway.success_url(),
            "https://app.test/billing/return?provider=checkout_session&reference={CHECKOUT_SESSION_ID}"
        );
    }

    #[test]
    fn bad_callback_url_is_rejected() {
        assert!(ReferenceGateway::new("http://localhost:1", "sk", "not a url").is_err());
    }
}
