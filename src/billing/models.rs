use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pricing::Currency;

/// key: billing-provider -> the two payment integrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    /// Hosted checkout session, confirmed by looking the session up.
    CheckoutSession,
    /// Initialize-then-verify flow keyed by a transaction reference.
    ReferenceVerified,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::CheckoutSession => "checkout_session",
            PaymentProvider::ReferenceVerified => "reference_verified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "checkout_session" => Some(PaymentProvider::CheckoutSession),
            "reference_verified" => Some(PaymentProvider::ReferenceVerified),
            _ => None,
        }
    }

    /// Provider used when the caller does not pick one: naira goes through the
    /// reference flow, everything else through hosted checkout.
    pub fn for_currency(currency: Currency) -> Self {
        match currency {
            Currency::Ngn => PaymentProvider::ReferenceVerified,
            Currency::Cad => PaymentProvider::CheckoutSession,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "month" | "monthly" => Some(BillingInterval::Month),
            "year" | "yearly" | "annual" => Some(BillingInterval::Year),
            _ => None,
        }
    }

    /// Length of one paid period.
    pub fn period(&self) -> Duration {
        match self {
            BillingInterval::Month => Duration::days(30),
            BillingInterval::Year => Duration::days(365),
        }
    }
}

/// key: subscription-event -> provider payment normalized for the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub provider: PaymentProvider,
    pub provider_reference: String,
    pub account_id: Uuid,
    pub currency: String,
    pub interval: BillingInterval,
    /// Set only once the payment was looked up with the provider server-side.
    pub verified_at: Option<DateTime<Utc>>,
}

/// key: subscription-record -> one per account, extended or expired, never deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub account_id: Uuid,
    pub is_premium: bool,
    pub current_period_end: DateTime<Utc>,
    pub applied_references: BTreeSet<String>,
    pub last_provider: PaymentProvider,
    pub currency: String,
    pub interval: BillingInterval,
}

impl SubscriptionRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_premium && self.current_period_end > now
    }
}

/// Provider-confirmed payment details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedPayment {
    pub provider: PaymentProvider,
    pub reference: String,
    pub account_id: Uuid,
    pub currency: String,
    pub interval: BillingInterval,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub account_id: Uuid,
    pub email: String,
    pub currency: Currency,
    pub interval: BillingInterval,
    pub amount_minor: i64,
}

/// Where to send the user to pay, and the reference to verify afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutHandle {
    pub provider: PaymentProvider,
    pub reference: String,
    pub redirect_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_periods_are_fixed() {
        assert_eq!(BillingInterval::Month.period(), Duration::days(30));
        assert_eq!(BillingInterval::Year.period(), Duration::days(365));
        assert_eq!(BillingInterval::parse("Yearly"), Some(BillingInterval::Year));
        assert_eq!(BillingInterval::parse("weekly"), None);
    }

    #[test]
    fn provider_names_round_trip() {
        for provider in [PaymentProvider::CheckoutSession, PaymentProvider::ReferenceVerified] {
            assert_eq!(PaymentProvider::parse(provider.as_str()), Some(provider));
        }
        assert_eq!(
            PaymentProvider::for_currency(Currency::Ngn),
            PaymentProvider::ReferenceVerified
        );
    }
}
