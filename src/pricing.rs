use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::billing::BillingInterval;

/// key: pricing-currency -> display currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Ngn,
    Cad,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Ngn => "NGN",
            Currency::Cad => "CAD",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Ngn => "₦",
            Currency::Cad => "$",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ngn" => Some(Currency::Ngn),
            "cad" => Some(Currency::Cad),
            _ => None,
        }
    }

    pub fn for_country(country_code: &str) -> Self {
        if country_code.eq_ignore_ascii_case("NG") {
            Currency::Ngn
        } else {
            Currency::Cad
        }
    }
}

/// Price of one period in minor units (kobo, cents).
pub fn price_minor(currency: Currency, interval: BillingInterval) -> i64 {
    match (currency, interval) {
        (Currency::Ngn, BillingInterval::Month) => 150_000,
        (Currency::Ngn, BillingInterval::Year) => 1_000_000,
        (Currency::Cad, BillingInterval::Month) => 399,
        (Currency::Cad, BillingInterval::Year) => 3_000,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub currency: Currency,
    pub symbol: &'static str,
    pub month_minor: i64,
    pub year_minor: i64,
    /// What paying yearly saves over twelve monthly payments.
    pub yearly_saving_minor: i64,
}

pub fn quote(currency: Currency) -> PriceQuote {
    let month_minor = price_minor(currency, BillingInterval::Month);
    let year_minor = price_minor(currency, BillingInterval::Year);
    PriceQuote {
        currency,
        symbol: currency.symbol(),
        month_minor,
        year_minor,
        yearly_saving_minor: (month_minor * 12 - year_minor).max(0),
    }
}

/// key: currency-resolver -> geolocation collaborator, display only
#[async_trait]
pub trait CurrencyResolver: Send + Sync {
    /// Never fails: lookup problems resolve to the fallback currency.
    async fn resolve(&self, client_ip: Option<IpAddr>) -> Currency;
}

/// Always answers with one currency.
#[derive(Debug, Clone, Copy)]
pub struct FixedCurrencyResolver(pub Currency);

#[async_trait]
impl CurrencyResolver for FixedCurrencyResolver {
    async fn resolve(&self, _client_ip: Option<IpAddr>) -> Currency {
        self.0
    }
}

#[derive(Debug, Deserialize)]
struct GeoLookup {
    country_code: Option<String>,
}

/// Looks the caller's country up with an ipapi-style `/{ip}/json/` endpoint.
pub struct GeoIpCurrencyResolver {
    endpoint: String,
    fallback: Currency,
    client: Client,
}

impl GeoIpCurrencyResolver {
    pub fn new(endpoint: impl Into<String>, fallback: Currency) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            fallback,
            client: Client::builder().timeout(Duration::from_secs(3)).build()?,
        })
    }

    async fn lookup(&self, client_ip: Option<IpAddr>) -> anyhow::Result<Option<String>> {
        let url = match client_ip {
            Some(ip) => format!("{}/{ip}/json/", self.endpoint),
            None => format!("{}/json/", self.endpoint),
        };
        let lookup: GeoLookup = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(lookup.country_code)
    }
}

#[async_trait]
impl CurrencyResolver for GeoIpCurrencyResolver {
    async fn resolve(&self, client_ip: Option<IpAddr>) -> Currency {
        match self.lookup(client_ip).await {
            Ok(Some(country)) => Currency::for_country(&country),
            Ok(None) => self.fallback,
            Err(err) => {
                warn!(?err, fallback = self.fallback.code(), "currency lookup failed");
                self.fallback
            }
        }
    }
}
