use once_cell::sync::Lazy;
use std::fs;

use crate::pricing::Currency;

/// Secret used to verify caller JWTs. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Postgres => "postgres",
            StorageBackend::Memory => "memory",
        }
    }
}

fn parse_storage_backend() -> StorageBackend {
    match std::env::var("STORAGE_BACKEND") {
        Ok(raw) => {
            let normalized = raw.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "" | "postgres" => StorageBackend::Postgres,
                "memory" => StorageBackend::Memory,
                other => panic!(
                    "unsupported STORAGE_BACKEND value '{other}'; expected 'postgres' or 'memory'"
                ),
            }
        }
        Err(_) => StorageBackend::Postgres,
    }
}

/// Where accounts, questions and subscriptions live. Defaults to `postgres`.
pub static STORAGE_BACKEND: Lazy<StorageBackend> = Lazy::new(parse_storage_backend);

/// JSON file with accounts and questions loaded into the `memory` backend at start-up.
pub static MEMORY_SEED_FILE: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("MEMORY_SEED_FILE"));

/// Connection string for the Postgres backend.
pub static DATABASE_URL: Lazy<Option<String>> = Lazy::new(|| read_optional_env("DATABASE_URL"));

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// key: quota-config -> offset of the quota day from UTC, in minutes
pub static QUOTA_DAY_UTC_OFFSET_MINUTES: Lazy<i32> = Lazy::new(|| {
    std::env::var("QUOTA_DAY_UTC_OFFSET_MINUTES")
        .ok()
        .and_then(|value| value.trim().parse::<i32>().ok())
        .filter(|value| value.abs() < 24 * 60)
        .unwrap_or(0)
});

/// key: billing-config -> provider call deadline
pub static PAYMENT_VERIFY_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PAYMENT_VERIFY_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(15)
});

pub static CHECKOUT_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("CHECKOUT_API_BASE").unwrap_or_else(|| "https://api.stripe.com".to_string())
});

/// Secret key for the checkout-session provider. Read from `CHECKOUT_SECRET_KEY_FILE` when set.
pub static CHECKOUT_SECRET_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_secret_env("CHECKOUT_SECRET_KEY", "CHECKOUT_SECRET_KEY_FILE"));

/// Signing secret for checkout-session webhooks.
pub static CHECKOUT_WEBHOOK_SECRET: Lazy<Option<String>> =
    Lazy::new(|| read_secret_env("CHECKOUT_WEBHOOK_SECRET", "CHECKOUT_WEBHOOK_SECRET_FILE"));

pub static REFERENCE_API_BASE: Lazy<String> = Lazy::new(|| {
    read_optional_env("REFERENCE_API_BASE").unwrap_or_else(|| "https://api.paystack.co".to_string())
});

/// Secret key for the reference provider; it also signs that provider's webhooks.
pub static REFERENCE_SECRET_KEY: Lazy<Option<String>> =
    Lazy::new(|| read_secret_env("REFERENCE_SECRET_KEY", "REFERENCE_SECRET_KEY_FILE"));

pub static PAYMENT_SUCCESS_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("PAYMENT_SUCCESS_URL")
        .unwrap_or_else(|| "http://localhost:3000/billing/return".to_string())
});

pub static PAYMENT_CANCEL_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("PAYMENT_CANCEL_URL")
        .unwrap_or_else(|| "http://localhost:3000/billing".to_string())
});

/// ipapi-style lookup service used for price display. Unset means fixed fallback currency.
pub static GEOLOCATION_ENDPOINT: Lazy<Option<String>> =
    Lazy::new(|| read_optional_env("GEOLOCATION_ENDPOINT"));

/// Currency shown when geolocation is unavailable. Defaults to `ngn`.
pub static FALLBACK_CURRENCY: Lazy<Currency> = Lazy::new(|| {
    read_optional_env("FALLBACK_CURRENCY")
        .and_then(|value| Currency::parse(&value))
        .unwrap_or(Currency::Ngn)
});

/// key: billing-config -> expiry sweep cadence
pub static SUBSCRIPTION_EXPIRY_SCAN_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("SUBSCRIPTION_EXPIRY_SCAN_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(300)
});

/// How long finished quiz sessions stay addressable. Defaults to one hour.
pub static SESSION_RETENTION_SECS: Lazy<i64> = Lazy::new(|| {
    std::env::var("SESSION_RETENTION_SECS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3600)
});

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_secret_env(value_key: &str, file_key: &str) -> Option<String> {
    if let Some(path) = read_optional_env(file_key) {
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let trimmed = contents.trim().to_string();
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
            Err(err) => panic!("failed to read {file_key} from {path}: {err}"),
        }
    }

    read_optional_env(value_key)
}
