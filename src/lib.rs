pub mod accounts;
pub mod billing;
pub mod clock;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod extractor;
pub mod pricing;
pub mod quiz;
pub mod routes;
pub mod seed;
pub mod webhooks;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use entitlement::{EntitlementPolicy, QuotaDecision, QuotaExhausted};
pub use error::{AppError, AppResult};
pub use routes::{api_routes, Services};
