pub mod adapters;
pub mod api;
pub mod ledger;
pub mod models;
pub mod reconciliation;
pub mod scheduler;
pub mod store;

pub use adapters::{
    validate_reference, CheckoutSessionGateway, PaymentGateway, ReferenceGateway,
    VerificationError,
};
pub use api::{
    get_pricing as billing_get_pricing, get_subscription as billing_get_subscription,
    start_checkout as billing_start_checkout, verify_payment as billing_verify_payment,
    CheckoutPayload, SubscriptionEnvelope, VerifyPayload,
};
pub use ledger::{next_period_end, LedgerError, SubscriptionLedger};
pub use models::{
    BillingInterval, CheckoutHandle, CheckoutRequest, PaymentProvider, SubscriptionEvent,
    SubscriptionRecord, VerifiedPayment,
};
pub use reconciliation::{
    start_reconciliation_worker, PaymentReconciler, ReconciliationHandle, ReconciliationJob,
};
pub use scheduler::{
    process_tick as run_subscription_expiry_tick, spawn as spawn_subscription_expiry_scheduler,
};
pub use store::{InMemorySubscriptionStore, PgSubscriptionStore, SubscriptionStore};
