use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc::{channel, Sender};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::adapters::{PaymentGateway, VerificationError};
use super::ledger::{LedgerError, SubscriptionLedger};
use super::models::{CheckoutHandle, CheckoutRequest, PaymentProvider, SubscriptionEvent, SubscriptionRecord};

/// key: payment-reconciler -> verify with the provider, then apply through the ledger
pub struct PaymentReconciler {
    ledger: Arc<SubscriptionLedger>,
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
    verify_timeout: Duration,
}

impl PaymentReconciler {
    pub fn new(ledger: Arc<SubscriptionLedger>, verify_timeout: Duration) -> Self {
        Self {
            ledger,
            gateways: HashMap::new(),
            verify_timeout,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn ledger(&self) -> &Arc<SubscriptionLedger> {
        &self.ledger
    }

    fn gateway(&self, provider: PaymentProvider) -> Result<&Arc<dyn PaymentGateway>, LedgerError> {
        self.gateways
            .get(&provider)
            .ok_or(LedgerError::UnsupportedProvider(provider))
    }

    pub async fn initialize(
        &self,
        provider: PaymentProvider,
        request: &CheckoutRequest,
    ) -> Result<CheckoutHandle, LedgerError> {
        let gateway = self.gateway(provider)?;
        match timeout(self.verify_timeout, gateway.initialize(request)).await {
            Ok(Ok(handle)) => {
                info!(
                    account_id = %request.account_id,
                    provider = provider.as_str(),
                    reference = %handle.reference,
                    interval = request.interval.as_str(),
                    "checkout initialized"
                );
                Ok(handle)
            }
            Ok(Err(err)) => {
                warn!(?err, account_id = %request.account_id, provider = provider.as_str(), "checkout initialize failed");
                Err(LedgerError::CheckoutUnavailable {
                    provider,
                    reason: err.to_string(),
                })
            }
            Err(_) => Err(LedgerError::VerificationTimeout(provider)),
        }
    }

    /// Confirms a payment server-side and applies it.
    ///
    /// `expected_account` is the caller on the client return path; webhooks pass
    /// `None` and trust the account recorded with the provider. A reference that
    /// was already applied is answered from the ledger without calling out.
    pub async fn confirm(
        &self,
        provider: PaymentProvider,
        reference: &str,
        expected_account: Option<Uuid>,
    ) -> Result<SubscriptionRecord, LedgerError> {
        if let Some(record) = self.ledger.find_applied(reference).await? {
            if expected_account.map_or(false, |account_id| account_id != record.account_id) {
                return Err(LedgerError::ReferenceConflict);
            }
            return self.ledger.apply(replay_event(provider, reference, &record)).await;
        }

        let gateway = self.gateway(provider)?;
        let payment = match timeout(self.verify_timeout, gateway.verify(reference)).await {
            Ok(Ok(payment)) => payment,
            Ok(Err(err)) => {
                warn!(%reference, provider = provider.as_str(), error = %err, "payment verification failed");
                return Err(verification_failed(provider, err));
            }
            Err(_) => {
                warn!(%reference, provider = provider.as_str(), "payment verification timed out");
                return Err(LedgerError::VerificationTimeout(provider));
            }
        };

        if payment.reference != reference {
            return Err(LedgerError::VerificationFailed {
                provider,
                reason: format!(
                    "provider answered for reference `{}` instead of `{reference}`",
                    payment.reference
                ),
            });
        }
        if let Some(account_id) = expected_account {
            if account_id != payment.account_id {
                warn!(%reference, %account_id, paid_by = %payment.account_id, "payment belongs to another account");
                return Err(LedgerError::AccountMismatch);
            }
        }

        let verified_at = self.ledger.clock().now();
        self.ledger
            .apply(SubscriptionEvent {
                provider,
                provider_reference: payment.reference,
                account_id: payment.account_id,
                currency: payment.currency,
                interval: payment.interval,
                verified_at: Some(verified_at),
            })
            .await
    }
}

fn verification_failed(provider: PaymentProvider, err: VerificationError) -> LedgerError {
    LedgerError::VerificationFailed {
        provider,
        reason: err.to_string(),
    }
}

/// Event for a reference the ledger already holds; `apply` short-circuits on it.
fn replay_event(
    provider: PaymentProvider,
    reference: &str,
    record: &SubscriptionRecord,
) -> SubscriptionEvent {
    SubscriptionEvent {
        provider,
        provider_reference: reference.to_string(),
        account_id: record.account_id,
        currency: record.currency.clone(),
        interval: record.interval,
        verified_at: None,
    }
}

/// key: billing-reconciliation -> background worker for provider callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationJob {
    Verify {
        provider: PaymentProvider,
        reference: String,
    },
}

/// key: billing-reconciliation-handle -> enqueue interface
#[derive(Clone)]
pub struct ReconciliationHandle {
    sender: Sender<ReconciliationJob>,
}

impl ReconciliationHandle {
    pub async fn dispatch(&self, job: ReconciliationJob) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|err| anyhow!("failed to enqueue billing reconciliation job: {err}"))
    }
}

pub fn start_reconciliation_worker(reconciler: Arc<PaymentReconciler>) -> ReconciliationHandle {
    let (tx, mut rx) = channel(64);
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                ReconciliationJob::Verify {
                    provider,
                    reference,
                } => match reconciler.confirm(provider, &reference, None).await {
                    Ok(record) => info!(
                        account_id = %record.account_id,
                        provider = provider.as_str(),
                        %reference,
                        period_end = %record.current_period_end,
                        "webhook payment reconciled"
                    ),
                    Err(LedgerError::Store(err)) => error!(
                        ?err,
                        provider = provider.as_str(),
                        %reference,
                        "failed to persist webhook payment"
                    ),
                    Err(err) => warn!(
                        error = %err,
                        provider = provider.as_str(),
                        %reference,
                        "webhook payment not applied"
                    ),
                },
            }
        }
    });

    ReconciliationHandle { sender: tx }
}
