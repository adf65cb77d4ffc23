use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{self, Duration as TokioDuration};
use tracing::{debug, info, warn};

use super::ledger::{LedgerError, SubscriptionLedger};

/// key: subscription-expiry-scheduler -> downgrade lapsed subscriptions
pub fn spawn(ledger: Arc<SubscriptionLedger>, interval_secs: u64) {
    let interval = TokioDuration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            let now = ledger.clock().now();
            if let Err(err) = process_tick(&ledger, now).await {
                warn!(error = %err, "subscription expiry tick failed");
            }
        }
    });
}

/// key: subscription-expiry-scheduler -> tick handler
pub async fn process_tick(
    ledger: &SubscriptionLedger,
    now: DateTime<Utc>,
) -> Result<usize, LedgerError> {
    let expired = ledger.expire_lapsed(now).await?;
    if expired > 0 {
        info!(expired, "expired lapsed subscriptions");
    } else {
        debug!("no lapsed subscriptions");
    }
    Ok(expired)
}
