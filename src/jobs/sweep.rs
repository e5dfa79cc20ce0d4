//! Background sweep: hourly, drops rate-limit buckets idle past an hour and
//! idempotency records past their TTL. Both structures already expire lazily
//! on access; the sweep reclaims the entries nobody touches again.

use std::sync::Arc;
use std::time::Duration;

use crate::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const BUCKET_IDLE: Duration = Duration::from_secs(3600);

pub fn spawn(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let buckets = state.limiter.evict_idle(BUCKET_IDLE);
            let records = state.idempotency.evict_expired();
            tracing::info!(
                evicted_buckets = buckets,
                evicted_idempotency_records = records,
                remaining_buckets = state.limiter.len(),
                remaining_idempotency_records = state.idempotency.len(),
                "sweep completed"
            );
        }
    });
}
