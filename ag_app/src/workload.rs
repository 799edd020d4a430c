use std::sync::Arc;
use std::time::Duration;

use ag_limiter::RateLimitError;
use ag_limiter::RateLimiter;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Outcome of a batch of rate-limited submissions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    pub completed: u32,
    pub cancelled: u32,
    pub rejected: u32,
    /// Time from the first submission to the last completion
    pub elapsed: Duration,
}

/// Issue `operations` simulated submissions through `limiter`
///
/// Each submission waits for admission, then sleeps for `work` to stand in for
/// the downstream call. A message on `shutdown` abandons every submission still
/// waiting for a permit.
pub async fn submit_all(limiter: Arc<RateLimiter>, operations: u32, work: Duration, shutdown: &broadcast::Sender<()>) -> WorkloadReport {
    let start = Instant::now();

    let handles: Vec<_> = (0..operations)
        .map(|id| {
            let limiter = Arc::clone(&limiter);
            let mut cancel = shutdown.subscribe();
            tokio::spawn(async move {
                let submitted = Instant::now();
                let result = limiter
                    .run_with_cancel(cancel.recv(), async {
                        debug!("Submission {} admitted after {:?}", id, submitted.elapsed());
                        tokio::time::sleep(work).await;
                    })
                    .await;
                if result.is_ok() {
                    info!("Submission {} completed at +{:?}", id, start.elapsed());
                }
                result
            })
        })
        .collect();

    let mut report = WorkloadReport::default();
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => report.completed += 1,
            Ok(Err(RateLimitError::AcquireCancelled)) => report.cancelled += 1,
            Ok(Err(err)) => {
                warn!("Submission rejected: {err}");
                report.rejected += 1;
            }
            Err(err) => {
                warn!("Submission task failed: {err}");
                report.rejected += 1;
            }
        }
    }
    report.elapsed = start.elapsed();
    report
}
