use std::future::Future;
use std::time::Duration;

use crate::services::scraper::{RegistryRecord, ScrapeError};

/// Terminal outcome of one supervised scrape.
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(RegistryRecord),
    Failed(ScrapeError),
    TimedOut,
}

/// Race `work` against a hard deadline.
///
/// On expiry the scrape future is dropped, which tears down its browser
/// session through the session guard and discards anything it was about
/// to produce. A timed-out job cannot reach the cache or the caller.
pub async fn run_with_deadline<F>(hard_timeout: Duration, work: F) -> JobOutcome
where
    F: Future<Output = Result<RegistryRecord, ScrapeError>>,
{
    match tokio::time::timeout(hard_timeout, work).await {
        Ok(Ok(record)) => JobOutcome::Succeeded(record),
        Ok(Err(err)) => JobOutcome::Failed(err),
        Err(_) => JobOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn completes_before_deadline() {
        let outcome = run_with_deadline(Duration::from_secs(150), async {
            Ok(RegistryRecord::default())
        })
        .await;
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn propagates_failure() {
        let outcome = run_with_deadline(Duration::from_secs(150), async {
            Err(ScrapeError::Navigation("connection refused".to_string()))
        })
        .await;
        assert!(matches!(outcome, JobOutcome::Failed(ScrapeError::Navigation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_work_times_out_and_is_dropped() {
        struct DropFlag(std::sync::Arc<std::sync::atomic::AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let dropped = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let outcome = run_with_deadline(Duration::from_millis(150_000), async move {
            let _flag = flag;
            std::future::pending::<()>().await;
            Ok(RegistryRecord::default())
        })
        .await;

        assert!(matches!(outcome, JobOutcome::TimedOut));
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }
}
