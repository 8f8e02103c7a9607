use super::errors::LifecycleError;
use tokio::{
    sync::Mutex,
    time::{Duration, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;


/// Paces hand-off of tasks to workers: at most one admission per `period`.
///
/// The first admission is immediate. After a late admission the next slot is
/// anchored a full period later, so slow callers never produce a burst.
pub(crate) struct RateGate {
    period: Duration,
    ticker: Mutex<Interval>,
}

impl RateGate {
    /// Must be called from within a tokio runtime.
    pub fn new(period: Duration) -> Self {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            period,
            ticker: Mutex::new(ticker),
        }
    }

    pub async fn admit(&self, cancel: &CancellationToken) -> Result<(), LifecycleError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LifecycleError::Cancelled),
            _ = async {
                self.ticker.lock().await.tick().await;
            } => Ok(()),
        }
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn admissions_are_spaced() {
        let gate = RateGate::new(Duration::from_millis(40));
        let token = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..4 {
            gate.admit(&token).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn first_admission_is_immediate() {
        let gate = RateGate::new(Duration::from_secs(5));
        let token = CancellationToken::new();

        let start = Instant::now();
        gate.admit(&token).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancel_releases_waiters() {
        let gate = Arc::new(RateGate::new(Duration::from_secs(60)));
        let token = CancellationToken::new();
        gate.admit(&token).await.unwrap();

        let g = gate.clone();
        let t = token.clone();
        let waiter = tokio::spawn(async move { g.admit(&t).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        let res = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert_eq!(res.unwrap().unwrap(), Err(LifecycleError::Cancelled));
    }
}
