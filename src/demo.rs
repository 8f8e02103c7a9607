//! Simulated network fetch used by the demo binary, benchmarks and tests.

use rand::Rng;
use thiserror::Error;
use tokio::time::Duration;


#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("network error for {url}")]
pub struct FetchError {
    pub url: String,
}

/// Pretends to fetch a URL: sleeps a random delay in `min_delay..=max_delay`
/// and fails with probability `failure_rate`.
#[derive(Debug, Clone)]
pub struct SimulatedFetch {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub failure_rate: f64,
}

impl Default for SimulatedFetch {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            failure_rate: 0.0,
        }
    }
}

impl SimulatedFetch {
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min.min(max);
        self.max_delay = max.max(min);
        self
    }

    pub async fn fetch(&self, url: String) -> Result<String, FetchError> {
        // ThreadRng is !Send, keep it out of the await
        let (delay, fails) = {
            let mut rng = rand::thread_rng();
            let min = self.min_delay.as_millis() as u64;
            let max = self.max_delay.as_millis() as u64;
            let delay = Duration::from_millis(rng.gen_range(min..=max));
            (delay, rng.gen_bool(self.failure_rate))
        };

        tokio::time::sleep(delay).await;

        if fails {
            return Err(FetchError { url });
        }
        Ok(format!("data from {url} (fetched in {delay:?})"))
    }
}


/// Default URL list of the demo.
pub fn sample_urls(count: usize) -> Vec<String> {
    const HOSTS: [&str; 9] = [
        "https://example.com",
        "https://google.com",
        "https://github.com",
        "https://stackoverflow.com",
        "https://golang.org",
        "https://medium.com",
        "https://dev.to",
        "https://reddit.com",
        "https://news.ycombinator.com",
    ];
    (0..count)
        .map(|i| format!("{}/{}", HOSTS[i % HOSTS.len()], i / HOSTS.len()))
        .collect()
}
