use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::error::HarvestError;
use crate::transport::HttpTransport;

/// Enforces a minimum spacing between outbound submissions across all workers.
///
/// Each caller reserves the next free slot under the lock and sleeps outside
/// of it, so slots stay `min_interval` apart no matter how many workers wait.
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    last_issued: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_issued: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn acquire(&self) {
        let slot = {
            let mut last = self
                .last_issued
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = match *last {
                Some(previous) => (previous + self.min_interval).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };
        let now = Instant::now();
        if slot > now {
            thread::sleep(slot - now);
        }
    }
}

/// Concurrency and gate interval derived from a measured round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub concurrency: usize,
    pub interval: Duration,
}

impl Pacing {
    pub fn for_latency(round_trip: Duration) -> Self {
        let millis = round_trip.as_millis();
        if millis < 60 {
            Self {
                concurrency: 20,
                interval: Duration::from_millis(100),
            }
        } else if millis < 100 {
            Self {
                concurrency: 15,
                interval: Duration::from_millis(200),
            }
        } else {
            Self {
                concurrency: 10,
                interval: Duration::from_millis(300),
            }
        }
    }
}

/// Times a single lookup round trip against the service, without retries.
pub fn probe_latency<T: HttpTransport>(
    transport: &T,
    base_url: &str,
) -> Result<Duration, HarvestError> {
    let url = format!("{base_url}/compound/name/water/cids/JSON");
    let start = Instant::now();
    let response = transport
        .get(&url)
        .map_err(|err| HarvestError::Transport {
            status: None,
            reason: err.message,
        })?;
    let elapsed = start.elapsed();
    info!(
        status = response.status,
        latency_ms = elapsed.as_millis() as u64,
        "latency probe finished"
    );
    Ok(elapsed)
}
