use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;

use pug_harvest::error::HarvestError;
use pug_harvest::rate_gate::{Pacing, RateGate, probe_latency};
use pug_harvest::transport::{ConnectionError, HttpResponse, HttpTransport};

/// Answers after a fixed delay, or fails at the connection level.
struct SlowService {
    delay: Duration,
    reachable: bool,
    urls: Mutex<Vec<String>>,
}

impl SlowService {
    fn new(delay: Duration, reachable: bool) -> Self {
        Self {
            delay,
            reachable,
            urls: Mutex::new(Vec::new()),
        }
    }
}

impl HttpTransport for SlowService {
    fn get(&self, url: &str) -> Result<HttpResponse, ConnectionError> {
        self.urls.lock().unwrap().push(url.to_string());
        thread::sleep(self.delay);
        if !self.reachable {
            return Err(ConnectionError {
                message: "connection timed out".to_string(),
                retryable: true,
            });
        }
        Ok(HttpResponse {
            status: 200,
            reason: "OK".to_string(),
            body: Box::new(Cursor::new(br#"{"IdentifierList":{"CID":[962]}}"#.to_vec())),
        })
    }
}

#[test]
fn sequential_acquires_are_spaced() {
    let interval = Duration::from_millis(30);
    let gate = RateGate::new(interval);
    let start = Instant::now();
    for _ in 0..5 {
        gate.acquire();
    }
    assert!(start.elapsed() >= interval * 4);
}

#[test]
fn concurrent_acquires_share_one_schedule() {
    let interval = Duration::from_millis(20);
    let gate = Arc::new(RateGate::new(interval));
    let start = Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                for _ in 0..3 {
                    gate.acquire();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    // 12 slots, the first one free.
    assert!(start.elapsed() >= interval * 11);
}

#[test]
fn zero_interval_never_blocks() {
    let gate = RateGate::new(Duration::ZERO);
    let start = Instant::now();
    for _ in 0..1000 {
        gate.acquire();
    }
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn pacing_boundaries() {
    assert_eq!(
        Pacing::for_latency(Duration::from_millis(59)),
        Pacing {
            concurrency: 20,
            interval: Duration::from_millis(100)
        }
    );
    assert_eq!(
        Pacing::for_latency(Duration::from_millis(60)),
        Pacing {
            concurrency: 15,
            interval: Duration::from_millis(200)
        }
    );
    assert_eq!(Pacing::for_latency(Duration::from_millis(100)).concurrency, 10);
}

#[test]
fn latency_probe_times_one_lookup() {
    let service = SlowService::new(Duration::from_millis(40), true);
    let round_trip = probe_latency(&service, "http://pubchem.test/rest/pug").unwrap();

    assert!(round_trip >= Duration::from_millis(40));
    let urls = service.urls.lock().unwrap();
    assert_eq!(
        *urls,
        vec!["http://pubchem.test/rest/pug/compound/name/water/cids/JSON".to_string()]
    );
}

#[test]
fn latency_probe_does_not_retry_connection_errors() {
    let service = SlowService::new(Duration::ZERO, false);
    let err = probe_latency(&service, "http://pubchem.test/rest/pug").unwrap_err();

    assert_matches!(
        err,
        HarvestError::Transport { status: None, ref reason } if reason == "connection timed out"
    );
    assert_eq!(service.urls.lock().unwrap().len(), 1);
}
