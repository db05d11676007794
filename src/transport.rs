use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::HarvestError;

/// A response whose body has not been read yet.
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Failure below the HTTP layer: DNS, connect, timeout, reset.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub message: String,
    pub retryable: bool,
}

pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, ConnectionError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn get(&self, url: &str) -> Result<HttpResponse, ConnectionError> {
        (**self).get(url)
    }
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pug-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::Transport {
                status: None,
                reason: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, ConnectionError> {
        let response = self.client.get(url).send().map_err(|err| ConnectionError {
            retryable: is_retryable_error(&err),
            message: err.to_string(),
        })?;
        let status = response.status();
        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            body: Box::new(response),
        })
    }
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Wraps a transport with bounded retry and exponential backoff.
///
/// Non-2xx responses that are not in the policy's retryable set are returned
/// as errors immediately. Once attempts are exhausted the last observed status
/// and reason are carried in [`HarvestError::Transport`].
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: HttpTransport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn execute(&self, url: &str) -> Result<HttpResponse, HarvestError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self.inner.get(url) {
                Ok(response) if response.is_success() => {
                    if attempt > 1 {
                        debug!(url, attempts = attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let retryable = self.policy.is_retryable_status(response.status);
                    let error = HarvestError::Transport {
                        status: Some(response.status),
                        reason: response.reason,
                    };
                    (error, retryable)
                }
                Err(err) => (
                    HarvestError::Transport {
                        status: None,
                        reason: err.message,
                    },
                    err.retryable,
                ),
            };

            let (error, retryable) = failure;
            if !retryable || attempt >= max_attempts {
                return Err(error);
            }
            let delay = self.policy.delay_for(attempt);
            warn!(
                url,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient failure, retrying"
            );
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    struct Scripted {
        statuses: Mutex<Vec<u16>>,
        calls: Mutex<usize>,
    }

    impl HttpTransport for Scripted {
        fn get(&self, _url: &str) -> Result<HttpResponse, ConnectionError> {
            *self.calls.lock().unwrap() += 1;
            let status = self.statuses.lock().unwrap().remove(0);
            Ok(HttpResponse {
                status,
                reason: "scripted".to_string(),
                body: Box::new(Cursor::new(Vec::new())),
            })
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn client_errors_are_not_retried() {
        let transport = RetryingTransport::new(
            Scripted {
                statuses: Mutex::new(vec![400, 200]),
                calls: Mutex::new(0),
            },
            fast_policy(5),
        );
        let err = transport.execute("http://test/x").unwrap_err();
        assert_matches!(err, HarvestError::Transport { status: Some(400), .. });
        assert_eq!(*transport.inner().calls.lock().unwrap(), 1);
    }
}
