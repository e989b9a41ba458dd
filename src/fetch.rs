use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{info, warn};

use crate::http_client::http_client;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("not found: {url}")]
    NotFound { url: String },
    #[error("http {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("cannot request {url}: {message}")]
    InvalidRequest { url: String, message: String },
    #[error("connection failure on {url}: {message}")]
    Transient { url: String, message: String },
    #[error("gave up on {url} after {attempts} attempts: {message}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        message: String,
    },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// One GET, no retries. Connection problems map to `FetchError::Transient`,
/// any non-success status to `NotFound`/`Status`, a request that cannot be
/// built (bad url) to `InvalidRequest`.
pub trait Transport {
    fn get(&self, url: &str) -> Result<String, FetchError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str) -> Result<String, FetchError> {
        (**self).get(url)
    }
}

pub struct HttpTransport {
    client: &'static Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: http_client()?,
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<String, FetchError> {
        let transient = |err: reqwest::Error| FetchError::Transient {
            url: url.to_string(),
            message: err.to_string(),
        };
        let resp = self.client.get(url).send().map_err(|err| {
            if err.is_builder() {
                FetchError::InvalidRequest {
                    url: url.to_string(),
                    message: err.to_string(),
                }
            } else {
                transient(err)
            }
        })?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().map_err(transient)
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub delay: Duration,
    /// Retries allowed after the first failed attempt. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl BackoffPolicy {
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_retries: None,
        }
    }

    pub fn bounded(delay: Duration, max_retries: u32) -> Self {
        Self {
            delay,
            max_retries: Some(max_retries),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::unbounded(DEFAULT_RETRY_DELAY)
    }
}

pub struct PageFetcher<T, S = ThreadSleeper> {
    transport: T,
    sleeper: S,
    policy: BackoffPolicy,
}

impl<T: Transport, S: Sleeper> PageFetcher<T, S> {
    pub fn new(transport: T, sleeper: S, policy: BackoffPolicy) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    pub fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_with_retries(url, self.policy.max_retries)
    }

    pub fn fetch_with_retries(
        &self,
        url: &str,
        max_retries: Option<u32>,
    ) -> Result<String, FetchError> {
        let mut retries = 0u32;
        loop {
            let message = match self.transport.get(url) {
                Ok(body) => return Ok(body),
                Err(FetchError::Transient { message, .. }) => message,
                Err(err) => return Err(err),
            };
            warn!(url, %message, "connection timeout");

            if let Some(max) = max_retries {
                if retries >= max {
                    return Err(FetchError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: retries + 1,
                        message,
                    });
                }
                info!(
                    remaining = max - retries,
                    delay_secs = self.policy.delay.as_secs(),
                    "retrying"
                );
            } else {
                info!(delay_secs = self.policy.delay.as_secs(), "retrying");
            }

            self.sleeper.sleep(self.policy.delay);
            retries += 1;
        }
    }
}

pub fn save_page(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    fs::write(path, body).with_context(|| format!("write page snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use super::*;

    struct Scripted {
        replies: RefCell<VecDeque<Result<String, FetchError>>>,
        calls: Cell<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, FetchError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                calls: Cell::new(0),
            }
        }
    }

    impl Transport for Scripted {
        fn get(&self, url: &str) -> Result<String, FetchError> {
            self.calls.set(self.calls.get() + 1);
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(timeout(url)))
        }
    }

    #[derive(Default)]
    struct Recorder(RefCell<Vec<Duration>>);

    impl Sleeper for Recorder {
        fn sleep(&self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }

    fn timeout(url: &str) -> FetchError {
        FetchError::Transient {
            url: url.to_string(),
            message: "timed out".to_string(),
        }
    }

    #[test]
    fn bounded_budget_makes_exactly_budget_plus_one_attempts() {
        let transport = Scripted::new(Vec::new());
        let sleeper = Recorder::default();
        let fetcher = PageFetcher::new(
            &transport,
            &sleeper,
            BackoffPolicy::bounded(Duration::from_secs(300), 2),
        );

        let err = fetcher.fetch("http://x/a").unwrap_err();
        assert!(matches!(
            err,
            FetchError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(transport.calls.get(), 3);
        assert_eq!(sleeper.0.borrow().len(), 2);
        assert!(
            sleeper
                .0
                .borrow()
                .iter()
                .all(|d| *d == Duration::from_secs(300))
        );
    }

    #[test]
    fn zero_budget_fails_on_first_timeout() {
        let transport = Scripted::new(Vec::new());
        let sleeper = Recorder::default();
        let fetcher = PageFetcher::new(&transport, &sleeper, BackoffPolicy::default());

        let err = fetcher.fetch_with_retries("http://x/a", Some(0)).unwrap_err();
        assert!(matches!(
            err,
            FetchError::RetriesExhausted { attempts: 1, .. }
        ));
        assert!(sleeper.0.borrow().is_empty());
    }

    #[test]
    fn unbounded_retries_until_success() {
        let mut replies: Vec<Result<String, FetchError>> =
            (0..7).map(|_| Err(timeout("http://x/a"))).collect();
        replies.push(Ok("body".to_string()));
        let transport = Scripted::new(replies);
        let sleeper = Recorder::default();
        let fetcher = PageFetcher::new(&transport, &sleeper, BackoffPolicy::default());

        assert_eq!(fetcher.fetch("http://x/a").unwrap(), "body");
        assert_eq!(transport.calls.get(), 8);
        assert_eq!(sleeper.0.borrow().len(), 7);
    }

    #[test]
    fn status_errors_are_never_retried() {
        let transport = Scripted::new(vec![
            Err(timeout("http://x/a")),
            Err(FetchError::Status {
                url: "http://x/a".to_string(),
                status: 500,
            }),
        ]);
        let sleeper = Recorder::default();
        let fetcher = PageFetcher::new(&transport, &sleeper, BackoffPolicy::default());

        let err = fetcher.fetch("http://x/a").unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
        assert_eq!(transport.calls.get(), 2);

        let transport = Scripted::new(vec![Err(FetchError::NotFound {
            url: "http://x/b".to_string(),
        })]);
        let fetcher = PageFetcher::new(
            &transport,
            &sleeper,
            BackoffPolicy::bounded(Duration::ZERO, 5),
        );
        assert!(fetcher.fetch("http://x/b").unwrap_err().is_not_found());
        assert_eq!(transport.calls.get(), 1);
    }

    #[test]
    fn malformed_url_fails_without_retrying() {
        let sleeper = Recorder::default();
        let fetcher = PageFetcher::new(
            HttpTransport::new().unwrap(),
            &sleeper,
            BackoffPolicy::default(),
        );

        let err = fetcher.fetch("htp//fpl.test/web/api/elements/1/").unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest { .. }), "{err}");
        assert!(sleeper.0.borrow().is_empty());
    }
}
