//!
//! gatehouse consistency harness
//! -----------------------------
//! Out-of-process driver that proves the gate and the session layer hold up
//! when many workers reuse one authenticated session: log in, settle on a
//! single session token, fan out N workers of M strictly sequential
//! requests all presenting that token, and aggregate every deviation into
//! one shared timestamped log. The run passes iff the log stays empty.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::cookie::Jar;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, HarnessConfig};

/// Classification of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A successful response carried a session token different from the
    /// stabilized one.
    ConsistencyViolation,
    /// A response completed with a non-success status.
    RequestFailure,
    /// The request never completed (connect, read, or timeout error).
    Transport,
    /// The worker task itself panicked; recorded when it is joined.
    WorkerPanic,
}

/// One timestamped failure observed by a worker.
#[derive(Debug, Clone)]
pub struct FailureEntry {
    pub at: DateTime<Utc>,
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for FailureEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.at.format("%Y-%m-%d %H:%M:%S%.3f"), self.message)
    }
}

/// Append-only failure log shared by all workers. Entries keep arrival
/// order; the lock is held only for the push.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<FailureEntry>>,
}

impl ErrorLog {
    pub fn record(&self, kind: FailureKind, message: impl Into<String>) {
        self.entries.lock().push(FailureEntry { at: Utc::now(), kind, message: message.into() });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of everything recorded so far, in append order.
    pub fn snapshot(&self) -> Vec<FailureEntry> {
        self.entries.lock().clone()
    }
}

/// Conditions that prevent the harness from producing a verdict at all, as
/// opposed to per-request failures, which are recorded and aggregated.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid target url '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },
    #[error("could not build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("login request failed: {0}")]
    Login(#[source] reqwest::Error),
    #[error("login rejected with status {status}")]
    LoginDenied { status: u16 },
    #[error("no '{cookie}' cookie on a successful login response")]
    MissingSessionCookie { cookie: String },
    #[error("session token did not stabilize within {attempts} requests (last: {last:?})")]
    StabilizationTimeout { attempts: u32, last: Option<String> },
}

/// Aggregate outcome of one harness run.
#[derive(Debug)]
pub struct RunReport {
    /// The token every request was required to keep observing.
    pub token: String,
    /// How many login requests stabilization spent before the token
    /// settled.
    pub stabilize_requests: u32,
    pub successful_calls: usize,
    pub failures: Vec<FailureEntry>,
    /// Workers force-cancelled at the join deadline. Cancellation is not
    /// itself a violation; anything those workers recorded first is kept.
    pub cancelled_workers: usize,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|entry| entry.kind == kind).count()
    }
}

/// Pull the named cookie's value out of a response's Set-Cookie headers,
/// taking the name=value pair before the first attribute.
fn session_token_from(headers: &reqwest::header::HeaderMap, cookie_name: &str) -> Option<String> {
    for value in headers.get_all(SET_COOKIE).iter() {
        let Ok(raw) = value.to_str() else { continue };
        let pair = raw.split_once(';').map(|(pair, _)| pair).unwrap_or(raw).trim();
        if let Some((name, token)) = pair.split_once('=') {
            if name == cookie_name {
                return Some(token.to_string());
            }
        }
    }
    None
}

/// One worker: its own client presenting the stabilized cookie, a fixed
/// number of strictly sequential requests, failures recorded as they
/// happen. A deviation never stops the loop.
async fn worker_loop(
    worker: usize,
    client: Client,
    url: Url,
    token: String,
    cookie_name: String,
    iterations: usize,
    log: Arc<ErrorLog>,
    successes: Arc<AtomicUsize>,
) {
    for _ in 0..iterations {
        match client.get(url.clone()).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    successes.fetch_add(1, Ordering::Relaxed);
                    if let Some(observed) = session_token_from(resp.headers(), &cookie_name) {
                        if observed != token {
                            log.record(
                                FailureKind::ConsistencyViolation,
                                format!(
                                    "unexpected session token: got {}, expected {}",
                                    observed, token
                                ),
                            );
                        }
                    }
                } else {
                    log.record(
                        FailureKind::RequestFailure,
                        format!(
                            "{} {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("unknown status")
                        ),
                    );
                }
            }
            Err(err) => {
                log.record(FailureKind::Transport, format!("request error: {}", err));
            }
        }
    }
    debug!(worker, "worker finished");
}

/// Drain the worker set gracefully up to the deadline, then force-cancel
/// whatever is left. Returns the number of cancelled workers; panicked
/// workers are recorded in the log either way.
async fn join_with_deadline(set: &mut JoinSet<()>, deadline: Duration, log: &ErrorLog) -> usize {
    let drained = tokio::time::timeout(deadline, async {
        while let Some(joined) = set.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    log.record(FailureKind::WorkerPanic, format!("worker panicked: {}", err));
                }
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!("join deadline exceeded, cancelling remaining workers");
        set.abort_all();
    }

    let mut cancelled = 0usize;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => cancelled += 1,
            Err(err) => {
                if err.is_panic() {
                    log.record(FailureKind::WorkerPanic, format!("worker panicked: {}", err));
                }
            }
        }
    }
    cancelled
}

/// The concurrent-consistency harness. Construct with a [`HarnessConfig`]
/// and call [`Harness::run`].
pub struct Harness {
    cfg: HarnessConfig,
}

impl Harness {
    pub fn new(cfg: HarnessConfig) -> Self {
        Self { cfg }
    }

    /// Log in and settle on one session token: keep requesting with
    /// credentials until two consecutive requests leave the same token in
    /// effect. The server is allowed to supersede the first token it hands
    /// out (fixation guards do exactly that), so one hand-over is normal; a
    /// token that never settles within the attempt budget is an error.
    async fn stabilize(&self, url: &Url) -> Result<(String, u32), HarnessError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(self.cfg.request_timeout)
            .build()
            .map_err(HarnessError::Client)?;

        let mut current: Option<String> = None;
        for attempt in 1..=self.cfg.stabilize_attempts {
            let resp = client
                .get(url.clone())
                .basic_auth(&self.cfg.username, Some(&self.cfg.password))
                .send()
                .await
                .map_err(HarnessError::Login)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(HarnessError::LoginDenied { status: status.as_u16() });
            }
            // The token in effect now: the one this response set, or the
            // one still riding in the jar from the previous response.
            let observed = match session_token_from(resp.headers(), &self.cfg.cookie_name) {
                Some(token) => token,
                None => match &current {
                    Some(token) => token.clone(),
                    None => {
                        return Err(HarnessError::MissingSessionCookie {
                            cookie: self.cfg.cookie_name.clone(),
                        })
                    }
                },
            };
            if current.as_deref() == Some(observed.as_str()) {
                debug!(attempt, token = %observed, "session token stabilized");
                return Ok((observed, attempt));
            }
            if let Some(previous) = &current {
                debug!(attempt, %previous, next = %observed, "session token superseded");
            }
            current = Some(observed);
        }
        Err(HarnessError::StabilizationTimeout {
            attempts: self.cfg.stabilize_attempts,
            last: current,
        })
    }

    /// A worker's client: cookie jar pre-seeded with the stabilized token,
    /// no credentials attached. Workers never log in.
    fn session_client(&self, url: &Url, token: &str) -> Result<Client, HarnessError> {
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str(&format!("{}={}", self.cfg.cookie_name, token), url);
        Client::builder()
            .cookie_provider(jar)
            .timeout(self.cfg.request_timeout)
            .build()
            .map_err(HarnessError::Client)
    }

    /// Execute the full run: validate the configuration, stabilize, fan
    /// out, join under the deadline, aggregate. The verdict is
    /// [`RunReport::passed`].
    pub async fn run(&self) -> Result<RunReport, HarnessError> {
        self.cfg.validate()?;
        let url = Url::parse(&self.cfg.url).map_err(|err| HarnessError::InvalidTarget {
            url: self.cfg.url.clone(),
            reason: err.to_string(),
        })?;

        let (token, stabilize_requests) = self.stabilize(&url).await?;
        info!(token = %token, requests = stabilize_requests, "session token stabilized");

        let log = Arc::new(ErrorLog::default());
        let successes = Arc::new(AtomicUsize::new(0));

        let mut set = JoinSet::new();
        for worker in 0..self.cfg.workers {
            let client = self.session_client(&url, &token)?;
            set.spawn(worker_loop(
                worker,
                client,
                url.clone(),
                token.clone(),
                self.cfg.cookie_name.clone(),
                self.cfg.iterations,
                Arc::clone(&log),
                Arc::clone(&successes),
            ));
        }

        let cancelled_workers = join_with_deadline(&mut set, self.cfg.join_timeout, &log).await;
        if cancelled_workers > 0 {
            warn!(cancelled_workers, "workers force-cancelled at the deadline");
        }

        let successful_calls = successes.load(Ordering::Relaxed);
        let failures = log.snapshot();
        info!(successful_calls, failures = failures.len(), "harness run complete");
        Ok(RunReport { token, stabilize_requests, successful_calls, failures, cancelled_workers })
    }
}
