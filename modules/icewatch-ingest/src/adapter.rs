//! The pluggable collector contract.
//!
//! One implementation per external source. Adapters own their cursors and
//! parsing; they populate dedup keys deterministically and classify their
//! failures so the scheduler knows whether to retry or disable them.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use icewatch_common::{Report, TrustTier};

#[derive(Error, Debug)]
pub enum AdapterError {
    /// Retry on the next tick: timeouts, 5xx, rate limits.
    #[error("transient adapter failure: {0}")]
    Transient(String),

    /// Disable until operator intervention: auth loss, endpoint gone.
    #[error("permanent adapter failure: {0}")]
    Permanent(String),
}

impl AdapterError {
    /// Classify a reqwest error: network trouble is transient, everything
    /// else about the request itself is permanent.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            AdapterError::Transient(e.to_string())
        } else {
            AdapterError::Permanent(e.to_string())
        }
    }

    /// Classify an HTTP status: 429 and 5xx retry, other 4xx disable.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status.as_u16() == 429 || status.is_server_error() {
            AdapterError::Transient(format!("{context}: HTTP {status}"))
        } else {
            AdapterError::Permanent(format!("{context}: HTTP {status}"))
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send {
    fn name(&self) -> &'static str;

    fn trust(&self) -> TrustTier;

    /// Configured polling cadence. The scheduler adds jitter on top.
    fn interval(&self) -> Duration;

    /// One collection cycle: everything observed since the last successful
    /// poll, in source-chronological order where the source provides one.
    async fn poll(&mut self) -> Result<Vec<Report>, AdapterError>;
}

/// Session-scoped id memory so a poll overlap doesn't re-emit reports the
/// store would reject anyway. Bounded; oldest ids age out first.
pub struct SeenIds {
    order: VecDeque<String>,
    set: HashSet<String>,
    cap: usize,
}

impl SeenIds {
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            set: HashSet::new(),
            cap,
        }
    }

    /// Returns true the first time an id is seen.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        self.set.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl Default for SeenIds {
    fn default() -> Self {
        Self::new(2_000)
    }
}
