//! Shared dispatcher

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::authn::CredentialKey;
use crate::errors::RemoteError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

use super::limiter::Bucket;

/// Dispatcher options
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Requests admitted per window and credential
    pub max_requests: u32,

    /// Length of the fixed window
    pub window: Duration,

    /// Callers allowed to wait for admission per credential
    pub max_queue: usize,

    /// Bound of a single remote call
    pub call_timeout: Duration,

    /// Retries of a timed out call
    pub timeout_retries: u32,

    /// Delay between timed out attempts
    pub timeout_cooldown: CooldownOptions,

    /// Cumulative rate-limit backoff after which a call is given up
    pub max_backoff: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(10),
            max_queue: 256,
            call_timeout: Duration::from_secs(30),
            timeout_retries: 3,
            timeout_cooldown: CooldownOptions::default(),
            max_backoff: Duration::from_secs(120),
        }
    }
}

/// Counters of one credential's bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Requests let through
    pub admitted: u64,

    /// Requests that had to wait for the next window
    pub throttled: u64,

    /// Rate-limit signals received from the CRM
    pub rate_limited: u64,

    /// Callers currently waiting for admission
    pub waiting: u64,
}

/// Admits remote calls at a bounded rate per credential
#[derive(Debug)]
pub struct Dispatcher {
    options: DispatchOptions,
    buckets: Mutex<HashMap<CredentialKey, Arc<Bucket>>>,
}

impl Dispatcher {
    pub fn new(options: DispatchOptions) -> Self {
        Self {
            options,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Run `operation` once the credential's budget allows it.
    ///
    /// Rate-limit responses block the credential for the signalled duration
    /// and the call is retried until the cumulative backoff passes
    /// `max_backoff`. Timeouts are retried `timeout_retries` times. Any other
    /// error is returned to the caller untouched.
    pub async fn submit<T, F, Fut>(&self, key: &CredentialKey, operation: F) -> Result<T, RemoteError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let bucket = self.bucket(key);
        let mut backoff = Duration::ZERO;
        let mut timeouts = 0u32;

        loop {
            bucket.acquire().await?;

            let error = match tokio::time::timeout(self.options.call_timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => RemoteError::Timeout(format!(
                    "no response within {:?}",
                    self.options.call_timeout
                )),
            };

            match error {
                RemoteError::RateLimited { retry_after } => {
                    backoff += retry_after;
                    if backoff > self.options.max_backoff {
                        warn!(credential = %key, "Rate-limit backoff exceeded {:?}, giving up", self.options.max_backoff);
                        return Err(RemoteError::Unavailable(format!(
                            "rate limited for more than {:?}",
                            self.options.max_backoff
                        )));
                    }
                    warn!(credential = %key, "Rate limited by the CRM, backing off for {:?}", retry_after);
                    bucket.block_for(retry_after);
                }
                RemoteError::Timeout(message) => {
                    if timeouts >= self.options.timeout_retries {
                        return Err(RemoteError::Unavailable(format!(
                            "{message} (after {} retries)",
                            timeouts
                        )));
                    }
                    let delay = calc_exp_backoff(&self.options.timeout_cooldown, timeouts);
                    timeouts += 1;
                    debug!(credential = %key, attempt = timeouts, "Remote call timed out, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                other => return Err(other),
            }
        }
    }

    /// Counters of a credential, zero when it was never used
    pub fn stats(&self, key: &CredentialKey) -> DispatchStats {
        let buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        buckets.get(key).map(|b| b.stats()).unwrap_or_default()
    }

    fn bucket(&self, key: &CredentialKey) -> Arc<Bucket> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        buckets
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Bucket::new(
                    self.options.max_requests,
                    self.options.window,
                    self.options.max_queue,
                ))
            })
            .clone()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatchOptions::default())
    }
}
