//! Network fetches with quadratic backoff and progress signalling.

use std::{sync::Arc, time::Duration};

use {
    iitcm_config::FetchConfig,
    tokio_util::task::AbortOnDropHandle,
    tracing::{debug, warn},
};

use crate::{
    host::Host,
    http::{Body, HttpClient, RequestKind},
};

/// Message key sent before each backoff wait, with the delay in seconds.
pub const RETRY_MESSAGE: &str = "serverNotAvailableRetry";

/// Wraps an [`HttpClient`] with retries and host progress callbacks.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    host: Host,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(client: Arc<dyn HttpClient>, host: Host, config: FetchConfig) -> Self {
        Self {
            client,
            host,
            config,
        }
    }

    /// Fetch `url`.
    ///
    /// Transient failures are retried when `retry` is set, waiting
    /// `min(attempt², max_backoff_secs)` seconds before attempt `n ≥ 2`.
    /// Without `retry`, or once `max_attempts` is exhausted, a failure
    /// yields `None`. A definitive miss (e.g. 404) is never retried.
    pub async fn get(&self, url: &str, kind: RequestKind, retry: bool) -> Option<Body> {
        let mut attempt: u32 = 1;
        loop {
            if attempt > 1 {
                let secs = backoff_secs(attempt, self.config.max_backoff_secs);
                self.host.message(RETRY_MESSAGE, &[secs.to_string()]);
                debug!(url, attempt, secs, "waiting before retry");
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }

            let ticker = self.start_progress();
            let result = self.client.fetch(url, kind).await;
            drop(ticker);

            match result {
                Ok(body) => {
                    self.host.progressbar(false);
                    return body;
                },
                Err(e) => {
                    warn!(url, attempt, error = %e, "fetch failed");
                    let exhausted = self
                        .config
                        .max_attempts
                        .is_some_and(|max| attempt >= max);
                    if !retry || exhausted {
                        self.host.progressbar(false);
                        return None;
                    }
                    attempt = attempt.saturating_add(1);
                },
            }
        }
    }

    pub async fn get_text(&self, url: &str, retry: bool) -> Option<String> {
        self.get(url, RequestKind::Text, retry)
            .await
            .and_then(Body::into_text)
    }

    pub async fn get_json(&self, url: &str, retry: bool) -> Option<serde_json::Value> {
        self.get(url, RequestKind::Json, retry)
            .await
            .and_then(Body::into_json)
    }

    pub async fn get_last_modified(&self, url: &str, retry: bool) -> Option<String> {
        self.get(url, RequestKind::LastModified, retry)
            .await
            .and_then(Body::into_last_modified)
    }

    /// Signal progress every `progress_interval_ms` until the handle is
    /// dropped, including when the request future itself is dropped.
    fn start_progress(&self) -> AbortOnDropHandle<()> {
        let host = self.host.clone();
        let period = Duration::from_millis(self.config.progress_interval_ms.max(1));
        AbortOnDropHandle::new(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                host.progressbar(true);
            }
        }))
    }
}

fn backoff_secs(attempt: u32, max_secs: u64) -> u64 {
    u64::from(attempt).saturating_pow(2).min(max_secs)
}
