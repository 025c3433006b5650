//! SITS roster client with bounded retry and a TTL cache.
//!
//! `GET {base}/components/{map_code}/{mab_seq}/students` returns a JSON
//! array of [`StudentRecord`]s. Failed attempts back off 1 s, 2 s, 4 s, ...
//! (capped at 8 s) up to the caller's attempt budget.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gradepush_core::activity::ComponentRef;

use super::{RecordsApiError, StudentRecord, StudentRecordsApi};

/// HTTP request timeout for a single roster call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on the backoff between attempts.
const MAX_BACKOFF_SECS: u64 = 8;

struct CachedRoster {
    fetched_at: Instant,
    records: Vec<StudentRecord>,
}

pub struct SitsApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    cache_ttl: Duration,
    cache: Mutex<HashMap<ComponentRef, CachedRoster>>,
}

impl SitsApiClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        cache_ttl: Duration,
    ) -> Result<Self, RecordsApiError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn roster_url(&self, component: &ComponentRef) -> String {
        format!(
            "{}/components/{}/{}/students",
            self.base_url, component.map_code, component.mab_seq
        )
    }

    fn cached(&self, component: &ComponentRef) -> Option<Vec<StudentRecord>> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(component)
            .filter(|entry| entry.fetched_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.records.clone())
    }

    fn store(&self, component: &ComponentRef, records: &[StudentRecord]) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                component.clone(),
                CachedRoster {
                    fetched_at: Instant::now(),
                    records: records.to_vec(),
                },
            );
        }
    }

    async fn fetch_once(&self, component: &ComponentRef) -> Result<Vec<StudentRecord>, RecordsApiError> {
        let mut request = self.client.get(self.roster_url(component));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RecordsApiError::HttpStatus(response.status().as_u16()));
        }
        Ok(response.json::<Vec<StudentRecord>>().await?)
    }
}

fn backoff(attempt: u32) -> Duration {
    let secs = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(MAX_BACKOFF_SECS)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

#[async_trait]
impl StudentRecordsApi for SitsApiClient {
    async fn get_students_for_component(
        &self,
        component: &ComponentRef,
        fresh: bool,
        attempts: u32,
    ) -> Result<Vec<StudentRecord>, RecordsApiError> {
        if !fresh {
            if let Some(records) = self.cached(component) {
                tracing::debug!(component = %component, "Roster served from cache");
                return Ok(records);
            }
        }

        let attempts = attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.fetch_once(component).await {
                Ok(records) => {
                    tracing::debug!(
                        component = %component,
                        students = records.len(),
                        attempt,
                        "Roster fetched",
                    );
                    self.store(component, &records);
                    return Ok(records);
                }
                Err(e) => {
                    tracing::warn!(
                        component = %component,
                        attempt,
                        error = %e,
                        "Roster fetch attempt failed",
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                }
            }
        }

        Err(RecordsApiError::Exhausted {
            attempts,
            last_error,
        })
    }
}
