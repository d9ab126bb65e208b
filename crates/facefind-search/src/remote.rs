//! Remote match provider.
//!
//! Sends the probe and fixed-size gallery batches to a matching API:
//!
//! ```text
//! POST <endpoint>
//! Authorization: Bearer <key>
//! {"probe": "<base64>", "gallery": [{"id": "...", "url": "..."}, ...]}
//!
//! 200 {"matches": [{"id": "...", "score": 0.9}, ...]}
//! ```
//!
//! Batches go out one at a time, each under its own deadline. The first
//! failing batch aborts the search; nothing is retried.

use crate::config::{DEFAULT_REMOTE_BATCH_SIZE, DEFAULT_REMOTE_TIMEOUT};
use crate::error::SearchError;
use crate::progress::{CancelToken, ProgressReporter};
use crate::store::CandidatePhoto;
use crate::PhotoMatch;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, Serialize)]
struct MatchRequest<'a> {
    probe: &'a str,
    gallery: Vec<GalleryEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct GalleryEntry<'a> {
    id: &'a str,
    url: &'a str,
}

/// `matches` may be absent or null, and entries without an id are dropped.
#[derive(Debug, Deserialize)]
struct MatchResponse {
    #[serde(default)]
    matches: Option<Vec<RemoteMatch>>,
}

#[derive(Debug, Deserialize)]
struct RemoteMatch {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

impl MatchResponse {
    fn into_matches(self) -> impl Iterator<Item = (String, Option<f32>)> {
        self.matches
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id.filter(|id| !id.is_empty()).map(|id| (id, m.score)))
    }
}

/// Client for one configured matching endpoint.
#[derive(Debug, Clone)]
pub struct RemoteMatcher {
    client: reqwest::Client,
    endpoint: String,
    key: Option<String>,
    secure_context: bool,
    batch_size: usize,
    timeout: Duration,
}

impl RemoteMatcher {
    pub fn new(endpoint: impl Into<String>, key: Option<String>, secure_context: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            key,
            secure_context,
            batch_size: DEFAULT_REMOTE_BATCH_SIZE,
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refuse an insecure endpoint when the caller itself is on a secure transport.
    ///
    /// Runs before any network activity.
    pub fn check_transport(&self) -> Result<(), SearchError> {
        let url = Url::parse(self.endpoint.trim()).map_err(|e| SearchError::ConnectionFailure {
            endpoint: self.endpoint.clone(),
            reason: format!("invalid endpoint URL: {e}"),
        })?;
        if self.secure_context && url.scheme() == "http" {
            return Err(SearchError::SecurityPolicyViolation {
                endpoint: self.endpoint.clone(),
            });
        }
        Ok(())
    }

    /// Match all candidates batch by batch, returning matches in input order.
    ///
    /// Candidates with an empty id or locator are left out of the request
    /// payloads but still count as processed.
    pub(crate) async fn match_candidates(
        &self,
        encoded_probe: &str,
        candidates: &[CandidatePhoto],
        progress: &mut ProgressReporter<'_>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<PhotoMatch>, SearchError> {
        let batches = candidates.len().div_ceil(self.batch_size);
        let mut scores: HashMap<String, Option<f32>> = HashMap::new();

        for (index, batch) in candidates.chunks(self.batch_size).enumerate() {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(SearchError::Cancelled);
            }
            progress.report(
                index * self.batch_size,
                format!("analyzing batch {} of {batches}", index + 1),
            );

            let gallery: Vec<GalleryEntry<'_>> = batch
                .iter()
                .filter(|c| !c.id.is_empty() && !c.locator.is_empty())
                .map(|c| GalleryEntry {
                    id: &c.id,
                    url: &c.locator,
                })
                .collect();
            if gallery.is_empty() {
                continue;
            }

            let response = self.send_batch(encoded_probe, gallery).await?;
            let before = scores.len();
            for (id, score) in response.into_matches() {
                scores.entry(id).or_insert(score);
            }
            tracing::debug!(batch = index + 1, new_matches = scores.len() - before, "batch matched");
        }

        Ok(candidates
            .iter()
            .filter_map(|c| {
                scores.get(&c.id).map(|score| PhotoMatch {
                    id: c.id.clone(),
                    score: *score,
                })
            })
            .collect())
    }

    async fn send_batch(
        &self,
        encoded_probe: &str,
        gallery: Vec<GalleryEntry<'_>>,
    ) -> Result<MatchResponse, SearchError> {
        let body = MatchRequest {
            probe: encoded_probe,
            gallery,
        };
        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.key.as_deref().unwrap_or("")),
            )
            .json(&body);

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        };

        let (status, bytes) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| self.classify(e))?;

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            tracing::warn!(%body, "matching API rejected the payload");
            return Err(SearchError::ValidationRejected { body });
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            tracing::warn!(status = status.as_u16(), %body, "matching API returned an error");
            return Err(SearchError::RemoteHttp {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown status").to_string(),
                body,
            });
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| SearchError::Unknown(format!("malformed response from matching API: {e}")))
    }

    fn timeout_error(&self) -> SearchError {
        SearchError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn classify(&self, e: reqwest::Error) -> SearchError {
        if e.is_timeout() {
            return self.timeout_error();
        }
        if e.is_decode() || e.is_body() {
            return SearchError::Unknown(format!("reading matching API response: {e}"));
        }
        SearchError::ConnectionFailure {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        }
    }
}
