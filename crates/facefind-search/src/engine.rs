//! Search orchestrator.
//!
//! One `search` call walks `Idle → Preparing → Matching → Complete`, or ends
//! in `NoFaceDetected` / `Failed`. The provider is chosen per call from the
//! cached [`ProviderConfig`].

use crate::config::{ConfigResolver, EngineSettings, ProviderConfig};
use crate::error::SearchError;
use crate::locator::{LocatorResolver, ProbeImage};
use crate::progress::{CancelToken, ProgressFn, ProgressReporter};
use crate::provider::MatchProvider;
use crate::store::{CandidatePhoto, PhotoMatch, PhotoStore, StoreError};
use facefind_core::FaceEmbedder;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchState {
    Idle,
    Preparing,
    Matching,
    Complete,
    NoFaceDetected,
    Failed,
}

impl SearchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SearchState::Complete | SearchState::NoFaceDetected | SearchState::Failed
        )
    }

    fn can_transition(self, next: SearchState) -> bool {
        use SearchState::*;
        match (self, next) {
            (Idle | Complete | NoFaceDetected | Failed, Preparing) => true,
            (Preparing, Matching | NoFaceDetected | Failed) => true,
            (Matching, Complete | Failed) => true,
            _ => false,
        }
    }
}

/// Face-match search over a gallery of candidate photos.
///
/// Safe to share between concurrent searches; they share only the cached
/// provider configuration and the loaded model set.
pub struct SearchEngine {
    config: Arc<ConfigResolver>,
    embedder: Arc<dyn FaceEmbedder>,
    photos: Option<Arc<dyn PhotoStore>>,
    resolver: LocatorResolver,
    settings: EngineSettings,
    state: Mutex<SearchState>,
}

impl SearchEngine {
    pub fn new(config: Arc<ConfigResolver>, embedder: Arc<dyn FaceEmbedder>, settings: EngineSettings) -> Self {
        Self {
            config,
            embedder,
            photos: None,
            resolver: LocatorResolver::default(),
            settings,
            state: Mutex::new(SearchState::Idle),
        }
    }

    /// Enable [`search_event`](Self::search_event).
    pub fn with_photo_store(mut self, photos: Arc<dyn PhotoStore>) -> Self {
        self.photos = Some(photos);
        self
    }

    pub fn with_resolver(mut self, resolver: LocatorResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// State of the most recent search on this engine.
    pub fn state(&self) -> SearchState {
        self.state.lock().map(|s| *s).unwrap_or(SearchState::Failed)
    }

    /// Re-read the provider configuration, e.g. after it was saved.
    pub async fn reload_config(&self) -> ProviderConfig {
        self.config.reload().await
    }

    pub async fn search(
        &self,
        probe: &ProbeImage,
        candidates: &[CandidatePhoto],
        on_progress: ProgressFn<'_>,
    ) -> Result<Vec<PhotoMatch>, SearchError> {
        self.run(probe, candidates, on_progress, None).await
    }

    /// Like [`search`](Self::search), stopping with `Cancelled` at the next
    /// chunk or batch boundary once `cancel` fires.
    pub async fn search_with_cancel(
        &self,
        probe: &ProbeImage,
        candidates: &[CandidatePhoto],
        on_progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<PhotoMatch>, SearchError> {
        self.run(probe, candidates, on_progress, Some(cancel)).await
    }

    /// Search every photo of an event in the photo store.
    pub async fn search_event(
        &self,
        event_id: &str,
        probe: &ProbeImage,
        on_progress: ProgressFn<'_>,
    ) -> Result<Vec<PhotoMatch>, SearchError> {
        let photos = self.photos.as_ref().ok_or(StoreError::Unavailable)?;
        let candidates = photos.list_candidates(event_id).await?;
        tracing::debug!(event_id, candidates = candidates.len(), "event gallery loaded");
        self.search(probe, &candidates, on_progress).await
    }

    async fn run(
        &self,
        probe: &ProbeImage,
        candidates: &[CandidatePhoto],
        on_progress: ProgressFn<'_>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<PhotoMatch>, SearchError> {
        let search_id = Uuid::new_v4();
        let span = tracing::info_span!("search", %search_id, candidates = candidates.len());

        async move {
            self.transition(SearchState::Preparing);
            let config = self.config.load().await;
            let provider = MatchProvider::from_config(
                &config,
                &self.settings,
                Arc::clone(&self.embedder),
                self.resolver.clone(),
            );
            tracing::info!(provider = ?provider.kind(), "search started");

            let mut progress = ProgressReporter::new(on_progress, candidates.len());
            progress.report(0, "preparing");

            let prepared = provider.prepare(probe).await.map_err(|e| self.fail(e))?;
            self.transition(SearchState::Matching);

            let matches = prepared
                .run(candidates, &mut progress, cancel)
                .await
                .map_err(|e| self.fail(e))?;
            let matches = dedup_in_order(matches);

            progress.report(progress.total(), "done");
            self.transition(SearchState::Complete);
            tracing::info!(matches = matches.len(), "search complete");
            Ok(matches)
        }
        .instrument(span)
        .await
    }

    fn fail(&self, error: SearchError) -> SearchError {
        match error {
            SearchError::NoFaceDetected => {
                tracing::info!("no face in probe");
                self.transition(SearchState::NoFaceDetected);
            }
            ref e => {
                tracing::warn!(kind = ?e.kind(), error = %e, "search failed");
                self.transition(SearchState::Failed);
            }
        }
        error
    }

    fn transition(&self, next: SearchState) {
        if let Ok(mut state) = self.state.lock() {
            if !state.can_transition(next) {
                // Another search on this engine moved the shared state.
                tracing::debug!(from = ?*state, to = ?next, "out-of-order state transition");
            } else {
                tracing::debug!(from = ?*state, to = ?next, "state transition");
            }
            *state = next;
        }
    }
}

fn dedup_in_order(matches: Vec<PhotoMatch>) -> Vec<PhotoMatch> {
    let mut seen = HashSet::new();
    matches
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}
