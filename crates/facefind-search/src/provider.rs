//! Provider selection: one matching operation over the local or remote strategy.

use crate::config::{EngineSettings, ProviderConfig, ProviderKind};
use crate::error::SearchError;
use crate::local::LocalMatcher;
use crate::locator::{LocatorResolver, ProbeImage};
use crate::progress::{CancelToken, ProgressFn, ProgressReporter};
use crate::remote::RemoteMatcher;
use crate::store::CandidatePhoto;
use crate::PhotoMatch;
use facefind_core::{Descriptor, DescriptorComparator, FaceEmbedder};
use std::sync::Arc;

pub enum MatchProvider {
    Local(LocalMatcher),
    Remote(RemoteMatcher),
}

/// A provider with its probe already processed, ready to match.
pub(crate) enum PreparedSearch<'a> {
    Local(&'a LocalMatcher, Descriptor),
    Remote(&'a RemoteMatcher, String),
}

impl MatchProvider {
    /// Build the provider the configuration selects.
    ///
    /// A remote configuration without an endpoint yields the local provider.
    pub fn from_config(
        config: &ProviderConfig,
        settings: &EngineSettings,
        embedder: Arc<dyn FaceEmbedder>,
        resolver: LocatorResolver,
    ) -> Self {
        match (config.effective_provider(), config.endpoint()) {
            (ProviderKind::Remote, Some(endpoint)) => MatchProvider::Remote(
                RemoteMatcher::new(endpoint, config.remote_key.clone(), settings.secure_context)
                    .with_batch_size(settings.remote_batch_size)
                    .with_timeout(settings.remote_timeout),
            ),
            _ => {
                let threshold = settings
                    .match_threshold
                    .unwrap_or_else(|| embedder.default_threshold());
                MatchProvider::Local(
                    LocalMatcher::new(embedder, DescriptorComparator::new(threshold))
                        .with_resolver(resolver)
                        .with_chunk_size(settings.local_chunk_size),
                )
            }
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            MatchProvider::Local(_) => ProviderKind::Local,
            MatchProvider::Remote(_) => ProviderKind::Remote,
        }
    }

    /// Local: load models and extract the probe descriptor.
    /// Remote: check the transport policy and encode the probe. No network traffic.
    pub(crate) async fn prepare(&self, probe: &ProbeImage) -> Result<PreparedSearch<'_>, SearchError> {
        match self {
            MatchProvider::Local(local) => {
                let descriptor = local.prepare(probe).await?;
                Ok(PreparedSearch::Local(local, descriptor))
            }
            MatchProvider::Remote(remote) => {
                remote.check_transport()?;
                Ok(PreparedSearch::Remote(remote, probe.to_base64()))
            }
        }
    }

    /// Prepare and match in one step.
    pub async fn match_candidates(
        &self,
        probe: &ProbeImage,
        candidates: &[CandidatePhoto],
        on_progress: ProgressFn<'_>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<PhotoMatch>, SearchError> {
        let prepared = self.prepare(probe).await?;
        let mut progress = ProgressReporter::new(on_progress, candidates.len());
        prepared.run(candidates, &mut progress, cancel).await
    }
}

impl PreparedSearch<'_> {
    pub(crate) async fn run(
        &self,
        candidates: &[CandidatePhoto],
        progress: &mut ProgressReporter<'_>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<PhotoMatch>, SearchError> {
        match self {
            PreparedSearch::Local(local, descriptor) => {
                local.match_candidates(descriptor, candidates, progress, cancel).await
            }
            PreparedSearch::Remote(remote, encoded) => {
                remote.match_candidates(encoded, candidates, progress, cancel).await
            }
        }
    }
}
