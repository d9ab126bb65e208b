//! Local match provider: on-device descriptors compared by Euclidean distance.

use crate::config::DEFAULT_LOCAL_CHUNK_SIZE;
use crate::error::SearchError;
use crate::locator::{LocatorResolver, ProbeImage};
use crate::progress::{CancelToken, ProgressReporter};
use crate::store::CandidatePhoto;
use crate::PhotoMatch;
use facefind_core::{Descriptor, DescriptorComparator, EmbedError, FaceEmbedder};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

pub struct LocalMatcher {
    embedder: Arc<dyn FaceEmbedder>,
    comparator: DescriptorComparator,
    resolver: LocatorResolver,
    chunk_size: usize,
}

impl LocalMatcher {
    pub fn new(embedder: Arc<dyn FaceEmbedder>, comparator: DescriptorComparator) -> Self {
        Self {
            embedder,
            comparator,
            resolver: LocatorResolver::default(),
            chunk_size: DEFAULT_LOCAL_CHUNK_SIZE,
        }
    }

    pub fn with_resolver(mut self, resolver: LocatorResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Load the models and extract the probe descriptor.
    pub(crate) async fn prepare(&self, probe: &ProbeImage) -> Result<Descriptor, SearchError> {
        self.embedder
            .load_models()
            .await
            .map_err(|e| SearchError::ModelLoad(e.to_string()))?;

        match self.embedder.extract_single(probe.as_bytes()).await {
            Ok(Some(descriptor)) => Ok(descriptor),
            Ok(None) => Err(SearchError::NoFaceDetected),
            Err(EmbedError::ModelLoad(reason)) => Err(SearchError::ModelLoad(reason)),
            Err(e) => Err(SearchError::InvalidProbe(e.to_string())),
        }
    }

    /// Compare every candidate against the probe, one chunk at a time.
    ///
    /// Members of a chunk are evaluated concurrently; the task yields to the
    /// scheduler after every chunk. A candidate that cannot be fetched or
    /// decoded is a non-match.
    pub(crate) async fn match_candidates(
        &self,
        probe: &Descriptor,
        candidates: &[CandidatePhoto],
        progress: &mut ProgressReporter<'_>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<PhotoMatch>, SearchError> {
        let mut matches = Vec::new();
        let mut seen = HashSet::new();
        let mut processed = 0;

        for chunk in candidates.chunks(self.chunk_size) {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(SearchError::Cancelled);
            }

            let distances = join_all(chunk.iter().map(|c| self.evaluate(probe, c))).await;
            for (candidate, distance) in chunk.iter().zip(distances) {
                if let Some(distance) = distance {
                    if seen.insert(candidate.id.as_str()) {
                        matches.push(PhotoMatch {
                            id: candidate.id.clone(),
                            score: Some(distance),
                        });
                    }
                }
            }

            processed += chunk.len();
            progress.report(processed, "comparing photos");
            tokio::task::yield_now().await;
        }

        Ok(matches)
    }

    async fn evaluate(&self, probe: &Descriptor, candidate: &CandidatePhoto) -> Option<f32> {
        let bytes = match self.resolver.fetch(&candidate.locator).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(id = %candidate.id, error = %e, "skipping unreadable photo");
                return None;
            }
        };
        let faces = match self.embedder.extract_all(&bytes).await {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!(id = %candidate.id, error = %e, "skipping photo");
                return None;
            }
        };
        self.comparator.best_distance(probe, &faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Progress;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const VERSION: &str = "fake";

    /// Maps image bytes to the faces "found" in them.
    #[derive(Default)]
    struct ScriptedEmbedder {
        faces: HashMap<Vec<u8>, Vec<Descriptor>>,
        fail_load: bool,
    }

    impl ScriptedEmbedder {
        fn with(mut self, image: &str, faces: Vec<Vec<f32>>) -> Self {
            let faces = faces
                .into_iter()
                .map(|v| Descriptor::new(v, Some(VERSION.into())))
                .collect();
            self.faces.insert(image.as_bytes().to_vec(), faces);
            self
        }
    }

    #[async_trait]
    impl FaceEmbedder for ScriptedEmbedder {
        async fn load_models(&self) -> Result<(), EmbedError> {
            if self.fail_load {
                return Err(EmbedError::ModelLoad("det_10g.onnx missing".into()));
            }
            Ok(())
        }

        async fn extract_single(&self, image: &[u8]) -> Result<Option<Descriptor>, EmbedError> {
            Ok(self.extract_all(image).await?.into_iter().next())
        }

        async fn extract_all(&self, image: &[u8]) -> Result<Vec<Descriptor>, EmbedError> {
            self.faces
                .get(image)
                .cloned()
                .ok_or_else(|| EmbedError::Worker("undecodable".into()))
        }

        fn model_version(&self) -> &str {
            VERSION
        }
    }

    fn photo(id: &str) -> CandidatePhoto {
        CandidatePhoto::new(id, format!("data:text/plain,{id}"))
    }

    fn matcher(embedder: ScriptedEmbedder) -> LocalMatcher {
        LocalMatcher::new(Arc::new(embedder), DescriptorComparator::default())
    }

    #[tokio::test]
    async fn test_prepare_outcomes() {
        let embedder = ScriptedEmbedder::default()
            .with("probe", vec![vec![0.0, 0.0]])
            .with("empty", vec![]);
        let m = matcher(embedder);

        assert!(m.prepare(&ProbeImage::from_bytes(&b"probe"[..])).await.is_ok());
        assert!(matches!(
            m.prepare(&ProbeImage::from_bytes(&b"empty"[..])).await,
            Err(SearchError::NoFaceDetected)
        ));
        assert!(matches!(
            m.prepare(&ProbeImage::from_bytes(&b"garbage"[..])).await,
            Err(SearchError::InvalidProbe(_))
        ));
    }

    #[tokio::test]
    async fn test_prepare_model_load_failure() {
        let embedder = ScriptedEmbedder {
            fail_load: true,
            ..Default::default()
        };
        let err = matcher(embedder)
            .prepare(&ProbeImage::from_bytes(&b"probe"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::ModelLoad(_)));
    }

    #[tokio::test]
    async fn test_chunks_report_progress_and_skip_bad_photos() {
        let embedder = ScriptedEmbedder::default()
            .with("p1", vec![vec![0.1, 0.0]])
            .with("p2", vec![vec![0.9, 0.0]])
            .with("p3", vec![vec![2.0, 0.0], vec![0.0, 0.2]])
            .with("p5", vec![]);
        let m = matcher(embedder).with_chunk_size(2);
        let probe = Descriptor::new(vec![0.0, 0.0], Some(VERSION.into()));
        let photos: Vec<_> = ["p1", "p2", "p3", "p4", "p5"].into_iter().map(photo).collect();

        let seen = Mutex::new(Vec::new());
        let sink = |p: Progress| seen.lock().unwrap().push(p.processed);
        let mut reporter = ProgressReporter::new(&sink, photos.len());
        let matches = m.match_candidates(&probe, &photos, &mut reporter, None).await.unwrap();
        drop(reporter);

        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
        assert!((matches[1].score.unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(seen.into_inner().unwrap(), vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_reported_once() {
        let embedder = ScriptedEmbedder::default().with("p1", vec![vec![0.0]]);
        let m = matcher(embedder);
        let probe = Descriptor::new(vec![0.0], Some(VERSION.into()));
        let photos = vec![photo("p1"), photo("p1")];

        let sink = crate::progress::ignore_progress;
        let mut reporter = ProgressReporter::new(&sink, photos.len());
        let matches = m.match_candidates(&probe, &photos, &mut reporter, None).await.unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_chunk_boundary() {
        let embedder = ScriptedEmbedder::default().with("p1", vec![vec![0.0]]);
        let m = matcher(embedder).with_chunk_size(1);
        let probe = Descriptor::new(vec![0.0], Some(VERSION.into()));
        let photos = vec![photo("p1"), photo("p1")];

        let token = CancelToken::new();
        let sink = |_: Progress| token.cancel();
        let mut reporter = ProgressReporter::new(&sink, photos.len());
        let err = m
            .match_candidates(&probe, &photos, &mut reporter, Some(&token))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Cancelled));
    }
}
