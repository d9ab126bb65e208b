#![allow(dead_code)]

use async_trait::async_trait;
use facefind_core::{Descriptor, EmbedError, FaceEmbedder, DEFAULT_MATCH_THRESHOLD};
use facefind_search::{CandidatePhoto, ConfigResolver, EngineSettings, MemoryStore, Progress, SearchEngine};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const MODEL: &str = "fake-v1";

/// Embedder that looks faces up by image content instead of running models.
#[derive(Default)]
pub struct FakeEmbedder {
    faces: HashMap<Vec<u8>, Vec<Descriptor>>,
    threshold: Option<f32>,
    pub loads: AtomicUsize,
}

impl FakeEmbedder {
    pub fn face(mut self, image: &str, values: Vec<f32>) -> Self {
        self.faces
            .entry(image.as_bytes().to_vec())
            .or_default()
            .push(Descriptor::new(values, Some(MODEL.into())));
        self
    }

    pub fn no_face(mut self, image: &str) -> Self {
        self.faces.insert(image.as_bytes().to_vec(), Vec::new());
        self
    }

    /// Report `threshold` as this model's calibrated match distance.
    pub fn calibrated(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

#[async_trait]
impl FaceEmbedder for FakeEmbedder {
    async fn load_models(&self) -> Result<(), EmbedError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn extract_single(&self, image: &[u8]) -> Result<Option<Descriptor>, EmbedError> {
        Ok(self.extract_all(image).await?.into_iter().next())
    }

    async fn extract_all(&self, image: &[u8]) -> Result<Vec<Descriptor>, EmbedError> {
        self.faces
            .get(image)
            .cloned()
            .ok_or_else(|| EmbedError::Worker("not an image".into()))
    }

    fn model_version(&self) -> &str {
        MODEL
    }

    fn default_threshold(&self) -> f32 {
        self.threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD)
    }
}

/// Candidate whose locator is a `data:` URL carrying its own id as the image bytes.
pub fn photo(id: &str) -> CandidatePhoto {
    CandidatePhoto::new(id, format!("data:text/plain,{id}"))
}

pub fn engine(store: Arc<MemoryStore>, embedder: Arc<FakeEmbedder>, settings: EngineSettings) -> SearchEngine {
    let config = Arc::new(ConfigResolver::new(store.clone()));
    SearchEngine::new(config, embedder, settings).with_photo_store(store)
}

/// Collects every progress update.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<Progress>>);

impl Recorder {
    pub fn record(&self, progress: Progress) {
        self.0.lock().unwrap().push(progress);
    }

    pub fn take(&self) -> Vec<Progress> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}
