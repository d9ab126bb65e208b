//! Local embedding provider.
//!
//! [`FaceEmbedder`] is the capability the search engine needs from an
//! on-device model set. [`OnnxEmbedder`] implements it with SCRFD + ArcFace.

use crate::detector::{DetectorError, FaceDetector};
use crate::models::{ModelAssetError, ModelAssets};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_MATCH_THRESHOLD, ARCFACE_MODEL_VERSION};
use crate::types::{Descriptor, DEFAULT_MATCH_THRESHOLD};
use async_trait::async_trait;
use image::RgbImage;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("failed to load face models: {0}")]
    ModelLoad(String),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("inference worker failed: {0}")]
    Worker(String),
}

impl From<ModelAssetError> for EmbedError {
    fn from(e: ModelAssetError) -> Self {
        EmbedError::ModelLoad(e.to_string())
    }
}

/// On-device face descriptor extraction.
#[async_trait]
pub trait FaceEmbedder: Send + Sync {
    /// Load the model set. Idempotent; must succeed before extraction.
    async fn load_models(&self) -> Result<(), EmbedError>;

    /// Descriptor of the most confident face, or `None` when no face is found.
    async fn extract_single(&self, image: &[u8]) -> Result<Option<Descriptor>, EmbedError>;

    /// One descriptor per detected face.
    async fn extract_all(&self, image: &[u8]) -> Result<Vec<Descriptor>, EmbedError>;

    /// Identifier stamped on every descriptor this embedder produces.
    fn model_version(&self) -> &str;

    /// Euclidean distance cutoff calibrated for this embedder's descriptors.
    fn default_threshold(&self) -> f32 {
        DEFAULT_MATCH_THRESHOLD
    }
}

/// Loaded detector + recognizer pair. Sessions need `&mut` to run.
struct ModelSet {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl ModelSet {
    fn describe(&self, image: &RgbImage, limit: Option<usize>) -> Result<Vec<Descriptor>, EmbedError> {
        let faces = self
            .detector
            .lock()
            .map_err(|_| EmbedError::Worker("detector lock poisoned".into()))?
            .detect(image)?;

        let mut recognizer = self
            .recognizer
            .lock()
            .map_err(|_| EmbedError::Worker("recognizer lock poisoned".into()))?;

        faces
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|face| recognizer.extract(image, face).map_err(EmbedError::from))
            .collect()
    }
}

/// SCRFD + ArcFace embedder backed by ONNX Runtime.
///
/// Models are loaded lazily on first use and shared by every clone of the
/// surrounding `Arc`. Decoding and inference run on the blocking pool.
pub struct OnnxEmbedder {
    assets: ModelAssets,
    models: OnceCell<Arc<ModelSet>>,
}

impl OnnxEmbedder {
    pub fn new(assets: ModelAssets) -> Self {
        Self {
            assets,
            models: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.models.initialized()
    }

    async fn models(&self) -> Result<Arc<ModelSet>, EmbedError> {
        self.models
            .get_or_try_init(|| async {
                self.assets.ensure_available().await?;
                let detector_path = self.assets.detector_path();
                let recognizer_path = self.assets.recognizer_path();

                let set = tokio::task::spawn_blocking(move || -> Result<ModelSet, EmbedError> {
                    let detector = FaceDetector::load(&detector_path)
                        .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;
                    let recognizer = FaceRecognizer::load(&recognizer_path)
                        .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;
                    Ok(ModelSet {
                        detector: Mutex::new(detector),
                        recognizer: Mutex::new(recognizer),
                    })
                })
                .await
                .map_err(|e| EmbedError::ModelLoad(e.to_string()))??;

                tracing::info!(dir = %self.assets.dir().display(), "face models loaded");
                Ok::<_, EmbedError>(Arc::new(set))
            })
            .await
            .cloned()
    }

    async fn describe(&self, image: &[u8], limit: Option<usize>) -> Result<Vec<Descriptor>, EmbedError> {
        let models = self.models().await?;
        let bytes = image.to_vec();
        tokio::task::spawn_blocking(move || {
            let decoded = image::load_from_memory(&bytes)?.to_rgb8();
            models.describe(&decoded, limit)
        })
        .await
        .map_err(|e| EmbedError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl FaceEmbedder for OnnxEmbedder {
    async fn load_models(&self) -> Result<(), EmbedError> {
        self.models().await.map(|_| ())
    }

    async fn extract_single(&self, image: &[u8]) -> Result<Option<Descriptor>, EmbedError> {
        Ok(self.describe(image, Some(1)).await?.into_iter().next())
    }

    async fn extract_all(&self, image: &[u8]) -> Result<Vec<Descriptor>, EmbedError> {
        self.describe(image, None).await
    }

    fn model_version(&self) -> &str {
        ARCFACE_MODEL_VERSION
    }

    fn default_threshold(&self) -> f32 {
        ARCFACE_MATCH_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_models_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = OnnxEmbedder::new(ModelAssets::new(dir.path()));
        let err = embedder.load_models().await.unwrap_err();
        assert!(matches!(err, EmbedError::ModelLoad(_)));
        assert!(!embedder.is_loaded());
    }

    #[tokio::test]
    async fn test_extract_without_models_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = OnnxEmbedder::new(ModelAssets::new(dir.path()));
        let err = embedder.extract_single(b"not an image").await.unwrap_err();
        assert!(matches!(err, EmbedError::ModelLoad(_)));
    }

    #[test]
    fn test_model_version_and_threshold() {
        let embedder = OnnxEmbedder::new(ModelAssets::new("/nonexistent"));
        assert_eq!(embedder.model_version(), "w600k_r50");
        assert_eq!(embedder.default_threshold(), ARCFACE_MATCH_THRESHOLD);
        assert!(embedder.default_threshold() > DEFAULT_MATCH_THRESHOLD);
    }
}
