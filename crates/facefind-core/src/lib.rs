//! facefind-core — Face detection, alignment and descriptor extraction.
//!
//! Uses SCRFD for face detection and ArcFace for face descriptors, both
//! running via ONNX Runtime for CPU inference, plus the Euclidean
//! comparator used to decide whether two faces belong to the same person.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod models;
pub mod recognizer;
pub mod types;

pub use detector::FaceDetector;
pub use embedder::{EmbedError, FaceEmbedder, OnnxEmbedder};
pub use models::{default_model_dir, ModelAssets};
pub use recognizer::{FaceRecognizer, ARCFACE_MATCH_THRESHOLD};
pub use types::{BoundingBox, Descriptor, DescriptorComparator, DEFAULT_MATCH_THRESHOLD};
