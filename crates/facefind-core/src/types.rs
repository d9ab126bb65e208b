use serde::{Deserialize, Serialize};

/// Euclidean distance below which two descriptors are considered the same person.
///
/// This is the calibration of the 128-d face descriptors the gallery format
/// was first built around. Other models ship their own value through
/// `FaceEmbedder::default_threshold`.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.45;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face descriptor (embedding) for one detected face.
///
/// Descriptors are only comparable when produced by the same model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>, model_version: Option<String>) -> Self {
        Self {
            values,
            model_version,
        }
    }

    /// Compute Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Whether two descriptors come from the same model and have the same length.
    pub fn is_comparable(&self, other: &Descriptor) -> bool {
        self.values.len() == other.values.len() && self.model_version == other.model_version
    }
}

/// Euclidean distance comparator with a fixed acceptance threshold.
///
/// Lower distance = more similar. A pair matches when its distance is
/// strictly below the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorComparator {
    threshold: f32,
}

impl Default for DescriptorComparator {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl DescriptorComparator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32 {
        a.euclidean_distance(b)
    }

    pub fn is_match(&self, a: &Descriptor, b: &Descriptor) -> bool {
        self.distance(a, b) < self.threshold
    }

    /// Smallest distance between the probe and any comparable face, if one matches.
    ///
    /// Faces from a different model version are skipped.
    pub fn best_distance(&self, probe: &Descriptor, faces: &[Descriptor]) -> Option<f32> {
        faces
            .iter()
            .filter(|face| probe.is_comparable(face))
            .map(|face| self.distance(probe, face))
            .filter(|d| *d < self.threshold)
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }
}
