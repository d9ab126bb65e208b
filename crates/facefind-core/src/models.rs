//! Model asset resolution.
//!
//! Both ONNX files live in one directory. When a file is missing and a base
//! URL is configured, it is downloaded once into that directory.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelAssetError {
    #[error("model file not found: {0} (set FACEFIND_MODEL_BASE_URL or place it there manually)")]
    Missing(String),
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },
    #[error("io error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Default model directory: `$XDG_DATA_HOME/facefind/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facefind/models")
}

/// Location of the detector and recognizer model files.
#[derive(Debug, Clone)]
pub struct ModelAssets {
    dir: PathBuf,
    base_url: Option<String>,
}

impl ModelAssets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            base_url: None,
        }
    }

    /// Download missing files from `base_url` (`<base_url>/<file name>`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn detector_path(&self) -> PathBuf {
        self.dir.join(DETECTOR_FILE)
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.dir.join(RECOGNIZER_FILE)
    }

    /// Whether both model files are already on disk.
    pub fn is_present(&self) -> bool {
        self.detector_path().exists() && self.recognizer_path().exists()
    }

    /// Make sure both model files exist locally, downloading if possible.
    pub async fn ensure_available(&self) -> Result<(), ModelAssetError> {
        for file in [DETECTOR_FILE, RECOGNIZER_FILE] {
            let path = self.dir.join(file);
            if path.exists() {
                continue;
            }
            let Some(base) = &self.base_url else {
                return Err(ModelAssetError::Missing(path.display().to_string()));
            };
            let url = format!("{}/{file}", base.trim_end_matches('/'));
            download(&url, &path).await?;
        }
        Ok(())
    }
}

async fn download(url: &str, dest: &Path) -> Result<(), ModelAssetError> {
    let fail = |reason: String| ModelAssetError::Download {
        url: url.to_string(),
        reason,
    };
    let io_err = |source: std::io::Error| ModelAssetError::Io {
        path: dest.display().to_string(),
        source,
    };

    tracing::info!(url, dest = %dest.display(), "downloading model file");

    let response = reqwest::get(url).await.map_err(|e| fail(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(fail(format!("HTTP {status}")));
    }
    let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    // Write to a temp name first so a partial download never looks complete.
    let partial = dest.with_extension("onnx.part");
    tokio::fs::write(&partial, &bytes).await.map_err(io_err)?;
    tokio::fs::rename(&partial, dest).await.map_err(io_err)?;

    tracing::info!(bytes = bytes.len(), dest = %dest.display(), "model file downloaded");
    Ok(())
}
