//! Resolve photo locators to image bytes.
//!
//! A locator is an `http(s)://` URL, a `data:` URL, a `file://` URL or a
//! plain filesystem path.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("empty locator")]
    Empty,
    #[error("malformed data URL: {0}")]
    DataUrl(String),
    #[error("fetch {url} failed: {reason}")]
    Http { url: String, reason: String },
    #[error("read {path} failed: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parsed form of a locator string.
#[derive(Debug, PartialEq, Eq)]
enum Locator<'a> {
    Data(&'a str),
    Http(&'a str),
    File(PathBuf),
}

impl<'a> Locator<'a> {
    fn parse(raw: &'a str) -> Result<Self, LocatorError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LocatorError::Empty);
        }
        let lower = raw.get(..8).unwrap_or(raw).to_ascii_lowercase();
        if lower.starts_with("data:") {
            Ok(Locator::Data(raw))
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Locator::Http(raw))
        } else if let Some(path) = raw.strip_prefix("file://") {
            Ok(Locator::File(PathBuf::from(path)))
        } else {
            Ok(Locator::File(PathBuf::from(raw)))
        }
    }
}

/// Decode the payload of a `data:[<mediatype>][;base64],<data>` URL.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, LocatorError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| LocatorError::DataUrl("missing data: prefix".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| LocatorError::DataUrl("missing ',' separator".into()))?;

    if meta.ends_with(";base64") {
        STANDARD
            .decode(payload.trim())
            .map_err(|e| LocatorError::DataUrl(e.to_string()))
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Build a base64 `data:` URL carrying `bytes`.
pub fn encode_data_url(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{media_type};base64,{}", STANDARD.encode(bytes))
}

/// Fetches locator content. Cheap to clone; clones share the HTTP pool.
#[derive(Debug, Clone, Default)]
pub struct LocatorResolver {
    client: reqwest::Client,
}

impl LocatorResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn fetch(&self, locator: &str) -> Result<Vec<u8>, LocatorError> {
        match Locator::parse(locator)? {
            Locator::Data(url) => decode_data_url(url),
            Locator::Http(url) => {
                let fail = |reason: String| LocatorError::Http {
                    url: url.to_string(),
                    reason,
                };
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(fail(format!("HTTP {status}")));
                }
                let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            Locator::File(path) => tokio::fs::read(&path).await.map_err(|source| LocatorError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

/// The probe (selfie) for one search. Lives only for that call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeImage {
    bytes: Vec<u8>,
}

impl ProbeImage {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub async fn from_locator(resolver: &LocatorResolver, locator: &str) -> Result<Self, LocatorError> {
        Ok(Self::from_bytes(resolver.fetch(locator).await?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Standard base64 of the raw image bytes, as sent to the remote API.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_kinds() {
        assert_eq!(Locator::parse("data:image/png;base64,AA==").unwrap(), Locator::Data("data:image/png;base64,AA=="));
        assert_eq!(Locator::parse("HTTPS://x/y.jpg").unwrap(), Locator::Http("HTTPS://x/y.jpg"));
        assert_eq!(Locator::parse("file:///tmp/a.jpg").unwrap(), Locator::File("/tmp/a.jpg".into()));
        assert_eq!(Locator::parse("photos/a.jpg").unwrap(), Locator::File("photos/a.jpg".into()));
        assert!(matches!(Locator::parse("  "), Err(LocatorError::Empty)));
    }

    #[test]
    fn test_decode_data_url() {
        assert_eq!(decode_data_url("data:image/jpeg;base64,aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_data_url("data:text/plain,hi").unwrap(), b"hi");
        assert!(decode_data_url("data:image/jpeg;base64").is_err());
        assert!(decode_data_url("data:image/jpeg;base64,@@@").is_err());
    }

    #[test]
    fn test_encode_data_url() {
        let url = encode_data_url("image/png", b"hello");
        assert_eq!(url, "data:image/png;base64,aGVsbG8=");
        assert_eq!(decode_data_url(&url).unwrap(), b"hello");
    }

    #[test]
    fn test_probe_base64() {
        let probe = ProbeImage::from_bytes(b"hello".to_vec());
        assert_eq!(probe.to_base64(), "aGVsbG8=");
    }

    #[tokio::test]
    async fn test_fetch_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"jpeg").unwrap();

        let resolver = LocatorResolver::default();
        assert_eq!(resolver.fetch(file.to_str().unwrap()).await.unwrap(), b"jpeg");
        let missing = dir.path().join("missing.jpg");
        let err = resolver.fetch(missing.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, LocatorError::Io { .. }));
    }

    #[tokio::test]
    async fn test_fetch_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"img".to_vec()))
            .mount(&server)
            .await;

        let resolver = LocatorResolver::default();
        let bytes = resolver.fetch(&format!("{}/p1.jpg", server.uri())).await.unwrap();
        assert_eq!(bytes, b"img");

        let err = resolver.fetch(&format!("{}/missing.jpg", server.uri())).await.unwrap_err();
        assert!(matches!(err, LocatorError::Http { .. }));
    }
}
