//! facefind-search — find the photos in a gallery that contain the person in a selfie.
//!
//! The [`SearchEngine`] picks a provider from the stored configuration:
//! local descriptor comparison ([`LocalMatcher`]) or a remote matching API
//! ([`RemoteMatcher`]), and reports progress while it works.

pub mod config;
pub mod engine;
pub mod error;
pub mod local;
pub mod locator;
pub mod progress;
pub mod provider;
pub mod remote;
pub mod store;

pub use config::{ConfigResolver, EngineSettings, ProviderConfig, ProviderKind, PROVIDER_CONFIG_KEY};
pub use engine::{SearchEngine, SearchState};
pub use error::{SearchError, SearchErrorKind};
pub use local::LocalMatcher;
pub use locator::{encode_data_url, LocatorError, LocatorResolver, ProbeImage};
pub use progress::{ignore_progress, CancelToken, Progress, ProgressFn};
pub use provider::MatchProvider;
pub use remote::RemoteMatcher;
pub use store::{CandidatePhoto, ConfigStore, MemoryStore, PhotoMatch, PhotoStore, SqliteStore, StoreError};
