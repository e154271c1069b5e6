//! Cached artifacts
//!
//! - [`memo`]: TTL cache with coalesced rebuilds and copy-on-read
//! - [`flight`]: keyed single-flight table used by the cache
//! - [`document`]: the API description document served by keygate

pub mod document;
pub mod flight;
pub mod memo;

pub use document::DocumentBuilder;
pub use flight::SingleFlight;
pub use memo::{Artifact, ArtifactBuilder, CacheStats, CopyMode, MemoizedBuilder};
