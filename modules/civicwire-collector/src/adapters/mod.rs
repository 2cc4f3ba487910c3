pub mod civicplus;
pub mod legistar;
pub mod media;
pub mod nixle;

use async_trait::async_trait;

use civicwire_common::{CivicWireError, RawItem, Source};

pub use civicplus::CivicPlusAdapter;
pub use legistar::LegistarAdapter;
pub use media::MediaFeedAdapter;
pub use nixle::NixleAdapter;

/// Per-platform fetch-and-normalize implementation.
///
/// Contract: zero items is a normal result (a quiet week is not an error);
/// a missing required connection parameter is `Config`; transport and parse
/// failures are raised so the orchestrator can fail the run.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn collect(&self, source: &Source) -> Result<Vec<RawItem>, CivicWireError>;
}
