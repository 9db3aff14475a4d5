//! Feed providers
//!
//! A provider fetches one batch of indicators from an upstream feed. The
//! ingestion coordinator bounds every fetch with the run deadline and drops
//! the in-flight future on expiry, so a provider observes cancellation at
//! its next await. A failing provider never halts ingestion; the
//! coordinator logs it and continues with the others.

use crate::error::ProviderError;
use crate::Ioc;
use async_trait::async_trait;

pub mod advisory;
pub mod hostlist;

pub use advisory::AdvisoryArchiveProvider;
pub use hostlist::HostListProvider;

/// Uniform "fetch a batch of IOCs" contract over heterogeneous feeds.
#[async_trait]
pub trait FeedProvider: Send + Sync {
    /// Short feed identifier, recorded as the `source` of every indicator
    /// the provider yields.
    fn name(&self) -> &str;

    /// Fetch and parse one batch.
    async fn fetch(&self) -> Result<Vec<Ioc>, ProviderError>;
}
