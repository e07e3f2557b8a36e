//! Literature source adapters.

pub mod arxiv;
pub mod pubmed;
pub mod semantic_scholar;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lamina_common::config::SourcesConfig;
use lamina_common::net::ConfinedClient;
use lamina_common::Result;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::models::{PaperRecord, SourceTag};

/// One page of results from a source.
#[derive(Debug, Default)]
pub struct SearchPage {
    pub records: Vec<PaperRecord>,
    /// Opaque continuation token; `None` when the source is exhausted.
    pub next_token: Option<String>,
    /// Source-reported total matches, when the source exposes one.
    pub total_hint: Option<usize>,
}

/// Options a job may pass down to adapters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// PubMed only: sort by publication date instead of relevance.
    pub sort_by_date: bool,
}

/// Common interface for all literature sources. One operation: fetch a page
/// of normalized records for a query. Pagination is adapter-owned; the
/// orchestrator only threads the opaque token back in.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn tag(&self) -> SourceTag;

    async fn search(
        &self,
        query: &str,
        page_token: Option<&str>,
        max_per_page: usize,
        options: SearchOptions,
    ) -> Result<SearchPage>;
}

/// The adapters a deployment has configured, looked up by tag. The
/// orchestrator depends on this capability, never on concrete adapters.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn from_config(cfg: &SourcesConfig, client: &ConfinedClient) -> Self {
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(pubmed::PubMedAdapter::new(client.clone(), &cfg.pubmed)),
            Arc::new(arxiv::ArxivAdapter::new(client.clone(), &cfg.arxiv)),
            Arc::new(semantic_scholar::SemanticScholarAdapter::new(
                client.clone(),
                &cfg.semantic_scholar,
            )),
        ];
        Self { adapters }
    }

    /// Build a registry from explicit adapters (mock adapters in tests).
    pub fn from_adapters(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn get(&self, tag: SourceTag) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.tag() == tag).cloned()
    }
}

/// Enforces a minimum delay between successive requests to one source.
/// Distinct adapters each carry their own pacer, so they never block each
/// other.
pub struct RequestPacer {
    min_delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_delay: Duration) -> Self {
        Self { min_delay, last: Mutex::new(None) }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Sleeps out the remainder of the delay window, then stamps now.
    pub async fn pace(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pacer_spaces_requests() {
        let pacer = RequestPacer::from_millis(500);
        let t0 = Instant::now();
        pacer.pace().await;
        pacer.pace().await;
        pacer.pace().await;
        assert!(t0.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_first_call_does_not_wait() {
        let pacer = RequestPacer::from_millis(500);
        let t0 = std::time::Instant::now();
        pacer.pace().await;
        assert!(t0.elapsed() < Duration::from_millis(100));
    }
}
