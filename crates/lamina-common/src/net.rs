use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

use crate::error::LaminaError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP client capped to an allowlist of approved hosts.
///
/// All outbound traffic in the workspace goes through this wrapper, so a
/// misconfigured adapter or a hostile `pdf_url` cannot reach arbitrary
/// endpoints.
#[derive(Debug, Clone)]
pub struct ConfinedClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl ConfinedClient {
    /// Build a client with the default allowlist of academic APIs.
    pub fn new() -> Result<Self, LaminaError> {
        let mut allowlist = HashSet::new();
        let domains = [
            "eutils.ncbi.nlm.nih.gov", // PubMed E-utilities
            "www.ncbi.nlm.nih.gov",    // PMC article PDFs
            "pmc.ncbi.nlm.nih.gov",    // PMC mirror
            "export.arxiv.org",        // arXiv Atom API
            "arxiv.org",               // arXiv PDFs
            "api.semanticscholar.org", // Semantic Scholar graph API
            "doi.org",                 // DOI redirects
            "localhost",
            "127.0.0.1",
        ];
        for d in domains {
            allowlist.insert(d.to_string());
        }

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent("Lamina/0.1 (research)")
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| LaminaError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Allow the host of a full URL (used for the configured translation endpoint).
    pub fn allow_url_host(&mut self, url: &str) {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                self.allowlist.insert(host.to_string());
            }
        }
    }

    /// Whether a URL is permitted: exact host match or subdomain of an allowed host.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{}", allowed)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, LaminaError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder, LaminaError> {
        self.check(url)?;
        Ok(self.client.post(url))
    }

    fn check(&self, url: &str) -> Result<(), LaminaError> {
        if !self.is_allowed(url) {
            return Err(LaminaError::Security(format!(
                "host not in allowlist for URL {url}"
            )));
        }
        Ok(())
    }
}
