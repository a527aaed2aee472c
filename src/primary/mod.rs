//! Primary-domain delegation.
//!
//! A domain "runs its own identity provider" when it publishes a support
//! document at `/.well-known/browserid` naming its signing key. This client
//! answers "does this domain support primary authentication?" with a cached,
//! best-effort lookup: network and parse failures are indistinguishable from
//! "no support" and never surface as errors. Requests can be routed through a
//! forward caching proxy so prefetch warms that layer as well.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

/// Discovery resource path published by delegating domains.
pub const WELL_KNOWN_PATH: &str = "/.well-known/browserid";

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Support document a primary domain publishes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SupportDocument {
    /// Base64url-encoded Ed25519 key the domain certifies users with.
    #[serde(rename = "public-key")]
    pub public_key: String,
    pub authentication: String,
    pub provisioning: String,
}

/// Discovery configuration.
#[derive(Debug, Clone)]
pub struct PrimaryConfig {
    cache_ttl: Duration,
    fetch_timeout: Duration,
    proxy: Option<String>,
    insecure_http: bool,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            proxy: None,
            insecure_http: false,
        }
    }
}

impl PrimaryConfig {
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Route well-known fetches through a forward caching proxy.
    #[must_use]
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Fetch over plain http. Only for local stubs in tests and dev.
    #[must_use]
    pub fn with_insecure_http(mut self, insecure: bool) -> Self {
        self.insecure_http = insecure;
        self
    }
}

struct CachedLookup {
    document: Option<SupportDocument>,
    fetched_at: Instant,
}

impl CachedLookup {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Cached client for primary-domain support lookups.
pub struct PrimaryDelegationClient {
    client: reqwest::Client,
    cache: RwLock<HashMap<String, CachedLookup>>,
    cache_ttl: Duration,
    insecure_http: bool,
}

impl PrimaryDelegationClient {
    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed (for
    /// example an unparseable proxy URL).
    pub fn new(config: PrimaryConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(crate::attesta::APP_USER_AGENT)
            .timeout(config.fetch_timeout);
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .with_context(|| format!("invalid well-known proxy: {proxy}"))?,
            );
        }
        let client = builder.build().context("failed to build discovery client")?;

        Ok(Self {
            client,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: config.cache_ttl,
            insecure_http: config.insecure_http,
        })
    }

    /// Fetch (or serve from cache) the domain's support document.
    ///
    /// `None` covers every failure mode: no document, unreachable host,
    /// malformed json. Negative answers are cached with the same TTL.
    pub async fn support_document(&self, domain: &str) -> Option<SupportDocument> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(domain) {
                if cached.is_fresh(self.cache_ttl) {
                    return cached.document.clone();
                }
            }
        }

        // Fetch outside the lock. Concurrent lookups for the same cold
        // domain may duplicate a request, but a slow or unreachable domain
        // never stalls lookups for the others.
        let document = self.fetch_document(domain).await;

        let mut cache = self.cache.write().await;
        cache.insert(
            domain.to_string(),
            CachedLookup {
                document: document.clone(),
                fetched_at: Instant::now(),
            },
        );
        document
    }

    /// Whether the domain supports primary authentication. Never fails.
    pub async fn check_support(&self, domain: &str) -> bool {
        self.support_document(domain).await.is_some()
    }

    /// Warm the cache (and any forward proxy) for the domains of `emails`.
    ///
    /// Each distinct domain is looked up on a detached task; results and
    /// errors are discarded and nothing here delays the caller.
    pub fn prefetch(self: &Arc<Self>, emails: impl IntoIterator<Item = String>) {
        let domains: HashSet<String> = emails
            .into_iter()
            .filter_map(|email| email_domain(&email).map(str::to_string))
            .collect();

        for domain in domains {
            let client = Arc::clone(self);
            tokio::spawn(async move {
                let supported = client.check_support(&domain).await;
                debug!("prefetched well-known for {domain}: supported={supported}");
            });
        }
    }

    async fn fetch_document(&self, domain: &str) -> Option<SupportDocument> {
        let url = self.document_url(domain);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!("well-known fetch for {domain} failed: {err}");
                return None;
            }
        };
        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(err) => {
                debug!("well-known fetch for {domain} returned an error status: {err}");
                return None;
            }
        };
        match response.json::<SupportDocument>().await {
            Ok(document) => Some(document),
            Err(err) => {
                debug!("well-known document for {domain} did not parse: {err}");
                None
            }
        }
    }

    fn document_url(&self, domain: &str) -> String {
        let scheme = if self.insecure_http { "http" } else { "https" };
        format!("{scheme}://{domain}{WELL_KNOWN_PATH}")
    }
}

/// Domain part of an email address, if any.
#[must_use]
pub fn email_domain(email: &str) -> Option<&str> {
    match email.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Some(domain),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_domain_takes_the_part_after_the_last_at() {
        assert_eq!(email_domain("user@example.com"), Some("example.com"));
        assert_eq!(email_domain("a@b@example.com"), Some("example.com"));
        assert_eq!(email_domain("user@127.0.0.1:8080"), Some("127.0.0.1:8080"));
    }

    #[test]
    fn email_domain_rejects_degenerate_addresses() {
        assert_eq!(email_domain("no-at-sign"), None);
        assert_eq!(email_domain("@domain.only"), None);
        assert_eq!(email_domain("local@"), None);
    }

    #[test]
    fn support_document_parses_the_published_shape() {
        let json = r#"{
            "public-key": "sCi6ZGNN8PC5ltJrnRLyq9Nu5r1plvMlUbMNhYRgsCc",
            "authentication": "/auth.html",
            "provisioning": "/provision.html"
        }"#;
        let document: SupportDocument = serde_json::from_str(json).expect("parses");
        assert_eq!(document.authentication, "/auth.html");
    }

    #[test]
    fn document_url_uses_https_unless_overridden() {
        let secure = PrimaryDelegationClient::new(PrimaryConfig::default()).expect("client");
        assert_eq!(
            secure.document_url("example.com"),
            "https://example.com/.well-known/browserid"
        );
        let insecure =
            PrimaryDelegationClient::new(PrimaryConfig::default().with_insecure_http(true))
                .expect("client");
        assert_eq!(
            insecure.document_url("127.0.0.1:9000"),
            "http://127.0.0.1:9000/.well-known/browserid"
        );
    }

    #[tokio::test]
    async fn stale_cache_entries_are_not_served() {
        let client =
            PrimaryDelegationClient::new(PrimaryConfig::default().with_cache_ttl(Duration::ZERO))
                .expect("client");
        client.cache.write().await.insert(
            "example.com".to_string(),
            CachedLookup {
                document: Some(SupportDocument {
                    public_key: "key".to_string(),
                    authentication: "/auth".to_string(),
                    provisioning: "/prov".to_string(),
                }),
                fetched_at: Instant::now(),
            },
        );
        // TTL zero means the entry is immediately stale; the cached read path
        // must skip it rather than hand it back.
        let cache = client.cache.read().await;
        let cached = cache.get("example.com").expect("entry present");
        assert!(!cached.is_fresh(client.cache_ttl));
    }

    #[tokio::test]
    async fn fresh_cache_entries_answer_without_a_fetch() {
        let client = PrimaryDelegationClient::new(PrimaryConfig::default()).expect("client");
        client.cache.write().await.insert(
            "cached.example".to_string(),
            CachedLookup {
                document: None,
                fetched_at: Instant::now(),
            },
        );
        // A fresh negative entry must short-circuit to "unsupported" with no
        // network involved (the fetch would hang this test otherwise).
        assert!(!client.check_support("cached.example").await);
    }
}
