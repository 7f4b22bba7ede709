//! Resolution of off-chain token descriptors.
//!
//! A descriptor is immutable once published, so [`MetadataFetcher`] keeps
//! every successfully resolved URI for the rest of the session. Failures are
//! never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::config::MetadataConfig;
use crate::errors::{DescriptorError, MarketError, MarketResult};
use crate::ledger::TokenContract;
use crate::types::{Descriptor, TokenId};

const IPFS_SCHEME: &str = "ipfs://";

/// Off-chain store that publishes token descriptors.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Descriptor, DescriptorError>;
}

/// Descriptor JSON as published. Everything is optional on the wire and
/// checked by [`RawDescriptor::into_descriptor`].
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    image: Option<String>,
}

impl RawDescriptor {
    fn into_descriptor(self) -> Result<Descriptor, DescriptorError> {
        let name = non_blank(self.name)
            .ok_or_else(|| DescriptorError::Malformed("missing `name`".into()))?;
        let image = non_blank(self.image)
            .ok_or_else(|| DescriptorError::Malformed("missing `image`".into()))?;
        Ok(Descriptor {
            name,
            description: self.description.unwrap_or_default(),
            image,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Parses a descriptor document, rejecting ones without a name or image.
pub fn parse_descriptor(bytes: &[u8]) -> Result<Descriptor, DescriptorError> {
    let raw: RawDescriptor = serde_json::from_slice(bytes)
        .map_err(|err| DescriptorError::Malformed(err.to_string()))?;
    raw.into_descriptor()
}

/// Fetches descriptors over HTTP(S), mapping `ipfs://` references onto a
/// gateway.
#[derive(Clone)]
pub struct HttpDescriptorSource {
    client: Client,
    ipfs_gateway: Url,
}

impl HttpDescriptorSource {
    pub fn from_config(config: &MetadataConfig) -> Result<Self, DescriptorError> {
        let ipfs_gateway = Url::parse(&config.ipfs_gateway).map_err(|err| {
            DescriptorError::Fetch(format!("invalid ipfs gateway {}: {err}", config.ipfs_gateway))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| DescriptorError::Fetch(err.to_string()))?;
        Ok(Self {
            client,
            ipfs_gateway,
        })
    }

    /// Turns a descriptor reference into the URL that is actually fetched.
    pub fn resolve_url(&self, uri: &str) -> Result<Url, DescriptorError> {
        if let Some(path) = uri.strip_prefix(IPFS_SCHEME) {
            let path = path.trim_start_matches("ipfs/");
            return self
                .ipfs_gateway
                .join(&format!("ipfs/{path}"))
                .map_err(|err| DescriptorError::Fetch(format!("{uri}: {err}")));
        }
        let url = Url::parse(uri).map_err(|err| DescriptorError::Fetch(format!("{uri}: {err}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(DescriptorError::Fetch(format!(
                "unsupported descriptor scheme `{scheme}`"
            ))),
        }
    }
}

#[async_trait]
impl DescriptorSource for HttpDescriptorSource {
    async fn fetch(&self, uri: &str) -> Result<Descriptor, DescriptorError> {
        let url = self.resolve_url(uri)?;
        trace!(%url, "fetching descriptor");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| DescriptorError::Fetch(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DescriptorError::Status(status.as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| DescriptorError::Fetch(err.to_string()))?;
        parse_descriptor(&body)
    }
}

/// Descriptor store backed by a map, for tests and the demo mode.
#[derive(Default)]
pub struct StaticDescriptorSource {
    entries: RwLock<HashMap<String, Result<Descriptor, DescriptorError>>>,
    fetches: Mutex<usize>,
}

impl StaticDescriptorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, uri: impl Into<String>, descriptor: Descriptor) {
        self.entries.write().insert(uri.into(), Ok(descriptor));
    }

    /// Makes every fetch of `uri` fail with `error`.
    pub fn fail(&self, uri: impl Into<String>, error: DescriptorError) {
        self.entries.write().insert(uri.into(), Err(error));
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock()
    }
}

#[async_trait]
impl DescriptorSource for StaticDescriptorSource {
    async fn fetch(&self, uri: &str) -> Result<Descriptor, DescriptorError> {
        *self.fetches.lock() += 1;
        self.entries
            .read()
            .get(uri)
            .cloned()
            .unwrap_or_else(|| Err(DescriptorError::Status(404)))
    }
}

/// Session-scoped descriptor resolver.
pub struct MetadataFetcher {
    source: Arc<dyn DescriptorSource>,
    cache: Option<Mutex<HashMap<String, Descriptor>>>,
}

impl MetadataFetcher {
    pub fn new(source: Arc<dyn DescriptorSource>, cache_descriptors: bool) -> Self {
        Self {
            source,
            cache: cache_descriptors.then(|| Mutex::new(HashMap::new())),
        }
    }

    pub async fn resolve(&self, uri: &str) -> MarketResult<Descriptor> {
        if let Some(hit) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.lock().get(uri).cloned())
        {
            return Ok(hit);
        }
        let descriptor = self.source.fetch(uri).await.map_err(|err| {
            debug!(uri, error = %err, "descriptor resolution failed");
            MarketError::descriptor(uri, err)
        })?;
        if let Some(cache) = &self.cache {
            cache.lock().insert(uri.to_owned(), descriptor.clone());
        }
        Ok(descriptor)
    }

    /// Reads the descriptor reference of `token_id` and resolves it.
    pub async fn token_descriptor(
        &self,
        tokens: &dyn TokenContract,
        token_id: TokenId,
    ) -> MarketResult<Descriptor> {
        let uri = tokens.token_uri(token_id).await?;
        self.resolve(&uri).await
    }

    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.lock().len())
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;

    fn descriptor(name: &str) -> Descriptor {
        Descriptor {
            name: name.into(),
            description: format!("{name} description"),
            image: format!("https://img.example/{name}.png"),
        }
    }

    #[test]
    fn descriptors_require_name_and_image() {
        let parsed = parse_descriptor(br#"{"name":"Orb","image":"https://x/orb.png"}"#)
            .expect("descriptor");
        assert_eq!(parsed.description, "");

        let missing = parse_descriptor(br#"{"name":"Orb","description":"round"}"#);
        assert!(matches!(missing, Err(DescriptorError::Malformed(_))));
        assert!(matches!(
            parse_descriptor(b"not json"),
            Err(DescriptorError::Malformed(_))
        ));
    }

    #[test]
    fn ipfs_references_use_the_gateway() {
        let source = HttpDescriptorSource::from_config(&MetadataConfig::default()).unwrap();
        assert_eq!(
            source.resolve_url("ipfs://bafyabc/1.json").unwrap().as_str(),
            "https://ipfs.io/ipfs/bafyabc/1.json"
        );
        assert_eq!(
            source
                .resolve_url("https://meta.example/2.json")
                .unwrap()
                .as_str(),
            "https://meta.example/2.json"
        );
        assert!(source.resolve_url("ftp://meta.example/3.json").is_err());
    }

    #[tokio::test]
    async fn resolved_descriptors_are_cached_but_failures_are_not() {
        let source = Arc::new(StaticDescriptorSource::new());
        source.publish("ipfs://a", descriptor("a"));
        let fetcher = MetadataFetcher::new(source.clone(), true);

        assert_eq!(fetcher.resolve("ipfs://a").await.unwrap(), descriptor("a"));
        assert_eq!(fetcher.resolve("ipfs://a").await.unwrap(), descriptor("a"));
        assert_eq!(source.fetch_count(), 1);

        let missing = fetcher.resolve("ipfs://missing").await.unwrap_err();
        assert_eq!(missing.kind(), FailureKind::DescriptorUnresolvable);
        let _ = fetcher.resolve("ipfs://missing").await;
        assert_eq!(source.fetch_count(), 3);
        assert_eq!(fetcher.cached_len(), 1);
    }

    #[tokio::test]
    async fn disabled_cache_always_fetches() {
        let source = Arc::new(StaticDescriptorSource::new());
        source.publish("ipfs://a", descriptor("a"));
        let fetcher = MetadataFetcher::new(source.clone(), false);
        fetcher.resolve("ipfs://a").await.unwrap();
        fetcher.resolve("ipfs://a").await.unwrap();
        assert_eq!(source.fetch_count(), 2);
    }
}
