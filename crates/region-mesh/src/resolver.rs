//! Peer discovery
//!
//! The platform publishes a TXT record at `regions.<app>.<zone>` listing the
//! regions the app is deployed in, one comma-separated list per record.

use std::collections::HashMap;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use parking_lot::Mutex;

use crate::{dns_name, MeshConfig, MeshError, Result};

/// Naming-service lookup, abstracted so tests can run against a synthetic
/// resolver instead of the platform DNS.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;
}

/// System-configured DNS resolver.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn from_system_conf() -> Result<Self> {
        Ok(Self {
            inner: TokioAsyncResolver::tokio_from_system_conf()?,
        })
    }
}

#[async_trait]
impl TxtResolver for DnsResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        let lookup = self.inner.txt_lookup(name).await?;

        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|segment| String::from_utf8_lossy(segment))
                    .collect::<String>()
            })
            .collect())
    }
}

/// In-memory resolver for tests. Records can be swapped out between lookups
/// to simulate regions coming and going.
#[derive(Default)]
pub struct StaticResolver {
    records: Mutex<HashMap<String, Vec<String>>>,
}

impl StaticResolver {
    pub fn new(records: HashMap<String, Vec<String>>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn set(&self, name: impl Into<String>, records: Vec<String>) {
        self.records.lock().insert(name.into(), records);
    }

    pub fn remove(&self, name: &str) {
        self.records.lock().remove(name);
    }
}

#[async_trait]
impl TxtResolver for StaticResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        self.records
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| MeshError::NoRecord(name.to_string()))
    }
}

/// Resolves the set of regions the app is currently deployed in. Each TXT
/// record is a comma-separated region list; records are concatenated and
/// deduplicated preserving order.
pub async fn deployed_regions(resolver: &dyn TxtResolver, cfg: &MeshConfig) -> Result<Vec<String>> {
    let records = resolver
        .lookup_txt(&dns_name(&["regions", &cfg.app, &cfg.zone]))
        .await?;

    let mut regions = Vec::new();
    for record in &records {
        for region in record.split(',') {
            if !region.is_empty() && !regions.iter().any(|r| r == region) {
                regions.push(region.to_string());
            }
        }
    }

    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MeshConfig {
        MeshConfig::new("best-regions", "den")
    }

    #[tokio::test]
    async fn test_deployed_regions() {
        let resolver = StaticResolver::new(HashMap::from([(
            "regions.best-regions.internal".to_string(),
            vec!["den,ord,iad".to_string()],
        )]));

        let regions = deployed_regions(&resolver, &test_config()).await.unwrap();
        assert_eq!(regions, vec!["den", "ord", "iad"]);
    }

    #[tokio::test]
    async fn test_deployed_regions_concatenates_and_dedupes() {
        let resolver = StaticResolver::new(HashMap::from([(
            "regions.best-regions.internal".to_string(),
            vec!["den,ord".to_string(), "iad,den".to_string()],
        )]));

        let regions = deployed_regions(&resolver, &test_config()).await.unwrap();
        assert_eq!(regions, vec!["den", "ord", "iad"]);
    }

    #[tokio::test]
    async fn test_deployed_regions_missing_record() {
        let resolver = StaticResolver::default();

        let err = deployed_regions(&resolver, &test_config())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::NoRecord(_)));
    }
}
