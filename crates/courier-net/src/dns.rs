//! DNS resolver used for DNSBL reputation lookups.
//!
//! By default the host's resolver configuration is used.  An explicit
//! nameserver can be configured instead; DNSBL operators commonly refuse
//! queries arriving through large public resolvers, so production
//! deployments usually point this at a local recursive resolver.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    error::ResolveErrorKind,
    TokioAsyncResolver,
};
use tracing::info;

use crate::error::{NetError, Result};

/// Build the async resolver.
///
/// * `nameserver` -- `Some(addr)` queries only that server over UDP, `None`
///   reads the system configuration.
/// * `timeout` -- per-query timeout; each query is tried twice.
pub fn build_resolver(nameserver: Option<SocketAddr>, timeout: Duration) -> Result<TokioAsyncResolver> {
    let (resolver_config, mut opts) = match nameserver {
        Some(addr) => {
            let ns = NameServerConfig {
                socket_addr: addr,
                protocol: Protocol::Udp,
                tls_dns_name: None,
                trust_negative_responses: true,
                tls_config: None,
                bind_addr: None,
            };
            let mut config = ResolverConfig::new();
            config.add_name_server(ns);
            info!(nameserver = %addr, "Built DNS resolver with explicit nameserver");
            (config, ResolverOpts::default())
        }
        None => {
            let (config, opts) = hickory_resolver::system_conf::read_system_conf()
                .map_err(|e| NetError::SystemConfig(e.to_string()))?;
            info!("Built DNS resolver from system configuration");
            (config, opts)
        }
    };

    opts.timeout = timeout;
    opts.attempts = 2;
    // Listings change; keep answers only briefly.
    opts.cache_size = 64;
    opts.positive_max_ttl = Some(Duration::from_secs(300));
    opts.negative_max_ttl = Some(Duration::from_secs(300));

    Ok(TokioAsyncResolver::tokio(resolver_config, opts))
}

/// A-record lookup, abstracted so DNSBL checks can run against a fake zone.
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// IPv4 answers for `name`.  An empty vector means the name does not
    /// exist or has no A records.
    async fn lookup_ipv4(&self, name: &str) -> Result<Vec<Ipv4Addr>>;
}

/// [`HostLookup`] backed by a hickory resolver.
pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryLookup {
    pub fn new(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl HostLookup for HickoryLookup {
    async fn lookup_ipv4(&self, name: &str) -> Result<Vec<Ipv4Addr>> {
        match self.resolver.ipv4_lookup(name).await {
            Ok(answer) => Ok(answer.iter().map(|a| a.0).collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                ResolveErrorKind::Timeout => Err(NetError::Timeout(name.to_string())),
                _ => Err(NetError::Resolve(e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_resolver_with_explicit_nameserver() {
        let addr: SocketAddr = "127.0.0.1:5353".parse().unwrap();
        let resolver = build_resolver(Some(addr), Duration::from_secs(2)).unwrap();
        let _lookup = HickoryLookup::new(resolver);
    }
}
