//! DNS blacklist (DNSBL) lookups.
//!
//! An IPv4 address `a.b.c.d` is listed on zone `Z` when `d.c.b.a.Z.` has an
//! A record.  The answer (usually `127.0.0.x`) encodes the listing reason.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use courier_shared::types::DnsblZone;

use crate::dns::HostLookup;
use crate::error::{NetError, Result};

/// Reverse the octets of an IPv4 address: `192.0.2.10` -> `10.2.0.192`.
pub fn reverse_ipv4(ip: &str) -> Result<String> {
    let addr: Ipv4Addr = ip
        .trim()
        .parse()
        .map_err(|_| NetError::UnsupportedAddress(ip.to_string()))?;
    let [a, b, c, d] = addr.octets();
    Ok(format!("{d}.{c}.{b}.{a}"))
}

/// Outcome of querying one zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneVerdict {
    pub zone: DnsblZone,
    /// First A-record answer when listed.
    pub answer: Option<Ipv4Addr>,
}

impl ZoneVerdict {
    pub fn listed(&self) -> bool {
        self.answer.is_some()
    }
}

/// Queries a fixed set of zones for an address.
pub struct DnsblChecker {
    lookup: Arc<dyn HostLookup>,
    zones: Vec<DnsblZone>,
    timeout: Duration,
}

impl DnsblChecker {
    pub fn new(lookup: Arc<dyn HostLookup>, zones: &[DnsblZone], timeout: Duration) -> Self {
        Self {
            lookup,
            zones: zones.to_vec(),
            timeout,
        }
    }

    pub fn zones(&self) -> &[DnsblZone] {
        &self.zones
    }

    /// Check `ip` against every zone concurrently.
    ///
    /// Only a malformed or non-IPv4 address is an error.  A zone whose lookup
    /// fails or times out is reported as not listed.
    pub async fn check(&self, ip: &str) -> Result<Vec<ZoneVerdict>> {
        let reversed = reverse_ipv4(ip)?;

        let lookups = self.zones.iter().map(|zone| {
            let name = format!("{}.{}.", reversed, zone.zone);
            let lookup = Arc::clone(&self.lookup);
            let timeout = self.timeout;
            async move {
                let answer = match tokio::time::timeout(timeout, lookup.lookup_ipv4(&name)).await {
                    Ok(Ok(answers)) => answers.into_iter().next(),
                    Ok(Err(e)) => {
                        warn!(query = %name, error = %e, "DNSBL lookup failed, treating as not listed");
                        None
                    }
                    Err(_) => {
                        warn!(query = %name, "DNSBL lookup timed out, treating as not listed");
                        None
                    }
                };
                debug!(query = %name, listed = answer.is_some(), "DNSBL lookup");
                ZoneVerdict {
                    zone: *zone,
                    answer,
                }
            }
        });

        Ok(join_all(lookups).await)
    }
}
