//! Network plumbing for Courier: DNS resolution, DNSBL reputation lookups and
//! outbound HTTP client construction.

pub mod dns;
pub mod dnsbl;
pub mod http;

mod error;

pub use dns::{build_resolver, HickoryLookup, HostLookup};
pub use dnsbl::{reverse_ipv4, DnsblChecker, ZoneVerdict};
pub use error::{NetError, Result};
pub use http::{build_fetch_client, build_webhook_client};
