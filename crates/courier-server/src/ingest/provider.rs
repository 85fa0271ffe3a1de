//! Outbound calls back to the notification provider.

use async_trait::async_trait;
use reqwest::Url;

use courier_net::Result;

/// Required suffix of every provider-hosted URL we are willing to fetch.
const PROVIDER_HOST_SUFFIX: &str = ".amazonaws.com";
const PROVIDER_HOST_PREFIX: &str = "sns.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// GET against provider URLs (subscription confirmation, signing certs).
#[async_trait]
pub trait ProviderHttp: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpReply>;
}

/// [`ProviderHttp`] over a shared reqwest client built with a bounded timeout.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderHttp for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<HttpReply> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(HttpReply { status, body })
    }
}

/// Accept only `https://sns.<region>.amazonaws.com/...`.
pub fn validate_provider_url(raw: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("{raw}: {e}"))?;
    if url.scheme() != "https" {
        return Err(format!("{raw}: not https"));
    }
    let host = url.host_str().unwrap_or_default();
    if !host.starts_with(PROVIDER_HOST_PREFIX) || !host.ends_with(PROVIDER_HOST_SUFFIX) {
        return Err(format!("{raw}: untrusted host"));
    }
    Ok(url)
}
