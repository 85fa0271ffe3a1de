//! Outbound HTTP clients.

use std::time::Duration;

use courier_shared::constants::{APP_NAME, WEBHOOK_USER_AGENT};

use crate::error::Result;

/// Client for subscriber webhook POSTs.  Redirects are not followed; a 3xx
/// from a subscriber counts as a failed delivery.
pub fn build_webhook_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(WEBHOOK_USER_AGENT)
        .build()?)
}

/// Client for provider-facing GETs (subscription confirmation, signing
/// certificates).
pub fn build_fetch_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(3))
        .user_agent(format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")))
        .build()?)
}
