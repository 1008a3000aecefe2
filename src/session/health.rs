//! Liveness precheck run before any stream is opened.

use std::time::Duration;

use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{info, warn};

/// Probe `url` once with a bounded `timeout`.
///
/// Any 2xx answer counts as healthy; the body is logged (as JSON when it
/// parses). Non-success statuses and transport errors return `false`.
pub async fn check_health(client: &Client, url: &Url, timeout: Duration) -> bool {
    let response = match client.get(url.clone()).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(%url, error = %e, "health: probe failed");
            return false;
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        warn!(%url, %status, body = %body.trim(), "health: server reported unhealthy");
        return false;
    }

    match serde_json::from_str::<Value>(&body) {
        Ok(payload) => info!(%url, %payload, "health: server is healthy"),
        Err(_) => info!(%url, body = %body.trim(), "health: server is healthy"),
    }
    true
}
