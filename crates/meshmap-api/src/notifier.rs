//! Outbound webhook relay — forwards alert payloads to the configured
//! notifier endpoints. Fire-and-forget; failures are logged, never
//! surfaced to the inbound request.

use std::time::Duration;

const DEFAULT_PATH: &str = "/api/v1/alerts";
const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    urls: Vec<String>,
    path: String,
}

impl Notifier {
    pub fn new(urls: Vec<String>, path: &str) -> Self {
        let path = if path.is_empty() { DEFAULT_PATH } else { path };
        Self {
            client: reqwest::Client::new(),
            urls,
            path: path.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.urls.is_empty()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Dispatch the body to every configured endpoint and return
    /// immediately.
    pub fn relay(&self, body: String) {
        for url in &self.urls {
            let client = self.client.clone();
            let target = format!("{}{}", url.trim_end_matches('/'), self.path);
            let body = body.clone();
            tokio::spawn(async move {
                let sent = client
                    .post(&target)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .timeout(RELAY_TIMEOUT)
                    .send()
                    .await;
                match sent {
                    Ok(resp) if resp.status().is_success() => {
                        tracing::debug!(target = %target, "webhook relayed");
                    }
                    Ok(resp) => {
                        tracing::error!(target = %target, status = %resp.status(), "webhook relay rejected");
                    }
                    Err(e) => {
                        tracing::error!(target = %target, error = %e, "webhook relay failed");
                    }
                }
            });
        }
    }
}
