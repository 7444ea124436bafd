//! Event Sink (§4.4): deduplicates incidents by fingerprint over a
//! rolling window before they ever reach the network, then POSTs
//! surviving incidents to the task server with one bounded retry.

use std::collections::HashMap;
use std::time::Duration;

use repair_core::event::IncidentEvent;
use tracing::{debug, warn};

pub struct SinkConfig {
    pub server_url: String,
    pub api_key: Option<String>,
    pub dedup_window: Duration,
    pub http_timeout: Duration,
}

/// In-memory `fingerprint → last-sent-at` map, matching the original's
/// best-effort single-process dedup (no cross-instance coordination).
pub struct EventSink {
    client: reqwest::Client,
    cfg: SinkConfig,
    last_sent: HashMap<String, tokio::time::Instant>,
}

impl EventSink {
    pub fn new(cfg: SinkConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(cfg.http_timeout).build()?;
        Ok(Self { client, cfg, last_sent: HashMap::new() })
    }

    fn is_duplicate(&self, fingerprint: &str) -> bool {
        self.last_sent
            .get(fingerprint)
            .is_some_and(|sent_at| sent_at.elapsed() < self.cfg.dedup_window)
    }

    /// Sends `event` unless its fingerprint was sent within the dedup
    /// window. Retries the POST once on failure; gives up with a
    /// logged warning rather than blocking the collector's main loop.
    pub async fn send(&mut self, event: &IncidentEvent) {
        let fingerprint = event.error.fingerprint.clone();
        if self.is_duplicate(&fingerprint) {
            debug!(fingerprint = %fingerprint, "suppressing duplicate incident within dedup window");
            return;
        }

        let url = format!("{}/v1/tasks", self.cfg.server_url.trim_end_matches('/'));
        for attempt in 1..=2 {
            let mut req = self.client.post(&url).json(event);
            if let Some(key) = &self.cfg.api_key {
                req = req.header("X-API-Key", key);
            }
            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    self.last_sent.insert(fingerprint, tokio::time::Instant::now());
                    return;
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), attempt, "task server rejected incident");
                }
                Err(e) => {
                    warn!(error = %e, attempt, "failed to reach task server");
                }
            }
        }
        warn!(fingerprint = %fingerprint, "dropping incident after exhausting retries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repair_core::event::{CodeHost, ErrorBody, RepoRef, ServiceRef, SCHEMA_VERSION};

    fn sample_event(fingerprint: &str) -> IncidentEvent {
        IncidentEvent {
            schema_version: SCHEMA_VERSION.to_string(),
            event_id: "evt-1".to_string(),
            occurred_at: 1_700_000_000,
            repo: RepoRef {
                repo_url: "https://github.com/acme/widgets".to_string(),
                code_host: CodeHost::Github,
                default_branch: "main".to_string(),
            },
            service: ServiceRef { name: "widgets-api".to_string(), environment: "production".to_string() },
            error: ErrorBody {
                exception_type: "ValueError".to_string(),
                message_key: "boom".to_string(),
                fingerprint: fingerprint.to_string(),
                frames: vec![],
                raw_excerpt: "Traceback...".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn sends_and_then_suppresses_the_same_fingerprint() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/v1/tasks"))
            .respond_with(wiremock::ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mut sink = EventSink::new(SinkConfig {
            server_url: server.uri(),
            api_key: Some("secret".to_string()),
            dedup_window: Duration::from_secs(3600),
            http_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let event = sample_event("fp-1");
        sink.send(&event).await;
        sink.send(&event).await;

        server.verify().await;
    }

    #[tokio::test]
    async fn retries_once_then_gives_up() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/v1/tasks"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let mut sink = EventSink::new(SinkConfig {
            server_url: server.uri(),
            api_key: None,
            dedup_window: Duration::from_secs(3600),
            http_timeout: Duration::from_secs(5),
        })
        .unwrap();

        sink.send(&sample_event("fp-2")).await;
        server.verify().await;
    }
}
