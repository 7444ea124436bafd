//! Search Tailer (§4.2): polls an Elasticsearch/OpenSearch-compatible
//! `_search` endpoint on an interval, tracking a `(timestamp, event_id)`
//! cursor so that repeated polls never re-deliver or drop a hit
//! straddling a poll boundary.

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

pub struct SearchTailerConfig {
    pub url: String,
    pub index: String,
    pub query: Option<String>,
    pub poll_interval: std::time::Duration,
    pub since_seconds: i64,
    pub batch_size: u32,
}

/// The `(timestamp, event_id)` watermark of §4.2: a hit is new only if
/// its timestamp is strictly after the cursor, or equal with a lexically
/// greater id — giving a stable total order over same-millisecond hits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Cursor {
    timestamp: Option<String>,
    event_id: Option<String>,
}

impl Cursor {
    fn accepts(&self, timestamp: &str, event_id: &str) -> bool {
        match &self.timestamp {
            None => true,
            Some(ts) => match timestamp.cmp(ts) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => Some(event_id.to_string()) > self.event_id,
                std::cmp::Ordering::Less => false,
            },
        }
    }

    fn advance(&mut self, timestamp: &str, event_id: &str) {
        self.timestamp = Some(timestamp.to_string());
        self.event_id = Some(event_id.to_string());
    }
}

pub struct SearchTailer {
    client: reqwest::Client,
    cfg: SearchTailerConfig,
    cursor: Cursor,
}

impl SearchTailer {
    #[must_use]
    pub fn new(client: reqwest::Client, cfg: SearchTailerConfig) -> Self {
        let since = chrono::Utc::now() - chrono::Duration::seconds(cfg.since_seconds);
        Self {
            client,
            cfg,
            cursor: Cursor { timestamp: Some(since.to_rfc3339()), event_id: None },
        }
    }

    pub async fn run(mut self, tx: mpsc::Sender<String>) {
        loop {
            match self.poll_once().await {
                Ok(hits) => {
                    for hit in hits {
                        if tx.send(hit).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(url = %self.cfg.url, error = %e, "search tailer poll failed"),
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
    }

    async fn poll_once(&mut self) -> anyhow::Result<Vec<String>> {
        let since = self.cursor.timestamp.clone().unwrap_or_default();
        let mut must = vec![json!({"range": {"@timestamp": {"gte": since}}})];
        if let Some(q) = &self.cfg.query {
            must.push(json!({"query_string": {"query": q}}));
        }
        let body = json!({
            "size": self.cfg.batch_size,
            "sort": [{"@timestamp": "asc"}, {"_id": "asc"}],
            "query": {"bool": {"must": must}},
        });

        let url = format!("{}/{}/_search", self.cfg.url.trim_end_matches('/'), self.cfg.index);
        let resp = self.client.post(&url).json(&body).send().await?.error_for_status()?;
        let payload: Value = resp.json().await?;

        let hits = payload["hits"]["hits"].as_array().cloned().unwrap_or_default();
        let mut out = Vec::new();
        for hit in hits {
            let id = hit["_id"].as_str().unwrap_or_default().to_string();
            let source = &hit["_source"];
            let timestamp = source["@timestamp"].as_str().unwrap_or_default().to_string();
            if timestamp.is_empty() || !self.cursor.accepts(&timestamp, &id) {
                continue;
            }
            let message = source["message"].as_str().map(str::to_string).unwrap_or_else(|| source.to_string());
            self.cursor.advance(&timestamp, &id);
            out.push(message);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_rejects_stale_and_duplicate_hits() {
        let mut cursor = Cursor::default();
        assert!(cursor.accepts("2026-01-01T00:00:00Z", "a"));
        cursor.advance("2026-01-01T00:00:00Z", "a");
        assert!(!cursor.accepts("2026-01-01T00:00:00Z", "a"));
        assert!(cursor.accepts("2026-01-01T00:00:00Z", "b"));
        assert!(!cursor.accepts("2025-12-31T23:59:59Z", "z"));
        assert!(cursor.accepts("2026-01-01T00:00:01Z", "a"));
    }

    #[tokio::test]
    async fn poll_once_advances_cursor_and_filters_duplicates() {
        let server = wiremock::MockServer::start().await;
        let body = json!({
            "hits": {"hits": [
                {"_id": "1", "_source": {"@timestamp": "2026-01-01T00:00:00Z", "message": "boom one"}},
                {"_id": "2", "_source": {"@timestamp": "2026-01-01T00:00:01Z", "message": "boom two"}},
            ]}
        });
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/logs-app/_search"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let mut tailer = SearchTailer::new(
            reqwest::Client::new(),
            SearchTailerConfig {
                url: server.uri(),
                index: "logs-app".to_string(),
                query: None,
                poll_interval: std::time::Duration::from_secs(5),
                since_seconds: 300,
                batch_size: 100,
            },
        );

        let hits = tailer.poll_once().await.unwrap();
        assert_eq!(hits, vec!["boom one".to_string(), "boom two".to_string()]);
        assert_eq!(tailer.cursor.event_id, Some("2".to_string()));
    }
}
