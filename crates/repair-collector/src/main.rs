//! `repair-collector`: tails an application log (file or search-backed),
//! extracts structured error evidence, and forwards deduplicated
//! incidents to the task server.

mod cli;
mod debounce;
mod search;
mod sink;
mod tailer;

use std::time::Duration;

use clap::Parser;
use repair_core::event::{CodeHost as WireCodeHost, ErrorBody, IncidentEvent, RepoRef, ServiceRef, SCHEMA_VERSION};
use repair_core::extract;
use tokio::sync::mpsc;
use tracing::{info, warn};

use cli::{Cli, CodeHost, Source};
use debounce::{DebounceConfig, Debouncer};
use sink::{EventSink, SinkConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("repair_collector=info".parse()?))
        .init();

    info!(source = ?cli.source, repo_url = %cli.repo_url, "starting collector");

    let (raw_tx, raw_rx) = mpsc::channel::<String>(256);
    let (incident_tx, mut incident_rx) = mpsc::channel::<String>(64);

    match cli.source {
        Source::File => {
            let log_path = cli
                .log_path
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--log-path is required when --source=file"))?;
            let mut tailer = tailer::FileTailer::new(&log_path, cli.log_poll_interval_ms);
            tailer.seed_at_eof();
            tokio::spawn(tailer.run(raw_tx));
        }
        Source::Search => {
            let url = cli.search_url.clone().ok_or_else(|| anyhow::anyhow!("--search-url is required when --source=search"))?;
            let index = cli.search_index.clone().ok_or_else(|| anyhow::anyhow!("--search-index is required when --source=search"))?;
            let client = reqwest::Client::builder().timeout(Duration::from_secs(cli.http_timeout_seconds)).build()?;
            let search_tailer = search::SearchTailer::new(
                client,
                search::SearchTailerConfig {
                    url,
                    index,
                    query: cli.search_query.clone(),
                    poll_interval: Duration::from_secs(cli.search_poll_seconds),
                    since_seconds: cli.search_since_seconds,
                    batch_size: cli.search_batch_size,
                },
            );
            tokio::spawn(search_tailer.run(raw_tx));
        }
    }

    let debouncer = Debouncer::new(DebounceConfig {
        keywords: cli.keyword_list(),
        window: Duration::from_secs_f64(cli.debounce_seconds),
        max_buffer_chars: cli.max_raw_excerpt * 4,
    });
    tokio::spawn(debouncer.run(raw_rx, incident_tx));

    let mut sink = EventSink::new(SinkConfig {
        server_url: cli.server_url.clone(),
        api_key: cli.api_key.clone(),
        dedup_window: Duration::from_secs(cli.dedup_window_seconds.max(0) as u64),
        http_timeout: Duration::from_secs(cli.http_timeout_seconds),
    })?;

    let code_host = match cli.code_host {
        CodeHost::Github => WireCodeHost::Github,
        CodeHost::Gitlab => WireCodeHost::Gitlab,
    };
    let service_name = cli.service_name.clone().unwrap_or_else(|| "unknown-service".to_string());
    let filter_level = cli.filter_level();
    let language_hint = cli.language_hint();

    while let Some(raw_chunk) = incident_rx.recv().await {
        let (excerpt, language) =
            extract::select_relevant_excerpt(&raw_chunk, language_hint, cli.context_lines_before, cli.max_raw_excerpt);
        if excerpt.trim().is_empty() {
            continue;
        }
        let evidence = extract::extract_exception_and_frames(&excerpt, language, cli.max_frames);
        if !extract::should_report(filter_level, &evidence) {
            warn!("incident suppressed by filter level");
            continue;
        }

        let message_key = repair_core::normalize::message_key(if evidence.message.is_empty() {
            &excerpt
        } else {
            &evidence.message
        });
        let fingerprint = repair_core::normalize::fingerprint(&evidence.exception_type, &message_key, &evidence.frames, &excerpt);

        let event = IncidentEvent {
            schema_version: SCHEMA_VERSION.to_string(),
            event_id: uuid::Uuid::new_v4().to_string(),
            occurred_at: chrono::Utc::now().timestamp(),
            repo: RepoRef {
                repo_url: cli.repo_url.clone(),
                code_host,
                default_branch: cli.default_branch.clone(),
            },
            service: ServiceRef { name: service_name.clone(), environment: cli.environment.clone() },
            error: ErrorBody {
                exception_type: evidence.exception_type,
                message_key,
                fingerprint,
                frames: evidence.frames,
                raw_excerpt: excerpt,
            },
        };

        if let Err(reason) = event.validate() {
            warn!(reason = %reason, "dropping invalid incident");
            continue;
        }

        sink.send(&event).await;
    }

    Ok(())
}
