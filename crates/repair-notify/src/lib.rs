//! Notifier (§4.12): renders a small HTML summary and sends it via
//! SMTP+STARTTLS. Kept in the teacher's `notify` crate's shape — a
//! dispatcher holding zero-or-more channels, fire-and-forget — with a
//! single SMTP channel built on `lettre` rather than the teacher's
//! webhook channels, since SMTP delivery has no webhook equivalent in
//! the teacher's existing channel set.

pub mod error;

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, error};

pub use error::ChannelError;

/// Fields composing the fix-summary email, independent of rendering.
pub struct FixSummary {
    pub repo_url: String,
    pub error_excerpt: String,
    pub ai_summary: String,
    pub pr_url: Option<String>,
}

pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub receiver: String,
}

/// A no-op notifier when email is disabled, or a configured SMTP
/// sender otherwise — matching `Notifier::disabled()`'s early-return
/// shape.
pub struct Notifier {
    smtp: Option<(AsyncSmtpTransport<Tokio1Executor>, String, String)>,
}

impl Notifier {
    /// Builds a disabled notifier; `notify` becomes a no-op.
    #[must_use]
    pub fn disabled() -> Self {
        Self { smtp: None }
    }

    /// Builds a configured notifier from SMTP settings, matching
    /// `EMAIL_ENABLED` + the `SMTP_*` env vars of §6.
    pub fn from_config(cfg: &SmtpConfig) -> Result<Self, ChannelError> {
        let creds = Credentials::new(cfg.user.clone(), cfg.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .map_err(|e| ChannelError::Transport(e.to_string()))?
            .port(cfg.port)
            .credentials(creds)
            .build();
        Ok(Self {
            smtp: Some((transport, cfg.user.clone(), cfg.receiver.clone())),
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.smtp.is_some()
    }

    /// Sends the summary email, fire-and-forget: spawns a task and
    /// returns immediately. Failures are logged, never propagated —
    /// `NOTIFY` must never fail a trace (§4.6).
    pub fn notify(&self, summary: FixSummary) {
        let Some((transport, from, to)) = self.smtp.clone() else {
            debug!("notifications disabled, skipping fix summary email");
            return;
        };

        tokio::spawn(async move {
            match build_message(&from, &to, &summary) {
                Ok(message) => match transport.send(message).await {
                    Ok(_) => debug!("fix summary email sent"),
                    Err(e) => error!(error = %e, "failed to send fix summary email"),
                },
                Err(e) => error!(error = %e, "failed to build fix summary email"),
            }
        });
    }
}

fn build_message(from: &str, to: &str, summary: &FixSummary) -> Result<Message, ChannelError> {
    let html = render_html(summary);
    Message::builder()
        .from(from.parse().map_err(|e| ChannelError::Build(format!("invalid from address: {e}")))?)
        .to(to.parse().map_err(|e| ChannelError::Build(format!("invalid to address: {e}")))?)
        .subject(format!("Auto-repair summary: {}", summary.repo_url))
        .header(ContentType::TEXT_HTML)
        .body(html)
        .map_err(|e| ChannelError::Build(e.to_string()))
}

fn render_html(summary: &FixSummary) -> String {
    let pr_line = summary
        .pr_url
        .as_deref()
        .map(|url| format!("<p><strong>Pull request:</strong> <a href=\"{url}\">{url}</a></p>"))
        .unwrap_or_default();
    format!(
        "<h2>Auto-repair summary for {repo}</h2>\
         <h3>Error excerpt</h3><pre>{excerpt}</pre>\
         <h3>Analysis</h3><pre>{analysis}</pre>\
         {pr_line}",
        repo = html_escape(&summary.repo_url),
        excerpt = html_escape(&summary.error_excerpt),
        analysis = html_escape(&summary.ai_summary),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_notifier_reports_not_enabled() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
    }

    #[test]
    fn render_html_escapes_and_includes_pr_link() {
        let summary = FixSummary {
            repo_url: "acme/<widgets>".to_string(),
            error_excerpt: "ValueError".to_string(),
            ai_summary: "root cause...".to_string(),
            pr_url: Some("https://github.com/acme/widgets/pull/1".to_string()),
        };
        let html = render_html(&summary);
        assert!(html.contains("acme/&lt;widgets&gt;"));
        assert!(html.contains("pull/1"));
    }
}
