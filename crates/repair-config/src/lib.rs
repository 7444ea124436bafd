//! Environment-driven configuration, mirroring the env-var surface of
//! SPEC_FULL.md §6. Parsing helpers follow the same shape as the
//! original project's config module: read a string, fall back to a
//! default, and parse with a clear error on malformed input.

use std::env;

use repair_core::error::{RepairError, Result};

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_int(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .trim()
            .parse()
            .map_err(|_| RepairError::Validation(format!("{key} must be an integer, got `{v}`"))),
        _ => Ok(default),
    }
}

fn env_float(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .trim()
            .parse()
            .map_err(|_| RepairError::Validation(format!("{key} must be a number, got `{v}`"))),
        _ => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    Agentic,
    CodeBlocks,
}

impl FixMode {
    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("agentic") {
            FixMode::Agentic
        } else {
            FixMode::CodeBlocks
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeHostKind {
    Github,
    Gitlab,
}

impl CodeHostKind {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "github" => Ok(CodeHostKind::Github),
            "gitlab" => Ok(CodeHostKind::Gitlab),
            other => Err(RepairError::Validation(format!(
                "unsupported CODE_HOST: {other}"
            ))),
        }
    }
}

/// Server-side configuration, loaded once at startup (§6's exact env
/// var table) and passed as an injected dependency to the HTTP handler
/// and task runner — §9's "global singletons become injected
/// dependencies."
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_host: String,
    pub http_port: u16,
    pub server_api_key: Option<String>,
    pub trace_db_path: String,
    pub workspaces_dir: String,
    pub max_concurrent_tasks: usize,
    pub code_host: CodeHostKind,
    pub github_token: Option<String>,
    pub github_repo: Option<String>,
    pub github_webhook_secret: Option<String>,
    pub gitlab_token: Option<String>,
    pub gitlab_project: Option<String>,
    pub gitlab_base_url: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub receiver_email: Option<String>,
    pub email_enabled: bool,
    pub claude_command: String,
    pub claude_args: Vec<String>,
    pub claude_fix_mode: FixMode,
    pub pr_comment_command_prefix: Option<String>,
    pub preflight_command: String,
    pub debounce_seconds: f64,
    pub dedup_window_seconds: i64,
    pub max_error_queue_size: i64,
    pub keywords: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let code_host = CodeHostKind::parse(&env_str("CODE_HOST", "github"))?;
        let claude_args = env_str("CLAUDE_ARGS", "")
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let keywords = env_str("KEYWORDS", "error,exception,critical,traceback,panic")
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            http_host: env_str("HTTP_HOST", "0.0.0.0"),
            http_port: env_int("HTTP_PORT", 8000)? as u16,
            server_api_key: env_opt("SERVER_API_KEY"),
            trace_db_path: env_str("TRACE_DB_PATH", "./data/trace.db"),
            workspaces_dir: env_str("WORKSPACES_DIR", "./data/workspaces"),
            max_concurrent_tasks: env_int("MAX_CONCURRENT_TASKS", 1)?.max(1) as usize,
            code_host,
            github_token: env_opt("GITHUB_TOKEN"),
            github_repo: env_opt("GITHUB_REPO"),
            github_webhook_secret: env_opt("GITHUB_WEBHOOK_SECRET"),
            gitlab_token: env_opt("GITLAB_TOKEN"),
            gitlab_project: env_opt("GITLAB_PROJECT"),
            gitlab_base_url: env_str("GITLAB_BASE_URL", "https://gitlab.com"),
            smtp_host: env_opt("SMTP_HOST"),
            smtp_port: env_int("SMTP_PORT", 587)? as u16,
            smtp_user: env_opt("SMTP_USER"),
            smtp_password: env_opt("SMTP_PASSWORD"),
            receiver_email: env_opt("RECEIVER_EMAIL"),
            email_enabled: env_bool("EMAIL_ENABLED", true),
            claude_command: env_str("CLAUDE_COMMAND", "claude"),
            claude_args,
            claude_fix_mode: FixMode::parse(&env_str("CLAUDE_FIX_MODE", "code_blocks")),
            pr_comment_command_prefix: env_opt("PR_COMMENT_COMMAND_PREFIX"),
            preflight_command: env_str("PREFLIGHT_COMMAND", "cargo check"),
            debounce_seconds: env_float("DEBOUNCE_SECONDS", 2.0)?,
            dedup_window_seconds: env_int("DEDUP_WINDOW_SECONDS", 3600)?,
            max_error_queue_size: env_int("MAX_ERROR_QUEUE_SIZE", 1000)?,
            keywords,
        })
    }

    /// Validates that the credentials required for the configured
    /// code host and (if enabled) email delivery are present, mirroring
    /// `AutoRepairOrchestrator.handle_error`'s `require_non_empty`
    /// preflight checks before the state machine starts.
    pub fn require_ready(&self) -> Result<()> {
        if self.email_enabled
            && (self.smtp_user.is_none() || self.smtp_password.is_none() || self.receiver_email.is_none())
        {
            return Err(RepairError::Validation(
                "EMAIL_ENABLED is set but SMTP_USER/SMTP_PASSWORD/RECEIVER_EMAIL are missing".into(),
            ));
        }
        if self.claude_command.trim().is_empty() {
            return Err(RepairError::Validation("CLAUDE_COMMAND is required".into()));
        }
        match self.code_host {
            CodeHostKind::Github if self.github_token.is_none() => {
                Err(RepairError::Validation("GITHUB_TOKEN is required".into()))
            }
            CodeHostKind::Gitlab if self.gitlab_token.is_none() || self.gitlab_project.is_none() => {
                Err(RepairError::Validation(
                    "GITLAB_TOKEN and GITLAB_PROJECT are required".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_apply_when_env_is_unset() {
        for key in [
            "HTTP_PORT",
            "CODE_HOST",
            "EMAIL_ENABLED",
            "DEDUP_WINDOW_SECONDS",
        ] {
            env::remove_var(key);
        }
        let cfg = ServerConfig::from_env().unwrap();
        assert_eq!(cfg.http_port, 8000);
        assert!(matches!(cfg.code_host, CodeHostKind::Github));
        assert!(cfg.email_enabled);
        assert_eq!(cfg.dedup_window_seconds, 3600);
    }

    #[test]
    #[serial]
    fn rejects_malformed_integer_env_vars() {
        env::set_var("HTTP_PORT", "not-a-number");
        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, RepairError::Validation(_)));
        env::remove_var("HTTP_PORT");
    }

    #[test]
    #[serial]
    fn require_ready_flags_missing_github_token() {
        env::set_var("CODE_HOST", "github");
        env::remove_var("GITHUB_TOKEN");
        env::set_var("EMAIL_ENABLED", "false");
        let cfg = ServerConfig::from_env().unwrap();
        assert!(cfg.require_ready().is_err());
        env::remove_var("CODE_HOST");
        env::remove_var("EMAIL_ENABLED");
    }
}
