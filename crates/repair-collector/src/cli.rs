//! Collector CLI flags (§6), mirroring the original's
//! `agent.py::parse_args` one-for-one, built with `clap`'s derive API
//! in the teacher's `monitor`/`healer` style. Every flag carries an
//! `env` fallback; an explicit flag wins over the env var per clap's
//! standard precedence.

use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum Source {
    #[default]
    File,
    Search,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum CodeHost {
    #[default]
    Github,
    Gitlab,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ProjectLang {
    #[default]
    Auto,
    Python,
    Java,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum FilterLevelArg {
    Strict,
    #[default]
    Balanced,
    Lenient,
}

/// Streams error evidence from an application log to the repair task
/// server.
#[derive(Parser, Debug)]
#[command(name = "repair-collector", version, about)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = Source::File, env = "COLLECTOR_SOURCE")]
    pub source: Source,

    #[arg(long, env = "LOG_PATH")]
    pub log_path: Option<String>,

    #[arg(long, env = "REPO_URL")]
    pub repo_url: String,

    #[arg(long, env = "SERVER_URL")]
    pub server_url: String,

    #[arg(long, value_enum, default_value_t = CodeHost::Github, env = "CODE_HOST")]
    pub code_host: CodeHost,

    #[arg(long, default_value = "main", env = "DEFAULT_BRANCH")]
    pub default_branch: String,

    #[arg(long, env = "SERVICE_NAME")]
    pub service_name: Option<String>,

    #[arg(long, default_value = "production", env = "ENVIRONMENT")]
    pub environment: String,

    #[arg(long, value_enum, default_value_t = ProjectLang::Auto, env = "PROJECT_LANG")]
    pub project_lang: ProjectLang,

    #[arg(long, value_enum, default_value_t = FilterLevelArg::Balanced, env = "FILTER_LEVEL")]
    pub filter_level: FilterLevelArg,

    #[arg(long, default_value_t = 20, env = "CONTEXT_LINES_BEFORE")]
    pub context_lines_before: usize,

    #[arg(long, default_value_t = 4000, env = "MAX_RAW_EXCERPT")]
    pub max_raw_excerpt: usize,

    #[arg(long, default_value_t = 10, env = "MAX_FRAMES")]
    pub max_frames: usize,

    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = 3600, env = "DEDUP_WINDOW_SECONDS")]
    pub dedup_window_seconds: i64,

    #[arg(long, default_value_t = 10, env = "HTTP_TIMEOUT_SECONDS")]
    pub http_timeout_seconds: u64,

    #[arg(long, env = "ELK_URL")]
    pub search_url: Option<String>,

    #[arg(long, env = "ELK_INDEX")]
    pub search_index: Option<String>,

    #[arg(long, env = "ELK_QUERY")]
    pub search_query: Option<String>,

    #[arg(long, default_value_t = 5, env = "ELK_POLL_SECONDS")]
    pub search_poll_seconds: u64,

    #[arg(long, default_value_t = 300, env = "ELK_SINCE_SECONDS")]
    pub search_since_seconds: i64,

    #[arg(long, default_value_t = 100, env = "ELK_BATCH_SIZE")]
    pub search_batch_size: u32,

    #[arg(long, default_value_t = 250, env = "LOG_POLL_INTERVAL_MS")]
    pub log_poll_interval_ms: u64,

    #[arg(long, default_value_t = 2.0, env = "DEBOUNCE_SECONDS")]
    pub debounce_seconds: f64,

    #[arg(long, default_value = "error,exception,critical,traceback,panic", env = "KEYWORDS")]
    pub keywords: String,
}

impl Cli {
    #[must_use]
    pub fn keyword_list(&self) -> Vec<String> {
        self.keywords.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect()
    }

    #[must_use]
    pub fn code_host_str(&self) -> &'static str {
        match self.code_host {
            CodeHost::Github => "github",
            CodeHost::Gitlab => "gitlab",
        }
    }

    #[must_use]
    pub fn filter_level(&self) -> repair_core::extract::FilterLevel {
        match self.filter_level {
            FilterLevelArg::Strict => repair_core::extract::FilterLevel::Strict,
            FilterLevelArg::Balanced => repair_core::extract::FilterLevel::Balanced,
            FilterLevelArg::Lenient => repair_core::extract::FilterLevel::Lenient,
        }
    }

    #[must_use]
    pub fn language_hint(&self) -> Option<repair_core::extract::Language> {
        match self.project_lang {
            ProjectLang::Auto => None,
            ProjectLang::Python => Some(repair_core::extract::Language::Python),
            ProjectLang::Java => Some(repair_core::extract::Language::Java),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cli = Cli::parse_from([
            "repair-collector",
            "--repo-url",
            "https://github.com/acme/widgets",
            "--server-url",
            "https://server.example.com",
        ]);
        assert_eq!(cli.source, Source::File);
        assert_eq!(cli.default_branch, "main");
        assert_eq!(cli.environment, "production");
        assert_eq!(cli.context_lines_before, 20);
        assert_eq!(cli.max_raw_excerpt, 4000);
        assert_eq!(cli.max_frames, 10);
        assert_eq!(cli.dedup_window_seconds, 3600);
        assert_eq!(cli.http_timeout_seconds, 10);
        assert_eq!(cli.keyword_list(), vec!["error", "exception", "critical", "traceback", "panic"]);
    }

    #[test]
    fn explicit_flag_overrides_env() {
        std::env::set_var("DEFAULT_BRANCH", "develop");
        let cli = Cli::parse_from([
            "repair-collector",
            "--repo-url",
            "https://github.com/acme/widgets",
            "--server-url",
            "https://server.example.com",
            "--default-branch",
            "release",
        ]);
        assert_eq!(cli.default_branch, "release");
        std::env::remove_var("DEFAULT_BRANCH");
    }
}
