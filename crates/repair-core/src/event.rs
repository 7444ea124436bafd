//! The incident-event wire contract (collector → server).

use serde::{Deserialize, Serialize};

use crate::error::{RepairError, Result};

pub const SCHEMA_VERSION: &str = "1.0";
pub const MAX_FRAMES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeHost {
    Github,
    Gitlab,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRef {
    pub repo_url: String,
    pub code_host: CodeHost,
    pub default_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRef {
    pub name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    pub file: String,
    pub function: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub exception_type: String,
    #[serde(default)]
    pub message_key: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub raw_excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub schema_version: String,
    pub event_id: String,
    pub occurred_at: i64,
    pub repo: RepoRef,
    pub service: ServiceRef,
    pub error: ErrorBody,
}

impl IncidentEvent {
    /// Validates the request-level invariants from §3/§4.5 of the
    /// specification. Returns the first violated invariant as a
    /// [`RepairError::Validation`] with a stable machine-readable reason,
    /// matching the `{"error": "<kind>"}` bodies the HTTP layer returns.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(RepairError::Validation("unsupported_schema_version".into()));
        }
        if self.event_id.trim().is_empty() {
            return Err(RepairError::Validation("event_id_required".into()));
        }
        if self.repo.repo_url.trim().is_empty() {
            return Err(RepairError::Validation("repo_url_required".into()));
        }
        if self.error.fingerprint.trim().is_empty() {
            return Err(RepairError::Validation("fingerprint_required".into()));
        }
        let has_body = !self.error.raw_excerpt.trim().is_empty()
            || !self.error.exception_type.trim().is_empty()
            || !self.error.message_key.trim().is_empty();
        if !has_body {
            return Err(RepairError::Validation("error_body_required".into()));
        }
        if self.error.frames.len() > MAX_FRAMES {
            return Err(RepairError::Validation("too_many_frames".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IncidentEvent {
        IncidentEvent {
            schema_version: SCHEMA_VERSION.to_string(),
            event_id: "evt-1".to_string(),
            occurred_at: 1_700_000_000,
            repo: RepoRef {
                repo_url: "https://github.com/acme/widgets".to_string(),
                code_host: CodeHost::Github,
                default_branch: "main".to_string(),
            },
            service: ServiceRef {
                name: "widgets-api".to_string(),
                environment: "production".to_string(),
            },
            error: ErrorBody {
                exception_type: "ValueError".to_string(),
                message_key: "invalid literal".to_string(),
                fingerprint: "abc123".to_string(),
                frames: vec![],
                raw_excerpt: "Traceback...".to_string(),
            },
        }
    }

    #[test]
    fn accepts_a_well_formed_event() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_missing_fingerprint() {
        let mut event = sample();
        event.error.fingerprint.clear();
        let err = event.validate().unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(matches!(err, RepairError::Validation(reason) if reason == "fingerprint_required"));
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let mut event = sample();
        event.schema_version = "0.9".to_string();
        assert!(event.validate().is_err());
    }

    #[test]
    fn rejects_event_with_no_body() {
        let mut event = sample();
        event.error.exception_type.clear();
        event.error.message_key.clear();
        event.error.raw_excerpt.clear();
        assert!(event.validate().is_err());
    }
}
