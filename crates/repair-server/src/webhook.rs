//! GitHub webhook verification and event extraction (§4.5).

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `X-Hub-Signature-256: sha256=<hex>` against `body` with a
/// constant-time compare, so a timing side channel can't leak the
/// correct signature byte by byte.
#[must_use]
pub fn verify_signature(secret: &str, signature_header: &str, body: &[u8]) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    bool::from(computed.as_slice().ct_eq(&expected))
}

/// One PR-feedback comment extracted from a GitHub webhook event.
#[derive(Debug, Clone)]
pub struct ExtractedComment {
    pub repo_url: String,
    pub pr_number: u64,
    pub comment: String,
}

/// Extracts a PR-feedback comment from a GitHub webhook payload, per
/// §4.5's event-type rules. Returns `None` when the event isn't one of
/// the three recognized types, is bot-authored, is a review comment on
/// an issue rather than a PR, or (when configured) doesn't start with
/// `command_prefix`.
#[must_use]
pub fn extract_comment(event_name: &str, payload: &Value, command_prefix: Option<&str>) -> Option<ExtractedComment> {
    if payload["sender"]["type"].as_str() == Some("Bot") {
        return None;
    }

    let (body, pr_number) = match event_name {
        "issue_comment" => {
            payload["issue"]["pull_request"].as_object()?;
            let body = payload["comment"]["body"].as_str()?;
            let pr_number = payload["issue"]["number"].as_u64()?;
            (body, pr_number)
        }
        "pull_request_review_comment" => {
            let body = payload["comment"]["body"].as_str()?;
            let pr_number = payload["pull_request"]["number"].as_u64()?;
            (body, pr_number)
        }
        "pull_request_review" => {
            if payload["action"].as_str() != Some("submitted") {
                return None;
            }
            let body = payload["review"]["body"].as_str()?;
            if body.trim().is_empty() {
                return None;
            }
            let pr_number = payload["pull_request"]["number"].as_u64()?;
            (body, pr_number)
        }
        _ => return None,
    };

    let repo_url = payload["repository"]["html_url"].as_str()?.to_string();

    let comment = match command_prefix {
        Some(prefix) => {
            let trimmed = body.trim();
            if !trimmed.starts_with(prefix) {
                return None;
            }
            trimmed[prefix.len()..].trim_start().to_string()
        }
        None => body.to_string(),
    };

    Some(ExtractedComment { repo_url, pr_number, comment })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verifies_a_matching_signature() {
        let secret = "topsecret";
        let body = b"hello world";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert!(verify_signature(secret, &sig, body));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let secret = "topsecret";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(b"hello world");
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
        assert!(!verify_signature(secret, &sig, b"goodbye world"));
    }

    #[test]
    fn extracts_a_pr_issue_comment() {
        let payload = json!({
            "sender": {"type": "User"},
            "issue": {"number": 42, "pull_request": {}},
            "comment": {"body": "/ai-ops please retry"},
            "repository": {"html_url": "https://github.com/acme/widgets"},
        });
        let extracted = extract_comment("issue_comment", &payload, Some("/ai-ops")).unwrap();
        assert_eq!(extracted.pr_number, 42);
        assert_eq!(extracted.comment, "please retry");
    }

    #[test]
    fn ignores_issue_comments_not_on_a_pull_request() {
        let payload = json!({
            "sender": {"type": "User"},
            "issue": {"number": 1},
            "comment": {"body": "not on a PR"},
            "repository": {"html_url": "https://github.com/acme/widgets"},
        });
        assert!(extract_comment("issue_comment", &payload, None).is_none());
    }

    #[test]
    fn ignores_bot_senders() {
        let payload = json!({
            "sender": {"type": "Bot"},
            "issue": {"number": 1, "pull_request": {}},
            "comment": {"body": "hi"},
            "repository": {"html_url": "https://github.com/acme/widgets"},
        });
        assert!(extract_comment("issue_comment", &payload, None).is_none());
    }

    #[test]
    fn ignores_comments_missing_the_configured_prefix() {
        let payload = json!({
            "sender": {"type": "User"},
            "issue": {"number": 1, "pull_request": {}},
            "comment": {"body": "no prefix here"},
            "repository": {"html_url": "https://github.com/acme/widgets"},
        });
        assert!(extract_comment("issue_comment", &payload, Some("/ai-ops")).is_none());
    }

    #[test]
    fn ignores_unsubmitted_reviews() {
        let payload = json!({
            "sender": {"type": "User"},
            "action": "edited",
            "review": {"body": "looks fine"},
            "pull_request": {"number": 7},
            "repository": {"html_url": "https://github.com/acme/widgets"},
        });
        assert!(extract_comment("pull_request_review", &payload, None).is_none());
    }
}
