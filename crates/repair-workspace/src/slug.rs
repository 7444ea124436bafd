//! Repo-URL → directory-slug derivation, grounded on
//! `WorkspaceManager._repo_slug`.

/// Derives a filesystem-safe, ≤32-char slug from a repo URL (HTTPS, SSH,
/// or bare path forms), lowercased with non-alphanumerics collapsed to
/// `-`. Falls back to `"repo"` when nothing usable remains.
#[must_use]
pub fn repo_slug(repo_url: &str) -> String {
    let url = repo_url.trim();
    let name = if url.starts_with("http://") || url.starts_with("https://") {
        url.rsplit('/').next().unwrap_or(url)
    } else if url.contains('@') && url.contains(':') {
        let after_colon = url.rsplit_once(':').map_or(url, |(_, rest)| rest);
        after_colon.rsplit('/').next().unwrap_or(after_colon)
    } else {
        url.rsplit('/').next().unwrap_or(url)
    };

    let name = name.strip_suffix(".git").unwrap_or(name);
    let lowered = name.trim().to_lowercase();

    let mut collapsed = String::with_capacity(lowered.len());
    let mut last_was_sep = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            collapsed.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            collapsed.push('-');
            last_was_sep = true;
        }
    }
    let trimmed = collapsed.trim_matches(|c| c == '-' || c == '.' || c == '_');

    let result = if trimmed.is_empty() { "repo" } else { trimmed };
    result.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_slug_from_https_url() {
        assert_eq!(repo_slug("https://github.com/acme/widgets.git"), "widgets");
    }

    #[test]
    fn derives_slug_from_ssh_url() {
        assert_eq!(repo_slug("git@github.com:acme/widgets.git"), "widgets");
    }

    #[test]
    fn falls_back_to_repo_for_empty_input() {
        assert_eq!(repo_slug(""), "repo");
    }

    #[test]
    fn caps_length_at_32_chars() {
        let long = "https://github.com/acme/".to_string() + &"x".repeat(60) + ".git";
        assert_eq!(repo_slug(&long).len(), 32);
    }
}
