//! Path sanitization for file paths returned by the external fixer
//! (§4.8). Pure function over strings plus an `exists` probe — no I/O
//! of its own, so it is testable without a real checkout.

use std::path::{Path, PathBuf};

use crate::error::{RepairError, Result};

/// Normalizes backslashes, strips a leading `./`, strips anything up
/// to and including a `/repo/` segment (or a leading `repo/`), and
/// rejects a leading `/`.
fn normalize_rel_path(rel_path: &str) -> Result<String> {
    let mut s = rel_path.trim().replace('\\', "/");
    while let Some(stripped) = s.strip_prefix("./") {
        s = stripped.to_string();
    }
    if let Some(idx) = s.rfind("/repo/") {
        s = s[idx + "/repo/".len()..].to_string();
    } else if let Some(stripped) = s.strip_prefix("repo/") {
        s = stripped.to_string();
    }
    if s.starts_with('/') {
        return Err(RepairError::PathViolation(format!(
            "absolute path not allowed: {rel_path}"
        )));
    }
    Ok(s)
}

/// Progressively shorter suffix candidates, dropping leading path
/// components one at a time: `a/b/c`, `b/c`, `c`.
fn candidate_rel_paths(rel_path: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut cur = rel_path.to_string();
    loop {
        if cur.is_empty() || candidates.contains(&cur) {
            break;
        }
        candidates.push(cur.clone());
        match cur.split_once('/') {
            Some((_, rest)) => cur = rest.to_string(),
            None => break,
        }
    }
    candidates
}

fn safe_abs_path(repo_root: &Path, rel_path: &str) -> Result<PathBuf> {
    let candidate = Path::new(rel_path);
    if candidate.is_absolute() {
        return Err(RepairError::PathViolation(format!(
            "absolute path not allowed: {rel_path}"
        )));
    }
    let joined = repo_root.join(candidate);
    let normalized = normalize_lexically(&joined);
    let root_normalized = normalize_lexically(repo_root);
    if !normalized.starts_with(&root_normalized) {
        return Err(RepairError::PathViolation(format!(
            "path escapes repository root: {rel_path}"
        )));
    }
    Ok(normalized)
}

/// Lexical `..`/`.` collapsing (no symlink resolution, matching
/// `os.path.normpath` rather than `realpath`).
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolves a fixer-supplied relative path to a path known to exist
/// under `repo_root`, trying suffix candidates when the exact
/// normalized path is absent (§4.8 step 2). `exists` is injected so
/// the resolution logic can be unit tested without a real filesystem.
pub fn resolve_fixer_path(
    repo_root: &Path,
    rel_path: &str,
    exists: impl Fn(&Path) -> bool,
) -> Result<PathBuf> {
    let normalized = normalize_rel_path(rel_path)?;
    for candidate in candidate_rel_paths(&normalized) {
        let abs = safe_abs_path(repo_root, &candidate)?;
        if exists(&abs) {
            return Ok(abs);
        }
    }
    Err(RepairError::PathViolation(format!(
        "fixer returned a path that does not exist in the repository: {rel_path}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn root() -> PathBuf {
        PathBuf::from("/workspaces/acme-ws-1-abcdefgh/repo")
    }

    #[test]
    fn resolves_the_exact_normalized_path_when_it_exists() {
        let root = root();
        let exists: HashSet<PathBuf> = [root.join("src/main.rs")].into_iter().collect();
        let resolved = resolve_fixer_path(&root, "./repo/src/main.rs", |p| exists.contains(p)).unwrap();
        assert_eq!(resolved, root.join("src/main.rs"));
    }

    #[test]
    fn falls_back_to_suffix_candidates() {
        let root = root();
        let exists: HashSet<PathBuf> = [root.join("main.rs")].into_iter().collect();
        let resolved = resolve_fixer_path(&root, "app/src/main.rs", |p| exists.contains(p)).unwrap();
        assert_eq!(resolved, root.join("main.rs"));
    }

    #[test]
    fn rejects_absolute_paths() {
        let root = root();
        let err = resolve_fixer_path(&root, "/etc/passwd", |_| true).unwrap_err();
        assert!(matches!(err, RepairError::PathViolation(_)));
    }

    #[test]
    fn rejects_escaping_paths_even_if_they_would_exist() {
        let root = root();
        let err = resolve_fixer_path(&root, "../../etc/passwd", |_| true).unwrap_err();
        assert!(matches!(err, RepairError::PathViolation(_)));
    }

    #[test]
    fn fails_when_no_candidate_exists() {
        let root = root();
        let err = resolve_fixer_path(&root, "nowhere/at/all.rs", |_| false).unwrap_err();
        assert!(matches!(err, RepairError::PathViolation(_)));
    }

    #[test]
    fn accepted_paths_stay_strictly_under_repo_root() {
        let root = root();
        let resolved = resolve_fixer_path(&root, "src/lib.rs", |_| true).unwrap();
        assert!(resolved.starts_with(&root));
        assert_ne!(resolved, root);
    }
}
