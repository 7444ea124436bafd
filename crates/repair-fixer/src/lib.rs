//! Fixer Adapter (§4.9): a capability over the external code-synthesis
//! tool, grounded on `ClaudeInterface`'s three entry points and on the
//! teacher's `CLIExecutionAdapter` for process wiring.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use repair_core::error::RepairError;
use tokio::process::Command;

/// The capability required by the Task Runner, independent of which
/// external tool or invocation mode backs it.
#[async_trait]
pub trait FixerAdapter: Send + Sync {
    /// Agentic mode: the tool edits files in the workspace directly.
    async fn execute_agentic_fix(&self, error_excerpt: &str, cwd: &Path) -> Result<String, RepairError>;

    /// Blocks mode: the tool emits one or more full-file blocks which
    /// the caller applies via the path sanitizer. Returns `(filename,
    /// contents)` pairs in the order they appeared in the tool's
    /// output.
    async fn propose_fix_code_blocks(&self, error_excerpt: &str) -> Result<Vec<(String, String)>, RepairError>;

    /// Asks the tool to produce a prose summary of the fix, used for
    /// the PR body and the notification email.
    async fn get_structured_summary(&self, error_excerpt: &str) -> Result<String, RepairError>;
}

/// Shells out to `CLAUDE_COMMAND`/`CLAUDE_ARGS`, one subprocess per
/// call, matching `ClaudeInterface.__init__`'s `shlex.split` command
/// assembly and its `subprocess.run(..., capture_output=True)`
/// contract.
pub struct CliFixerAdapter {
    command: Vec<String>,
}

impl CliFixerAdapter {
    /// `command` is the already-split program + base args
    /// (`CLAUDE_COMMAND` followed by `CLAUDE_ARGS`); the prompt is
    /// appended as the final argument per call.
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    async fn run(&self, prompt: &str, cwd: Option<&Path>) -> Result<String, RepairError> {
        let Some((program, base_args)) = self.command.split_first() else {
            return Err(RepairError::Validation("CLAUDE_COMMAND is empty".to_string()));
        };

        let mut command = Command::new(program);
        command
            .args(base_args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let output = command.output().await.map_err(|e| RepairError::ExternalCommand {
            program: program.clone(),
            exit_code: None,
            stderr: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(RepairError::ExternalCommand {
                program: program.clone(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl FixerAdapter for CliFixerAdapter {
    async fn execute_agentic_fix(&self, error_excerpt: &str, cwd: &Path) -> Result<String, RepairError> {
        let prompt = format!(
            "A runtime error occurred in this project. Locate the relevant code in the current \
             working directory and fix it directly.\n\n{error_excerpt}\n\n\
             After fixing, make sure the logic is correct and the error no longer occurs."
        );
        self.run(&prompt, Some(cwd)).await
    }

    async fn propose_fix_code_blocks(&self, error_excerpt: &str) -> Result<Vec<(String, String)>, RepairError> {
        let prompt = format!(
            "You are a senior engineer. Given the error log below, propose a fix for the current \
             project.\nRequirements:\n\
             1) Output only one or more <code_block filename=\"...\">...</code_block> blocks, no other text.\n\
             2) Each block's content must be the complete contents of the corresponding file (not a diff, not a fragment).\n\
             3) filename must be a path relative to the repo root, pointing only to a file that already exists in the repo.\n\
             4) The fix should be as minimal as possible while keeping the code runnable.\n\n\
             Error log:\n{error_excerpt}\n"
        );
        let stdout = self.run(&prompt, None).await?;
        let blocks = parse_code_blocks(&stdout);
        if blocks.is_empty() {
            return Err(RepairError::Validation("fixer returned no code blocks".to_string()));
        }
        Ok(blocks)
    }

    async fn get_structured_summary(&self, error_excerpt: &str) -> Result<String, RepairError> {
        let prompt = format!(
            "The user encountered the following error:\n\n{error_excerpt}\n\n\
             The code has already been fixed. Produce a formal report on the fix with these sections:\n\
             1. Root cause\n2. What was changed\n3. Conclusion and prevention\n\
             Output only those three sections, no other commentary."
        );
        self.run(&prompt, None).await
    }
}

fn code_block_pattern() -> &'static regex::Regex {
    use std::sync::OnceLock;
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::RegexBuilder::new(r#"<code_block\s+filename="([^"]+)">\s*([\s\S]*?)\s*</code_block>"#)
            .case_insensitive(true)
            .build()
            .expect("code_block pattern is valid")
    })
}

/// Parses `<code_block filename="...">...</code_block>` markers from
/// the tool's stdout, matching `ClaudeInterface._parse_code_blocks`.
#[must_use]
pub fn parse_code_blocks(text: &str) -> Vec<(String, String)> {
    code_block_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let filename = caps.get(1)?.as_str().trim();
            if filename.is_empty() {
                return None;
            }
            let content = caps.get(2)?.as_str().to_string();
            Some((filename.to_string(), content))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_code_block() {
        let text = "<code_block filename=\"app.py\">print(1)\n</code_block>";
        let blocks = parse_code_blocks(text);
        assert_eq!(blocks, vec![("app.py".to_string(), "print(1)".to_string())]);
    }

    #[test]
    fn parses_multiple_blocks_in_order() {
        let text = "noise\n<code_block filename=\"a.py\">A</code_block>\n<code_block filename=\"b.py\">B</code_block>";
        let blocks = parse_code_blocks(text);
        assert_eq!(blocks, vec![("a.py".to_string(), "A".to_string()), ("b.py".to_string(), "B".to_string())]);
    }

    #[test]
    fn ignores_blocks_with_empty_filename() {
        let text = "<code_block filename=\"\">x</code_block>";
        assert!(parse_code_blocks(text).is_empty());
    }

    #[tokio::test]
    async fn agentic_fix_surfaces_non_zero_exit_as_external_command_error() {
        let adapter = CliFixerAdapter::new(vec!["false".to_string()]);
        let tmp = tempfile::tempdir().unwrap();
        let err = adapter.execute_agentic_fix("boom", tmp.path()).await.unwrap_err();
        assert!(matches!(err, RepairError::ExternalCommand { .. }));
    }

    #[tokio::test]
    async fn propose_fix_code_blocks_errors_on_zero_blocks() {
        let adapter = CliFixerAdapter::new(vec!["echo".to_string(), "no blocks here".to_string()]);
        let err = adapter.propose_fix_code_blocks("boom").await.unwrap_err();
        assert!(matches!(err, RepairError::Validation(_)));
    }
}
