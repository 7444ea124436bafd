//! File Log Tailer (§4.1): polls a file's metadata on an interval,
//! detects growth (read the new bytes) and shrink/rotation (seek back
//! to zero), and yields lossily-decoded chunks of new text.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct FileTailer {
    path: PathBuf,
    poll_interval: Duration,
    offset: u64,
}

impl FileTailer {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, poll_interval_ms: u64) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_millis(poll_interval_ms),
            offset: 0,
        }
    }

    /// Seeds the offset at the current end of file, so only newly
    /// appended lines are tailed — matching a conventional `tail -f`
    /// start.
    pub fn seed_at_eof(&mut self) {
        if let Ok(meta) = std::fs::metadata(&self.path) {
            self.offset = meta.len();
        }
    }

    /// Runs the poll loop until `tx` is dropped, sending each newly
    /// observed chunk of decoded text.
    pub async fn run(mut self, tx: mpsc::Sender<String>) {
        loop {
            match self.poll_once() {
                Ok(Some(chunk)) if !chunk.is_empty() => {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(path = %self.path.display(), error = %e, "log tailer read failed"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn poll_once(&mut self) -> std::io::Result<Option<String>> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let len = meta.len();

        if len < self.offset {
            debug!(path = %self.path.display(), "log file truncated or rotated, resetting offset");
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(None);
        }

        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf)?;
        self.offset = len;

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

#[must_use]
pub fn exists(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn yields_only_newly_appended_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line one\n").unwrap();

        let mut tailer = FileTailer::new(&path, 10);
        tailer.seed_at_eof();

        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(tailer.run(tx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "line two").unwrap();
        }

        let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(chunk, "line two\n");
        handle.abort();
    }

    #[tokio::test]
    async fn detects_truncation_and_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "aaaaaaaaaa\n").unwrap();

        let mut tailer = FileTailer::new(&path, 10);
        tailer.offset = 100;

        let chunk = tailer.poll_once().unwrap();
        assert_eq!(chunk, Some("aaaaaaaaaa\n".to_string()));
        assert_eq!(tailer.offset, 11);
    }
}
