//! Evidence Extractor (§4.3): accumulates incoming chunks, arms a
//! debounce window the moment a keyword hits, and flushes the
//! accumulated buffer as one incident once the window elapses without
//! further keyword hits — so a multi-line traceback that arrives across
//! several poll ticks is extracted once, not once per tick.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct DebounceConfig {
    pub keywords: Vec<String>,
    pub window: Duration,
    pub max_buffer_chars: usize,
}

/// Feeds raw chunks in, yields whole buffered incidents out once their
/// debounce window has elapsed.
pub struct Debouncer {
    cfg: DebounceConfig,
    buffer: String,
    armed_at: Option<Instant>,
}

impl Debouncer {
    #[must_use]
    pub fn new(cfg: DebounceConfig) -> Self {
        Self { cfg, buffer: String::new(), armed_at: None }
    }

    fn contains_keyword(&self, chunk: &str) -> bool {
        let lower = chunk.to_lowercase();
        self.cfg.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Feeds one chunk of raw text. Re-arms the window on every keyword
    /// hit, so a burst of related lines extends the flush deadline
    /// rather than truncating it mid-burst.
    pub fn feed(&mut self, chunk: &str) {
        if self.contains_keyword(chunk) {
            self.armed_at = Some(Instant::now());
        }
        if self.armed_at.is_some() {
            self.buffer.push_str(chunk);
            if self.buffer.len() > self.cfg.max_buffer_chars {
                let excess = self.buffer.len() - self.cfg.max_buffer_chars;
                self.buffer.drain(..excess);
            }
        }
    }

    /// Returns `Some(buffer)` and resets state if the debounce window
    /// has elapsed since the last keyword hit.
    pub fn try_flush(&mut self) -> Option<String> {
        let armed_at = self.armed_at?;
        if armed_at.elapsed() < self.cfg.window {
            return None;
        }
        self.armed_at = None;
        Some(std::mem::take(&mut self.buffer))
    }

    /// Drives the feed/flush loop: reads chunks from `chunks`, ticking
    /// the flush check at a sub-window interval, and sends completed
    /// incidents to `out`.
    pub async fn run(mut self, mut chunks: mpsc::Receiver<String>, out: mpsc::Sender<String>) {
        let tick = (self.cfg.window / 4).max(Duration::from_millis(50));
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                maybe_chunk = chunks.recv() => {
                    match maybe_chunk {
                        Some(chunk) => self.feed(&chunk),
                        None => {
                            if let Some(buf) = self.try_flush().or_else(|| (!self.buffer.is_empty()).then(|| std::mem::take(&mut self.buffer))) {
                                let _ = out.send(buf).await;
                            }
                            return;
                        }
                    }
                }
                _ = interval.tick() => {
                    if let Some(buf) = self.try_flush() {
                        if out.send(buf).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(window_ms: u64) -> DebounceConfig {
        DebounceConfig {
            keywords: vec!["error".to_string(), "traceback".to_string()],
            window: Duration::from_millis(window_ms),
            max_buffer_chars: 10_000,
        }
    }

    #[test]
    fn ignores_chunks_with_no_keyword() {
        let mut d = Debouncer::new(cfg(50));
        d.feed("just an ordinary info line\n");
        assert_eq!(d.try_flush(), None);
        assert!(d.buffer.is_empty());
    }

    #[test]
    fn arms_and_accumulates_until_window_elapses() {
        let mut d = Debouncer::new(cfg(20));
        d.feed("Traceback (most recent call last):\n");
        d.feed("ValueError: boom\n");
        assert_eq!(d.try_flush(), None, "window has not elapsed yet");
        std::thread::sleep(Duration::from_millis(30));
        let flushed = d.try_flush().unwrap();
        assert!(flushed.contains("ValueError: boom"));
        assert_eq!(d.try_flush(), None, "second flush has nothing new");
    }

    #[test]
    fn a_fresh_keyword_hit_re_arms_the_window() {
        let mut d = Debouncer::new(cfg(30));
        d.feed("error: first\n");
        std::thread::sleep(Duration::from_millis(20));
        d.feed("error: second\n");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(d.try_flush(), None, "re-armed by the second hit, should not have flushed yet");
        std::thread::sleep(Duration::from_millis(20));
        let flushed = d.try_flush().unwrap();
        assert!(flushed.contains("first") && flushed.contains("second"));
    }
}
