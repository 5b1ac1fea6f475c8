use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Duplicate response suppression settings
///
/// Both values are empirically tuned; neither is load-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Window after a response in which a repeat is treated as a duplicate
    pub window_ms: u64,

    /// Leading characters compared for near-identical responses
    pub prefix_chars: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: 2000,
            prefix_chars: 50,
        }
    }
}

/// Outcome of checking a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    Accept,
    /// Previous response is still being handled
    Busy,
    SameText,
    SamePrefix,
}

impl DedupVerdict {
    pub fn is_duplicate(self) -> bool {
        self != DedupVerdict::Accept
    }
}

/// Suppresses re-delivered `response` messages
pub struct DuplicateResponseFilter {
    config: DedupConfig,
    processing: bool,
    last: Option<(String, Instant)>,
}

impl DuplicateResponseFilter {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            processing: false,
            last: None,
        }
    }

    /// Check a response; an accepted one is remembered and marks the filter busy
    pub fn check(&mut self, text: &str) -> DedupVerdict {
        let now = Instant::now();
        let verdict = self.verdict(text, now);

        if verdict.is_duplicate() {
            debug!("Duplicate response ({:?}): {:.40}", verdict, text);
        } else {
            self.processing = true;
            self.last = Some((text.to_string(), now));
        }

        verdict
    }

    fn verdict(&self, text: &str, now: Instant) -> DedupVerdict {
        if self.processing {
            return DedupVerdict::Busy;
        }

        let Some((last_text, at)) = &self.last else {
            return DedupVerdict::Accept;
        };

        if now.duration_since(*at) >= Duration::from_millis(self.config.window_ms) {
            return DedupVerdict::Accept;
        }

        if last_text == text {
            return DedupVerdict::SameText;
        }

        let n = self.config.prefix_chars;
        if n > 0 && last_text.chars().take(n).eq(text.chars().take(n)) {
            return DedupVerdict::SamePrefix;
        }

        DedupVerdict::Accept
    }

    /// The accepted response has been fully handled
    pub fn finish(&mut self) {
        self.processing = false;
    }
}
