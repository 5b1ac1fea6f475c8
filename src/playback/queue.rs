use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::debug;

/// One fragment of interviewer audio
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub id: u64,
    /// Encoded audio (mp3, wav, ...)
    pub audio: Vec<u8>,
    pub format: String,
    pub enqueued_at: Instant,
}

impl PlaybackItem {
    pub fn new(id: u64, audio: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            id,
            audio,
            format: format.into(),
            enqueued_at: Instant::now(),
        }
    }
}

/// Ordering rules for interviewer audio
///
/// At most one item plays at a time. A newly enqueued item supersedes every
/// item that has not started yet; the one already playing is left alone.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    current: Option<u64>,
    pending: VecDeque<PlaybackItem>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item, dropping anything not yet played
    ///
    /// Returns the number of items dropped.
    pub fn enqueue(&mut self, item: PlaybackItem) -> usize {
        let dropped = self.pending.len();
        if dropped > 0 {
            debug!("Dropping {} superseded playback items", dropped);
        }
        self.pending.clear();
        self.pending.push_back(item);
        dropped
    }

    /// Take the next item and mark it as playing
    ///
    /// Returns `None` while another item is still playing.
    pub fn begin_next(&mut self) -> Option<PlaybackItem> {
        if self.current.is_some() {
            return None;
        }
        let item = self.pending.pop_front()?;
        self.current = Some(item.id);
        Some(item)
    }

    /// Mark the playing item as done (ended or failed)
    pub fn finish_current(&mut self) -> Option<u64> {
        self.current.take()
    }

    /// Drop everything, including the playing item's slot
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.current = None;
        dropped
    }

    pub fn current(&self) -> Option<u64> {
        self.current
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing playing and nothing waiting
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }
}
