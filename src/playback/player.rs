use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::queue::{PlaybackItem, PlaybackQueue};
use super::sink::AudioSink;

/// Progress reported by the playback task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { id: u64 },
    Finished { id: u64 },
    /// Item could not be played; the queue has already moved on
    Failed { id: u64, error: String },
    /// Queue is empty after `last_id` settled
    Drained { last_id: u64 },
}

enum PlaybackCommand {
    Enqueue(PlaybackItem),
    Stop,
}

/// Handle to the playback task
pub struct Player {
    commands: Option<mpsc::UnboundedSender<PlaybackCommand>>,
    task: Option<JoinHandle<()>>,
    next_id: u64,
}

impl Player {
    /// Spawn the playback task over `sink`
    ///
    /// `settle` is waited after every item before the next one starts.
    pub fn spawn(
        sink: Box<dyn AudioSink>,
        settle: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_player(sink, command_rx, event_tx, settle));

        let player = Self {
            commands: Some(command_tx),
            task: Some(task),
            next_id: 1,
        };

        (player, event_rx)
    }

    /// Queue audio, superseding anything not yet started
    ///
    /// Returns the id the item's events will carry.
    pub fn enqueue(&mut self, audio: Vec<u8>, format: &str) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;

        self.send(PlaybackCommand::Enqueue(PlaybackItem::new(id, audio, format)))?;
        Ok(id)
    }

    /// Interrupt the playing item and drop everything queued
    pub fn stop(&self) -> Result<()> {
        self.send(PlaybackCommand::Stop)
    }

    /// Stop playback and wait for the task to exit
    pub async fn shutdown(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(PlaybackCommand::Stop);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Playback task ended abnormally: {}", e);
            }
        }
    }

    fn send(&self, command: PlaybackCommand) -> Result<()> {
        let Some(commands) = &self.commands else {
            anyhow::bail!("Playback is shut down");
        };
        commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("Playback task stopped"))
    }
}

enum Outcome {
    Played(Result<()>),
    Interrupted,
    Shutdown,
}

async fn run_player(
    mut sink: Box<dyn AudioSink>,
    mut commands: mpsc::UnboundedReceiver<PlaybackCommand>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    settle: Duration,
) {
    let mut queue = PlaybackQueue::new();
    info!("Playback started: {}", sink.name());

    loop {
        let Some(item) = queue.begin_next() else {
            match commands.recv().await {
                Some(PlaybackCommand::Enqueue(item)) => {
                    queue.enqueue(item);
                }
                Some(PlaybackCommand::Stop) => {
                    queue.clear();
                }
                None => break,
            }
            continue;
        };

        let id = item.id;
        debug!(
            "Playing item {} ({} bytes {}, queued {:?} ago)",
            id,
            item.audio.len(),
            item.format,
            item.enqueued_at.elapsed()
        );
        let _ = events.send(PlaybackEvent::Started { id });

        let outcome = {
            let play = async {
                let result = sink.play(&item).await;
                tokio::time::sleep(settle).await;
                result
            };
            tokio::pin!(play);

            loop {
                tokio::select! {
                    result = &mut play => break Outcome::Played(result),
                    command = commands.recv() => match command {
                        Some(PlaybackCommand::Enqueue(next)) => {
                            queue.enqueue(next);
                        }
                        Some(PlaybackCommand::Stop) => {
                            queue.clear();
                            break Outcome::Interrupted;
                        }
                        None => break Outcome::Shutdown,
                    },
                }
            }
        };

        match outcome {
            Outcome::Played(Ok(())) => {
                queue.finish_current();
                let _ = events.send(PlaybackEvent::Finished { id });
            }
            Outcome::Played(Err(e)) => {
                warn!("Playback failed for item {}: {:#}", id, e);
                queue.finish_current();
                let _ = events.send(PlaybackEvent::Failed {
                    id,
                    error: format!("{:#}", e),
                });
            }
            Outcome::Interrupted => {
                debug!("Playback interrupted at item {}", id);
                continue;
            }
            Outcome::Shutdown => break,
        }

        if queue.is_idle() {
            let _ = events.send(PlaybackEvent::Drained { last_id: id });
        }
    }

    info!("Playback stopped: {}", sink.name());
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Plays every item for a fixed time; payloads starting with `!` fail
    struct FixedSink {
        length: Duration,
    }

    #[async_trait::async_trait]
    impl AudioSink for FixedSink {
        async fn play(&mut self, item: &PlaybackItem) -> Result<()> {
            if item.audio.first() == Some(&b'!') {
                anyhow::bail!("corrupt payload");
            }
            tokio::time::sleep(self.length).await;
            Ok(())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn player() -> (Player, mpsc::UnboundedReceiver<PlaybackEvent>) {
        Player::spawn(
            Box::new(FixedSink {
                length: Duration::from_secs(1),
            }),
            Duration::from_millis(300),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_newest_item_supersedes_pending() {
        let (mut player, mut events) = player();

        let first = player.enqueue(b"one".to_vec(), "mp3").unwrap();
        assert_eq!(events.recv().await, Some(PlaybackEvent::Started { id: first }));

        let _dropped = player.enqueue(b"two".to_vec(), "mp3").unwrap();
        let newest = player.enqueue(b"three".to_vec(), "mp3").unwrap();

        assert_eq!(events.recv().await, Some(PlaybackEvent::Finished { id: first }));
        assert_eq!(events.recv().await, Some(PlaybackEvent::Started { id: newest }));
        assert_eq!(events.recv().await, Some(PlaybackEvent::Finished { id: newest }));
        assert_eq!(events.recv().await, Some(PlaybackEvent::Drained { last_id: newest }));

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_advances_queue() {
        let (mut player, mut events) = player();

        let id = player.enqueue(b"!bad".to_vec(), "mp3").unwrap();
        assert_eq!(events.recv().await, Some(PlaybackEvent::Started { id }));
        assert!(matches!(events.recv().await, Some(PlaybackEvent::Failed { id: failed, .. }) if failed == id));
        assert_eq!(events.recv().await, Some(PlaybackEvent::Drained { last_id: id }));

        player.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_without_draining() {
        let (mut player, mut events) = player();

        let id = player.enqueue(b"one".to_vec(), "mp3").unwrap();
        assert_eq!(events.recv().await, Some(PlaybackEvent::Started { id }));

        player.stop().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(events.try_recv().is_err());

        player.shutdown().await;
        assert!(player.enqueue(b"late".to_vec(), "mp3").is_err());
    }
}
