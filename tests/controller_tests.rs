// End-to-end tests for the turn controller
//
// The controller runs against an in-memory server, a scripted microphone
// (broadband noise while "speaking", silence otherwise) and a sink that
// plays every fragment for a fixed time and records it. Tokio time is
// paused, so the timing below is virtual and deterministic.

use anyhow::Result;
use base64::Engine;
use interview_voice::audio::{AudioBackend, AudioFrame};
use interview_voice::playback::{AudioSink, PlaybackItem};
use interview_voice::session::{
    SessionConfig, SessionReport, Speaker, TranscriptionMode, MAX_TIME_LIMIT_SECONDS,
};
use interview_voice::transport::{ClientMessage, MemoryServer, MemoryTransport, ServerMessage};
use interview_voice::turn::{ControllerHandle, EngineEvent, TurnController, TurnState};
use interview_voice::{Config, EngineError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

const WAIT: Duration = Duration::from_secs(120);

/// Microphone replaying noise or silence on demand
struct ScriptedMic {
    speaking: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
    deny: bool,
    task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedMic {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.deny {
            anyhow::bail!("Permission denied");
        }

        let (tx, rx) = mpsc::channel(100);
        let speaking = self.speaking.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(100));
            let mut state: u32 = 0x1234_5678;
            let mut timestamp_ms = 0;

            loop {
                ticker.tick().await;
                let samples = if speaking.load(Ordering::SeqCst) {
                    (0..1600)
                        .map(|_| {
                            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                            let unit = (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
                            (unit * 0.3 * i16::MAX as f32) as i16
                        })
                        .collect()
                } else {
                    vec![0; 1600]
                };

                let frame = AudioFrame {
                    samples,
                    sample_rate: 16000,
                    channels: 1,
                    timestamp_ms,
                };
                timestamp_ms += 100;

                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Plays every fragment for half a second, remembering what it played
struct TimedSink {
    played: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl AudioSink for TimedSink {
    async fn play(&mut self, item: &PlaybackItem) -> Result<()> {
        sleep(Duration::from_millis(500)).await;
        self.played
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&item.audio).into_owned());
        Ok(())
    }

    fn name(&self) -> &str {
        "timed"
    }
}

struct Harness {
    server: MemoryServer,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    handle: ControllerHandle,
    speaking: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
    played: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<Result<SessionReport, EngineError>>,
    log: Vec<EngineEvent>,
}

impl Harness {
    fn start(mode: TranscriptionMode) -> Self {
        Self::launch(mode, Config::default(), false)
    }

    fn launch(mode: TranscriptionMode, config: Config, deny_mic: bool) -> Self {
        let (transport, server) = MemoryTransport::pair();
        let speaking = Arc::new(AtomicBool::new(false));
        let released = Arc::new(AtomicBool::new(false));
        let played = Arc::new(Mutex::new(Vec::new()));

        let mic = ScriptedMic {
            speaking: speaking.clone(),
            released: released.clone(),
            deny: deny_mic,
            task: None,
        };

        let session = SessionConfig {
            interview_id: Some("int_1".to_string()),
            mode,
            ..Default::default()
        };

        let sink = TimedSink {
            played: played.clone(),
        };

        let (controller, handle, events) = TurnController::new(
            &config,
            session,
            Box::new(transport),
            Box::new(mic),
            Box::new(sink),
        );

        Self {
            server,
            events,
            handle,
            speaking,
            released,
            played,
            task: tokio::spawn(controller.run()),
            log: Vec::new(),
        }
    }

    fn speak(&self, on: bool) {
        self.speaking.store(on, Ordering::SeqCst);
    }

    /// Consume events until the controller enters `state`
    async fn expect_state(&mut self, state: TurnState) {
        let reached = timeout(WAIT, async {
            while let Some(event) = self.events.recv().await {
                let done = matches!(event, EngineEvent::StateChanged { to, .. } if to == state);
                self.log.push(event);
                if done {
                    return true;
                }
            }
            false
        })
        .await;

        assert!(
            matches!(reached, Ok(true)),
            "never reached {}; events: {:?}",
            state,
            self.log
        );
    }

    /// Next state the controller enters
    async fn next_state(&mut self) -> TurnState {
        loop {
            let event = timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for a state change")
                .expect("controller exited");
            self.log.push(event.clone());
            if let EngineEvent::StateChanged { to, .. } = event {
                return to;
            }
        }
    }

    async fn expect_client(&mut self) -> ClientMessage {
        timeout(WAIT, self.server.recv())
            .await
            .expect("timed out waiting for a client message")
            .expect("client dropped")
    }

    async fn greet(&mut self, time_limit_minutes: Option<f64>) {
        match self.expect_client().await {
            ClientMessage::StartInterview { interview_id, .. } => {
                assert_eq!(interview_id.as_deref(), Some("int_1"));
            }
            other => panic!("expected start_interview, got {:?}", other),
        }

        self.server
            .send(ServerMessage::Greeting {
                conversation_id: "conv_1".to_string(),
                text: "Hello! Can you hear me?".to_string(),
                audio: audio("greeting"),
                audio_format: "mp3".to_string(),
                phase: Some("audio_check".to_string()),
                time_limit_minutes,
            })
            .await
            .unwrap();
    }

    async fn respond(&self, text: &str) {
        self.server
            .send(ServerMessage::Response {
                conversation_id: Some("conv_1".to_string()),
                user_text: "I can hear you.".to_string(),
                interviewer_text: text.to_string(),
                audio: audio(text),
                audio_format: "mp3".to_string(),
                phase: Some("interview".to_string()),
                candidate_name: None,
            })
            .await
            .unwrap();
    }

    /// Speak for `length`, then fall silent
    async fn say(&mut self, length: Duration) {
        self.speak(true);
        self.expect_state(TurnState::Recording).await;
        sleep(length).await;
        self.speak(false);
    }

    /// End the interview and deliver an assessment
    async fn conclude(&mut self) {
        assert!(self.handle.end_interview());
        match self.expect_client().await {
            ClientMessage::EndInterview { .. } => {}
            other => panic!("expected end_interview, got {:?}", other),
        }
        self.server
            .send(ServerMessage::Assessment {
                assessment: "n/a".to_string(),
            })
            .await
            .unwrap();
    }

    /// Start recording, then report the state the recording ends in and when
    async fn record_until_stopped(&mut self) -> (TurnState, Duration) {
        self.greet(None).await;
        self.expect_state(TurnState::Listening).await;

        self.speak(true);
        self.expect_state(TurnState::Recording).await;
        let started = Instant::now();
        let next = self.next_state().await;
        (next, started.elapsed())
    }

    async fn finish(self) -> (Result<SessionReport, EngineError>, Vec<EngineEvent>, MemoryServer) {
        let Harness {
            server,
            mut events,
            task,
            mut log,
            ..
        } = self;

        let result = timeout(WAIT, task)
            .await
            .expect("controller did not exit")
            .expect("controller panicked");

        while let Ok(event) = events.try_recv() {
            log.push(event);
        }

        (result, log, server)
    }
}

fn audio(label: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(label.as_bytes())
}

#[tokio::test(start_paused = true)]
async fn test_full_interview_in_order() {
    let mut h = Harness::start(TranscriptionMode::Batch);

    h.greet(None).await;
    h.expect_state(TurnState::AiSpeaking).await;
    h.expect_state(TurnState::Listening).await;

    h.say(Duration::from_millis(1000)).await;
    match h.expect_client().await {
        ClientMessage::Audio {
            conversation_id,
            audio,
        } => {
            assert_eq!(conversation_id, "conv_1");
            let wav = base64::engine::general_purpose::STANDARD.decode(audio).unwrap();
            assert!(wav.starts_with(b"RIFF"));
        }
        other => panic!("expected audio, got {:?}", other),
    }
    h.expect_state(TurnState::Processing).await;

    h.respond("Tell me about a project you are proud of.").await;
    h.expect_state(TurnState::AiSpeaking).await;
    h.expect_state(TurnState::Listening).await;

    h.speak(true);
    h.expect_state(TurnState::Recording).await;
    assert!(h.handle.end_interview());
    h.speak(false);

    match h.expect_client().await {
        ClientMessage::EndInterview { conversation_id } => assert_eq!(conversation_id, "conv_1"),
        other => panic!("expected end_interview, got {:?}", other),
    }
    h.expect_state(TurnState::Ended).await;

    h.server
        .send(ServerMessage::Assessment {
            assessment: "Clear communicator.".to_string(),
        })
        .await
        .unwrap();

    let released = h.released.clone();
    let (result, log, mut server) = h.finish().await;
    let report = result.expect("interview should succeed");

    assert_eq!(report.assessment.as_deref(), Some("Clear communicator."));
    assert_eq!(report.session.conversation_id.as_deref(), Some("conv_1"));
    assert_eq!(report.session.phase.as_deref(), Some("interview"));
    assert_eq!(report.stats.turns, 1);
    assert_eq!(report.stats.utterances_sent, 1);
    assert_eq!(
        report
            .transcript
            .iter()
            .map(|e| e.speaker)
            .collect::<Vec<_>>(),
        vec![Speaker::Interviewer, Speaker::Candidate, Speaker::Interviewer]
    );

    // The in-flight recording was discarded, nothing else was sent
    assert!(server.try_recv().is_none());
    assert!(log.contains(&EngineEvent::Assessment("Clear communicator.".to_string())));
    assert!(released.load(Ordering::SeqCst), "capture must be released");
}

#[tokio::test(start_paused = true)]
async fn test_short_speech_is_discarded() {
    let mut h = Harness::start(TranscriptionMode::Batch);
    h.greet(None).await;
    h.expect_state(TurnState::Listening).await;

    // Fall silent as soon as recording starts: at most two speech ticks
    h.say(Duration::ZERO).await;
    h.expect_state(TurnState::Listening).await;

    assert!(h
        .log
        .iter()
        .any(|e| matches!(e, EngineEvent::RecordingDiscarded { speech } if *speech < Duration::from_millis(300))));
    assert!(h.server.try_recv().is_none(), "no utterance for a short sound");

    h.handle.end_interview();
    assert!(matches!(h.expect_client().await, ClientMessage::EndInterview { .. }));
    h.server
        .send(ServerMessage::Assessment {
            assessment: "n/a".to_string(),
        })
        .await
        .unwrap();

    let (result, _, _) = h.finish().await;
    let report = result.unwrap();
    assert_eq!(report.stats.utterances_discarded, 1);
    assert_eq!(report.stats.utterances_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_recording_while_interviewer_speaks() {
    let mut h = Harness::start(TranscriptionMode::Batch);

    // Interviewer audio leaking into the microphone
    h.speak(true);
    h.greet(None).await;
    h.expect_state(TurnState::AwaitingGreeting).await;
    assert_eq!(h.next_state().await, TurnState::AiSpeaking);

    // Half a second of playback plus the settle delay, all of it "speech"
    assert_eq!(h.next_state().await, TurnState::Listening);
    h.speak(false);
    assert!(h.server.try_recv().is_none());

    h.handle.end_interview();
    assert!(matches!(h.expect_client().await, ClientMessage::EndInterview { .. }));
    h.server
        .send(ServerMessage::Assessment {
            assessment: "n/a".to_string(),
        })
        .await
        .unwrap();

    let (result, _, _) = h.finish().await;
    assert!(result.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_responses_dropped() {
    let mut h = Harness::start(TranscriptionMode::Batch);
    h.greet(None).await;
    h.expect_state(TurnState::Listening).await;

    h.say(Duration::from_millis(800)).await;
    assert!(matches!(h.expect_client().await, ClientMessage::Audio { .. }));
    h.expect_state(TurnState::Processing).await;

    // Retransmitted while the first copy is still playing
    h.respond("What motivates you?").await;
    h.expect_state(TurnState::AiSpeaking).await;
    h.respond("What motivates you?").await;

    // Same text again right after playback ended, inside the window
    h.expect_state(TurnState::Listening).await;
    h.respond("What motivates you?").await;
    sleep(Duration::from_millis(100)).await;

    h.handle.end_interview();
    assert!(matches!(h.expect_client().await, ClientMessage::EndInterview { .. }));
    h.server
        .send(ServerMessage::Assessment {
            assessment: "n/a".to_string(),
        })
        .await
        .unwrap();

    let (result, log, _) = h.finish().await;
    let report = result.unwrap();
    assert_eq!(report.stats.turns, 1);
    assert_eq!(report.stats.responses_dropped, 2);

    let interviewer_lines = log
        .iter()
        .filter(|e| matches!(e, EngineEvent::Transcript { speaker: Speaker::Interviewer, text } if text == "What motivates you?"))
        .count();
    assert_eq!(interviewer_lines, 1);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_utterance() {
    let mut h = Harness::start(TranscriptionMode::Streaming);
    h.greet(None).await;
    h.expect_state(TurnState::Listening).await;

    h.speak(true);
    match h.expect_client().await {
        ClientMessage::AudioStreamStart { conversation_id } => assert_eq!(conversation_id, "conv_1"),
        other => panic!("expected audio_stream_start, got {:?}", other),
    }

    // Chunks produced before this are held and flushed in order
    sleep(Duration::from_millis(400)).await;
    h.server
        .send(ServerMessage::StreamReady {
            conversation_id: "conv_1".to_string(),
        })
        .await
        .unwrap();
    sleep(Duration::from_millis(600)).await;
    h.speak(false);

    let mut chunks = 0;
    loop {
        match h.expect_client().await {
            ClientMessage::AudioChunk { conversation_id, audio } => {
                assert_eq!(conversation_id, "conv_1");
                assert!(!audio.is_empty());
                chunks += 1;
            }
            ClientMessage::AudioCommit { conversation_id } => {
                assert_eq!(conversation_id, "conv_1");
                break;
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
    assert!(chunks >= 4, "expected at least a second of chunks, got {}", chunks);
    h.expect_state(TurnState::Processing).await;

    h.handle.end_interview();
    assert!(matches!(h.expect_client().await, ClientMessage::EndInterview { .. }));
    h.server
        .send(ServerMessage::Assessment {
            assessment: "n/a".to_string(),
        })
        .await
        .unwrap();
    assert!(h.finish().await.0.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_assessment_timeout_releases_resources() {
    let mut h = Harness::start(TranscriptionMode::Batch);
    h.greet(None).await;
    h.expect_state(TurnState::Listening).await;

    let asked = Instant::now();
    h.handle.end_interview();
    assert!(matches!(h.expect_client().await, ClientMessage::EndInterview { .. }));

    let released = h.released.clone();
    let (result, log, _) = h.finish().await;

    assert!(matches!(result, Err(EngineError::AssessmentTimeout(_))));
    assert!(asked.elapsed() >= Duration::from_secs(30));
    assert!(released.load(Ordering::SeqCst));
    assert!(log.iter().any(|e| matches!(e, EngineEvent::Error(_))));
}

#[tokio::test(start_paused = true)]
async fn test_server_error_rearms_listening() {
    let mut h = Harness::start(TranscriptionMode::Batch);
    h.greet(None).await;
    h.expect_state(TurnState::Listening).await;

    h.say(Duration::from_millis(800)).await;
    assert!(matches!(h.expect_client().await, ClientMessage::Audio { .. }));
    h.expect_state(TurnState::Processing).await;

    let failed_at = Instant::now();
    h.server
        .send(ServerMessage::Error {
            message: "Transcription failed".to_string(),
        })
        .await
        .unwrap();

    h.expect_state(TurnState::Listening).await;
    assert!(failed_at.elapsed() >= Duration::from_millis(1500));
    assert!(h
        .log
        .contains(&EngineEvent::Error("Transcription failed".to_string())));

    // Listening again: a new utterance goes out
    h.say(Duration::from_millis(800)).await;
    assert!(matches!(h.expect_client().await, ClientMessage::Audio { .. }));

    h.handle.end_interview();
    assert!(matches!(h.expect_client().await, ClientMessage::EndInterview { .. }));
    h.server
        .send(ServerMessage::Assessment {
            assessment: "n/a".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(h.finish().await.0.unwrap().stats.utterances_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_time_limit_ends_interview() {
    let mut h = Harness::start(TranscriptionMode::Batch);
    let started = Instant::now();
    h.greet(Some(0.05)).await;

    match h.expect_client().await {
        ClientMessage::EndInterview { conversation_id } => assert_eq!(conversation_id, "conv_1"),
        other => panic!("expected end_interview, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_secs(3));

    h.server
        .send(ServerMessage::Assessment {
            assessment: "Out of time.".to_string(),
        })
        .await
        .unwrap();

    let (result, log, _) = h.finish().await;
    assert_eq!(result.unwrap().session.time_limit_seconds, Some(3));
    assert!(log.contains(&EngineEvent::Status("Time limit reached".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_is_an_error() {
    let mut h = Harness::start(TranscriptionMode::Batch);
    h.greet(None).await;
    h.expect_state(TurnState::Listening).await;

    h.server.close(Some("server restart".to_string())).await.unwrap();

    let released = h.released.clone();
    let (result, log, _) = h.finish().await;
    match result {
        Err(EngineError::TransportClosed { reason }) => {
            assert_eq!(reason.as_deref(), Some("server restart"))
        }
        other => panic!("expected TransportClosed, got {:?}", other.map(|r| r.stats)),
    }
    assert!(released.load(Ordering::SeqCst));
    assert!(log.iter().any(|e| matches!(
        e,
        EngineEvent::StateChanged {
            to: TurnState::Errored,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_denied_microphone_is_fatal() {
    let h = Harness::launch(TranscriptionMode::Batch, Config::default(), true);

    let (result, _, mut server) = h.finish().await;
    assert!(matches!(result, Err(EngineError::CaptureDenied(_))));
    assert!(server.try_recv().is_none(), "interview must not start");
}

fn utterances_sent(log: &[EngineEvent]) -> usize {
    log.iter()
        .filter(|e| matches!(e, EngineEvent::UtteranceSent { .. }))
        .count()
}

/// Speech that never pauses must still be cut off by a recording cap
async fn assert_capped_recording(config: Config) {
    let mut h = Harness::launch(TranscriptionMode::Batch, config, false);

    let (state, after) = h.record_until_stopped().await;
    assert_eq!(state, TurnState::Processing);
    assert!(after >= Duration::from_secs(2), "stopped after {:?}", after);
    assert!(after < Duration::from_millis(2500), "stopped after {:?}", after);
    assert!(matches!(h.expect_client().await, ClientMessage::Audio { .. }));

    // Still talking: nothing more is recorded until the next response
    sleep(Duration::from_secs(3)).await;
    h.speak(false);
    h.conclude().await;

    let (result, log, _) = h.finish().await;
    assert_eq!(result.unwrap().stats.utterances_sent, 1);
    assert_eq!(utterances_sent(&log), 1);
}

#[tokio::test(start_paused = true)]
async fn test_max_recording_stops_endless_speech() {
    let mut config = Config::default();
    config.failsafe.max_recording_ms = 2_000;
    assert_capped_recording(config).await;
}

#[tokio::test(start_paused = true)]
async fn test_force_stop_below_max_recording() {
    let mut config = Config::default();
    config.failsafe.max_recording_ms = 10_000;
    config.failsafe.force_stop_ms = 2_000;
    assert_capped_recording(config).await;
}

#[tokio::test(start_paused = true)]
async fn test_low_activity_keeps_enough_speech() {
    let mut config = Config::default();
    // No tick is ever clearly voiced
    config.vad.strong_speech_threshold = 255.0;
    config.failsafe.low_activity_timeout_ms = 2_000;
    let mut h = Harness::launch(TranscriptionMode::Batch, config, false);

    let (state, after) = h.record_until_stopped().await;
    assert_eq!(state, TurnState::Processing);
    assert!(after >= Duration::from_secs(2) && after < Duration::from_millis(2500));
    assert!(matches!(h.expect_client().await, ClientMessage::Audio { .. }));

    h.speak(false);
    h.conclude().await;
    assert_eq!(h.finish().await.0.unwrap().stats.utterances_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_low_activity_discards_too_little_speech() {
    let mut config = Config::default();
    config.vad.strong_speech_threshold = 255.0;
    config.vad.speech_min_duration_ms = 5_000;
    config.failsafe.low_activity_timeout_ms = 2_000;
    let mut h = Harness::launch(TranscriptionMode::Batch, config, false);

    let (state, after) = h.record_until_stopped().await;
    h.speak(false);
    assert_eq!(state, TurnState::Listening);
    assert!(after >= Duration::from_secs(2) && after < Duration::from_millis(2500));
    assert!(h
        .log
        .iter()
        .any(|e| matches!(e, EngineEvent::RecordingDiscarded { .. })));
    assert!(h.server.try_recv().is_none());

    h.conclude().await;
    let report = h.finish().await.0.unwrap();
    assert_eq!(report.stats.utterances_sent, 0);
    assert!(report.stats.utterances_discarded >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_response_queued_behind_greeting_then_newer_dropped() {
    let mut h = Harness::start(TranscriptionMode::Batch);
    h.greet(None).await;
    h.expect_state(TurnState::AiSpeaking).await;
    let greeted = Instant::now();

    // Accepted: plays after the greeting, without cutting it off
    h.respond("Please introduce yourself.").await;
    // A different response while that one is pending is still a duplicate
    h.respond("What brings you here today?").await;

    h.expect_state(TurnState::Listening).await;
    assert!(greeted.elapsed() >= Duration::from_millis(1600));
    assert_eq!(
        *h.played.lock().unwrap(),
        vec!["greeting".to_string(), "Please introduce yourself.".to_string()]
    );

    h.conclude().await;
    let (result, log, _) = h.finish().await;
    let report = result.unwrap();
    assert_eq!(report.stats.turns, 1);
    assert_eq!(report.stats.responses_dropped, 1);
    assert!(!log.iter().any(|e| matches!(
        e,
        EngineEvent::Transcript { text, .. } if text == "What brings you here today?"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_refused_stream_does_not_block_next_one() {
    let mut h = Harness::start(TranscriptionMode::Streaming);
    h.greet(None).await;
    h.expect_state(TurnState::Listening).await;

    h.speak(true);
    assert!(matches!(
        h.expect_client().await,
        ClientMessage::AudioStreamStart { .. }
    ));

    // Server answers the stream start with an error instead of stream_ready
    h.server
        .send(ServerMessage::Error {
            message: "Failed to start streaming session".to_string(),
        })
        .await
        .unwrap();
    h.expect_state(TurnState::Listening).await;
    h.speak(false);

    // Past the re-arm delay
    sleep(Duration::from_secs(2)).await;

    h.speak(true);
    assert!(matches!(
        h.expect_client().await,
        ClientMessage::AudioStreamStart { .. }
    ));
    h.server
        .send(ServerMessage::StreamReady {
            conversation_id: "conv_1".to_string(),
        })
        .await
        .unwrap();
    sleep(Duration::from_secs(1)).await;
    h.speak(false);

    let mut chunks = 0;
    loop {
        match h.expect_client().await {
            ClientMessage::AudioChunk { .. } => chunks += 1,
            ClientMessage::AudioCommit { .. } => break,
            other => panic!("unexpected message: {:?}", other),
        }
    }
    assert!(chunks >= 1);
    h.expect_state(TurnState::Processing).await;

    h.conclude().await;
    assert_eq!(h.finish().await.0.unwrap().stats.utterances_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_absurd_time_limit_is_capped() {
    let mut h = Harness::start(TranscriptionMode::Batch);
    h.greet(Some(1e300)).await;
    h.expect_state(TurnState::Listening).await;

    h.conclude().await;
    let report = h.finish().await.0.unwrap();
    assert_eq!(
        report.session.time_limit_seconds,
        Some(MAX_TIME_LIMIT_SECONDS)
    );
}
