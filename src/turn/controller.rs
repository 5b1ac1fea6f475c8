use base64::Engine;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::dedup::DuplicateResponseFilter;
use super::failsafe::{sleep_until_deadline, FailsafeKind, Failsafes};
use super::state::TurnState;
use crate::audio::{AudioBackend, AudioFrame, CaptureSession};
use crate::config::Config;
use crate::error::EngineError;
use crate::playback::{AudioSink, PlaybackEvent, Player};
use crate::recording::{Recorder, Utterance};
use crate::session::{
    Session, SessionConfig, SessionReport, SessionStats, Speaker, TranscriptEntry,
    TranscriptionMode,
};
use crate::transport::{ClientMessage, ServerMessage, Transport, TransportEvent};
use crate::vad::{VadEvent, VoiceActivityDetector};

/// What the controller reports to a UI or CLI
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged { from: TurnState, to: TurnState },
    Transcript { speaker: Speaker, text: String },
    UtteranceSent { mode: TranscriptionMode, duration: Duration },
    /// Recording dropped because it held too little speech
    RecordingDiscarded { speech: Duration },
    Status(String),
    Error(String),
    Assessment(String),
}

/// User input to a running controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    EndInterview,
}

/// Cloneable handle for sending user input
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
}

impl ControllerHandle {
    /// Ask the controller to end the interview
    ///
    /// Returns false if the controller has already exited.
    pub fn end_interview(&self) -> bool {
        self.commands.send(ControlCommand::EndInterview).is_ok()
    }
}

enum Input {
    Transport(TransportEvent),
    Frame(Option<AudioFrame>),
    Tick,
    Playback(PlaybackEvent),
    Command(Option<ControlCommand>),
    Failsafe(FailsafeKind),
}

enum Flow {
    Continue,
    Done,
}

/// Drives one interview's turn-taking
///
/// All state lives here and is mutated only by the controller's own task, one
/// input at a time: inbound messages, captured frames, VAD ticks, playback
/// progress, user commands and watchdog deadlines are multiplexed in a single
/// `select!` and each is handled to completion before the next is taken.
pub struct TurnController {
    state: TurnState,
    session: Session,
    session_config: SessionConfig,

    transport: Box<dyn Transport>,
    inbound: Option<mpsc::Receiver<TransportEvent>>,

    capture: CaptureSession,
    vad: VoiceActivityDetector,
    vad_armed: bool,
    ticker: Option<Interval>,
    recorder: Recorder,

    sink: Option<Box<dyn AudioSink>>,
    player: Option<Player>,
    playback_events: Option<mpsc::UnboundedReceiver<PlaybackEvent>>,
    playback_settle: Duration,
    last_enqueued: Option<u64>,

    dedup: DuplicateResponseFilter,
    failsafes: Failsafes,

    commands: Option<mpsc::UnboundedReceiver<ControlCommand>>,
    events: mpsc::UnboundedSender<EngineEvent>,

    ending: bool,
    stats: SessionStats,
    transcript: Vec<TranscriptEntry>,
    assessment: Option<String>,
}

impl TurnController {
    pub fn new(
        config: &Config,
        session_config: SessionConfig,
        transport: Box<dyn Transport>,
        backend: Box<dyn AudioBackend>,
        sink: Box<dyn AudioSink>,
    ) -> (Self, ControllerHandle, mpsc::UnboundedReceiver<EngineEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let controller = Self {
            state: TurnState::Idle,
            session: Session::new(&session_config),
            transport,
            inbound: None,
            capture: CaptureSession::new(backend, &config.vad, config.recording.pre_roll_ms),
            vad: VoiceActivityDetector::new(config.vad.clone()),
            vad_armed: false,
            ticker: None,
            recorder: Recorder::new(session_config.mode, config.recording.clone()),
            sink: Some(sink),
            player: None,
            playback_events: None,
            playback_settle: Duration::from_millis(config.playback.settle_delay_ms),
            last_enqueued: None,
            dedup: DuplicateResponseFilter::new(config.dedup.clone()),
            failsafes: Failsafes::new(config.failsafe.clone()),
            commands: Some(command_rx),
            events: event_tx,
            ending: false,
            stats: SessionStats::new(),
            transcript: Vec::new(),
            assessment: None,
            session_config,
        };

        let handle = ControllerHandle {
            commands: command_tx,
        };

        (controller, handle, event_rx)
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Run the interview to completion
    ///
    /// Capture, playback, watchdogs and the transport are released on every
    /// exit path before this returns.
    pub async fn run(mut self) -> Result<SessionReport, EngineError> {
        let result = self.drive().await;
        self.shutdown().await;
        self.stats.touch();

        match result {
            Ok(()) => {
                info!(
                    "Interview finished: {} ({} turns, {:.1}s)",
                    self.session.label(),
                    self.stats.turns,
                    self.stats.duration_secs
                );
                Ok(SessionReport {
                    session: self.session,
                    stats: self.stats,
                    transcript: self.transcript,
                    assessment: self.assessment,
                })
            }
            Err(e) => {
                error!("Interview failed: {}", e);
                if !matches!(e, EngineError::AssessmentTimeout(_)) {
                    self.set_state(TurnState::Errored);
                }
                self.emit(EngineEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<(), EngineError> {
        self.set_state(TurnState::Connecting);

        self.capture
            .start()
            .await
            .map_err(|e| EngineError::CaptureDenied(format!("{:#}", e)))?;

        let inbound = self
            .transport
            .connect()
            .await
            .map_err(|e| EngineError::Transport(format!("{:#}", e)))?;
        self.inbound = Some(inbound);
        info!("Transport open: {}", self.transport.name());

        if let Some(sink) = self.sink.take() {
            let (player, events) = Player::spawn(sink, self.playback_settle);
            self.player = Some(player);
            self.playback_events = Some(events);
        }

        let mut ticker = tokio::time::interval(self.vad.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);

        self.set_state(TurnState::AwaitingGreeting);
        self.send(ClientMessage::StartInterview {
            interview_id: self.session_config.interview_id.clone(),
            application_id: self.session_config.application_id.clone(),
            providers: self.session_config.providers.clone(),
        })
        .await?;

        loop {
            let listening = self.vad_armed && self.state.accepts_vad();
            let next_failsafe = self.failsafes.next_deadline();

            let input = tokio::select! {
                event = next_transport_event(&mut self.inbound) => Input::Transport(event),
                frame = self.capture.next_frame() => Input::Frame(frame),
                _ = next_tick(&mut self.ticker), if listening => Input::Tick,
                event = next_playback_event(&mut self.playback_events) => Input::Playback(event),
                command = next_command(&mut self.commands) => Input::Command(command),
                kind = sleep_until_deadline(next_failsafe) => Input::Failsafe(kind),
            };

            let flow = match input {
                Input::Transport(event) => self.on_transport(event).await?,
                Input::Frame(frame) => self.on_frame(frame).await?,
                Input::Tick => self.on_tick().await?,
                Input::Playback(event) => self.on_playback(event),
                Input::Command(command) => self.on_command(command).await?,
                Input::Failsafe(kind) => self.on_failsafe(kind).await?,
            };

            if let Flow::Done = flow {
                return Ok(());
            }
        }
    }

    async fn on_transport(&mut self, event: TransportEvent) -> Result<Flow, EngineError> {
        let message = match event {
            TransportEvent::Message(message) => message,
            TransportEvent::Closed { reason } => {
                if self.assessment.is_some() {
                    return Ok(Flow::Done);
                }
                warn!(
                    "Connection closed: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.emit(EngineEvent::Status("Connection closed".to_string()));
                return Err(EngineError::TransportClosed { reason });
            }
        };

        debug!("Received {} in {}", message.kind(), self.state);

        match message {
            ServerMessage::Greeting {
                conversation_id,
                text,
                audio,
                audio_format,
                phase,
                time_limit_minutes,
            } => {
                if self.state != TurnState::AwaitingGreeting {
                    warn!("Ignoring greeting in {}", self.state);
                    return Ok(Flow::Continue);
                }

                info!("Greeting received: conversation {}", conversation_id);
                self.session.conversation_id = Some(conversation_id);
                if phase.is_some() {
                    self.session.phase = phase;
                }
                if let Some(minutes) = time_limit_minutes {
                    self.session.set_time_limit_minutes(minutes);
                }
                if let Some(limit) = self.session.time_limit_seconds {
                    info!("Interview time limit: {}s", limit);
                    self.failsafes
                        .arm_for(FailsafeKind::TimeLimit, Duration::from_secs(limit));
                }

                self.record_transcript(Speaker::Interviewer, text);
                self.speak(&audio, &audio_format);
            }

            ServerMessage::StreamReady { conversation_id } => {
                debug!("Stream ready: conversation {}", conversation_id);
                self.recorder.on_stream_ready();
                self.flush_recorder().await?;
            }

            ServerMessage::Response {
                conversation_id,
                user_text,
                interviewer_text,
                audio,
                audio_format,
                phase,
                candidate_name,
            } => {
                if self.ending
                    || matches!(
                        self.state,
                        TurnState::Idle | TurnState::Connecting | TurnState::AwaitingGreeting
                    )
                {
                    debug!("Ignoring response in {}", self.state);
                    return Ok(Flow::Continue);
                }

                if self.dedup.check(&interviewer_text).is_duplicate() {
                    self.stats.responses_dropped += 1;
                    info!("Dropped duplicate response");
                    return Ok(Flow::Continue);
                }

                if self.recorder.is_active() {
                    self.recorder.cancel();
                    self.failsafes.disarm_recording();
                }

                if self.session.conversation_id.is_none() {
                    self.session.conversation_id = conversation_id;
                }
                if phase.is_some() {
                    self.session.phase = phase;
                }
                if candidate_name.is_some() {
                    self.session.candidate_name = candidate_name;
                }

                self.stats.turns += 1;
                if !user_text.is_empty() {
                    self.record_transcript(Speaker::Candidate, user_text);
                }
                self.record_transcript(Speaker::Interviewer, interviewer_text);
                self.speak(&audio, &audio_format);
            }

            ServerMessage::Assessment { assessment } => {
                info!("Assessment received ({} chars)", assessment.len());
                self.failsafes.disarm(FailsafeKind::Assessment);
                self.emit(EngineEvent::Assessment(assessment.clone()));
                self.assessment = Some(assessment);

                if !self.ending {
                    // Server ended the interview on its own
                    self.ending = true;
                    self.silence_engine();
                    self.set_state(TurnState::Ended);
                }
                return Ok(Flow::Done);
            }

            ServerMessage::Error { message } => self.on_server_error(message),
        }

        Ok(Flow::Continue)
    }

    async fn on_frame(&mut self, frame: Option<AudioFrame>) -> Result<Flow, EngineError> {
        let Some(frame) = frame else {
            self.emit(EngineEvent::Status("Capture stream ended".to_string()));
            return Ok(Flow::Continue);
        };

        self.capture.ingest(&frame);
        if self.recorder.is_active() {
            self.recorder.push(&frame);
            self.flush_recorder().await?;
        }

        Ok(Flow::Continue)
    }

    async fn on_tick(&mut self) -> Result<Flow, EngineError> {
        if !(self.vad_armed && self.state.accepts_vad()) {
            return Ok(Flow::Continue);
        }

        let sample = self.capture.sample();
        let tick = self.vad.observe(&sample);

        if tick.strong && self.state == TurnState::Recording {
            self.failsafes.arm(FailsafeKind::LowActivity);
        }

        match (tick.event, self.state) {
            (Some(VadEvent::Onset), TurnState::Listening) => self.start_recording().await?,
            (Some(VadEvent::SustainedSilence { silence, speech }), TurnState::Recording) => {
                debug!("Silence for {:?} after {:?} of speech", silence, speech);
                self.finish_recording(speech).await?;
            }
            _ => {}
        }

        Ok(Flow::Continue)
    }

    fn on_playback(&mut self, event: PlaybackEvent) -> Flow {
        match event {
            PlaybackEvent::Started { id } => debug!("Playback started: item {}", id),
            PlaybackEvent::Finished { id } => debug!("Playback finished: item {}", id),
            PlaybackEvent::Failed { id, error } => {
                warn!("Playback failed: item {}: {}", id, error);
                self.stats.playback_failures += 1;
            }
            PlaybackEvent::Drained { last_id } => {
                if self.last_enqueued != Some(last_id) {
                    debug!("Ignoring drain of superseded item {}", last_id);
                } else if self.state == TurnState::AiSpeaking {
                    self.dedup.finish();
                    self.enter_listening();
                }
            }
        }
        Flow::Continue
    }

    async fn on_command(&mut self, command: Option<ControlCommand>) -> Result<Flow, EngineError> {
        match command {
            Some(ControlCommand::EndInterview) => {
                info!("End of interview requested");
                self.begin_end().await
            }
            None => {
                debug!("All controller handles dropped");
                self.commands = None;
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_failsafe(&mut self, kind: FailsafeKind) -> Result<Flow, EngineError> {
        self.failsafes.fire(kind);

        match kind {
            FailsafeKind::MaxRecording | FailsafeKind::ForceStop => {
                if self.state == TurnState::Recording {
                    warn!(
                        "Watchdog {} fired after {:.1}s of recording, stopping",
                        kind,
                        self.recorder.buffered().as_secs_f64()
                    );
                    self.submit_recording().await?;
                }
            }
            FailsafeKind::LowActivity => {
                if self.state == TurnState::Recording {
                    warn!("No clear speech for a while, stopping recording");
                    let speech = self.vad.speech_duration();
                    self.finish_recording(speech).await?;
                }
            }
            FailsafeKind::Assessment => {
                let waited = self
                    .failsafes
                    .delay(FailsafeKind::Assessment)
                    .unwrap_or_default();
                warn!("No assessment after {:?}, giving up", waited);
                return Err(EngineError::AssessmentTimeout(waited));
            }
            FailsafeKind::ErrorRearm => {
                if self.state == TurnState::AiSpeaking || self.state.is_terminal() {
                    debug!("Not re-arming listening in {}", self.state);
                } else {
                    info!("Re-arming listening after server error");
                    self.enter_listening();
                }
            }
            FailsafeKind::TimeLimit => {
                info!("Interview time limit reached");
                self.emit(EngineEvent::Status("Time limit reached".to_string()));
                return self.begin_end().await;
            }
        }

        Ok(Flow::Continue)
    }

    fn on_server_error(&mut self, message: String) {
        error!("Server error: {}", message);
        self.emit(EngineEvent::Error(message));

        if self.recorder.is_active() {
            self.recorder.cancel();
        }
        self.recorder.on_stream_failed();
        self.failsafes.disarm_recording();
        self.disarm_vad();
        self.dedup.finish();

        if self.state == TurnState::Recording {
            self.set_state(TurnState::Listening);
        }

        if self.ending || self.session.conversation_id.is_none() {
            return;
        }
        self.failsafes.arm(FailsafeKind::ErrorRearm);
    }

    async fn start_recording(&mut self) -> Result<(), EngineError> {
        let Some(conversation_id) = self.session.conversation_id.clone() else {
            warn!("Speech detected before a conversation exists, ignoring");
            self.vad.reset();
            return Ok(());
        };

        let pre_roll = self.capture.take_pre_roll();
        self.recorder.start(&conversation_id, pre_roll)?;
        self.flush_recorder().await?;

        self.failsafes.arm(FailsafeKind::MaxRecording);
        self.failsafes.arm(FailsafeKind::ForceStop);
        self.failsafes.arm(FailsafeKind::LowActivity);

        self.set_state(TurnState::Recording);
        Ok(())
    }

    /// Keep the recording if it held enough speech, otherwise discard it
    async fn finish_recording(&mut self, speech: Duration) -> Result<(), EngineError> {
        let minimum = self.vad.config().speech_min_duration();
        if speech >= minimum {
            return self.submit_recording().await;
        }

        self.failsafes.disarm_recording();
        self.recorder.cancel();
        self.vad.reset();
        self.stats.utterances_discarded += 1;

        info!(
            "Discarded recording: {:?} of speech, need {:?}",
            speech, minimum
        );
        self.emit(EngineEvent::RecordingDiscarded { speech });
        self.set_state(TurnState::Listening);
        Ok(())
    }

    async fn submit_recording(&mut self) -> Result<(), EngineError> {
        self.failsafes.disarm_recording();
        self.disarm_vad();

        let Some(utterance) = self.recorder.stop() else {
            self.enter_listening();
            return Ok(());
        };
        self.flush_recorder().await?;

        self.stats.utterances_sent += 1;
        let duration = utterance.duration();
        info!(
            "Utterance sent: {:.1}s ({})",
            duration.as_secs_f64(),
            utterance.mode()
        );
        if let Utterance::Streamed { chunks, .. } = &utterance {
            debug!("Streamed {} chunks", chunks);
        }

        self.emit(EngineEvent::UtteranceSent {
            mode: utterance.mode(),
            duration,
        });
        self.set_state(TurnState::Processing);
        Ok(())
    }

    async fn begin_end(&mut self) -> Result<Flow, EngineError> {
        if self.ending {
            debug!("Interview already ending");
            return Ok(Flow::Continue);
        }
        self.ending = true;
        self.silence_engine();

        let Some(conversation_id) = self.session.conversation_id.clone() else {
            info!("Interview ended before it started");
            self.set_state(TurnState::Ended);
            return Ok(Flow::Done);
        };

        self.send(ClientMessage::EndInterview { conversation_id })
            .await?;
        self.failsafes.arm(FailsafeKind::Assessment);
        self.set_state(TurnState::Ended);

        Ok(Flow::Continue)
    }

    /// Stop everything that listens or speaks
    fn silence_engine(&mut self) {
        if self.recorder.is_active() {
            self.recorder.cancel();
        }
        self.disarm_vad();
        self.failsafes.disarm_all();
        self.last_enqueued = None;
        if let Some(player) = &self.player {
            if let Err(e) = player.stop() {
                debug!("Playback already stopped: {:#}", e);
            }
        }
    }

    /// Play interviewer audio; with nothing to play, go straight to listening
    fn speak(&mut self, audio: &str, format: &str) {
        self.disarm_vad();

        let bytes = if audio.is_empty() {
            Vec::new()
        } else {
            base64::engine::general_purpose::STANDARD
                .decode(audio)
                .unwrap_or_else(|e| {
                    warn!("Undecodable interviewer audio: {}", e);
                    Vec::new()
                })
        };

        if bytes.is_empty() {
            self.dedup.finish();
            self.enter_listening();
            return;
        }

        let enqueued = match self.player.as_mut() {
            Some(player) => player.enqueue(bytes, format),
            None => Err(anyhow::anyhow!("Playback not running")),
        };

        match enqueued {
            Ok(id) => {
                self.last_enqueued = Some(id);
                self.set_state(TurnState::AiSpeaking);
            }
            Err(e) => {
                warn!("Failed to queue interviewer audio: {:#}", e);
                self.stats.playback_failures += 1;
                self.dedup.finish();
                self.enter_listening();
            }
        }
    }

    fn enter_listening(&mut self) {
        // Drop anything captured while the interviewer was speaking
        self.capture.clear();
        self.vad.reset();
        self.vad_armed = true;
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.reset();
        }
        self.set_state(TurnState::Listening);
    }

    fn disarm_vad(&mut self) {
        self.vad_armed = false;
        self.vad.reset();
    }

    async fn flush_recorder(&mut self) -> Result<(), EngineError> {
        for message in self.recorder.drain_outbox() {
            self.send(message).await?;
        }
        Ok(())
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), EngineError> {
        debug!("Sending {}", message.kind());
        self.transport
            .send(message)
            .await
            .map_err(|e| EngineError::Transport(format!("{:#}", e)))
    }

    fn set_state(&mut self, to: TurnState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("State changed: {} -> {} ({})", from, to, self.session.label());
        self.state = to;
        self.emit(EngineEvent::StateChanged { from, to });
    }

    fn record_transcript(&mut self, speaker: Speaker, text: String) {
        self.transcript.push(TranscriptEntry {
            speaker,
            text: text.clone(),
            timestamp: chrono::Utc::now(),
        });
        self.emit(EngineEvent::Transcript { speaker, text });
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    async fn shutdown(&mut self) {
        self.failsafes.disarm_all();
        self.vad_armed = false;
        self.ticker = None;
        if self.recorder.is_active() {
            self.recorder.cancel();
        }

        if let Some(mut player) = self.player.take() {
            player.shutdown().await;
        }
        self.playback_events = None;

        if let Err(e) = self.capture.stop().await {
            warn!("Failed to release capture: {:#}", e);
        }

        if let Err(e) = self.transport.close().await {
            warn!("Failed to close transport: {:#}", e);
        }
        self.inbound = None;

        debug!("Session resources released: {}", self.session.label());
    }
}

async fn next_transport_event(
    inbound: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> TransportEvent {
    let Some(rx) = inbound.as_mut() else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Some(event) => event,
        None => {
            *inbound = None;
            TransportEvent::Closed { reason: None }
        }
    }
}

async fn next_playback_event(
    events: &mut Option<mpsc::UnboundedReceiver<PlaybackEvent>>,
) -> PlaybackEvent {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Some(event) => event,
        None => {
            *events = None;
            std::future::pending().await
        }
    }
}

async fn next_command(
    commands: &mut Option<mpsc::UnboundedReceiver<ControlCommand>>,
) -> Option<ControlCommand> {
    match commands.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
