//! **TurnSession**: one connection's turn-taking state machine.
//!
//! `Idle → Capturing → AwaitingResponse → Playing → Idle`, cycling for the life of the
//! connection. Each session runs as a single task that owns its capture stream and VAD,
//! so turns are strictly sequential. Transcription, resolution and playback run in
//! detached tasks; their results carry the turn generation that dispatched them and are
//! dropped if the session has since moved on.
//!
//! Each spawned session has its own connection id. A session attaches to its conversation
//! under that id, and only destroys the conversation on teardown while it is still attached.
//!
//! Upward notifications arrive as [`SessionEvent`]s on the receiver returned by [`TurnSession::spawn`].

use crate::audio::{AudioFrame, AudioSource, AudioStream, Utterance};
use crate::error::{VoiceError, VoiceResult};
use crate::events::{Mode, SessionEvent};
use crate::pcm;
use crate::retry::RetryPolicy;
use crate::stt::Transcriber;
use crate::transport::AudioChunkTransport;
use crate::vad::{AmplitudeVad, VadConfig, VadProfile, VadTransition};
use crate::voice_output::{PlaybackSink, SpeechSynthesizer};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxbridge_core::config::{VadSettings, VoxConfig};
use voxbridge_core::{AudioRef, Resolution, ResponseResolver, TurnGeneration, TurnOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Capturing,
    AwaitingResponse,
    Playing,
}

/// Collaborators a session drives.
#[derive(Clone)]
pub struct TurnDeps {
    pub source: Arc<dyn AudioSource>,
    pub transcriber: Arc<dyn Transcriber>,
    pub resolver: Arc<ResponseResolver>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub playback: Arc<dyn PlaybackSink>,
    /// Forwards every captured frame to a remote processor when set.
    pub transport: Option<Arc<AudioChunkTransport>>,
}

#[derive(Debug, Clone, Default)]
pub struct TurnConfig {
    pub vad: VadSettings,
    pub retry: RetryPolicy,
    /// Start capturing again after each completed turn.
    pub continuous: bool,
}

impl TurnConfig {
    pub fn from_config(config: &VoxConfig) -> Self {
        Self {
            vad: config.vad.clone(),
            retry: RetryPolicy::from_settings(&config.retry),
            continuous: config.server.continuous,
        }
    }
}

enum Command {
    Start {
        profile: VadProfile,
        reply: oneshot::Sender<VoiceResult<()>>,
    },
    Stop,
    Clear,
    Shutdown,
}

enum PipelineResult {
    NoSpeech,
    Stale,
    Reply {
        user_text: String,
        resolution: Resolution,
        audio: Option<AudioRef>,
    },
}

enum Internal {
    Transcribed { generation: u64, text: String },
    Resolved { generation: u64, result: VoiceResult<PipelineResult> },
    PlaybackDone { generation: u64, result: VoiceResult<()> },
    Reopen { generation: u64 },
}

struct Capture {
    stream: Option<AudioStream>,
    vad: AmplitudeVad,
    profile: VadProfile,
    chunks: Vec<Vec<u8>>,
    speech_started_at: Option<Instant>,
    sealed: Option<Utterance>,
    sample_rate: u32,
    failures: u32,
}

impl Capture {
    fn new(stream: AudioStream, config: &TurnConfig, profile: VadProfile) -> Self {
        Self {
            stream: Some(stream),
            vad: AmplitudeVad::new(VadConfig::from_settings(&config.vad, profile)),
            profile,
            chunks: Vec::new(),
            speech_started_at: None,
            sealed: None,
            sample_rate: 16_000,
            failures: 0,
        }
    }
}

/// Cloneable control surface for a running session.
#[derive(Clone)]
pub struct TurnSessionHandle {
    session_id: String,
    connection_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<TurnState>,
    generation: TurnGeneration,
}

impl TurnSessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Identity of the spawned session, distinct for every connection that reuses a session id.
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// Begin capturing with conversational turn-taking.
    pub async fn start(&self) -> VoiceResult<()> {
        self.start_with(VadProfile::Conversational).await
    }

    /// Begin capturing. A call while a turn is already active is a no-op.
    /// Device and permission failures are returned here.
    pub async fn start_with(&self, profile: VadProfile) -> VoiceResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start { profile, reply })
            .map_err(|_| VoiceError::ChannelUnavailable("turn session closed".to_string()))?;
        rx.await
            .map_err(|_| VoiceError::ChannelUnavailable("turn session closed".to_string()))?
    }

    /// Return to idle. Work already dispatched finishes but its result is discarded.
    pub fn stop(&self) {
        self.generation.advance();
        let _ = self.commands.send(Command::Stop);
    }

    /// Stop and forget this session's conversation history.
    pub fn clear(&self) {
        self.generation.advance();
        let _ = self.commands.send(Command::Clear);
    }

    /// End the session task now, even while other handles are alive.
    pub fn shutdown(&self) {
        self.generation.advance();
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Whether the session task is still running.
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }
}

pub struct TurnSession {
    session_id: String,
    connection_id: Uuid,
    deps: TurnDeps,
    config: TurnConfig,
    state: watch::Sender<TurnState>,
    generation: TurnGeneration,
    events: mpsc::UnboundedSender<SessionEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    capture: Option<Capture>,
    last_profile: VadProfile,
    /// Ordered hand-off to the chunk transport.
    forward: Option<mpsc::UnboundedSender<Vec<f32>>>,
}

impl TurnSession {
    /// Spawn the session task. It runs until every handle is dropped, then tears the
    /// conversation down.
    pub fn spawn(
        session_id: impl Into<String>,
        deps: TurnDeps,
        config: TurnConfig,
    ) -> (TurnSessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let session_id = session_id.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TurnState::Idle);
        let generation = TurnGeneration::new();
        let connection_id = Uuid::new_v4();

        deps.resolver.continuity().attach(&session_id, connection_id);
        let forward = deps.transport.as_ref().map(|transport| {
            let transport = Arc::clone(transport);
            let (tx, mut rx) = mpsc::unbounded_channel::<Vec<f32>>();
            tokio::spawn(async move {
                while let Some(samples) = rx.recv().await {
                    transport.send(&samples).await;
                }
            });
            tx
        });

        let session = TurnSession {
            session_id: session_id.clone(),
            connection_id,
            deps,
            config,
            state: state_tx,
            generation: generation.clone(),
            events: events_tx,
            internal: internal_tx,
            capture: None,
            last_profile: VadProfile::default(),
            forward,
        };
        tokio::spawn(session.run(commands_rx, internal_rx));

        let handle = TurnSessionHandle {
            session_id,
            connection_id,
            commands: commands_tx,
            state: state_rx,
            generation,
        };
        (handle, events_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        debug!(session_id = %self.session_id, connection_id = %self.connection_id, "turn session started");
        loop {
            let deadline = self.capture.as_ref().and_then(|c| c.vad.next_deadline());
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd).await,
                },
                Some(msg) = internal.recv() => self.on_internal(msg).await,
                item = next_frame(&mut self.capture) => self.on_stream_item(item),
                _ = sleep_until_opt(deadline) => self.on_deadline(),
            }
        }
        self.teardown();
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    fn set_state(&self, next: TurnState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(session_id = %self.session_id, from = ?prev, to = ?next, "turn state");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        if generation == self.generation.current() {
            return true;
        }
        debug!(session_id = %self.session_id, generation, "stale turn result discarded");
        false
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { profile, reply } => {
                let result = self.start_capture(profile).await;
                let _ = reply.send(result);
            }
            Command::Stop => self.go_idle("stopped"),
            Command::Clear => {
                self.go_idle("cleared");
                self.deps.resolver.continuity().reset(&self.session_id, self.connection_id);
            }
            Command::Shutdown => {}
        }
    }

    async fn start_capture(&mut self, profile: VadProfile) -> VoiceResult<()> {
        if self.state() != TurnState::Idle {
            warn!(session_id = %self.session_id, state = ?self.state(), "start() ignored: turn already active");
            return Ok(());
        }
        let stream = match self.deps.source.open().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "could not open audio source");
                self.emit(SessionEvent::Error { reason: e.to_string() });
                return Err(e);
            }
        };
        let generation = self.generation.advance();
        if let Some(transport) = &self.deps.transport {
            transport.resume();
        }
        self.last_profile = profile;
        self.capture = Some(Capture::new(stream, &self.config, profile));
        self.set_state(TurnState::Capturing);
        self.emit(SessionEvent::Mode { mode: Mode::Listening });
        info!(session_id = %self.session_id, generation, ?profile, "capture started");
        Ok(())
    }

    /// Drop capture and in-flight work and return to idle.
    fn go_idle(&mut self, reason: &str) {
        self.release_capture();
        if self.state() == TurnState::Playing {
            self.deps.playback.stop();
        }
        if self.state() != TurnState::Idle {
            info!(session_id = %self.session_id, reason, "turn session idle");
        }
        self.set_state(TurnState::Idle);
    }

    fn release_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.vad.stop();
        }
        if let Some(transport) = &self.deps.transport {
            transport.stop();
        }
    }

    fn fail(&mut self, error: VoiceError) {
        warn!(session_id = %self.session_id, error = %error, "turn failed");
        self.emit(SessionEvent::Error { reason: error.to_string() });
        self.generation.advance();
        self.go_idle("error");
    }

    fn on_stream_item(&mut self, item: Option<VoiceResult<AudioFrame>>) {
        match item {
            Some(Ok(frame)) => self.on_frame(frame),
            Some(Err(e)) => self.on_stream_failure(e),
            None => self.on_stream_failure(VoiceError::AudioStream("audio stream ended".to_string())),
        }
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        if let Some(forward) = &self.forward {
            let _ = forward.send(frame.samples.clone());
        }

        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        capture.sample_rate = frame.sample_rate;
        capture.failures = 0;
        let energy = pcm::energy(&frame.samples);
        let now = frame.captured_at;

        let mut transitions = Vec::new();
        if let Some(t) = capture.vad.sample(energy, now) {
            transitions.push(t);
        }
        if capture.vad.is_speaking() {
            if transitions.first() == Some(&VadTransition::SpeechStart) {
                capture.chunks.clear();
                capture.speech_started_at = Some(now);
            }
            capture.chunks.push(pcm::encode_pcm16_le(&frame.samples));
        }
        while let Some(t) = capture.vad.poll(now) {
            transitions.push(t);
        }
        for t in transitions {
            self.on_transition(t, now);
        }
    }

    fn on_deadline(&mut self) {
        let now = Instant::now();
        let mut transitions = Vec::new();
        if let Some(capture) = self.capture.as_mut() {
            while let Some(t) = capture.vad.poll(now) {
                transitions.push(t);
            }
        }
        for t in transitions {
            self.on_transition(t, now);
        }
    }

    fn on_transition(&mut self, transition: VadTransition, now: Instant) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        match transition {
            VadTransition::SpeechStart => {
                self.emit(SessionEvent::SpeechDetected);
            }
            VadTransition::SpeechEnd { speech_duration } => {
                let chunks = std::mem::take(&mut capture.chunks);
                debug!(session_id = %self.session_id, ?speech_duration, chunks = chunks.len(), "utterance sealed");
                capture.sealed = Some(Utterance {
                    started_at: capture.speech_started_at.take().unwrap_or(now),
                    ended_at: now,
                    recorded_at: Utc::now(),
                    chunks,
                    sample_rate: capture.sample_rate,
                });
            }
            VadTransition::NoiseSuppressed { speech_duration } => {
                debug!(session_id = %self.session_id, ?speech_duration, "noise burst discarded");
                capture.chunks.clear();
                capture.speech_started_at = None;
            }
            VadTransition::SilenceTimeout => {
                if let Some(utterance) = capture.sealed.take() {
                    self.dispatch(utterance);
                }
            }
        }
    }

    fn on_stream_failure(&mut self, error: VoiceError) {
        let generation = self.generation.current();
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        if let Some(utterance) = capture.sealed.take() {
            // Speech already ended; the missing settle delay does not matter.
            self.dispatch(utterance);
            return;
        }
        capture.stream = None;
        capture.failures += 1;
        match self.config.retry.backoff(capture.failures) {
            Some(delay) => {
                warn!(
                    session_id = %self.session_id,
                    error = %error,
                    attempt = capture.failures,
                    ?delay,
                    "capture stream failed; reopening"
                );
                let internal = self.internal.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = internal.send(Internal::Reopen { generation });
                });
            }
            None => self.fail(error),
        }
    }

    async fn reopen(&mut self) {
        let profile = match self.capture.as_ref() {
            Some(c) if c.stream.is_none() => c.profile,
            _ => return,
        };
        match self.deps.source.open().await {
            Ok(stream) => {
                info!(session_id = %self.session_id, "capture stream reopened");
                let failures = self.capture.as_ref().map_or(0, |c| c.failures);
                let mut capture = Capture::new(stream, &self.config, profile);
                capture.failures = failures;
                self.capture = Some(capture);
            }
            Err(e) => self.on_stream_failure(e),
        }
    }

    /// Seal capture and hand the utterance to transcription and resolution.
    fn dispatch(&mut self, utterance: Utterance) {
        self.release_capture();
        self.set_state(TurnState::AwaitingResponse);
        self.emit(SessionEvent::ProcessingAudio);

        let generation = self.generation.current();
        let guard = self.generation.guard();
        let session_id = self.session_id.clone();
        let deps = self.deps.clone();
        let internal = self.internal.clone();
        debug!(session_id = %session_id, generation, duration = ?utterance.duration(), "utterance dispatched");

        tokio::spawn(async move {
            let text = match deps.transcriber.transcribe(&utterance).await {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    let _ = internal.send(Internal::Resolved { generation, result: Err(e) });
                    return;
                }
            };
            drop(utterance);
            if text.is_empty() {
                let _ = internal.send(Internal::Resolved { generation, result: Ok(PipelineResult::NoSpeech) });
                return;
            }
            let _ = internal.send(Internal::Transcribed { generation, text: text.clone() });

            // Attach spoken audio before recording the turn.
            let mut candidate = deps.resolver.propose(&session_id, &text).await;
            if candidate.audio.is_none() && guard.is_current() {
                let spoken = deps.synthesizer.synthesize(&candidate.text).await;
                match spoken {
                    Ok(Some(audio)) => candidate = candidate.with_audio(audio),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "speech synthesis failed; reply will not be spoken")
                    }
                }
            }
            let result = match deps.resolver.commit(&session_id, &text, candidate, &guard) {
                TurnOutcome::Stale => PipelineResult::Stale,
                TurnOutcome::Resolved(resolution) => {
                    let audio = resolution.audio_ref.clone();
                    PipelineResult::Reply { user_text: text, resolution, audio }
                }
            };
            let _ = internal.send(Internal::Resolved { generation, result: Ok(result) });
        });
    }

    async fn on_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Transcribed { generation, text } => {
                if self.is_current(generation) {
                    self.emit(SessionEvent::Transcript { text, is_final: true });
                }
            }
            Internal::Resolved { generation, result } => {
                if !self.is_current(generation) {
                    return;
                }
                match result {
                    Err(e) => self.fail(e),
                    Ok(PipelineResult::Stale) => self.go_idle("stale"),
                    Ok(PipelineResult::NoSpeech) => {
                        debug!(session_id = %self.session_id, "empty transcript; nothing to answer");
                        self.finish_turn().await;
                    }
                    Ok(PipelineResult::Reply { user_text, resolution, audio }) => {
                        self.emit(SessionEvent::TurnComplete {
                            user_text,
                            assistant_text: resolution.text.clone(),
                            audio_ref: audio.clone(),
                            source: resolution.source,
                            turn_index: resolution.turn_index,
                        });
                        match audio {
                            Some(audio) => self.play(audio, generation),
                            None => self.finish_turn().await,
                        }
                    }
                }
            }
            Internal::PlaybackDone { generation, result } => {
                if !self.is_current(generation) {
                    return;
                }
                match result {
                    Ok(()) => self.finish_turn().await,
                    Err(e) => self.fail(e),
                }
            }
            Internal::Reopen { generation } => {
                if self.is_current(generation) {
                    self.reopen().await;
                }
            }
        }
    }

    fn play(&mut self, audio: AudioRef, generation: u64) {
        self.set_state(TurnState::Playing);
        self.emit(SessionEvent::Mode { mode: Mode::Speaking });
        let playback = Arc::clone(&self.deps.playback);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = playback.play(&audio).await;
            let _ = internal.send(Internal::PlaybackDone { generation, result });
        });
    }

    /// Back to idle, and straight into the next capture in continuous mode.
    async fn finish_turn(&mut self) {
        self.set_state(TurnState::Idle);
        if self.config.continuous {
            let _ = self.start_capture(self.last_profile).await;
        }
    }

    fn teardown(&mut self) {
        self.generation.advance();
        self.go_idle("connection closed");
        self.deps.resolver.continuity().detach(&self.session_id, self.connection_id);
        debug!(session_id = %self.session_id, connection_id = %self.connection_id, "turn session ended");
    }
}

async fn next_frame(capture: &mut Option<Capture>) -> Option<VoiceResult<AudioFrame>> {
    match capture.as_mut().and_then(|c| c.stream.as_mut()) {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
