//! Integration test: a full TurnSession driven by pushed audio under paused time.
//!
//! ## Scenarios
//! 1. Speech followed by silence produces one turn and the expected event order.
//! 2. Continuous mode re-arms capture after playback.
//! 3. Stop while awaiting a transcript discards the late result.
//! 4. Permission failure is returned from `start()` and reported as an error event.
//! 5. A failed capture stream is reopened; with no retries left the session errors to idle.
//! 6. Captured frames are forwarded as PCM16 chunks until the utterance is dispatched.
//! 7. A transcription error idles the session; the next turn on it completes normally.
//! 8. Stop during playback cuts the sink short and drops the late completion.
//! 9. A newer session for the same id outlives the older one's teardown with its history intact.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use voxbridge_core::{
    AudioRef, ChatMessage, ConversationContinuity, PrimaryProvider, PrimaryReply, ProviderError, ProviderResult,
    ResponseResolver, ResponseSource, SecondaryProvider,
};
use voxbridge_voice::{
    AudioChannel, AudioChunkTransport, AudioSource, AudioStream, Mode, NullPlayback, PlaybackSink, PushAudioSource,
    RetryPolicy, SessionEvent, SessionRegistry, SpeechSynthesizer, StaticTranscriber, Transcriber, TurnConfig,
    TurnDeps, TurnSession, TurnSessionHandle, TurnState, Utterance, VoiceError, VoiceResult,
};

const FRAME: Duration = Duration::from_millis(20);

struct EchoPrimary;

#[async_trait]
impl PrimaryProvider for EchoPrimary {
    async fn converse(&self, text: &str, _conversation_id: Option<&str>) -> ProviderResult<PrimaryReply> {
        Ok(PrimaryReply {
            text: format!("you said: {}", text),
            audio: None,
            conversation_id: Some("conv-1".to_string()),
        })
    }
}

struct DownSecondary;

#[async_trait]
impl SecondaryProvider for DownSecondary {
    async fn chat(&self, _messages: &[ChatMessage]) -> ProviderResult<String> {
        Err(ProviderError::Transport("offline".into()))
    }
}

struct BeepSynthesizer;

#[async_trait]
impl SpeechSynthesizer for BeepSynthesizer {
    async fn synthesize(&self, _text: &str) -> VoiceResult<Option<AudioRef>> {
        Ok(Some(AudioRef::new(vec![0u8; 64], "audio/mpeg")))
    }
}

/// Holds every transcription until released.
struct GatedTranscriber {
    gate: Arc<Notify>,
}

#[async_trait]
impl Transcriber for GatedTranscriber {
    async fn transcribe(&self, _utterance: &Utterance) -> VoiceResult<String> {
        self.gate.notified().await;
        Ok("too late".to_string())
    }
}

/// Fails the first transcription, then hears "second try".
#[derive(Default)]
struct FlakyTranscriber {
    calls: AtomicUsize,
}

#[async_trait]
impl Transcriber for FlakyTranscriber {
    async fn transcribe(&self, _utterance: &Utterance) -> VoiceResult<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(VoiceError::Stt("STT API error 503".to_string()));
        }
        Ok("second try".to_string())
    }
}

/// Plays until released; counts stop calls.
#[derive(Default)]
struct HeldPlayback {
    release: Notify,
    stops: AtomicUsize,
}

#[async_trait]
impl PlaybackSink for HeldPlayback {
    async fn play(&self, _audio: &AudioRef) -> VoiceResult<()> {
        self.release.notified().await;
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct DeniedSource;

#[async_trait]
impl AudioSource for DeniedSource {
    async fn open(&self) -> VoiceResult<AudioStream> {
        Err(VoiceError::PermissionDenied("microphone blocked".to_string()))
    }
}

#[derive(Default)]
struct RecordingChannel {
    chunks: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl AudioChannel for RecordingChannel {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn deliver(&self, chunk: Vec<u8>) -> VoiceResult<()> {
        self.chunks.lock().unwrap().push(chunk);
        Ok(())
    }
}

fn resolver() -> Arc<ResponseResolver> {
    Arc::new(ResponseResolver::new(
        Arc::new(ConversationContinuity::new(10)),
        Arc::new(EchoPrimary),
        Arc::new(DownSecondary),
    ))
}

fn deps(source: Arc<dyn AudioSource>, transcriber: Arc<dyn Transcriber>) -> TurnDeps {
    TurnDeps {
        source,
        transcriber,
        resolver: resolver(),
        synthesizer: Arc::new(BeepSynthesizer),
        playback: Arc::new(NullPlayback),
        transport: None,
    }
}

fn config(continuous: bool) -> TurnConfig {
    TurnConfig {
        continuous,
        ..TurnConfig::default()
    }
}

/// 800ms of speech then 100ms of quiet, one frame every 20ms.
async fn speak(source: &PushAudioSource) {
    for _ in 0..40 {
        source.push(vec![0.5; 320]);
        tokio::time::sleep(FRAME).await;
    }
    for _ in 0..5 {
        source.push(vec![0.0; 320]);
        tokio::time::sleep(FRAME).await;
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("no event within 30s")
        .expect("event channel closed")
}

async fn wait_for_state(handle: &TurnSessionHandle, state: TurnState) {
    for _ in 0..100 {
        if handle.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached {:?}, stuck in {:?}", state, handle.state());
}

#[tokio::test(start_paused = true)]
async fn one_turn_runs_capture_to_playback() {
    let source = PushAudioSource::new(16_000);
    let deps = deps(Arc::new(source.clone()), Arc::new(StaticTranscriber::new("hello there")));
    let resolver = Arc::clone(&deps.resolver);
    let (handle, mut events) = TurnSession::spawn("s1", deps, config(false));

    handle.start().await.unwrap();
    assert_eq!(handle.state(), TurnState::Capturing);
    assert_eq!(next_event(&mut events).await, SessionEvent::Mode { mode: Mode::Listening });

    speak(&source).await;
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechDetected);
    assert_eq!(next_event(&mut events).await, SessionEvent::ProcessingAudio);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Transcript {
            text: "hello there".to_string(),
            is_final: true
        }
    );
    match next_event(&mut events).await {
        SessionEvent::TurnComplete {
            user_text,
            assistant_text,
            audio_ref,
            source,
            turn_index,
        } => {
            assert_eq!(user_text, "hello there");
            assert_eq!(assistant_text, "you said: hello there");
            assert!(audio_ref.is_some());
            assert_eq!(source, ResponseSource::Primary);
            assert_eq!(turn_index, 0);
        }
        other => panic!("expected turn_complete, got {:?}", other),
    }
    assert_eq!(next_event(&mut events).await, SessionEvent::Mode { mode: Mode::Speaking });

    wait_for_state(&handle, TurnState::Idle).await;
    let session = resolver.continuity().snapshot("s1").unwrap();
    assert_eq!(session.turns.len(), 1);
    assert_eq!(session.provider_conversation_id.as_deref(), Some("conv-1"));
}

#[tokio::test(start_paused = true)]
async fn continuous_mode_listens_again_after_playback() {
    let source = PushAudioSource::new(16_000);
    let (handle, mut events) = TurnSession::spawn(
        "s2",
        deps(Arc::new(source.clone()), Arc::new(StaticTranscriber::new("again"))),
        config(true),
    );
    handle.start().await.unwrap();
    speak(&source).await;

    let mut listening = 0;
    while listening < 2 {
        if next_event(&mut events).await == (SessionEvent::Mode { mode: Mode::Listening }) {
            listening += 1;
        }
    }
    assert_eq!(handle.state(), TurnState::Capturing);

    // A second start while capturing is a no-op.
    handle.start().await.unwrap();
    assert_eq!(handle.state(), TurnState::Capturing);
}

#[tokio::test(start_paused = true)]
async fn stop_discards_late_transcript() {
    let source = PushAudioSource::new(16_000);
    let gate = Arc::new(Notify::new());
    let deps = deps(
        Arc::new(source.clone()),
        Arc::new(GatedTranscriber { gate: Arc::clone(&gate) }),
    );
    let resolver = Arc::clone(&deps.resolver);
    let (handle, mut events) = TurnSession::spawn("s3", deps, config(true));

    handle.start().await.unwrap();
    speak(&source).await;
    while next_event(&mut events).await != SessionEvent::ProcessingAudio {}
    assert_eq!(handle.state(), TurnState::AwaitingResponse);

    let before = handle.generation();
    handle.stop();
    assert!(handle.generation() > before);
    wait_for_state(&handle, TurnState::Idle).await;

    gate.notify_one();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(events.try_recv().is_err());
    assert_eq!(handle.state(), TurnState::Idle);
    assert!(resolver.continuity().snapshot("s3").unwrap().turns.is_empty());
}

#[tokio::test(start_paused = true)]
async fn permission_denied_fails_start() {
    let (handle, mut events) = TurnSession::spawn(
        "s4",
        deps(Arc::new(DeniedSource), Arc::new(StaticTranscriber::new("unused"))),
        config(true),
    );
    let err = handle.start().await.unwrap_err();
    assert!(matches!(err, VoiceError::PermissionDenied(_)));
    assert!(matches!(next_event(&mut events).await, SessionEvent::Error { .. }));
    assert_eq!(handle.state(), TurnState::Idle);
}

#[tokio::test(start_paused = true)]
async fn failed_stream_is_reopened_until_retries_run_out() {
    let source = PushAudioSource::new(16_000);
    let (handle, _events) = TurnSession::spawn(
        "s5",
        deps(Arc::new(source.clone()), Arc::new(StaticTranscriber::new("x"))),
        config(false),
    );
    handle.start().await.unwrap();
    assert!(source.fail("unplugged"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(source.is_open());
    assert_eq!(handle.state(), TurnState::Capturing);

    let source = PushAudioSource::new(16_000);
    let mut no_retry = config(false);
    no_retry.retry = RetryPolicy::none();
    let (handle, mut events) = TurnSession::spawn(
        "s6",
        deps(Arc::new(source.clone()), Arc::new(StaticTranscriber::new("x"))),
        no_retry,
    );
    handle.start().await.unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::Mode { mode: Mode::Listening });
    source.fail("unplugged");
    match next_event(&mut events).await {
        SessionEvent::Error { reason } => assert!(reason.contains("unplugged")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(handle.state(), TurnState::Idle);
}

#[tokio::test(start_paused = true)]
async fn frames_are_forwarded_until_dispatch() {
    let source = PushAudioSource::new(16_000);
    let channel = Arc::new(RecordingChannel::default());
    let transport = Arc::new(AudioChunkTransport::with_channel(channel.clone()));
    let mut deps = deps(Arc::new(source.clone()), Arc::new(StaticTranscriber::new("")));
    deps.transport = Some(Arc::clone(&transport));
    let (handle, mut events) = TurnSession::spawn("s7", deps, config(false));

    handle.start().await.unwrap();
    speak(&source).await;
    while next_event(&mut events).await != SessionEvent::ProcessingAudio {}

    let chunks = channel.chunks.lock().unwrap().clone();
    assert_eq!(chunks.len(), 45);
    assert!(chunks.iter().all(|c| c.len() == 640));
    assert!(transport.is_stopped());

    // Empty transcript: nothing to answer, back to idle without a turn.
    wait_for_state(&handle, TurnState::Idle).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn failed_turn_does_not_block_the_next_one() {
    let source = PushAudioSource::new(16_000);
    let deps = deps(Arc::new(source.clone()), Arc::new(FlakyTranscriber::default()));
    let resolver = Arc::clone(&deps.resolver);
    let (handle, mut events) = TurnSession::spawn("s8", deps, config(false));

    handle.start().await.unwrap();
    speak(&source).await;
    loop {
        match next_event(&mut events).await {
            SessionEvent::Error { reason } => {
                assert!(reason.contains("503"));
                break;
            }
            SessionEvent::TurnComplete { .. } => panic!("failed turn must not complete"),
            _ => {}
        }
    }
    wait_for_state(&handle, TurnState::Idle).await;
    assert!(resolver.continuity().snapshot("s8").unwrap().turns.is_empty());

    handle.start().await.unwrap();
    speak(&source).await;
    loop {
        if let SessionEvent::TurnComplete { user_text, turn_index, .. } = next_event(&mut events).await {
            assert_eq!(user_text, "second try");
            assert_eq!(turn_index, 0);
            break;
        }
    }
    wait_for_state(&handle, TurnState::Idle).await;
    assert_eq!(resolver.continuity().snapshot("s8").unwrap().turns.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_while_playing_cuts_playback_short() {
    let source = PushAudioSource::new(16_000);
    let playback = Arc::new(HeldPlayback::default());
    let mut deps = deps(Arc::new(source.clone()), Arc::new(StaticTranscriber::new("hello")));
    deps.playback = playback.clone();
    let (handle, mut events) = TurnSession::spawn("s9", deps, config(true));

    handle.start().await.unwrap();
    speak(&source).await;
    while next_event(&mut events).await != (SessionEvent::Mode { mode: Mode::Speaking }) {}
    assert_eq!(handle.state(), TurnState::Playing);

    handle.stop();
    wait_for_state(&handle, TurnState::Idle).await;
    assert_eq!(playback.stops.load(Ordering::SeqCst), 1);

    // Completion arriving after the stop is ignored: no restart, no events.
    playback.release.notify_one();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.state(), TurnState::Idle);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn replaced_session_teardown_keeps_the_newer_conversation() {
    let registry = SessionRegistry::new();
    let resolver = resolver();

    let mut old_deps = deps(Arc::new(PushAudioSource::new(16_000)), Arc::new(StaticTranscriber::new("x")));
    old_deps.resolver = Arc::clone(&resolver);
    let (old, _old_events) = TurnSession::spawn("dup", old_deps, config(false));
    registry.insert(old.clone());

    let source = PushAudioSource::new(16_000);
    let mut new_deps = deps(Arc::new(source.clone()), Arc::new(StaticTranscriber::new("hello")));
    new_deps.resolver = Arc::clone(&resolver);
    let (new, mut events) = TurnSession::spawn("dup", new_deps, config(false));
    registry.insert(new.clone());
    assert_ne!(old.connection_id(), new.connection_id());

    new.start().await.unwrap();
    speak(&source).await;
    while !matches!(next_event(&mut events).await, SessionEvent::TurnComplete { .. }) {}
    wait_for_state(&new, TurnState::Idle).await;

    // The older connection closes after the takeover.
    assert!(!registry.release(&old));
    old.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!old.is_alive());
    drop(old);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(new.is_alive());
    assert_eq!(registry.get("dup").unwrap().connection_id(), new.connection_id());
    let session = resolver.continuity().snapshot("dup").unwrap();
    assert_eq!(session.turns.len(), 1);
    assert_eq!(session.provider_conversation_id.as_deref(), Some("conv-1"));

    assert!(registry.release(&new));
    assert!(registry.is_empty());
}
