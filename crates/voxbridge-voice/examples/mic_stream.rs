//! Talk to the configured agent through the default microphone and speaker.
//!
//! ```sh
//! cargo run -p voxbridge-voice --example mic_stream --features device
//! ```
//!
//! Set `VOXBRIDGE_UPSTREAM=ws://host:3000/ws/voice` to also stream raw PCM16 chunks to a gateway.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voxbridge_core::{
    AgentSocketProvider, ChatCompletionsProvider, ConversationContinuity, PhraseDenyList, ResolverConfig,
    ResponseResolver, SignedUrlClient, VoxConfig,
};
use voxbridge_voice::{
    AudioChunkTransport, CpalSource, DevicePlayback, HttpSynthesizer, HttpTranscriber, SessionEvent, TurnConfig,
    TurnDeps, TurnSession, WsAudioChannel,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = VoxConfig::load()?;
    let continuity = Arc::new(ConversationContinuity::from_config(&config.continuity)?);
    let primary = Arc::new(AgentSocketProvider::new(SignedUrlClient::from_config(&config.primary)));
    let secondary = Arc::new(ChatCompletionsProvider::from_config(&config.secondary));
    let resolver = ResponseResolver::new(continuity, primary, secondary)
        .with_config(ResolverConfig::from_config(&config))
        .with_engagement_check(Arc::new(PhraseDenyList::new(config.resolver.generic_phrases.clone())));

    let transport = match std::env::var("VOXBRIDGE_UPSTREAM") {
        Ok(url) => {
            let (channel, mut upstream) = WsAudioChannel::connect(&url).await?;
            tokio::spawn(async move {
                while let Some(event) = upstream.recv().await {
                    info!(?event, "upstream");
                }
            });
            Some(Arc::new(AudioChunkTransport::with_channel(channel)))
        }
        Err(_) => None,
    };

    let deps = TurnDeps {
        source: Arc::new(CpalSource::default()),
        transcriber: Arc::new(HttpTranscriber::from_config(&config.speech)),
        resolver: Arc::new(resolver),
        synthesizer: Arc::new(HttpSynthesizer::from_config(&config.speech)),
        playback: Arc::new(DevicePlayback::new()),
        transport,
    };
    let (session, mut events) = TurnSession::spawn("local", deps, TurnConfig::from_config(&config));
    session.start().await?;
    info!("listening; press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(SessionEvent::Transcript { text, .. }) => info!(%text, "you"),
                Some(SessionEvent::TurnComplete { assistant_text, source, .. }) => {
                    info!(text = %assistant_text, ?source, "agent")
                }
                Some(SessionEvent::Error { reason }) => warn!(%reason, "session error"),
                Some(other) => info!(event = ?other),
                None => break,
            },
        }
    }
    session.stop();
    Ok(())
}
