//! Process-wide state shared by every route and voice socket.

use std::sync::Arc;
use tracing::{info, warn};
use voxbridge_core::{
    AgentSocketProvider, ChatCompletionsProvider, ConversationContinuity, CoreResult, PhraseDenyList,
    PrimaryProvider, ResolverConfig, ResponseResolver, SecondaryProvider, SignedUrlClient, VoxConfig,
};
use voxbridge_voice::{
    HttpSynthesizer, HttpTranscriber, SessionRegistry, SilentSynthesizer, SpeechSynthesizer, Transcriber,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<VoxConfig>,
    pub resolver: Arc<ResponseResolver>,
    pub registry: SessionRegistry,
    pub signer: SignedUrlClient,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl AppState {
    /// Wire the live providers and speech backends described by `config`.
    pub fn from_config(config: VoxConfig) -> CoreResult<Self> {
        let continuity = Arc::new(ConversationContinuity::from_config(&config.continuity)?);
        let signer = SignedUrlClient::from_config(&config.primary);
        if !signer.is_configured() {
            warn!("primary agent not configured (AGENT_API_KEY / AGENT_ID); every turn will use the secondary provider");
        }
        let primary: Arc<dyn PrimaryProvider> = Arc::new(AgentSocketProvider::new(signer.clone()));
        let secondary: Arc<dyn SecondaryProvider> = Arc::new(ChatCompletionsProvider::from_config(&config.secondary));
        let resolver = ResponseResolver::new(continuity, primary, secondary)
            .with_config(ResolverConfig::from_config(&config))
            .with_engagement_check(Arc::new(PhraseDenyList::new(config.resolver.generic_phrases.clone())));

        let http_tts = HttpSynthesizer::from_config(&config.speech);
        let synthesizer: Arc<dyn SpeechSynthesizer> = if http_tts.is_configured() {
            Arc::new(http_tts)
        } else {
            warn!("speech.api_key not set; replies will not be spoken");
            Arc::new(SilentSynthesizer)
        };
        let transcriber: Arc<dyn Transcriber> = Arc::new(HttpTranscriber::from_config(&config.speech));

        info!(
            continuous = config.server.continuous,
            max_turns = config.continuity.max_turns,
            transcript_log = config.continuity.transcript_path.is_some(),
            "gateway state ready"
        );
        Ok(Self::new(config, Arc::new(resolver), transcriber, synthesizer))
    }

    pub fn new(
        config: VoxConfig,
        resolver: Arc<ResponseResolver>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            signer: SignedUrlClient::from_config(&config.primary),
            config: Arc::new(config),
            resolver,
            registry: SessionRegistry::new(),
            transcriber,
            synthesizer,
        }
    }

    pub fn continuity(&self) -> &Arc<ConversationContinuity> {
        self.resolver.continuity()
    }
}
