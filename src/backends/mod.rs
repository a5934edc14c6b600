//! Synthesis backend capability seams and the dispatcher that routes to them.
//!
//! The cloud and local synthesizers are opaque capabilities behind traits so
//! the orchestration layer never knows how audio gets made, only whether it
//! comes back as bytes (cloud) or as a self-driving blocking utterance
//! (local).

pub mod cloud;
pub mod local;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::{VoiceBackend, VoiceDescriptor};
use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};

/// Remote synthesis capability: text + voice id in, encoded audio bytes out.
#[async_trait]
pub trait CloudSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>>;

    /// (name, id) pairs this backend can speak with.
    fn voices(&self) -> Vec<(String, String)>;
}

/// Per-call tunables forwarded to the local synthesizer.
#[derive(Debug, Clone)]
pub struct UtteranceOptions {
    pub rate: i64,
    pub volume: f32,
    pub voice_id: Option<String>,
}

impl UtteranceOptions {
    pub fn from_config(config: &SpeechConfig, voice: &VoiceDescriptor) -> Self {
        // The placeholder voice has no real backend id to pass through.
        let voice_id = (voice.id != "default").then(|| voice.id.clone());
        Self {
            rate: config.rate,
            volume: config.volume,
            voice_id,
        }
    }
}

/// Local synthesis capability. `speak_blocking` drives the audio device
/// itself and returns only when the utterance has finished; it cannot be
/// interrupted mid-call.
pub trait LocalSynthesizer: Send + Sync {
    fn speak_blocking(&self, text: &str, opts: &UtteranceOptions) -> Result<()>;
    fn render_to_file(&self, text: &str, opts: &UtteranceOptions, out: &Path) -> Result<()>;
    fn list_voices(&self) -> Result<Vec<(String, String)>>;
}

/// Routes a synthesis request to the backend matching the voice descriptor.
pub struct EngineDispatcher {
    cloud: Option<Arc<dyn CloudSynthesizer>>,
    local: Option<Arc<dyn LocalSynthesizer>>,
}

impl EngineDispatcher {
    pub fn new(
        cloud: Option<Arc<dyn CloudSynthesizer>>,
        local: Option<Arc<dyn LocalSynthesizer>>,
    ) -> Self {
        Self { cloud, local }
    }

    pub fn local(&self) -> Option<Arc<dyn LocalSynthesizer>> {
        self.local.clone()
    }

    /// Render an audio artifact for the given voice at `out`.
    ///
    /// Used by the cloud speech path (temporary artifact) and by the explicit
    /// generate mode (persistent artifact).
    pub async fn synthesize_to_file(
        &self,
        text: &str,
        voice: &VoiceDescriptor,
        config: &SpeechConfig,
        out: &Path,
    ) -> Result<()> {
        match voice.backend {
            VoiceBackend::Cloud => {
                let cloud = self
                    .cloud
                    .clone()
                    .ok_or(SpeechError::BackendUnavailable("cloud"))?;
                let bytes = cloud.synthesize(text, &voice.id).await?;
                std::fs::write(out, bytes)?;
                Ok(())
            }
            VoiceBackend::Local => {
                let local = self
                    .local
                    .clone()
                    .ok_or(SpeechError::BackendUnavailable("local"))?;
                let opts = UtteranceOptions::from_config(config, voice);
                let text = text.to_string();
                let out = out.to_path_buf();
                tokio::task::spawn_blocking(move || local.render_to_file(&text, &opts, &out))
                    .await
                    .map_err(|e| SpeechError::SynthesisFailed(format!("render task failed: {e}")))?
            }
        }
    }

    /// Direct blocking utterance, local voices only. Call from a blocking
    /// task.
    pub fn speak_blocking(
        &self,
        text: &str,
        voice: &VoiceDescriptor,
        config: &SpeechConfig,
    ) -> Result<()> {
        match voice.backend {
            VoiceBackend::Local => {
                let local = self
                    .local
                    .as_ref()
                    .ok_or(SpeechError::BackendUnavailable("local"))?;
                let opts = UtteranceOptions::from_config(config, voice);
                local.speak_blocking(text, &opts)
            }
            VoiceBackend::Cloud => Err(SpeechError::SynthesisFailed(
                "cloud voices synthesize to an artifact, not a blocking utterance".into(),
            )),
        }
    }
}
