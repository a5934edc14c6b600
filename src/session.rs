//! The unit of "currently speaking".
//!
//! Exactly one session may be active process-wide: a manual speak action and
//! the auto-read scheduler compete for the same audio device, so a second
//! request is rejected outright rather than queued. Cancellation is
//! cooperative: a shared flag checked at each busy-poll tick (cloud) and
//! around the non-preemptible blocking call (local).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backends::EngineDispatcher;
use crate::catalog::{VoiceBackend, VoiceDescriptor};
use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::playback::PlaybackController;

/// Cadence at which a cloud-backed session polls playback for completion.
pub const BUSY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Synthesizing,
    Playing,
    Cancelled,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Synthesizing => write!(f, "synthesizing"),
            Self::Playing => write!(f, "playing"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    Completed,
    Cancelled,
    /// Another session already holds the exclusion slot; nothing happened.
    Rejected,
}

/// Shared busy/cancel flags, modeled as an explicit handle instead of
/// free-floating process globals. Mutated only through atomics.
pub struct SessionHandle {
    busy: AtomicBool,
    cancel: AtomicBool,
    state: Mutex<SessionState>,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            state: Mutex::new(SessionState::Idle),
        }
    }

    fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) {
        self.set_state(SessionState::Idle);
        self.busy.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Read-and-clear, for observers that consume the request at a pass
    /// boundary.
    pub fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::SeqCst)
    }

    fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }
}

/// Releases the exclusion slot on every exit path, including task abort.
struct SlotGuard<'a> {
    handle: &'a SessionHandle,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.handle.release();
    }
}

/// Removes the temporary artifact on every exit path.
struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    fn new(ext: &str) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        let path = std::env::temp_dir().join(format!(
            "voice-inbox-{}-{stamp}.{ext}",
            std::process::id()
        ));
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub struct SpeechSession {
    handle: Arc<SessionHandle>,
    dispatcher: Arc<EngineDispatcher>,
    playback: Arc<PlaybackController>,
}

impl SpeechSession {
    pub fn new(dispatcher: Arc<EngineDispatcher>, playback: Arc<PlaybackController>) -> Self {
        Self {
            handle: Arc::new(SessionHandle::new()),
            dispatcher,
            playback,
        }
    }

    pub fn handle(&self) -> Arc<SessionHandle> {
        self.handle.clone()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    pub fn cancel_requested(&self) -> bool {
        self.handle.cancel_requested()
    }

    /// Request cancellation of the active utterance and silence any playback
    /// immediately.
    pub fn cancel(&self) {
        self.handle.request_cancel();
        self.playback.stop();
        info!("Speech cancellation requested");
    }

    /// Speak `text` with the given voice. Rejected immediately if a session
    /// is already active; otherwise runs to Completed, Cancelled, or an
    /// error, always releasing the exclusion slot.
    pub async fn speak(
        &self,
        text: &str,
        voice: &VoiceDescriptor,
        config: &SpeechConfig,
    ) -> Result<SpeakOutcome> {
        if !self.handle.try_acquire() {
            debug!("Speak rejected: a session is already active");
            return Ok(SpeakOutcome::Rejected);
        }
        let _slot = SlotGuard {
            handle: self.handle.as_ref(),
        };

        self.handle.clear_cancel();
        self.handle.set_state(SessionState::Synthesizing);

        let preview: String = text.chars().take(60).collect();
        info!("Speaking [{} voice {}]: {preview}", voice.backend, voice.id);

        let result = match voice.backend {
            VoiceBackend::Cloud => self.speak_cloud(text, voice, config).await,
            VoiceBackend::Local => self.speak_local(text, voice, config).await,
        };

        match &result {
            Ok(SpeakOutcome::Completed) => {
                self.handle.set_state(SessionState::Completed);
                info!("Speech completed");
            }
            Ok(SpeakOutcome::Cancelled) => {
                self.handle.set_state(SessionState::Cancelled);
                info!("Speech interrupted");
            }
            Ok(SpeakOutcome::Rejected) => {}
            Err(e) => {
                self.handle.set_state(SessionState::Failed);
                warn!("Speech failed: {e}");
            }
        }

        result
    }

    /// Cloud path: synthesize to a temporary artifact, play it through the
    /// controller, and poll busy-state until done or cancelled.
    async fn speak_cloud(
        &self,
        text: &str,
        voice: &VoiceDescriptor,
        config: &SpeechConfig,
    ) -> Result<SpeakOutcome> {
        let artifact = TempArtifact::new("mp3");
        self.dispatcher
            .synthesize_to_file(text, voice, config, artifact.path())
            .await?;

        if self.handle.cancel_requested() {
            return Ok(SpeakOutcome::Cancelled);
        }

        self.playback.load(artifact.path())?;
        self.playback.play();
        self.handle.set_state(SessionState::Playing);

        loop {
            tokio::time::sleep(BUSY_POLL).await;
            if self.handle.cancel_requested() {
                self.playback.stop();
                return Ok(SpeakOutcome::Cancelled);
            }
            if !self.playback.is_busy() {
                break;
            }
        }

        // Release the device slot before the artifact is removed.
        self.playback.stop();
        Ok(SpeakOutcome::Completed)
    }

    /// Local path: one blocking utterance that drives playback itself.
    /// Cancellation is best-effort: checked before the call, and again
    /// after it returns so an interrupted-in-intent utterance still reports
    /// Cancelled.
    async fn speak_local(
        &self,
        text: &str,
        voice: &VoiceDescriptor,
        config: &SpeechConfig,
    ) -> Result<SpeakOutcome> {
        if self.handle.cancel_requested() {
            return Ok(SpeakOutcome::Cancelled);
        }

        self.handle.set_state(SessionState::Playing);

        let dispatcher = self.dispatcher.clone();
        let text = text.to_string();
        let voice = voice.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || dispatcher.speak_blocking(&text, &voice, &config))
            .await
            .map_err(|e| SpeechError::SynthesisFailed(format!("utterance task failed: {e}")))??;

        if self.handle.cancel_requested() {
            return Ok(SpeakOutcome::Cancelled);
        }
        Ok(SpeakOutcome::Completed)
    }
}
