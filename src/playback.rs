//! Transport-style playback over a single audio output slot.
//!
//! The controller is a small state machine; the physical device sits behind
//! the `AudioDevice` trait so the machine can be exercised without hardware.
//! Operations invoked outside their valid source state are no-ops that
//! report the current state instead of erroring.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use tracing::{debug, warn};

use crate::error::{Result, SpeechError};

/// Playback primitive: one audio slot, one owner at a time.
pub trait AudioDevice: Send + Sync {
    fn load(&self, path: &Path) -> Result<()>;
    fn play(&self);
    fn pause(&self);
    fn unpause(&self);
    fn stop(&self);
    /// Restart the loaded artifact from position zero, preserving the
    /// current play/pause state.
    fn rewind(&self);
    fn is_busy(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loaded,
    Playing,
    Paused,
    Stopped,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loaded => write!(f, "loaded"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

struct Inner {
    state: PlaybackState,
    current: Option<PathBuf>,
}

pub struct PlaybackController {
    device: Arc<dyn AudioDevice>,
    inner: Mutex<Inner>,
}

impl PlaybackController {
    pub fn new(device: Arc<dyn AudioDevice>) -> Self {
        Self {
            device,
            inner: Mutex::new(Inner {
                state: PlaybackState::Idle,
                current: None,
            }),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().unwrap().state
    }

    pub fn current_artifact(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().current.clone()
    }

    /// Load an artifact into the slot. Valid while nothing is playing;
    /// fails with `ArtifactMissing` if the path does not exist.
    pub fn load(&self, path: &Path) -> Result<PlaybackState> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Idle | PlaybackState::Loaded | PlaybackState::Stopped => {
                if !path.exists() {
                    return Err(SpeechError::ArtifactMissing(path.to_path_buf()));
                }
                self.device.load(path)?;
                inner.state = PlaybackState::Loaded;
                inner.current = Some(path.to_path_buf());
                Ok(inner.state)
            }
            state => {
                debug!("load ignored while {state}");
                Ok(state)
            }
        }
    }

    pub fn play(&self) -> PlaybackState {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Loaded | PlaybackState::Stopped => {
                self.device.play();
                inner.state = PlaybackState::Playing;
            }
            state => debug!("play ignored while {state}"),
        }
        inner.state
    }

    pub fn pause(&self) -> PlaybackState {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Playing => {
                self.device.pause();
                inner.state = PlaybackState::Paused;
            }
            state => debug!("pause ignored while {state}"),
        }
        inner.state
    }

    pub fn unpause(&self) -> PlaybackState {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Paused => {
                self.device.unpause();
                inner.state = PlaybackState::Playing;
            }
            state => debug!("unpause ignored while {state}"),
        }
        inner.state
    }

    /// Release the device slot and reset position.
    pub fn stop(&self) -> PlaybackState {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Playing | PlaybackState::Paused => {
                self.device.stop();
                inner.state = PlaybackState::Stopped;
            }
            state => debug!("stop ignored while {state}"),
        }
        inner.state
    }

    /// Back to position zero, keeping the same play/pause state.
    pub fn rewind(&self) -> PlaybackState {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            PlaybackState::Playing | PlaybackState::Paused => self.device.rewind(),
            state => debug!("rewind ignored while {state}"),
        }
        inner.state
    }

    /// Whether audio is actively rendering. Polled by callers waiting for
    /// completion.
    pub fn is_busy(&self) -> bool {
        self.device.is_busy()
    }
}

// --- rodio-backed device ---

struct Slot {
    sink: Option<Sink>,
    path: Option<PathBuf>,
}

/// Production `AudioDevice` over a rodio output stream. Created once at
/// process start; dropping it releases the device.
pub struct RodioDevice {
    // Keeps the OS audio stream alive; the mixer hands out sinks.
    stream: OutputStream,
    slot: Mutex<Slot>,
}

impl RodioDevice {
    pub fn new() -> Result<Self> {
        let stream = OutputStreamBuilder::open_default_stream().map_err(|e| {
            SpeechError::SynthesisFailed(format!("failed to open audio output: {e}"))
        })?;
        Ok(Self {
            stream,
            slot: Mutex::new(Slot {
                sink: None,
                path: None,
            }),
        })
    }

    fn make_sink(&self, path: &Path, start_paused: bool) -> Result<Sink> {
        let file = File::open(path)?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| {
            SpeechError::SynthesisFailed(format!("failed to decode artifact: {e}"))
        })?;

        let sink = Sink::connect_new(self.stream.mixer());
        if start_paused {
            sink.pause();
        }
        sink.append(source);
        Ok(sink)
    }
}

impl AudioDevice for RodioDevice {
    fn load(&self, path: &Path) -> Result<()> {
        let sink = self.make_sink(path, true)?;
        let mut slot = self.slot.lock().unwrap();
        if let Some(old) = slot.sink.take() {
            old.stop();
        }
        slot.sink = Some(sink);
        slot.path = Some(path.to_path_buf());
        Ok(())
    }

    fn play(&self) {
        let mut slot = self.slot.lock().unwrap();
        match &slot.sink {
            Some(sink) if !sink.empty() => sink.play(),
            _ => {
                // Replay after stop: rebuild the sink from the loaded path.
                let Some(path) = slot.path.clone() else {
                    return;
                };
                match self.make_sink(&path, false) {
                    Ok(sink) => slot.sink = Some(sink),
                    Err(e) => warn!("Failed to restart playback: {e}"),
                }
            }
        }
    }

    fn pause(&self) {
        if let Some(sink) = &self.slot.lock().unwrap().sink {
            sink.pause();
        }
    }

    fn unpause(&self) {
        if let Some(sink) = &self.slot.lock().unwrap().sink {
            sink.play();
        }
    }

    fn stop(&self) {
        if let Some(sink) = self.slot.lock().unwrap().sink.take() {
            sink.stop();
        }
    }

    fn rewind(&self) {
        let mut slot = self.slot.lock().unwrap();
        let Some(path) = slot.path.clone() else {
            return;
        };
        let paused = slot.sink.as_ref().is_some_and(Sink::is_paused);
        match self.make_sink(&path, paused) {
            Ok(sink) => {
                if let Some(old) = slot.sink.take() {
                    old.stop();
                }
                slot.sink = Some(sink);
            }
            Err(e) => warn!("Failed to rewind: {e}"),
        }
    }

    fn is_busy(&self) -> bool {
        self.slot
            .lock()
            .unwrap()
            .sink
            .as_ref()
            .is_some_and(|sink| !sink.empty() && !sink.is_paused())
    }
}
