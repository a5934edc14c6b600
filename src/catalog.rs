//! Voice discovery and selection.
//!
//! Cloud voices always list first, then local voices. Local discovery can be
//! transiently flaky, so it retries under an injected policy; total failure
//! degrades to a single placeholder voice rather than an empty catalog.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backends::{CloudSynthesizer, LocalSynthesizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceBackend {
    Cloud,
    Local,
}

impl std::fmt::Display for VoiceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cloud => write!(f, "cloud"),
            Self::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceDescriptor {
    pub name: String,
    pub id: String,
    pub backend: VoiceBackend,
}

impl VoiceDescriptor {
    /// The voice handed out when no backend produced anything.
    pub fn placeholder() -> Self {
        Self {
            name: "Default Voice".into(),
            id: "default".into(),
            backend: VoiceBackend::Local,
        }
    }
}

/// Retry behavior for local voice discovery, injected so it can be tested
/// under a paused clock.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// What a `load` pass found.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub cloud_count: usize,
    pub local_count: usize,
    pub local_attempts: u32,
    pub fallback_used: bool,
}

pub struct VoiceCatalog {
    cloud: Option<Arc<dyn CloudSynthesizer>>,
    local: Option<Arc<dyn LocalSynthesizer>>,
    voices: RwLock<Arc<Vec<VoiceDescriptor>>>,
    selected: Mutex<Option<String>>,
}

impl VoiceCatalog {
    pub fn new(
        cloud: Option<Arc<dyn CloudSynthesizer>>,
        local: Option<Arc<dyn LocalSynthesizer>>,
    ) -> Self {
        Self {
            cloud,
            local,
            voices: RwLock::new(Arc::new(Vec::new())),
            selected: Mutex::new(None),
        }
    }

    /// Discover voices from both backends and atomically swap the active
    /// list. Readers never observe a half-updated catalog.
    pub async fn load(&self, policy: &RetryPolicy) -> LoadReport {
        let mut voices = Vec::new();
        let mut report = LoadReport::default();

        if let Some(cloud) = &self.cloud {
            for (name, id) in cloud.voices() {
                voices.push(VoiceDescriptor {
                    name,
                    id,
                    backend: VoiceBackend::Cloud,
                });
            }
            report.cloud_count = voices.len();
            info!("Loaded {} cloud voices", report.cloud_count);
        }

        if let Some(local) = &self.local {
            match self.discover_local(local.clone(), policy, &mut report).await {
                Some(local_voices) => {
                    report.local_count = local_voices.len();
                    voices.extend(local_voices);
                    info!("Loaded {} local voices", report.local_count);
                }
                None => warn!(
                    "Local voice discovery failed after {} attempt(s), skipping",
                    report.local_attempts
                ),
            }
        }

        if voices.is_empty() {
            warn!("No voices discovered from any backend, using fallback voice");
            voices.push(VoiceDescriptor::placeholder());
            report.fallback_used = true;
        }

        *self.voices.write().unwrap() = Arc::new(voices);
        report
    }

    async fn discover_local(
        &self,
        local: Arc<dyn LocalSynthesizer>,
        policy: &RetryPolicy,
        report: &mut LoadReport,
    ) -> Option<Vec<VoiceDescriptor>> {
        for attempt in 1..=policy.max_attempts.max(1) {
            report.local_attempts = attempt;

            let backend = local.clone();
            let result = tokio::task::spawn_blocking(move || backend.list_voices()).await;

            match result {
                Ok(Ok(pairs)) if !pairs.is_empty() => {
                    return Some(
                        pairs
                            .into_iter()
                            .map(|(name, id)| VoiceDescriptor {
                                name,
                                id,
                                backend: VoiceBackend::Local,
                            })
                            .collect(),
                    );
                }
                Ok(Ok(_)) => debug!("Local backend reported zero voices (attempt {attempt})"),
                Ok(Err(e)) => debug!("Local voice discovery attempt {attempt} failed: {e}"),
                Err(e) => debug!("Local voice discovery task failed: {e}"),
            }

            if attempt < policy.max_attempts {
                sleep(policy.delay).await;
            }
        }
        None
    }

    /// Re-run discovery, swapping the active list on completion.
    pub async fn refresh(&self, policy: &RetryPolicy) -> LoadReport {
        self.load(policy).await
    }

    /// Snapshot of the current catalog.
    pub fn voices(&self) -> Arc<Vec<VoiceDescriptor>> {
        self.voices.read().unwrap().clone()
    }

    /// Select by position in the listed order.
    pub fn select_index(&self, index: usize) -> Option<VoiceDescriptor> {
        let voice = self.voices().get(index).cloned()?;
        *self.selected.lock().unwrap() = Some(voice.id.clone());
        info!("Selected voice: {} [{}]", voice.name, voice.backend);
        Some(voice)
    }

    /// Select by voice id. Returns false (leaving the selection unchanged)
    /// if no listed voice has that id.
    pub fn select_id(&self, id: &str) -> bool {
        let found = self.voices().iter().any(|v| v.id == id);
        if found {
            *self.selected.lock().unwrap() = Some(id.to_string());
            info!("Selected voice id: {id}");
        } else {
            warn!("Voice id not in catalog: {id}");
        }
        found
    }

    /// The active voice: the selected id resolved against the current list,
    /// falling back to the first listed voice.
    pub fn selected(&self) -> Option<VoiceDescriptor> {
        let voices = self.voices();
        let selected = self.selected.lock().unwrap().clone();
        selected
            .and_then(|id| voices.iter().find(|v| v.id == id).cloned())
            .or_else(|| voices.first().cloned())
    }
}
