//! Background auto-read loop over the notification backlog.
//!
//! Each tick polls the store for unspoken records and feeds them through the
//! speech session in file order, pausing between records so consecutive
//! notifications stay distinguishable. Cancellation and stop are observed at
//! record boundaries: a just-begun record is never marked spoken if
//! interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::catalog::VoiceCatalog;
use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::session::{SpeakOutcome, SpeechSession};
use crate::store::NotificationStore;

/// Bound on how long `stop` waits for the loop before aborting it.
pub const STOP_WAIT: Duration = Duration::from_secs(2);

/// How a spoken record announces its origin.
pub fn spoken_prefix(source: Option<&str>) -> &'static str {
    match source {
        Some(s) if s.starts_with("log:") => "Log update: ",
        Some("email") => "Email: ",
        _ => "Notification: ",
    }
}

pub struct AutoReadScheduler {
    store: Arc<NotificationStore>,
    session: Arc<SpeechSession>,
    catalog: Arc<VoiceCatalog>,
    speech: SpeechConfig,
    pause: Duration,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AutoReadScheduler {
    pub fn new(
        store: Arc<NotificationStore>,
        session: Arc<SpeechSession>,
        catalog: Arc<VoiceCatalog>,
        speech: SpeechConfig,
        pause_secs: u64,
    ) -> Self {
        Self {
            store,
            session,
            catalog,
            speech,
            pause: Duration::from_secs(pause_secs),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the polling loop. No-op if already running.
    pub fn start(&self, interval: Duration) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Auto-read already running");
            return;
        }
        info!("Auto-read enabled (checking every {}s)", interval.as_secs());

        let store = self.store.clone();
        let session = self.session.clone();
        let catalog = self.catalog.clone();
        let speech = self.speech.clone();
        let pause = self.pause;
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                if let Err(e) =
                    run_pass(&store, &session, &catalog, &speech, pause, &running).await
                {
                    match e {
                        SpeechError::StoreDecode => {
                            warn!("Backlog not decodable, no records this cycle")
                        }
                        e => warn!("Auto-read pass failed: {e}"),
                    }
                }
                sleep(interval).await;
            }
            debug!("Auto-read loop exited");
        });

        *self.task.lock().unwrap() = Some(handle);
    }

    /// Flip to stopped and wait (bounded) for the loop to observe the flag,
    /// aborting it past the deadline.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let handle = self.task.lock().unwrap().take();
        if let Some(mut handle) = handle {
            tokio::select! {
                _ = &mut handle => {}
                _ = sleep(STOP_WAIT) => {
                    warn!("Auto-read loop did not stop within {STOP_WAIT:?}, aborting");
                    handle.abort();
                }
            }
        }
        info!("Auto-read disabled");
    }

    /// Changing the interval while running is stop-then-start.
    pub async fn set_interval(&self, interval: Duration) {
        self.stop().await;
        self.start(interval);
    }
}

/// One tick: poll the backlog and speak every unspoken record in order.
async fn run_pass(
    store: &NotificationStore,
    session: &SpeechSession,
    catalog: &VoiceCatalog,
    speech: &SpeechConfig,
    pause: Duration,
    running: &AtomicBool,
) -> Result<()> {
    let records = store.poll_unspoken()?;
    if records.is_empty() {
        return Ok(());
    }
    debug!("{} unspoken notification(s)", records.len());

    let Some(voice) = catalog.selected() else {
        warn!("No voice available, skipping backlog pass");
        return Ok(());
    };
    let handle = session.handle();

    for record in records {
        if !running.load(Ordering::SeqCst) {
            debug!("Auto-read stopping before next record");
            break;
        }
        if handle.take_cancel() {
            debug!("Cancellation observed, ending backlog pass");
            break;
        }

        let text = format!(
            "{}{}",
            spoken_prefix(record.source.as_deref()),
            record.message
        );

        match session.speak(&text, &voice, speech).await {
            Ok(SpeakOutcome::Completed) => {
                if let Err(e) = store.mark_spoken(&record) {
                    warn!("Failed to mark notification spoken: {e}");
                }
            }
            Ok(SpeakOutcome::Cancelled) => {
                info!("Auto-read interrupted, leaving record unspoken");
                let _ = handle.take_cancel();
                break;
            }
            Ok(SpeakOutcome::Rejected) => {
                debug!("Speech slot busy, retrying backlog next tick");
                break;
            }
            // Record stays unmarked for retry on a later tick.
            Err(e) => warn!("Failed to speak notification: {e}"),
        }

        if running.load(Ordering::SeqCst) && !handle.cancel_requested() {
            sleep(pause).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches_source_kind() {
        assert_eq!(spoken_prefix(Some("log:build")), "Log update: ");
        assert_eq!(spoken_prefix(Some("email")), "Email: ");
        assert_eq!(spoken_prefix(Some("slack")), "Notification: ");
        assert_eq!(spoken_prefix(None), "Notification: ");
    }
}
