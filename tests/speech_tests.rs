//! Orchestration behavior: single-flight sessions, cooperative cancellation,
//! catalog fallback, auto-read prefixing, and the playback state machine.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::tempdir;

use voice_inbox_rs::backends::{
    CloudSynthesizer, EngineDispatcher, LocalSynthesizer, UtteranceOptions,
};
use voice_inbox_rs::catalog::{RetryPolicy, VoiceBackend, VoiceCatalog, VoiceDescriptor};
use voice_inbox_rs::config::SpeechConfig;
use voice_inbox_rs::error::SpeechError;
use voice_inbox_rs::playback::{AudioDevice, PlaybackController, PlaybackState};
use voice_inbox_rs::scheduler::AutoReadScheduler;
use voice_inbox_rs::session::{SpeakOutcome, SpeechSession};
use voice_inbox_rs::store::NotificationStore;

mockall::mock! {
    pub Local {}
    impl LocalSynthesizer for Local {
        fn speak_blocking(
            &self,
            text: &str,
            opts: &UtteranceOptions,
        ) -> voice_inbox_rs::error::Result<()>;
        fn render_to_file(
            &self,
            text: &str,
            opts: &UtteranceOptions,
            out: &Path,
        ) -> voice_inbox_rs::error::Result<()>;
        fn list_voices(&self) -> voice_inbox_rs::error::Result<Vec<(String, String)>>;
    }
}

mockall::mock! {
    pub Cloud {}
    #[async_trait::async_trait]
    impl CloudSynthesizer for Cloud {
        async fn synthesize(
            &self,
            text: &str,
            voice_id: &str,
        ) -> voice_inbox_rs::error::Result<Vec<u8>>;
        fn voices(&self) -> Vec<(String, String)>;
    }
}

/// No-hardware playback primitive: busy while "playing", silent otherwise.
#[derive(Default)]
struct FakeDevice {
    busy: AtomicBool,
}

impl AudioDevice for FakeDevice {
    fn load(&self, _path: &Path) -> voice_inbox_rs::error::Result<()> {
        Ok(())
    }
    fn play(&self) {
        self.busy.store(true, Ordering::SeqCst);
    }
    fn pause(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
    fn unpause(&self) {
        self.busy.store(true, Ordering::SeqCst);
    }
    fn stop(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
    fn rewind(&self) {}
    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

fn local_voice() -> VoiceDescriptor {
    VoiceDescriptor {
        name: "Test Voice".into(),
        id: "test".into(),
        backend: VoiceBackend::Local,
    }
}

fn session_with_local(local: MockLocal) -> Arc<SpeechSession> {
    let dispatcher = Arc::new(EngineDispatcher::new(None, Some(Arc::new(local))));
    let playback = Arc::new(PlaybackController::new(Arc::new(FakeDevice::default())));
    Arc::new(SpeechSession::new(dispatcher, playback))
}

// --- Playback state machine ---

#[test]
fn playback_transitions_and_out_of_state_no_ops() {
    let dir = tempdir().unwrap();
    let artifact = dir.path().join("clip.wav");
    std::fs::write(&artifact, b"fake audio").unwrap();

    let controller = PlaybackController::new(Arc::new(FakeDevice::default()));
    assert_eq!(controller.state(), PlaybackState::Idle);

    // Out-of-state operations report status instead of erroring.
    assert_eq!(controller.pause(), PlaybackState::Idle);
    assert_eq!(controller.play(), PlaybackState::Idle);
    assert_eq!(controller.rewind(), PlaybackState::Idle);

    let missing = controller.load(Path::new("/definitely/not/here.wav"));
    assert!(matches!(missing, Err(SpeechError::ArtifactMissing(_))));
    assert_eq!(controller.state(), PlaybackState::Idle);

    assert_eq!(controller.load(&artifact).unwrap(), PlaybackState::Loaded);
    assert_eq!(controller.play(), PlaybackState::Playing);
    assert!(controller.is_busy());

    // Loading is ignored while audio is in flight.
    assert_eq!(controller.load(&artifact).unwrap(), PlaybackState::Playing);

    assert_eq!(controller.pause(), PlaybackState::Paused);
    assert!(!controller.is_busy());
    assert_eq!(controller.rewind(), PlaybackState::Paused);
    assert_eq!(controller.unpause(), PlaybackState::Playing);
    assert_eq!(controller.stop(), PlaybackState::Stopped);

    // Replay after stop, then stop is a no-op once stopped.
    assert_eq!(controller.play(), PlaybackState::Playing);
    assert_eq!(controller.stop(), PlaybackState::Stopped);
    assert_eq!(controller.stop(), PlaybackState::Stopped);
}

// --- Voice catalog ---

#[tokio::test]
async fn catalog_falls_back_to_placeholder_voice() {
    // Scenario B: both backends yield nothing.
    let mut local = MockLocal::new();
    local
        .expect_list_voices()
        .times(3)
        .returning(|| Err(SpeechError::SynthesisFailed("engine offline".into())));

    let catalog = VoiceCatalog::new(None, Some(Arc::new(local)));
    let policy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(5),
    };

    let report = catalog.load(&policy).await;
    assert!(report.fallback_used);
    assert_eq!(report.local_attempts, 3);

    let voices = catalog.voices();
    assert_eq!(voices.len(), 1);
    assert_eq!(*voices, vec![VoiceDescriptor::placeholder()]);
    assert_eq!(catalog.selected().unwrap().id, "default");
}

#[tokio::test]
async fn catalog_lists_cloud_voices_first() {
    let mut cloud = MockCloud::new();
    cloud
        .expect_voices()
        .returning(|| vec![("Cloud English (US)".into(), "en".into())]);

    let mut local = MockLocal::new();
    local
        .expect_list_voices()
        .returning(|| Ok(vec![("Afrikaans".into(), "af".into())]));

    let catalog = VoiceCatalog::new(Some(Arc::new(cloud)), Some(Arc::new(local)));
    let report = catalog.load(&RetryPolicy::default()).await;

    assert_eq!(report.cloud_count, 1);
    assert_eq!(report.local_count, 1);
    assert!(!report.fallback_used);

    let voices = catalog.voices();
    assert_eq!(voices[0].backend, VoiceBackend::Cloud);
    assert_eq!(voices[1].backend, VoiceBackend::Local);

    assert!(catalog.select_id("af"));
    assert_eq!(catalog.selected().unwrap().id, "af");

    // An unknown id leaves the selection untouched.
    assert!(!catalog.select_id("nope"));
    assert_eq!(catalog.selected().unwrap().id, "af");

    assert_eq!(catalog.select_index(0).unwrap().id, "en");
    assert_eq!(catalog.selected().unwrap().backend, VoiceBackend::Cloud);
}

#[tokio::test]
async fn local_discovery_retries_until_success() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();

    let mut local = MockLocal::new();
    local.expect_list_voices().times(3).returning(move || {
        if seen.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(SpeechError::SynthesisFailed("transient init failure".into()))
        } else {
            Ok(vec![("Afrikaans".into(), "af".into())])
        }
    });

    let catalog = VoiceCatalog::new(None, Some(Arc::new(local)));
    let policy = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(5),
    };

    let report = catalog.load(&policy).await;
    assert_eq!(report.local_attempts, 3);
    assert!(!report.fallback_used);
    assert_eq!(catalog.voices().len(), 1);
}

// --- Speech session ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn speak_is_single_flight() {
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();

    let mut local = MockLocal::new();
    local.expect_speak_blocking().returning(move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        release_rx.recv().ok();
        Ok(())
    });

    let session = session_with_local(local);
    let config = SpeechConfig::default();
    let voice = local_voice();

    let first_task = {
        let session = session.clone();
        let voice = voice.clone();
        let config = config.clone();
        tokio::spawn(async move { session.speak("first", &voice, &config).await })
    };

    while !session.is_active() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = session.speak("second", &voice, &config).await.unwrap();
    assert_eq!(second, SpeakOutcome::Rejected);
    assert!(
        session.is_active(),
        "rejection must not disturb the active session"
    );

    release_tx.send(()).unwrap();
    let first = first_task.await.unwrap().unwrap();
    assert_eq!(first, SpeakOutcome::Completed);
    assert!(!session.is_active(), "exclusion slot released");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second speak never dispatched");
}

#[tokio::test]
async fn local_utterance_carries_speech_settings() {
    let mut local = MockLocal::new();
    local
        .expect_speak_blocking()
        .withf(|text, opts| {
            text == "hello"
                && opts.rate == 200
                && (opts.volume - 0.5).abs() < 1e-6
                && opts.voice_id.as_deref() == Some("test")
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let session = session_with_local(local);
    let config = SpeechConfig {
        rate: 200,
        volume: 0.5,
        voice: None,
    };

    let outcome = session
        .speak("hello", &local_voice(), &config)
        .await
        .unwrap();
    assert_eq!(outcome, SpeakOutcome::Completed);
}

#[tokio::test]
async fn cloud_speak_without_endpoint_fails_cleanly() {
    let session = session_with_local(MockLocal::new());
    let voice = VoiceDescriptor {
        name: "Cloud English (US)".into(),
        id: "en".into(),
        backend: VoiceBackend::Cloud,
    };

    let err = session
        .speak("hello", &voice, &SpeechConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SpeechError::BackendUnavailable("cloud")));
    assert!(
        !session.is_active(),
        "exclusion slot released after failure"
    );
}

// --- Auto-read scheduler ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_never_marks_inflight_record() {
    let dir = tempdir().unwrap();
    let store = Arc::new(NotificationStore::new(dir.path().join("queue.txt")));
    std::fs::write(
        store.path(),
        concat!(
            r#"{"timestamp":1,"message":"first","spoken":false}"#,
            "\n",
            r#"{"timestamp":2,"message":"second","spoken":false}"#,
            "\n",
        ),
    )
    .unwrap();

    let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();

    let mut local = MockLocal::new();
    local
        .expect_list_voices()
        .returning(|| Ok(vec![("Test Voice".into(), "test".into())]));
    local.expect_speak_blocking().returning(move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
        started_tx.send(()).ok();
        release_rx.recv().ok();
        Ok(())
    });

    let local: Arc<MockLocal> = Arc::new(local);
    let dispatcher = Arc::new(EngineDispatcher::new(None, Some(local.clone())));
    let playback = Arc::new(PlaybackController::new(Arc::new(FakeDevice::default())));
    let session = Arc::new(SpeechSession::new(dispatcher, playback));
    let catalog = Arc::new(VoiceCatalog::new(None, Some(local)));
    catalog
        .load(&RetryPolicy {
            max_attempts: 1,
            delay: Duration::from_millis(1),
        })
        .await;

    let scheduler = AutoReadScheduler::new(
        store.clone(),
        session.clone(),
        catalog,
        SpeechConfig::default(),
        0,
    );
    scheduler.start(Duration::from_secs(60));

    // The first record begins speaking...
    tokio::time::timeout(Duration::from_secs(5), started_rx.recv())
        .await
        .expect("utterance never started");

    // ...and the user interrupts mid-utterance.
    session.cancel();
    release_tx.send(()).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.stop().await;

    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "loop exited before starting another synthesis"
    );
    let unspoken = store.poll_unspoken().unwrap();
    assert_eq!(unspoken.len(), 2, "neither record was marked spoken");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn auto_read_prefixes_by_source_and_marks_spoken() {
    let dir = tempdir().unwrap();
    let store = Arc::new(NotificationStore::new(dir.path().join("queue.txt")));
    std::fs::write(
        store.path(),
        concat!(
            r#"{"timestamp":1,"message":"Hi","source":"email","spoken":false}"#,
            "\n",
            r#"{"timestamp":2,"message":"build ok","source":"log:build","spoken":false}"#,
            "\n",
            r#"{"timestamp":3,"message":"plain","spoken":false}"#,
            "\n",
        ),
    )
    .unwrap();

    let spoken = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = spoken.clone();

    let mut local = MockLocal::new();
    local
        .expect_list_voices()
        .returning(|| Ok(vec![("Test Voice".into(), "test".into())]));
    local
        .expect_speak_blocking()
        .times(3)
        .returning(move |text, _| {
            sink.lock().unwrap().push(text.to_string());
            Ok(())
        });

    let local: Arc<MockLocal> = Arc::new(local);
    let dispatcher = Arc::new(EngineDispatcher::new(None, Some(local.clone())));
    let playback = Arc::new(PlaybackController::new(Arc::new(FakeDevice::default())));
    let session = Arc::new(SpeechSession::new(dispatcher, playback));
    let catalog = Arc::new(VoiceCatalog::new(None, Some(local)));
    catalog
        .load(&RetryPolicy {
            max_attempts: 1,
            delay: Duration::from_millis(1),
        })
        .await;

    let scheduler = AutoReadScheduler::new(
        store.clone(),
        session,
        catalog,
        SpeechConfig::default(),
        0,
    );
    scheduler.start(Duration::from_secs(60));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if store.poll_unspoken().unwrap().is_empty() {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "records were never marked spoken"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    scheduler.stop().await;

    let spoken = spoken.lock().unwrap();
    assert_eq!(
        *spoken,
        vec![
            "Email: Hi".to_string(),
            "Log update: build ok".to_string(),
            "Notification: plain".to_string(),
        ]
    );
}

#[tokio::test]
async fn scheduler_start_is_idempotent_and_stop_is_bounded() {
    let dir = tempdir().unwrap();
    let store = Arc::new(NotificationStore::new(dir.path().join("queue.txt")));

    let mut local = MockLocal::new();
    local.expect_list_voices().returning(|| Ok(vec![]));
    let local: Arc<MockLocal> = Arc::new(local);

    let dispatcher = Arc::new(EngineDispatcher::new(None, Some(local.clone())));
    let playback = Arc::new(PlaybackController::new(Arc::new(FakeDevice::default())));
    let session = Arc::new(SpeechSession::new(dispatcher, playback));
    let catalog = Arc::new(VoiceCatalog::new(None, Some(local)));

    let scheduler = AutoReadScheduler::new(
        store,
        session,
        catalog,
        SpeechConfig::default(),
        0,
    );

    scheduler.start(Duration::from_secs(60));
    assert!(scheduler.is_running());
    scheduler.start(Duration::from_secs(60)); // no-op while running
    assert!(scheduler.is_running());

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    scheduler.stop().await; // no-op once stopped
}
