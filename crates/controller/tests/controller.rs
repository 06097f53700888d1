//! End-to-end controller behavior over a channel-backed notification source.

use std::io::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use chronologist::{Chronicle, ReleaseEvent, ReleaseSink, ReleaseType};
use controller::{Carrier, CarrierNotification, Controller, Options, WatchTarget};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Register(ReleaseEvent),
    Unregister(String, String),
}

/// A [`Chronicle`] that records calls; clones share the log.
#[derive(Default, Clone)]
struct RecordingChronicle {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_registers: bool,
}

impl RecordingChronicle {
    fn failing() -> Self {
        Self {
            fail_registers: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    fn register_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Register(_)))
            .count()
    }
}

#[async_trait]
impl Chronicle for RecordingChronicle {
    async fn register(&self, event: ReleaseEvent) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("call log poisoned")
            .push(Call::Register(event));
        if self.fail_registers {
            anyhow::bail!("annotation store unreachable");
        }
        Ok(())
    }

    async fn unregister(&self, name: &str, revision: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("call log poisoned")
            .push(Call::Unregister(name.to_owned(), revision.to_owned()));
        Ok(())
    }
}

#[derive(Default, Clone)]
struct RecordingSink {
    registered: Arc<Mutex<Vec<String>>>,
    unregistered: Arc<Mutex<Vec<String>>>,
}

impl ReleaseSink for RecordingSink {
    fn register_release(&self, key: &str, _event: &ReleaseEvent) {
        self.registered
            .lock()
            .expect("sink log poisoned")
            .push(key.to_owned());
    }

    fn unregister_release(&self, key: &str) {
        self.unregistered
            .lock()
            .expect("sink log poisoned")
            .push(key.to_owned());
    }
}

fn raw_release(name: &str, version: u64) -> String {
    let doc = serde_json::json!({
        "name": name,
        "namespace": "default",
        "version": version,
        "info": {
            "status": "DEPLOYED",
            "description": "Install complete",
            "last_deployed": "2019-01-02T15:04:05Z",
        },
    });
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&serde_json::to_vec(&doc).expect("serialize release"))
        .expect("gzip release");
    BASE64.encode(encoder.finish().expect("finish gzip stream"))
}

fn carrier(name: &str, release_data: &str) -> Carrier {
    Carrier {
        namespace: "default".to_owned(),
        name: name.to_owned(),
        created_at: Utc::now(),
        release_data: release_data.to_owned(),
    }
}

fn fast_options() -> Options {
    let mut options = Options::new(WatchTarget::ConfigMaps);
    options.retry_base_delay = Duration::from_millis(1);
    options.retry_max_delay = Duration::from_millis(10);
    options
}

fn start(
    chronicle: RecordingChronicle,
    sink: Option<RecordingSink>,
    options: Options,
) -> (
    mpsc::Sender<CarrierNotification>,
    CancellationToken,
    JoinHandle<anyhow::Result<()>>,
) {
    let (tx, rx) = mpsc::channel(16);
    let controller = Controller::new(
        Arc::new(chronicle),
        sink.map(|sink| Arc::new(sink) as Arc<dyn ReleaseSink>),
        options,
    );
    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let token = token.clone();
        async move { controller.run(rx, token).await }
    });
    (tx, token, handle)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn expected_event(name: &str, revision: &str) -> ReleaseEvent {
    ReleaseEvent {
        time: Utc.with_ymd_and_hms(2019, 1, 2, 15, 4, 5).unwrap(),
        kind: ReleaseType::Rollout,
        status: "DEPLOYED".to_owned(),
        name: name.to_owned(),
        revision: revision.to_owned(),
        namespace: "default".to_owned(),
    }
}

#[tokio::test]
async fn applied_carrier_registers_its_release_event() {
    let chronicle = RecordingChronicle::default();
    let (tx, token, handle) = start(chronicle.clone(), None, fast_options());

    tx.send(CarrierNotification::Applied(carrier("foo.v1", &raw_release("foo", 1))))
        .await
        .unwrap();
    tx.send(CarrierNotification::Synced).await.unwrap();

    wait_for(|| !chronicle.calls().is_empty()).await;
    assert_eq!(chronicle.calls(), vec![Call::Register(expected_event("foo", "1"))]);

    token.cancel();
    handle.await.expect("join").expect("run");
}

#[tokio::test]
async fn deleted_carrier_unregisters_its_release() {
    let chronicle = RecordingChronicle::default();
    let (tx, token, handle) = start(chronicle.clone(), None, fast_options());

    let foo = carrier("foo.v1", &raw_release("foo", 1));
    tx.send(CarrierNotification::Applied(foo.clone())).await.unwrap();
    tx.send(CarrierNotification::Synced).await.unwrap();
    wait_for(|| chronicle.register_count() == 1).await;

    tx.send(CarrierNotification::Deleted(foo)).await.unwrap();
    wait_for(|| {
        chronicle
            .calls()
            .contains(&Call::Unregister("foo".to_owned(), "1".to_owned()))
    })
    .await;

    token.cancel();
    handle.await.expect("join").expect("run");
}

#[tokio::test]
async fn reconciliation_waits_for_the_initial_sync() {
    let chronicle = RecordingChronicle::default();
    let (tx, token, handle) = start(chronicle.clone(), None, fast_options());

    tx.send(CarrierNotification::Applied(carrier("foo.v1", &raw_release("foo", 1))))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(chronicle.calls().is_empty());

    tx.send(CarrierNotification::Synced).await.unwrap();
    wait_for(|| chronicle.register_count() == 1).await;

    token.cancel();
    handle.await.expect("join").expect("run");
}

#[tokio::test]
async fn stale_carriers_are_never_reconciled() {
    let chronicle = RecordingChronicle::default();
    let mut options = fast_options();
    options.max_age = Duration::from_secs(3600);
    let (tx, token, handle) = start(chronicle.clone(), None, options);

    let mut old = carrier("old.v1", &raw_release("old", 1));
    old.created_at = Utc::now() - chrono::Duration::hours(2);
    tx.send(CarrierNotification::Applied(old)).await.unwrap();
    tx.send(CarrierNotification::Applied(carrier("foo.v1", &raw_release("foo", 1))))
        .await
        .unwrap();
    tx.send(CarrierNotification::Synced).await.unwrap();

    wait_for(|| chronicle.register_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(chronicle.calls(), vec![Call::Register(expected_event("foo", "1"))]);

    token.cancel();
    handle.await.expect("join").expect("run");
}

#[tokio::test]
async fn transient_failures_are_retried_up_to_the_ceiling() {
    let chronicle = RecordingChronicle::failing();
    let (tx, token, handle) = start(chronicle.clone(), None, fast_options());

    tx.send(CarrierNotification::Applied(carrier("foo.v1", &raw_release("foo", 1))))
        .await
        .unwrap();
    tx.send(CarrierNotification::Synced).await.unwrap();

    // One initial attempt plus five rate-limited retries, then give-up.
    wait_for(|| chronicle.register_count() == 6).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(chronicle.register_count(), 6);

    token.cancel();
    handle.await.expect("join").expect("run");
}

#[tokio::test]
async fn carriers_with_malformed_names_are_dropped() {
    let chronicle = RecordingChronicle::default();
    let (tx, token, handle) = start(chronicle.clone(), None, fast_options());

    tx.send(CarrierNotification::Applied(carrier("not-a-release-key", &raw_release("foo", 1))))
        .await
        .unwrap();
    tx.send(CarrierNotification::Applied(carrier("foo.v1", &raw_release("foo", 1))))
        .await
        .unwrap();
    tx.send(CarrierNotification::Synced).await.unwrap();

    wait_for(|| chronicle.register_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(chronicle.calls(), vec![Call::Register(expected_event("foo", "1"))]);

    token.cancel();
    handle.await.expect("join").expect("run");
}

#[tokio::test]
async fn undecodable_payloads_are_not_retried() {
    let chronicle = RecordingChronicle::default();
    let (tx, token, handle) = start(chronicle.clone(), None, fast_options());

    tx.send(CarrierNotification::Applied(carrier("bad.v1", "%%% not base64 %%%")))
        .await
        .unwrap();
    tx.send(CarrierNotification::Applied(carrier("foo.v1", &raw_release("foo", 1))))
        .await
        .unwrap();
    tx.send(CarrierNotification::Synced).await.unwrap();

    wait_for(|| chronicle.register_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(chronicle.calls(), vec![Call::Register(expected_event("foo", "1"))]);

    token.cancel();
    handle.await.expect("join").expect("run");
}

#[tokio::test]
async fn sink_observes_registration_and_unregistration() {
    let chronicle = RecordingChronicle::default();
    let sink = RecordingSink::default();
    let (tx, token, handle) = start(chronicle.clone(), Some(sink.clone()), fast_options());

    let foo = carrier("foo.v1", &raw_release("foo", 1));
    tx.send(CarrierNotification::Applied(foo.clone())).await.unwrap();
    tx.send(CarrierNotification::Synced).await.unwrap();
    wait_for(|| !sink.registered.lock().unwrap().is_empty()).await;
    assert_eq!(
        sink.registered.lock().unwrap().clone(),
        vec!["default/foo.v1".to_owned()]
    );

    tx.send(CarrierNotification::Deleted(foo)).await.unwrap();
    wait_for(|| !sink.unregistered.lock().unwrap().is_empty()).await;
    assert_eq!(
        sink.unregistered.lock().unwrap().clone(),
        vec!["default/foo.v1".to_owned()]
    );

    token.cancel();
    handle.await.expect("join").expect("run");
}
