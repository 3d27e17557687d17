//! Shared fakes for orchestrator tests: a scripted transfer engine, a recording
//! channel and an in-memory storage provider.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore, broadcast};

use crate::channel::RequesterChannel;
use crate::config::{Config, RetryConfig};
use crate::engine::{TransferEngine, TransferHandle, TransferStatus};
use crate::error::{EngineError, Error, Result};
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::storage::RemoteStorage;
use crate::types::{ChatRef, Descriptor, Event, JobId, MessageRef};

// Requester channel

/// An artifact returned through [`RecordingChannel::send_artifact`]
#[derive(Debug, Clone)]
pub(crate) struct SentArtifact {
    pub(crate) chat: ChatRef,
    pub(crate) file_name: String,
    pub(crate) contents: Vec<u8>,
}

/// Channel that records every call
pub(crate) struct RecordingChannel {
    next_message: AtomicI64,
    statuses: Mutex<Vec<(ChatRef, String)>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    artifacts: Mutex<Vec<SentArtifact>>,
    owner_notices: Mutex<Vec<String>>,
    limit: Option<u64>,
    fail_artifacts: AtomicBool,
    hold_artifacts: AtomicBool,
    artifact_started: Notify,
    artifact_gate: Semaphore,
    status_delay: Mutex<Duration>,
}

impl RecordingChannel {
    pub(crate) fn new() -> Self {
        Self {
            next_message: AtomicI64::new(100),
            statuses: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            artifacts: Mutex::new(Vec::new()),
            owner_notices: Mutex::new(Vec::new()),
            limit: None,
            fail_artifacts: AtomicBool::new(false),
            hold_artifacts: AtomicBool::new(false),
            artifact_started: Notify::new(),
            artifact_gate: Semaphore::new(0),
            status_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Channel whose artifacts may be at most `limit` bytes
    pub(crate) fn with_limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Make every status post and edit take `delay`
    pub(crate) fn slow_status(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = delay;
    }

    async fn status_latency(&self) {
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Make every `send_artifact` fail
    pub(crate) fn fail_artifacts(&self) {
        self.fail_artifacts.store(true, Ordering::SeqCst);
    }

    /// Make `send_artifact` block until [`release_artifacts`](Self::release_artifacts)
    pub(crate) fn hold_artifacts(&self) {
        self.hold_artifacts.store(true, Ordering::SeqCst);
    }

    /// Wait until a `send_artifact` call is in progress
    pub(crate) async fn artifact_started(&self) {
        self.artifact_started.notified().await;
    }

    /// Let one held `send_artifact` call finish
    pub(crate) fn release_artifacts(&self) {
        self.artifact_gate.add_permits(1);
    }

    pub(crate) fn statuses(&self) -> Vec<(ChatRef, String)> {
        self.statuses.lock().unwrap().clone()
    }

    pub(crate) fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    /// Every status text shown, posts and edits in order
    pub(crate) fn status_texts(&self) -> Vec<String> {
        let mut texts: Vec<String> = self.statuses().into_iter().map(|(_, t)| t).collect();
        texts.extend(self.edits().into_iter().map(|(_, t)| t));
        texts
    }

    pub(crate) fn artifacts(&self) -> Vec<SentArtifact> {
        self.artifacts.lock().unwrap().clone()
    }

    pub(crate) fn owner_notices(&self) -> Vec<String> {
        self.owner_notices.lock().unwrap().clone()
    }

    fn next_ref(&self, chat: ChatRef) -> MessageRef {
        MessageRef {
            chat,
            message_id: self.next_message.fetch_add(1, Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl RequesterChannel for RecordingChannel {
    async fn send_status(&self, chat: ChatRef, text: &str) -> Result<MessageRef> {
        self.status_latency().await;
        self.statuses.lock().unwrap().push((chat, text.to_string()));
        Ok(self.next_ref(chat))
    }

    async fn edit_status(&self, message: MessageRef, text: &str) -> Result<()> {
        self.status_latency().await;
        self.edits.lock().unwrap().push((message, text.to_string()));
        Ok(())
    }

    async fn send_artifact(&self, chat: ChatRef, path: &Path) -> Result<MessageRef> {
        if self.hold_artifacts.load(Ordering::SeqCst) {
            self.artifact_started.notify_one();
            self.artifact_gate.acquire().await.unwrap().forget();
        }
        if self.fail_artifacts.load(Ordering::SeqCst) {
            return Err(Error::Channel {
                method: "sendDocument".to_string(),
                description: "Bad Request: file rejected".to_string(),
            });
        }
        let contents = std::fs::read(path)?;
        self.artifacts.lock().unwrap().push(SentArtifact {
            chat,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            contents,
        });
        Ok(self.next_ref(chat))
    }

    async fn notify_owner(&self, text: &str) -> Result<()> {
        self.owner_notices.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn max_artifact_bytes(&self) -> Option<u64> {
        self.limit
    }
}

// Remote storage

/// Storage that records upload titles and returns `https://storage.test/<title>`
#[derive(Default)]
pub(crate) struct FakeStorage {
    uploads: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Storage whose uploads always fail
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStorage for FakeStorage {
    async fn upload(&self, path: &Path, title: &str) -> Result<String> {
        if self.fail {
            return Err(Error::RemoteStorage("quota exceeded".to_string()));
        }
        assert!(path.is_file(), "upload source must exist");
        self.uploads.lock().unwrap().push(title.to_string());
        Ok(format!("https://storage.test/{title}"))
    }

    fn name(&self) -> &'static str {
        "fake-storage"
    }
}

// Transfer engine

/// Content a finished transfer leaves on disk
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    File(Vec<u8>),
    Directory(Vec<(String, Vec<u8>)>),
}

/// Scripted behaviour of one transfer
///
/// Every `status` call is one tick. The fraction done is `tick / ticks_to_complete`,
/// and the payload is written to `<save_path>/<name>` on the completing tick.
#[derive(Debug, Clone)]
pub(crate) struct TransferPlan {
    name: String,
    payload: Payload,
    ticks_to_complete: u32,
    metadata_after: u32,
    resolves: bool,
    fail_at: Option<u32>,
}

impl Default for TransferPlan {
    fn default() -> Self {
        Self::completing_after(2)
    }
}

impl TransferPlan {
    pub(crate) fn completing_after(ticks: u32) -> Self {
        Self {
            name: "payload.bin".to_string(),
            payload: Payload::File(b"payload".to_vec()),
            ticks_to_complete: ticks.max(1),
            metadata_after: 0,
            resolves: true,
            fail_at: None,
        }
    }

    /// Transfer that never finishes
    pub(crate) fn never_completing() -> Self {
        Self::completing_after(u32::MAX)
    }

    /// Descriptor whose metadata never arrives
    pub(crate) fn never_resolving() -> Self {
        Self {
            resolves: false,
            ..Self::never_completing()
        }
    }

    /// Report metadata only after `polls` negative metadata checks
    pub(crate) fn metadata_after(mut self, polls: u32) -> Self {
        self.metadata_after = polls;
        self
    }

    /// Fail with an unrecoverable transfer error on tick `tick`
    pub(crate) fn failing_at(mut self, tick: u32) -> Self {
        self.fail_at = Some(tick);
        self
    }

    pub(crate) fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub(crate) fn with_file(mut self, contents: &[u8]) -> Self {
        self.payload = Payload::File(contents.to_vec());
        self
    }

    pub(crate) fn with_directory(mut self, files: &[(&str, &[u8])]) -> Self {
        self.payload = Payload::Directory(
            files
                .iter()
                .map(|(name, data)| (name.to_string(), data.to_vec()))
                .collect(),
        );
        self
    }
}

struct FakeHandle {
    key: String,
    plan: TransferPlan,
    save_path: PathBuf,
    metadata_checks: AtomicU32,
    ticks: AtomicU32,
}

impl FakeHandle {
    fn metadata_ready(&self) -> bool {
        self.plan.resolves && self.metadata_checks.load(Ordering::SeqCst) > self.plan.metadata_after
    }

    fn write_payload(&self) -> Result<()> {
        let target = self.save_path.join(&self.plan.name);
        match &self.plan.payload {
            Payload::File(contents) => {
                std::fs::create_dir_all(&self.save_path)?;
                std::fs::write(&target, contents)?;
            }
            Payload::Directory(files) => {
                for (name, contents) in files {
                    let path = target.join(name);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, contents)?;
                }
            }
        }
        let _ = std::fs::remove_file(self.partial_path());
        Ok(())
    }

    fn partial_path(&self) -> PathBuf {
        self.save_path.join(format!("{}.part", self.plan.name))
    }
}

#[async_trait]
impl TransferHandle for FakeHandle {
    fn key(&self) -> String {
        self.key.clone()
    }

    fn transfer_keys(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    async fn has_metadata(&self) -> Result<bool> {
        self.metadata_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.metadata_ready())
    }

    async fn name(&self) -> Result<String> {
        if !self.metadata_ready() {
            return Err(EngineError::MetadataUnavailable {
                key: self.key.clone(),
            }
            .into());
        }
        Ok(self.plan.name.clone())
    }

    async fn is_complete(&self) -> Result<bool> {
        Ok(self.ticks.load(Ordering::SeqCst) >= self.plan.ticks_to_complete)
    }

    async fn status(&self) -> Result<TransferStatus> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if self.plan.fail_at == Some(tick) {
            return Err(EngineError::TransferFailed {
                reason: "peer sent corrupt piece".to_string(),
            }
            .into());
        }
        if tick == 1 {
            std::fs::create_dir_all(&self.save_path)?;
            std::fs::write(self.partial_path(), b"partial")?;
        }
        if tick == self.plan.ticks_to_complete {
            self.write_payload()?;
        }
        Ok(TransferStatus {
            fraction_done: (tick as f64 / self.plan.ticks_to_complete as f64).min(1.0),
            download_rate: 1000 * tick as u64,
        })
    }
}

/// Engine that runs [`TransferPlan`]s instead of talking to peers
#[derive(Default)]
pub(crate) struct FakeEngine {
    plans: Mutex<Vec<(Descriptor, TransferPlan)>>,
    next_key: AtomicU32,
    added: Mutex<Vec<Descriptor>>,
    removed: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Script the transfer for `descriptor`; unscripted descriptors use the default plan
    pub(crate) fn plan(&self, descriptor: &Descriptor, plan: TransferPlan) {
        self.plans.lock().unwrap().push((descriptor.clone(), plan));
    }

    pub(crate) fn added(&self) -> Vec<Descriptor> {
        self.added.lock().unwrap().clone()
    }

    /// Keys of removed transfers, in removal order
    pub(crate) fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferEngine for FakeEngine {
    async fn add_transfer(
        &self,
        descriptor: &Descriptor,
        save_path: &Path,
    ) -> Result<Arc<dyn TransferHandle>> {
        let plan = self
            .plans
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(d, _)| d == descriptor)
            .map(|(_, plan)| plan.clone())
            .unwrap_or_default();
        self.added.lock().unwrap().push(descriptor.clone());
        let key = format!("fake-{}", self.next_key.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(Arc::new(FakeHandle {
            key,
            plan,
            save_path: save_path.to_path_buf(),
            metadata_checks: AtomicU32::new(0),
            ticks: AtomicU32::new(0),
        }))
    }

    async fn remove_transfer(&self, handle: &dyn TransferHandle) -> Result<()> {
        self.removed.lock().unwrap().extend(handle.transfer_keys());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// Orchestrator wiring

pub(crate) fn magnet(n: u32) -> Descriptor {
    Descriptor::Magnet(format!("magnet:?xt=urn:btih:{:040}&dn=item{}", n, n))
}

pub(crate) fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Test configuration rooted at `root`
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("downloads");
    config.download.lock_path = root.join("relay.lock");
    config.download.metadata_timeout = Some(Duration::from_secs(30));
    config.download.metadata_poll_interval = Duration::from_secs(1);
    config.download.progress_interval = Duration::from_secs(5);
    config.download.shutdown_timeout = Duration::from_secs(10);
    config.retry = fast_retry();
    config
}

/// Orchestrator over the given fakes; keep the returned tempdir alive
pub(crate) async fn create_test_orchestrator(
    engine: Arc<FakeEngine>,
    channel: Arc<RecordingChannel>,
    storage: Option<Arc<FakeStorage>>,
) -> (Orchestrator, TempDir) {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path());
    let parts = Collaborators {
        engine,
        channel,
        storage: storage.map(|s| s as Arc<dyn RemoteStorage>),
    };
    let orchestrator = Orchestrator::new(config, parts).await.unwrap();
    (orchestrator, temp)
}

/// Wait for the terminal event of job `id`
pub(crate) async fn wait_for_terminal(rx: &mut broadcast::Receiver<Event>, id: JobId) -> Event {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.job_id() == Some(id) && event.is_terminal() => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("job did not reach a terminal state")
}

/// Wait for the first event of job `id` matching `predicate`
pub(crate) async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<Event>,
    id: JobId,
    predicate: F,
) -> Event
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.job_id() == Some(id) && predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

/// Chat used by scenario tests
pub(crate) const REQUESTER: ChatRef = ChatRef(4242);

/// Poll `condition` until it holds; status text is applied by a separate task
pub(crate) async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was never met");
}
