//! Common test utilities for torrent-relay integration tests

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use torrent_relay::channel::RequesterChannel;
use torrent_relay::config::{DownloadConfig, TelegramConfig};
use torrent_relay::{ChatRef, Config, Event, JobId, MessageRef, Result};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Requester channel that keeps everything in memory
#[derive(Default)]
pub struct MemoryChannel {
    next_id: Mutex<i64>,
    statuses: Mutex<Vec<String>>,
    artifacts: Mutex<Vec<(String, Vec<u8>)>>,
    owner: Mutex<Vec<String>>,
}

impl MemoryChannel {
    pub fn status_texts(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn artifacts(&self) -> Vec<(String, Vec<u8>)> {
        self.artifacts.lock().unwrap().clone()
    }

    pub fn owner_notices(&self) -> Vec<String> {
        self.owner.lock().unwrap().clone()
    }

    fn next_message(&self, chat: ChatRef) -> MessageRef {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        MessageRef {
            chat,
            message_id: *id,
        }
    }
}

#[async_trait]
impl RequesterChannel for MemoryChannel {
    async fn send_status(&self, chat: ChatRef, text: &str) -> Result<MessageRef> {
        self.statuses.lock().unwrap().push(text.to_string());
        Ok(self.next_message(chat))
    }

    async fn edit_status(&self, _message: MessageRef, text: &str) -> Result<()> {
        self.statuses.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_artifact(&self, chat: ChatRef, path: &Path) -> Result<MessageRef> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let contents = tokio::fs::read(path).await?;
        self.artifacts.lock().unwrap().push((name, contents));
        Ok(self.next_message(chat))
    }

    async fn notify_owner(&self, text: &str) -> Result<()> {
        self.owner.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Configuration rooted in a temp dir, pointed at a mock aria2 endpoint, with fast polling
pub fn fast_config(root: &TempDir, rpc_url: String) -> Config {
    let mut config = Config {
        download: DownloadConfig {
            download_dir: root.path().join("downloads"),
            lock_path: root.path().join("relay.lock"),
            metadata_timeout: Some(Duration::from_secs(10)),
            metadata_poll_interval: Duration::from_millis(20),
            progress_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(5),
        },
        telegram: TelegramConfig {
            token: "1:t".to_string(),
            owner_id: 777,
            ..Default::default()
        },
        ..Default::default()
    };
    config.engine.rpc_url = rpc_url;
    config.engine.request_timeout = Duration::from_secs(5);
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.jitter = false;
    config
}

pub fn rpc_ok(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "1",
        "jsonrpc": "2.0",
        "result": result,
    }))
}

/// Answer `rpc_method` with `response`, at most `times` times when given
pub async fn mount_rpc(
    server: &MockServer,
    rpc_method: &str,
    response: ResponseTemplate,
    times: Option<u64>,
) {
    let mock = Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(response);
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

/// RPC method names of every request the mock aria2 received, in order
pub async fn rpc_methods(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["method"].as_str().unwrap_or_default().to_string()
        })
        .collect()
}

/// Wait for the terminal event of `id`
pub async fn wait_for_terminal(events: &mut broadcast::Receiver<Event>, id: JobId) -> Event {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.is_terminal() && event.job_id() == Some(id) {
                return event;
            }
        }
    })
    .await
    .expect("job did not finish in time")
}
