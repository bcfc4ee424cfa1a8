//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use message_broker::backend::BackendClient;
use message_broker::config::BrokerConfig;
use message_broker::storage::StorageHandle;
use message_broker::workers::{CleanupService, ConsumerService};
use message_broker::{HttpServer, MessageBroker, Shutdown};

/// A request as the mock backend received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Handle to a running mock backend.
pub struct MockBackend {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

/// Start a programmable raw-TCP backend. `f` decides status and body for
/// each request; every request is recorded before `f` runs.
pub async fn start_programmable_backend<F, Fut>(addr: &str, f: F) -> MockBackend
where
    F: Fn(SeenRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let recorded = seen.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let Some((request, mut socket)) = read_request(socket).await else {
                            return;
                        };
                        recorded.lock().unwrap().push(request.clone());
                        let (status, body) = f(request).await;
                        let reason = axum::http::StatusCode::from_u16(status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");

                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            reason,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend { addr, seen }
}

async fn read_request(socket: TcpStream) -> Option<(SeenRequest, TcpStream)> {
    let mut reader = BufReader::new(socket);
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).await.ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok()?;
            }
        }
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await.ok()?;
    let request = SeenRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    Some((request, reader.into_inner()))
}

/// Config pointing at fresh staging directories and a given backend.
pub fn file_config(dir: &Path, backend_url: &str) -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.storage.directory = dir.join("staging");
    config.storage.quarantine_directory = dir.join("incorrect");
    config.storage.poll_fallback_ms = 200;
    config.backend.base_url = backend_url.to_string();
    config.backend.timeout_secs = 5;
    config.consumer.interval_ms = 50;
    config.broker.timeout_secs = 10;
    config
}

/// A broker wired the way the binary wires it, listening on an ephemeral port.
pub struct RunningBroker {
    pub addr: SocketAddr,
    pub broker: Arc<MessageBroker>,
    pub shutdown: Shutdown,
}

impl RunningBroker {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for RunningBroker {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn spawn_broker(config: &BrokerConfig, storage: StorageHandle, shutdown: Shutdown) -> RunningBroker {
    let broker = Arc::new(MessageBroker::new(&config.broker, storage.storage()));

    if let Some(file) = storage.file() {
        if config.consumer.enabled {
            let client = BackendClient::new(&config.backend).unwrap();
            let consumer = ConsumerService::new(file.clone(), client, &config.consumer);
            tokio::spawn(consumer.run(shutdown.subscribe()));
        }
        if config.janitor.enabled {
            let janitor = CleanupService::new(file.staging_dir(), &config.janitor);
            tokio::spawn(janitor.run(shutdown.subscribe()));
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(&config.listener, broker.clone());
    tokio::spawn(server.run(listener, shutdown.subscribe()));

    RunningBroker { addr, broker, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}

/// Poll `check` every 20ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
