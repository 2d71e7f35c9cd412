#![allow(dead_code)]

//! Shared fakes and harness plumbing for the integration tests: scripted
//! collaborators behind the engine seams, plus a wire harness that drives
//! the dispatcher over an in-memory duplex stream.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use tela_bridge::codec;
use tela_bridge::config::BridgeConfig;
use tela_bridge::daemon::DaemonError;
use tela_bridge::dispatch;
use tela_bridge::engine::{
    ChainQuery, ContentHost, EngineOptions, HeightStore, IndexerFactory, IndexerHandle,
};
use tela_bridge::protocol::{Event, Outbound};
use tela_bridge::state::BridgeState;
use tela_bridge::sync::SyncConfig;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Scripted daemon: pops the script, then repeats `fallback`.
pub struct FakeChain {
    script: Mutex<VecDeque<Result<i64, ()>>>,
    fallback: Mutex<Result<i64, ()>>,
}

impl FakeChain {
    pub fn always(height: i64) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(height)),
        })
    }

    pub fn scripted(steps: Vec<Result<i64, ()>>, fallback: Result<i64, ()>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            fallback: Mutex::new(fallback),
        })
    }
}

#[async_trait]
impl ChainQuery for FakeChain {
    async fn chain_height(&self, _node: &str) -> Result<i64, DaemonError> {
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.fallback.lock());
        step.map_err(|_| DaemonError::MissingHeight)
    }
}

pub enum StoreStep {
    Height(i64),
    Fail,
}

/// Scripted height store: pops the script, then repeats `fallback`.
pub struct FakeStore {
    script: Mutex<VecDeque<StoreStep>>,
    fallback: Mutex<i64>,
}

impl FakeStore {
    pub fn with_height(height: i64) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(height),
        })
    }

    pub fn scripted(steps: Vec<StoreStep>, fallback: i64) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            fallback: Mutex::new(fallback),
        })
    }

    pub fn set_fallback(&self, height: i64) {
        *self.fallback.lock() = height;
    }
}

impl HeightStore for FakeStore {
    fn last_indexed_height(&self) -> Result<i64, gnomon_index::StoreError> {
        match self.script.lock().pop_front() {
            Some(StoreStep::Height(height)) => Ok(height),
            Some(StoreStep::Fail) => Err(gnomon_index::StoreError::Io(std::io::Error::other(
                "scripted store failure",
            ))),
            None => Ok(*self.fallback.lock()),
        }
    }
}

#[derive(Default)]
pub struct FakeHandleState {
    pub started: AtomicBool,
    pub closed: AtomicBool,
}

struct FakeHandle(Arc<FakeHandleState>);

impl IndexerHandle for FakeHandle {
    fn start(&self, _poll_interval: Duration) {
        self.0.started.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

/// Records every engine it is asked to build.
#[derive(Default)]
pub struct FakeFactory {
    pub options: Mutex<Vec<EngineOptions>>,
    pub handles: Mutex<Vec<Arc<FakeHandleState>>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.options.lock().len()
    }
}

impl IndexerFactory for FakeFactory {
    fn create(&self, options: EngineOptions) -> Box<dyn IndexerHandle> {
        self.options.lock().push(options);
        let handle = Arc::new(FakeHandleState::default());
        self.handles.lock().push(Arc::clone(&handle));
        Box::new(FakeHandle(handle))
    }
}

/// Content host returning a fixed origin URL; counts serve calls.
pub struct FakeContent {
    pub url: Mutex<String>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub shutdowns: AtomicUsize,
}

impl FakeContent {
    pub fn with_url(url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            url: Mutex::new(url.into()),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            shutdowns: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ContentHost for FakeContent {
    async fn serve(&self, _scid: &str, _node: &str) -> Result<String, tela_serve::ContentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(tela_serve::ContentError::NoEntrypoint);
        }
        Ok(self.url.lock().clone())
    }

    fn set_allow_updates(&self, _allowed: bool) {}

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Millisecond-scale sync tuning so state transitions happen inside tests.
pub fn quick_sync_config() -> SyncConfig {
    SyncConfig {
        daemon_retry_interval: Duration::from_millis(10),
        unreachable_notice_after: 2,
        fast_poll_interval: Duration::from_millis(10),
        live_poll_interval: Duration::from_millis(20),
        catch_up_tolerance: 3,
        engine_poll_interval: Duration::from_millis(10),
        filters: vec!["telaVersion".to_string()],
    }
}

/// Sync tuning slow enough that no background tick fires mid-test.
pub fn idle_sync_config() -> SyncConfig {
    SyncConfig {
        daemon_retry_interval: Duration::from_secs(30),
        unreachable_notice_after: 2,
        fast_poll_interval: Duration::from_secs(30),
        live_poll_interval: Duration::from_secs(30),
        catch_up_tolerance: 3,
        engine_poll_interval: Duration::from_secs(30),
        filters: vec!["telaVersion".to_string()],
    }
}

pub struct Harness {
    pub state: BridgeState,
    pub chain: Arc<FakeChain>,
    pub store: Arc<FakeStore>,
    pub factory: Arc<FakeFactory>,
    pub content: Arc<FakeContent>,
    pub outbound: mpsc::Receiver<Outbound>,
}

pub fn harness(
    config: BridgeConfig,
    sync: SyncConfig,
    chain: Arc<FakeChain>,
    store: Arc<FakeStore>,
    content: Arc<FakeContent>,
) -> Harness {
    let factory = FakeFactory::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(256);
    let state = BridgeState::new(
        config,
        sync,
        factory.clone(),
        store.clone(),
        chain.clone(),
        content.clone(),
        outbound_tx,
    );
    Harness {
        state,
        chain,
        store,
        factory,
        content,
        outbound: outbound_rx,
    }
}

/// Config pointing the local-folder root somewhere that never exists, so
/// every resolution goes through the content host.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        tela_port: 0,
        gnomon_port: 0,
        scid_root: PathBuf::from("/nonexistent/tela-bridge-scids"),
        data_dir: PathBuf::from("/nonexistent/tela-bridge-data"),
    }
}

impl Harness {
    /// Next orchestrator event, skipping replies, within the test timeout.
    pub async fn next_event(&mut self) -> Event {
        loop {
            let message = tokio::time::timeout(TEST_TIMEOUT, self.outbound.recv())
                .await
                .expect("timed out waiting for event")
                .expect("outbound channel closed");
            match message {
                Outbound::Event(event) => return event,
                Outbound::Reply(_) => continue,
            }
        }
    }

    /// Assert the channel stays silent for `window`.
    pub async fn assert_no_events(&mut self, window: Duration) {
        tokio::time::sleep(window).await;
        if let Ok(message) = self.outbound.try_recv() {
            panic!("unexpected outbound message: {message:?}");
        }
    }
}

/// Dispatcher wired to an in-memory duplex stream, driven like the
/// extension would drive stdio.
pub struct Wire {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
}

pub fn spawn_dispatcher(state: BridgeState, outbound: mpsc::Receiver<Outbound>) -> Wire {
    let (client, server) = tokio::io::duplex(1 << 16);
    let (server_reader, server_writer) = tokio::io::split(server);
    tokio::spawn(dispatch::run(server_reader, server_writer, state, outbound));
    let (reader, writer) = tokio::io::split(client);
    Wire { reader, writer }
}

impl Wire {
    pub async fn send(&mut self, command: &Value) {
        let frame = codec::encode_frame(command).expect("encode command");
        self.writer.write_all(&frame).await.expect("write command");
    }

    /// Send raw bytes as a frame payload (for malformed-input tests).
    pub async fn send_raw(&mut self, payload: &[u8]) {
        let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(payload);
        self.writer.write_all(&frame).await.expect("write raw frame");
    }

    pub async fn recv(&mut self) -> Value {
        let payload = tokio::time::timeout(TEST_TIMEOUT, codec::read_frame(&mut self.reader))
            .await
            .expect("timed out waiting for frame")
            .expect("read frame")
            .expect("stream closed");
        serde_json::from_slice(&payload).expect("frame is json")
    }

    /// Close the command stream, as the browser does on shutdown.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
    }
}
