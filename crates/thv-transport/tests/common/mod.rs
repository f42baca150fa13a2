//! Fakes shared by the transport integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use thv_core::{
    ExitInfo, NetworkAttachment, RuntimeError, StdioAttachment, TransportState, WorkloadProcess,
    WorkloadRuntime,
};
use thv_transport::McpTransport;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

/// Process handle whose exit is triggered by the test.
pub struct FakeProcess {
    exit: watch::Sender<Option<ExitInfo>>,
    terminated: AtomicBool,
}

impl FakeProcess {
    pub fn new() -> Arc<Self> {
        let (exit, _) = watch::channel(None);
        Arc::new(Self {
            exit,
            terminated: AtomicBool::new(false),
        })
    }

    /// Make the process exit (first call wins).
    pub fn exit(&self, code: Option<i32>) {
        self.exit.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(ExitInfo::new(code));
            true
        });
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub async fn exited(&self) {
        let mut rx = self.exit.subscribe();
        let _ = rx.wait_for(Option::is_some).await;
    }
}

#[async_trait]
impl WorkloadProcess for FakeProcess {
    fn id(&self) -> String {
        "fake".to_string()
    }

    async fn wait(&self) -> Result<ExitInfo, RuntimeError> {
        let mut rx = self.exit.subscribe();
        let exit = *rx
            .wait_for(Option::is_some)
            .await
            .map_err(|e| RuntimeError::Wait(e.to_string()))?;
        Ok(exit.unwrap_or(ExitInfo::new(None)))
    }

    async fn terminate(&self) -> Result<(), RuntimeError> {
        self.terminated.store(true, Ordering::SeqCst);
        self.exit(None);
        Ok(())
    }

    async fn kill(&self) -> Result<(), RuntimeError> {
        self.exit(None);
        Ok(())
    }
}

/// Stdio workload that answers every request with its params.
///
/// Records every line written to its stdin. A verbatim runtime writes each
/// line back byte for byte instead, like `cat`.
pub struct EchoRuntime {
    pub process: Arc<FakeProcess>,
    received: Arc<Mutex<Vec<String>>>,
    attached: AtomicUsize,
    verbatim: bool,
}

impl EchoRuntime {
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    pub fn verbatim() -> Arc<Self> {
        Self::build(true)
    }

    fn build(verbatim: bool) -> Arc<Self> {
        Arc::new(Self {
            process: FakeProcess::new(),
            received: Arc::new(Mutex::new(Vec::new())),
            attached: AtomicUsize::new(0),
            verbatim,
        })
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn attach_count(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadRuntime for EchoRuntime {
    async fn attach_stdio(&self) -> Result<StdioAttachment, RuntimeError> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        let (stdin, backend_in) = tokio::io::duplex(64 * 1024);
        let (mut backend_out, stdout) = tokio::io::duplex(64 * 1024);
        let received = Arc::clone(&self.received);
        let process = Arc::clone(&self.process);
        let verbatim = self.verbatim;

        tokio::spawn(async move {
            let mut lines = BufReader::new(backend_in).lines();
            loop {
                let line = tokio::select! {
                    () = process.exited() => break,
                    line = lines.next_line() => line,
                };
                let Ok(Some(line)) = line else { break };
                received.lock().unwrap().push(line.clone());

                if verbatim {
                    let mut out = line.into_bytes();
                    out.push(b'\n');
                    if backend_out.write_all(&out).await.is_err() {
                        break;
                    }
                    continue;
                }

                let Ok(message) = serde_json::from_str::<serde_json::Value>(&line) else {
                    continue;
                };
                if message.get("method").is_none() {
                    continue;
                }
                let Some(id) = message.get("id") else { continue };
                let reply = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "echo": message.get("params") },
                });
                let mut out = reply.to_string().into_bytes();
                out.push(b'\n');
                if backend_out.write_all(&out).await.is_err() {
                    break;
                }
            }
            // Dropping the writer closes the workload's stdout.
        });

        Ok(StdioAttachment {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: None,
            process: self.process.clone(),
        })
    }

    async fn attach_network(&self) -> Result<NetworkAttachment, RuntimeError> {
        Err(RuntimeError::NotSupported("network attach"))
    }
}

/// Runtime for a workload that already serves HTTP.
#[derive(Default)]
pub struct NetworkRuntime {
    pub address: Option<(String, u16)>,
    pub process: Option<Arc<FakeProcess>>,
}

#[async_trait]
impl WorkloadRuntime for NetworkRuntime {
    async fn attach_stdio(&self) -> Result<StdioAttachment, RuntimeError> {
        Err(RuntimeError::NotSupported("stdio attach"))
    }

    async fn attach_network(&self) -> Result<NetworkAttachment, RuntimeError> {
        Ok(NetworkAttachment {
            address: self.address.clone(),
            process: self
                .process
                .clone()
                .map(|p| p as Arc<dyn WorkloadProcess>),
        })
    }
}

/// Minimal SSE reader over a streaming response.
pub struct SseReader {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buf: String,
}

/// One parsed event: `(event name, data)`.
pub type SseEvent = (String, String);

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            body: response.bytes_stream().boxed(),
            buf: String::new(),
        }
    }

    /// Next event with a data field; comments and keep-alives are skipped.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            while let Some(end) = self.buf.find("\n\n") {
                let block: String = self.buf.drain(..end + 2).collect();
                let mut name = "message".to_string();
                let mut data = Vec::new();
                for line in block.lines() {
                    if let Some(value) = line.strip_prefix("event:") {
                        name = value.trim_start().to_string();
                    } else if let Some(value) = line.strip_prefix("data:") {
                        data.push(value.trim_start().to_string());
                    }
                }
                if !data.is_empty() {
                    return Some((name, data.join("\n")));
                }
            }
            let chunk = self.body.next().await?.ok()?;
            self.buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Like [`Self::next_event`] but fails the test after `within`.
    pub async fn expect_event(&mut self, within: Duration) -> SseEvent {
        tokio::time::timeout(within, self.next_event())
            .await
            .expect("timed out waiting for an SSE event")
            .expect("SSE stream ended")
    }
}

/// Poll until the transport reaches `state`.
pub async fn wait_for_state(transport: &dyn McpTransport, state: TransportState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transport never reached the expected state");
}

/// Serve `router` on an ephemeral loopback port.
pub async fn serve(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
