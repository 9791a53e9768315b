//! In-process doubles for the capability seams, shared by unit tests,
//! integration tests and host-side previews.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use super::http::{HttpError, HttpRequest, HttpResponse, HttpResult, HttpTransport};
use super::kv::{KeyValueStore, KvError, KvKey, MemoryStore, StorageErrorCode};
use super::Capabilities;

/// One canned outcome for a single transport attempt.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond { status: u16, body: Vec<u8> },
    Fail(HttpError),
    /// Never completes; only a timeout or cancellation ends the attempt.
    Hang,
    Delayed(Duration, Box<Scripted>),
}

impl Scripted {
    pub fn json(value: &Value) -> Self {
        Self::Respond {
            status: 200,
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::Respond {
            status,
            body: Vec::new(),
        }
    }

    pub fn connection_error() -> Self {
        Self::Fail(HttpError::ConnectionError {
            host: "scripted".to_string(),
            message: "connection refused".to_string(),
        })
    }

    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub at: Instant,
}

/// Replays scripted outcomes in order, then falls back to `repeat` (or a
/// connection error) once the script runs dry. Every attempt is recorded.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
    }

    /// Outcome used for every attempt after the script is exhausted.
    pub fn repeat(&self, step: Scripted) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = Some(step);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_step(&self) -> Option<Scripted> {
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.or_else(|| {
            self.fallback
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> HttpResult {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                url: request.url().as_str().to_string(),
                at: Instant::now(),
            });

        let Some(mut step) = self.next_step() else {
            return Err(HttpError::ConnectionError {
                host: request.url().host().to_string(),
                message: "no scripted response left".to_string(),
            });
        };

        loop {
            match step {
                Scripted::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
                Scripted::Hang => return std::future::pending::<HttpResult>().await,
                Scripted::Fail(error) => return Err(error),
                Scripted::Respond { status, body } => {
                    return Ok(HttpResponse::new(
                        status,
                        body,
                        request.request_id().to_string(),
                        0,
                    ));
                }
            }
        }
    }
}

/// Wraps a store with injectable read/write failures and write latency.
#[derive(Debug)]
pub struct FailableStore<S: KeyValueStore> {
    inner: S,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    writes: AtomicUsize,
}

impl<S: KeyValueStore> FailableStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            write_delay: Mutex::new(None),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Successful writes that reached the inner store.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for FailableStore<S> {
    async fn get(&self, key: &KvKey) -> Result<Option<Value>, KvError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(KvError::storage(
                StorageErrorCode::Unavailable,
                "injected read failure",
            ));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &KvKey, value: Value) -> Result<(), KvError> {
        let delay = *self.write_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(KvError::storage(
                StorageErrorCode::IoError,
                "injected write failure",
            ));
        }
        self.inner.set(key, value).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Capabilities wired to doubles, with typed handles kept for assertions.
pub struct MockCapabilities {
    pub caps: Capabilities,
    pub http: Arc<ScriptedTransport>,
    pub kv: Arc<FailableStore<MemoryStore>>,
}

pub fn mock_capabilities() -> MockCapabilities {
    let http = Arc::new(ScriptedTransport::new());
    let kv = Arc::new(FailableStore::new(MemoryStore::new()));
    MockCapabilities {
        caps: Capabilities::new(http.clone(), kv.clone()),
        http,
        kv,
    }
}
