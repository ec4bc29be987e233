//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, Clock, FileSystemAccess, HttpClient, HttpRequest, HttpResponse, SecureStore,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Clock that only moves when told to. Starts at 2025-01-01T00:00:00Z.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

type Key = (String, Option<String>);

/// Secure store backed by a map, with switches for failure modes.
#[derive(Debug)]
pub struct MemorySecureStore {
    items: Mutex<HashMap<Key, String>>,
    operations: Mutex<Vec<String>>,
    available: AtomicBool,
    deny_access: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    deletes: AtomicUsize,
}

impl Default for MemorySecureStore {
    fn default() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            operations: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            deny_access: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            deletes: AtomicUsize::new(0),
        }
    }
}

fn key(service: &str, account: Option<&str>) -> Key {
    (service.to_string(), account.map(str::to_string))
}

fn label(service: &str, account: Option<&str>) -> String {
    match account {
        Some(account) => format!("{}/{}", service, account),
        None => service.to_string(),
    }
}

impl MemorySecureStore {
    pub fn insert(&self, service: &str, account: Option<&str>, value: &str) {
        self.items
            .lock()
            .unwrap()
            .insert(key(service, account), value.to_string());
    }

    pub fn get(&self, service: &str, account: Option<&str>) -> Option<String> {
        self.items.lock().unwrap().get(&key(service, account)).cloned()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn deny_access(&self, deny: bool) {
        self.deny_access.store(deny, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Mutations in call order, e.g. `"delete Codex Auth/cli|abc"`.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().unwrap().clone()
    }

    fn check_access(&self) -> BridgeResult<()> {
        if self.deny_access.load(Ordering::SeqCst) {
            return Err(BridgeError::AccessDenied("user denied keychain access".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get_secret(&self, service: &str, account: Option<&str>) -> BridgeResult<Option<String>> {
        self.check_access()?;
        Ok(self.get(service, account))
    }

    async fn set_secret(&self, service: &str, account: Option<&str>, value: &str) -> BridgeResult<()> {
        self.check_access()?;
        self.operations
            .lock()
            .unwrap()
            .push(format!("set {}", label(service, account)));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("keychain locked".into()));
        }
        self.insert(service, account, value);
        Ok(())
    }

    async fn delete_secret(&self, service: &str, account: Option<&str>) -> BridgeResult<()> {
        self.check_access()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.operations
            .lock()
            .unwrap()
            .push(format!("delete {}", label(service, account)));
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("delete rejected".into()));
        }
        self.items.lock().unwrap().remove(&key(service, account));
        Ok(())
    }
}

/// HTTP client that replays queued responses and records every request.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    responses: Mutex<VecDeque<BridgeResult<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call, to hold a request in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }));
        self
    }

    pub fn push_raw(&self, status: u16, body: &str) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }));
        self
    }

    pub fn push_error(&self, error: BridgeError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Body of the `index`-th request, parsed as JSON.
    pub fn request_json(&self, index: usize) -> serde_json::Value {
        let requests = self.requests.lock().unwrap();
        let body = requests[index].body.as_ref().expect("request had no body");
        serde_json::from_slice(body).unwrap()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BridgeError::Http("no scripted response".into())))
    }
}

/// File system where nothing exists and every write fails.
#[derive(Debug, Default)]
pub struct ReadOnlyFileSystem;

#[async_trait]
impl FileSystemAccess for ReadOnlyFileSystem {
    async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
        Ok(false)
    }

    async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
        Err(BridgeError::AccessDenied("read-only volume".into()))
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        Err(BridgeError::NotFound(path.display().to_string()))
    }

    async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
        Err(BridgeError::AccessDenied("read-only volume".into()))
    }

    async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
        Err(BridgeError::AccessDenied("read-only volume".into()))
    }
}

/// Environment map with both providers' client credentials set.
pub fn client_env() -> HashMap<String, String> {
    [
        ("CLAUDE_OAUTH_CLIENT_ID", "claude-id"),
        ("CLAUDE_OAUTH_CLIENT_SECRET", "claude-secret"),
        ("OPENAI_OAUTH_CLIENT_ID", "codex-id"),
        ("OPENAI_OAUTH_CLIENT_SECRET", "codex-secret"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
