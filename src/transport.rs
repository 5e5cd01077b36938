//! Serves docset content for virtual URLs as if it came over the network.
//!
//! A request resolves its docset, then races a fetch (file read, content
//! store lookup or search) against a deadline timer. Both sides complete
//! through [`PendingRequest::received_data`]; the first one wins and the
//! other is discarded.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    path::Path,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    sync::{Semaphore, oneshot},
    task::AbortHandle,
    time::Instant,
};

use crate::{
    docset::{DOCUMENTS_DIR, Docset},
    docset_url::DocsetUrl,
    error::{Error, Result},
    registry::DocsetRegistry,
    reranker::Reranker,
    search::{self, SearchParams},
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_TRACKED_IDENTIFIERS: usize = 256;

/// Results returned for a `?q=` request.
const SEARCH_LIMIT: usize = 50;
const JSON_MIME: &str = "application/json";

const DISPATCHED: u8 = 1;
const COMPLETED: u8 = 2;

/// Free-form details attached to a completion.
pub type UserInfo = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    /// Fetches allowed to run at once.
    pub workers: usize,
    /// Caller identifiers whose latest response is remembered. The least
    /// recently completed one is forgotten first.
    pub tracked_identifiers: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            workers: DEFAULT_WORKERS,
            tracked_identifiers: DEFAULT_TRACKED_IDENTIFIERS,
        }
    }
}

/// Payload of a delivered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: String,
    pub identifier: String,
    /// Resource path inside the docset.
    pub path: String,
    pub extension: Option<String>,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// How a request ended.
#[derive(Debug)]
pub enum Outcome {
    Delivered(Response),
    TimedOut,
    Failed(Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Delivered,
    TimedOut,
    Failed(String),
}

/// Metadata kept about the latest completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseInfo {
    pub identifier: String,
    pub url: String,
    pub mime_type: Option<String>,
    pub length: usize,
    pub status: ResponseStatus,
    pub user_info: UserInfo,
}

#[derive(Debug, Default)]
struct TrackedResponses {
    by_identifier: HashMap<String, ResponseInfo>,
    /// Identifiers from least to most recently completed.
    order: VecDeque<String>,
}

#[derive(Debug)]
struct ResponseLog {
    capacity: usize,
    tracked: Mutex<TrackedResponses>,
    last: Mutex<Option<ResponseInfo>>,
}

impl ResponseLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tracked: Mutex::new(TrackedResponses::default()),
            last: Mutex::new(None),
        }
    }

    fn record(&self, info: ResponseInfo) {
        {
            let mut tracked = lock(&self.tracked);
            let id = info.identifier.clone();
            if tracked.by_identifier.insert(id.clone(), info.clone()).is_some()
            {
                tracked.order.retain(|known| *known != id);
            } else if tracked.order.len() >= self.capacity
                && let Some(oldest) = tracked.order.pop_front()
            {
                tracked.by_identifier.remove(&oldest);
            }
            tracked.order.push_back(id);
        }
        *lock(&self.last) = Some(info);
    }

    fn get(&self, identifier: &str) -> Option<ResponseInfo> {
        lock(&self.tracked).by_identifier.get(identifier).cloned()
    }
}

/// Waits for the outcome of one request.
#[derive(Debug)]
pub struct RequestHandle {
    identifier: String,
    receiver: oneshot::Receiver<Outcome>,
}

impl RequestHandle {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub async fn outcome(self) -> Outcome {
        self.receiver.await.unwrap_or_else(|_| {
            Outcome::Failed(Error::Config("request was dropped".into()))
        })
    }
}

/// A dispatched request waiting for its fetch or its deadline.
#[derive(Debug)]
pub struct PendingRequest {
    url: String,
    identifier: String,
    docset: Docset,
    path: String,
    extension: Option<String>,
    mime_type: String,
    query: Option<String>,
    deadline: Instant,
    state: AtomicU8,
    completion: Mutex<Option<oneshot::Sender<Outcome>>>,
    timer: Mutex<Option<AbortHandle>>,
    log: Arc<ResponseLog>,
}

impl PendingRequest {
    pub fn docset(&self) -> &Docset {
        &self.docset
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETED
    }

    /// Complete the request with fetched `data`, or with a timeout.
    ///
    /// Only the first call has an effect. Returns whether this call
    /// completed the request.
    pub fn received_data(
        &self,
        data: Result<Vec<u8>>,
        user_info: UserInfo,
        is_timeout: bool,
    ) -> bool {
        if self
            .state
            .compare_exchange(
                DISPATCHED,
                COMPLETED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            if is_timeout {
                tracing::debug!(
                    identifier = %self.identifier,
                    "timer fired after completion"
                );
            } else {
                tracing::warn!(
                    identifier = %self.identifier,
                    url = %self.url,
                    "discarding data received after completion"
                );
            }
            return false;
        }

        if let Some(timer) = lock(&self.timer).take() {
            timer.abort();
        }

        let (outcome, status, length, mime_type) = if is_timeout {
            (Outcome::TimedOut, ResponseStatus::TimedOut, 0, None)
        } else {
            match data {
                Ok(data) => {
                    let length = data.len();
                    let response = Response {
                        url: self.url.clone(),
                        identifier: self.identifier.clone(),
                        path: self.path.clone(),
                        extension: self.extension.clone(),
                        mime_type: self.mime_type.clone(),
                        data,
                    };
                    (
                        Outcome::Delivered(response),
                        ResponseStatus::Delivered,
                        length,
                        Some(self.mime_type.clone()),
                    )
                }
                Err(e) => {
                    let status = ResponseStatus::Failed(e.to_string());
                    (Outcome::Failed(e), status, 0, None)
                }
            }
        };

        tracing::debug!(
            identifier = %self.identifier,
            url = %self.url,
            status = ?status,
            length,
            "request completed"
        );
        self.log.record(ResponseInfo {
            identifier: self.identifier.clone(),
            url: self.url.clone(),
            mime_type,
            length,
            status,
            user_info,
        });

        if let Some(sender) = lock(&self.completion).take() {
            // The caller may have stopped waiting.
            let _ = sender.send(outcome);
        }
        true
    }
}

/// Serves content requests against the registry's docsets.
pub struct ContentTransport {
    registry: Arc<DocsetRegistry>,
    reranker: Arc<Reranker>,
    config: TransportConfig,
    workers: Arc<Semaphore>,
    log: Arc<ResponseLog>,
}

impl ContentTransport {
    pub fn new(
        registry: Arc<DocsetRegistry>,
        reranker: Arc<Reranker>,
        config: TransportConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        let log = Arc::new(ResponseLog::new(config.tracked_identifiers));
        Self {
            registry,
            reranker,
            config,
            workers,
            log,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Start serving `url` on behalf of the caller `identifier`.
    ///
    /// Must be called from within a Tokio runtime. The returned handle
    /// resolves exactly once.
    pub fn request(&self, url: &str, identifier: &str) -> RequestHandle {
        let (sender, receiver) = oneshot::channel();
        let handle = RequestHandle {
            identifier: identifier.to_string(),
            receiver,
        };

        let Some(pending) = self.prepare(url, identifier, sender) else {
            return handle;
        };
        let pending = Arc::new(pending);

        let timer = {
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                tokio::time::sleep_until(pending.deadline).await;
                pending.received_data(Ok(vec![]), UserInfo::new(), true);
            })
        };
        *lock(&pending.timer) = Some(timer.abort_handle());

        let registry = Arc::clone(&self.registry);
        let reranker = Arc::clone(&self.reranker);
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            if pending.is_completed() {
                return;
            }
            let (data, user_info) = fetch(registry, reranker, &pending).await;
            pending.received_data(data, user_info, false);
        });

        handle
    }

    /// Metadata of the latest completion for `identifier`.
    pub fn last_response_info(&self, identifier: &str) -> Option<ResponseInfo> {
        self.log.get(identifier)
    }

    /// Metadata of the latest completion of any request.
    pub fn last_response(&self) -> Option<ResponseInfo> {
        lock(&self.log.last).clone()
    }

    /// Resolve `url` into a dispatched request, or fail `sender` right away
    /// when no docset serves it.
    fn prepare(
        &self,
        url: &str,
        identifier: &str,
        sender: oneshot::Sender<Outcome>,
    ) -> Option<PendingRequest> {
        let resolved = DocsetUrl::parse(url, self.registry.data_dir().root())
            .and_then(|parsed| {
                let docset =
                    self.registry.docset_for_relative_path(&parsed.path)?;
                let path = parsed.resource_in(&docset)?;
                Some((parsed, docset, path))
            });

        let Some((parsed, docset, path)) = resolved else {
            tracing::debug!(url, identifier, "no docset serves url");
            let error = Error::NoMatchingDocset(url.to_string());
            self.log.record(ResponseInfo {
                identifier: identifier.to_string(),
                url: url.to_string(),
                mime_type: None,
                length: 0,
                status: ResponseStatus::Failed(error.to_string()),
                user_info: UserInfo::new(),
            });
            let _ = sender.send(Outcome::Failed(error));
            return None;
        };

        let extension = Path::new(&path)
            .extension()
            .map(|e| e.to_string_lossy().into_owned());
        let mime_type = if parsed.query.is_some() {
            JSON_MIME.to_string()
        } else {
            mime_guess::from_path(&path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        };

        tracing::debug!(url, identifier, docset = %docset.name, "dispatching");
        Some(PendingRequest {
            url: url.to_string(),
            identifier: identifier.to_string(),
            docset,
            path,
            extension,
            mime_type,
            query: parsed.query,
            deadline: Instant::now() + self.config.timeout,
            state: AtomicU8::new(DISPATCHED),
            completion: Mutex::new(Some(sender)),
            timer: Mutex::new(None),
            log: Arc::clone(&self.log),
        })
    }
}

impl std::fmt::Debug for ContentTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn fetch(
    registry: Arc<DocsetRegistry>,
    reranker: Arc<Reranker>,
    pending: &PendingRequest,
) -> (Result<Vec<u8>>, UserInfo) {
    let mut user_info = UserInfo::new();
    user_info.insert("docset".into(), pending.docset.name.clone());

    let (source, data) = match &pending.query {
        Some(query) => {
            let data = run_search(registry, reranker, pending, query).await;
            ("search", data)
        }
        None => read_resource(registry, pending).await,
    };
    user_info.insert("source".into(), source.into());
    (data, user_info)
}

async fn run_search(
    registry: Arc<DocsetRegistry>,
    reranker: Arc<Reranker>,
    pending: &PendingRequest,
    query: &str,
) -> Result<Vec<u8>> {
    let docset = pending.docset.clone();
    let params = SearchParams {
        query: query.to_string(),
        limit: SEARCH_LIMIT,
        docset: None,
        platform: None,
        min_score: 0.0,
    };
    let results = tokio::task::spawn_blocking(move || {
        search::search_docsets(
            &registry,
            &reranker,
            std::slice::from_ref(&docset),
            &params,
        )
    })
    .await
    .map_err(|e| Error::Config(format!("search task failed: {e}")))??;

    Ok(serde_json::to_vec(&results)?)
}

/// Read the file on disk, falling back to the content store for pages.
async fn read_resource(
    registry: Arc<DocsetRegistry>,
    pending: &PendingRequest,
) -> (&'static str, Result<Vec<u8>>) {
    let not_found = || Error::NotFound {
        kind: "resource",
        name: pending.path.clone(),
    };
    if pending.path.is_empty() {
        return ("file", Err(not_found()));
    }

    let file = registry.absolute_path(&pending.docset).join(&pending.path);
    match tokio::fs::read(&file).await {
        Ok(data) => return ("file", Ok(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return ("file", Err(e.into())),
    }

    let Some(page) = pending
        .path
        .strip_prefix(DOCUMENTS_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
    else {
        return ("file", Err(not_found()));
    };

    let docset = pending.docset.clone();
    let lookup = tokio::task::spawn_blocking(move || {
        registry.store_for(&docset)?.page_content(&page)
    })
    .await
    .map_err(|e| Error::Config(format!("lookup task failed: {e}")));

    let data = match lookup {
        Ok(Ok(Some(data))) => Ok(data),
        Ok(Ok(None)) => Err(not_found()),
        Ok(Err(e)) | Err(e) => Err(e),
    };
    ("store", data)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
