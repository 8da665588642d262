use crate::errors::{MirrorError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertFolder {
    pub folder_id: String,
    pub title: String,
    /// Self first, then ancestors, closest first.
    pub parents: Vec<String>,
    pub parent_id: Option<String>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertTable {
    pub table_id: String,
    pub table_name: String,
    pub remote_table_ref: String,
    pub remote_secret_ref: String,
    pub description: Option<String>,
    pub parents: Vec<String>,
    pub parent_id: Option<String>,
    pub title: String,
    pub mime_type: String,
}

/// The search/index service mirrored nodes are pushed into.
///
/// Every operation is idempotent and keyed by internal id.
#[async_trait]
pub trait ExternalIndexer: Send + Sync {
    async fn upsert_folder(&self, folder: &UpsertFolder) -> Result<()>;
    async fn delete_folder(&self, folder_id: &str) -> Result<()>;
    async fn upsert_table(&self, table: &UpsertTable) -> Result<()>;
    async fn delete_table(&self, table_id: &str) -> Result<()>;
}

/// Timeout and retry budget applied to every indexer call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub async fn run<F, Fut>(&self, operation: &'static str, id: &str, mut call: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(MirrorError::Timeout {
                    operation,
                    id: id.to_string(),
                    millis: self.timeout.as_millis() as u64,
                }),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    log::warn!(
                        "Indexer {} for {} failed (attempt {}/{}): {}",
                        operation,
                        id,
                        attempt,
                        max_attempts,
                        err
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub struct HttpIndexer {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpIndexer {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| MirrorError::Config(format!("invalid indexer url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(MirrorError::Config(format!(
                "indexer url '{base_url}' cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            token,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MirrorError::Config(format!("indexer url '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post<T: Serialize + Sync>(
        &self,
        operation: &'static str,
        id: &str,
        collection: &str,
        body: &T,
    ) -> Result<()> {
        let url = self.endpoint(&[collection])?;
        let response = self
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e| MirrorError::Indexer {
                operation,
                id: id.to_string(),
                message: e.to_string(),
            })?;
        Self::check(operation, id, response, false).await
    }

    async fn delete(&self, operation: &'static str, collection: &str, id: &str) -> Result<()> {
        let url = self.endpoint(&[collection, id])?;
        let response = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(|e| MirrorError::Indexer {
                operation,
                id: id.to_string(),
                message: e.to_string(),
            })?;
        Self::check(operation, id, response, true).await
    }

    async fn check(
        operation: &'static str,
        id: &str,
        response: reqwest::Response,
        missing_is_ok: bool,
    ) -> Result<()> {
        let status = response.status();
        if status.is_success() || (missing_is_ok && status == StatusCode::NOT_FOUND) {
            return Ok(());
        }
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(MirrorError::Indexer {
            operation,
            id: id.to_string(),
            message: format!("{status}: {error_body}"),
        })
    }
}

#[async_trait]
impl ExternalIndexer for HttpIndexer {
    async fn upsert_folder(&self, folder: &UpsertFolder) -> Result<()> {
        self.post("upsert_folder", &folder.folder_id, "folders", folder)
            .await
    }

    async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        self.delete("delete_folder", "folders", folder_id).await
    }

    async fn upsert_table(&self, table: &UpsertTable) -> Result<()> {
        self.post("upsert_table", &table.table_id, "tables", table)
            .await
    }

    async fn delete_table(&self, table_id: &str) -> Result<()> {
        self.delete("delete_table", "tables", table_id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexerCall {
    UpsertFolder(UpsertFolder),
    DeleteFolder(String),
    UpsertTable(UpsertTable),
    DeleteTable(String),
}

impl IndexerCall {
    pub fn id(&self) -> &str {
        match self {
            IndexerCall::UpsertFolder(folder) => &folder.folder_id,
            IndexerCall::DeleteFolder(id) | IndexerCall::DeleteTable(id) => id,
            IndexerCall::UpsertTable(table) => &table.table_id,
        }
    }
}

/// In-process indexer that records every call, for dry runs and tests.
///
/// Ids registered with [`RecordingIndexer::fail_on`] make every call on them
/// fail; ids registered with [`RecordingIndexer::stall_on`] never complete.
/// Calls are recorded before failing or stalling, so retries are visible.
#[derive(Default)]
pub struct RecordingIndexer {
    calls: Mutex<Vec<IndexerCall>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, id: impl Into<String>) {
        lock(&self.failing).insert(id.into());
    }

    pub fn stall_on(&self, id: impl Into<String>) {
        lock(&self.stalled).insert(id.into());
    }

    pub fn clear_faults(&self) {
        lock(&self.failing).clear();
        lock(&self.stalled).clear();
    }

    pub fn calls(&self) -> Vec<IndexerCall> {
        lock(&self.calls).clone()
    }

    pub fn take_calls(&self) -> Vec<IndexerCall> {
        std::mem::take(&mut *lock(&self.calls))
    }

    fn ids_of(&self, pick: impl Fn(&IndexerCall) -> bool) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|call| pick(call))
            .map(|call| call.id().to_string())
            .collect()
    }

    pub fn upserted_folders(&self) -> Vec<String> {
        self.ids_of(|call| matches!(call, IndexerCall::UpsertFolder(_)))
    }

    pub fn upserted_tables(&self) -> Vec<String> {
        self.ids_of(|call| matches!(call, IndexerCall::UpsertTable(_)))
    }

    pub fn deleted_folders(&self) -> Vec<String> {
        self.ids_of(|call| matches!(call, IndexerCall::DeleteFolder(_)))
    }

    pub fn deleted_tables(&self) -> Vec<String> {
        self.ids_of(|call| matches!(call, IndexerCall::DeleteTable(_)))
    }

    async fn record(&self, operation: &'static str, call: IndexerCall) -> Result<()> {
        let id = call.id().to_string();
        lock(&self.calls).push(call);

        let stalled = lock(&self.stalled).contains(&id);
        if stalled {
            std::future::pending::<()>().await;
        }
        let failing = lock(&self.failing).contains(&id);
        if failing {
            return Err(MirrorError::Indexer {
                operation,
                id,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalIndexer for RecordingIndexer {
    async fn upsert_folder(&self, folder: &UpsertFolder) -> Result<()> {
        self.record("upsert_folder", IndexerCall::UpsertFolder(folder.clone()))
            .await
    }

    async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        self.record("delete_folder", IndexerCall::DeleteFolder(folder_id.to_string()))
            .await
    }

    async fn upsert_table(&self, table: &UpsertTable) -> Result<()> {
        self.record("upsert_table", IndexerCall::UpsertTable(table.clone()))
            .await
    }

    async fn delete_table(&self, table_id: &str) -> Result<()> {
        self.record("delete_table", IndexerCall::DeleteTable(table_id.to_string()))
            .await
    }
}
