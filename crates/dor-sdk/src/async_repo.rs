//! Async facade over [`Repository`].
//!
//! Storage and registry calls block on I/O and on per-object locks, so each
//! call runs on tokio's blocking pool. Key locks belong to the thread that
//! took them, and a blocking task keeps one thread for its whole duration.

use std::sync::Arc;

use dor_registry::ClaimState;
use dor_store::{AuditReport, RebuildReport};
use dor_types::{DatastreamToken, Hints, Pid};

use crate::error::{SdkError, SdkResult};
use crate::repository::{DatastreamInput, IngestReceipt, IngestRequest, PurgeReport, Repository, StoredBlob};

#[derive(Clone, Debug)]
pub struct AsyncRepository {
    inner: Arc<Repository>,
}

impl AsyncRepository {
    pub fn new(repository: Repository) -> Self {
        Self {
            inner: Arc::new(repository),
        }
    }

    pub fn from_arc(inner: Arc<Repository>) -> Self {
        Self { inner }
    }

    /// The shared synchronous repository.
    pub fn blocking(&self) -> &Arc<Repository> {
        &self.inner
    }

    async fn run<T, F>(&self, f: F) -> SdkResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> SdkResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| SdkError::Task(e.to_string()))?
    }

    pub async fn ingest(&self, request: IngestRequest) -> SdkResult<IngestReceipt> {
        self.run(move |repo| repo.ingest(request)).await
    }

    /// Whole object record, read to the end.
    pub async fn read_object(&self, pid: Pid) -> SdkResult<Vec<u8>> {
        self.run(move |repo| Ok(repo.retrieve_object(&pid)?.read_to_vec()?))
            .await
    }

    pub async fn read_datastream(&self, token: DatastreamToken) -> SdkResult<Vec<u8>> {
        self.run(move |repo| Ok(repo.retrieve_datastream(&token)?.read_to_vec()?))
            .await
    }

    pub async fn object_size(&self, pid: Pid) -> SdkResult<u64> {
        self.run(move |repo| repo.object_size(&pid)).await
    }

    pub async fn datastream_size(&self, token: DatastreamToken) -> SdkResult<u64> {
        self.run(move |repo| repo.datastream_size(&token)).await
    }

    pub async fn replace_object(&self, pid: Pid, content: Vec<u8>, hints: Hints) -> SdkResult<u64> {
        self.run(move |repo| repo.replace_object(&pid, &mut content.as_slice(), &hints))
            .await
    }

    pub async fn replace_datastream(
        &self,
        token: DatastreamToken,
        content: Vec<u8>,
        hints: Hints,
    ) -> SdkResult<u64> {
        self.run(move |repo| repo.replace_datastream(&token, &mut content.as_slice(), &hints))
            .await
    }

    pub async fn add_datastream(
        &self,
        token: DatastreamToken,
        input: DatastreamInput,
    ) -> SdkResult<StoredBlob> {
        self.run(move |repo| repo.add_datastream(&token, input)).await
    }

    pub async fn list_objects(&self) -> SdkResult<Vec<Pid>> {
        self.run(|repo| repo.list_objects()).await
    }

    pub async fn list_datastreams(&self, pid: Pid) -> SdkResult<Vec<DatastreamToken>> {
        self.run(move |repo| repo.list_datastreams(&pid)).await
    }

    pub async fn state(&self, pid: Pid) -> SdkResult<ClaimState> {
        self.run(move |repo| repo.state(&pid)).await
    }

    pub async fn purge(&self, pid: Pid) -> SdkResult<PurgeReport> {
        self.run(move |repo| repo.purge(&pid)).await
    }

    pub async fn audit(&self) -> SdkResult<AuditReport> {
        self.run(|repo| repo.audit()).await
    }

    pub async fn rebuild(&self) -> SdkResult<RebuildReport> {
        self.run(|repo| repo.rebuild()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> Pid {
        Pid::parse(s).unwrap()
    }

    fn repo() -> AsyncRepository {
        AsyncRepository::new(Repository::in_memory().unwrap())
    }

    #[tokio::test]
    async fn ingest_and_read() {
        let repo = repo();
        let request = IngestRequest::from_bytes(pid("demo:1"), b"<object/>".to_vec())
            .with_datastream(DatastreamInput::from_bytes("DC", "DC.0", b"dc".to_vec()));
        repo.ingest(request).await.unwrap();

        assert_eq!(repo.read_object(pid("demo:1")).await.unwrap(), b"<object/>");
        let dc = pid("demo:1").datastream("DC", "DC.0").unwrap();
        assert_eq!(repo.read_datastream(dc.clone()).await.unwrap(), b"dc");
        assert_eq!(repo.datastream_size(dc).await.unwrap(), 2);
        assert_eq!(repo.state(pid("demo:1")).await.unwrap(), ClaimState::Registered);
    }

    #[tokio::test]
    async fn replace_then_purge() {
        let repo = repo();
        repo.ingest(IngestRequest::from_bytes(pid("demo:1"), b"v1".to_vec()))
            .await
            .unwrap();

        repo.replace_object(pid("demo:1"), b"version two".to_vec(), Hints::new())
            .await
            .unwrap();
        assert_eq!(repo.object_size(pid("demo:1")).await.unwrap(), 11);

        let report = repo.purge(pid("demo:1")).await.unwrap();
        assert!(report.object_removed);
        assert!(repo.list_objects().await.unwrap().is_empty());
        assert!(repo.read_object(pid("demo:1")).await.unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ingest_has_one_winner() {
        let repo = repo();
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.ingest(IngestRequest::from_bytes(pid("demo:race"), format!("writer {i}")))
                        .await
                })
            })
            .collect();

        let mut wins = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) => assert!(e.is_already_exists()),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn add_datastream_and_list() {
        let repo = repo();
        repo.ingest(IngestRequest::from_bytes(pid("demo:1"), b"x".to_vec()))
            .await
            .unwrap();
        let token = pid("demo:1").datastream("DC", "DC.0").unwrap();
        repo.add_datastream(token.clone(), DatastreamInput::from_bytes("DC", "DC.0", b"dc".to_vec()))
            .await
            .unwrap();

        assert_eq!(repo.list_datastreams(pid("demo:1")).await.unwrap(), vec![token]);
        assert!(repo.audit().await.unwrap().is_clean());
        assert!(repo.rebuild().await.unwrap().restored.is_empty());
    }
}
