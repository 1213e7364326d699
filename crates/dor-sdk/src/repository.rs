use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dor_crypto::{ContentDigest, HashingReader};
use dor_registry::{
    ClaimCoordinator, ClaimState, FsRegistry, IdentifierRegistry, InMemoryRegistry, KeyLockTable,
};
use dor_store::{AuditReport, BlobReader, BlobStorageEngine, LowlevelStorage, RebuildReport};
use dor_types::{DatastreamToken, Hints, Pid};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{RegistryConfig, RepositoryConfig};
use crate::error::{SdkError, SdkResult};

/// Content for one datastream version of an ingest.
pub struct DatastreamInput {
    pub datastream_id: String,
    pub version_id: String,
    pub content: Box<dyn Read + Send>,
    /// Lower-case BLAKE3 hex the stored content must hash to.
    pub expected_checksum: Option<String>,
    pub hints: Hints,
}

impl DatastreamInput {
    pub fn new(
        datastream_id: impl Into<String>,
        version_id: impl Into<String>,
        content: impl Read + Send + 'static,
    ) -> Self {
        Self {
            datastream_id: datastream_id.into(),
            version_id: version_id.into(),
            content: Box::new(content),
            expected_checksum: None,
            hints: Hints::new(),
        }
    }

    pub fn from_bytes(
        datastream_id: impl Into<String>,
        version_id: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(
            datastream_id,
            version_id,
            std::io::Cursor::new(content.into()),
        )
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.expected_checksum = Some(checksum.into());
        self
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }
}

/// A new object: its serialized record plus any datastreams.
pub struct IngestRequest {
    pub pid: Pid,
    pub object: Box<dyn Read + Send>,
    pub datastreams: Vec<DatastreamInput>,
    pub hints: Hints,
}

impl IngestRequest {
    pub fn new(pid: Pid, object: impl Read + Send + 'static) -> Self {
        Self {
            pid,
            object: Box::new(object),
            datastreams: Vec::new(),
            hints: Hints::new(),
        }
    }

    pub fn from_bytes(pid: Pid, object: impl Into<Vec<u8>>) -> Self {
        Self::new(pid, std::io::Cursor::new(object.into()))
    }

    pub fn with_datastream(mut self, datastream: DatastreamInput) -> Self {
        self.datastreams.push(datastream);
        self
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }
}

/// Size and digest of one stored blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredBlob {
    pub token: String,
    pub size: u64,
    pub digest: String,
}

/// Outcome of a successful ingest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    pub pid: Pid,
    pub object: StoredBlob,
    pub datastreams: Vec<StoredBlob>,
    pub registered_at: DateTime<Utc>,
}

/// What a purge removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub pid: Pid,
    pub object_removed: bool,
    pub datastreams_removed: usize,
    pub unregistered: bool,
}

enum Written {
    Object(String),
    Datastream(String),
}

/// High-level repository API.
///
/// Writes to an object (ingest, replace, new datastream versions, purge)
/// are serialized per PID through the key lock table. Reads go straight to
/// storage.
pub struct Repository {
    storage: Box<dyn LowlevelStorage>,
    claims: ClaimCoordinator,
}

impl Repository {
    pub fn new(storage: Box<dyn LowlevelStorage>, registry: Arc<dyn IdentifierRegistry>) -> Self {
        Self {
            storage,
            claims: ClaimCoordinator::new(registry, Arc::new(KeyLockTable::new())),
        }
    }

    /// Build storage and registry from configuration.
    pub fn open(config: &RepositoryConfig) -> SdkResult<Self> {
        let engine = BlobStorageEngine::from_config(&config.storage)?;
        let registry: Arc<dyn IdentifierRegistry> = match &config.registry {
            RegistryConfig::Memory => Arc::new(InMemoryRegistry::new()),
            RegistryConfig::Filesystem { dir, pattern } => Arc::new(FsRegistry::open(dir, pattern)?),
        };
        info!(
            registry = %registry.describe(),
            engine = ?engine,
            "repository opened"
        );
        Ok(Self::new(Box::new(engine), registry))
    }

    /// Memory-backed repository with default settings.
    pub fn in_memory() -> SdkResult<Self> {
        Self::open(&RepositoryConfig::default())
    }

    pub fn storage(&self) -> &dyn LowlevelStorage {
        self.storage.as_ref()
    }

    pub fn claims(&self) -> &ClaimCoordinator {
        &self.claims
    }

    // ---- Ingest ----

    /// Claim the PID, write the object record and every datastream, then
    /// register the PID.
    ///
    /// Fails with `AlreadyExists` if the PID is registered. Any failure after
    /// the claim removes what was written and releases the claim.
    pub fn ingest(&self, request: IngestRequest) -> SdkResult<IngestReceipt> {
        let IngestRequest {
            pid,
            object,
            datastreams,
            hints,
        } = request;

        let tokens = datastreams
            .iter()
            .map(|ds| pid.datastream(&ds.datastream_id, &ds.version_id))
            .collect::<Result<Vec<_>, _>>()?;

        let claim = self.claims.claim(pid.as_str())?;
        let registered_at = claim.record().registered_at;

        let mut written = Vec::new();
        match self.write_contents(&pid, object, datastreams, &tokens, &hints, &mut written) {
            Ok((object, datastreams)) => {
                claim.commit();
                info!(pid = %pid, datastreams = datastreams.len(), "object ingested");
                Ok(IngestReceipt {
                    pid,
                    object,
                    datastreams,
                    registered_at,
                })
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "ingest failed; rolling back");
                self.remove_written(&written);
                if let Err(abort) = claim.abort() {
                    warn!(pid = %pid, error = %abort, "could not release claim");
                }
                Err(e)
            }
        }
    }

    fn write_contents(
        &self,
        pid: &Pid,
        object: Box<dyn Read + Send>,
        datastreams: Vec<DatastreamInput>,
        tokens: &[DatastreamToken],
        hints: &Hints,
        written: &mut Vec<Written>,
    ) -> SdkResult<(StoredBlob, Vec<StoredBlob>)> {
        let mut reader = HashingReader::new(object);
        let size = self.storage.add_object(pid.as_str(), &mut reader, hints)?;
        written.push(Written::Object(pid.to_string()));
        let object = StoredBlob {
            token: pid.to_string(),
            size,
            digest: reader.digest().to_hex(),
        };

        let mut stored = Vec::with_capacity(datastreams.len());
        for (ds, token) in datastreams.into_iter().zip(tokens) {
            let token = token.to_token();
            let mut reader = HashingReader::new(ds.content);
            let size = self.storage.add_datastream(&token, &mut reader, &ds.hints)?;
            written.push(Written::Datastream(token.clone()));
            let blob = StoredBlob {
                token,
                size,
                digest: reader.digest().to_hex(),
            };
            verify_checksum(&blob, ds.expected_checksum.as_deref())?;
            stored.push(blob);
        }
        Ok((object, stored))
    }

    fn remove_written(&self, written: &[Written]) {
        for item in written.iter().rev() {
            let result = match item {
                Written::Object(token) => self.storage.remove_object(token),
                Written::Datastream(token) => self.storage.remove_datastream(token),
            };
            if let Err(e) = result {
                let token = match item {
                    Written::Object(t) | Written::Datastream(t) => t,
                };
                warn!(token = %token, error = %e, "rollback could not remove blob");
            }
        }
    }

    // ---- Reads ----

    pub fn retrieve_object(&self, pid: &Pid) -> SdkResult<BlobReader> {
        Ok(self.storage.retrieve_object(pid.as_str())?)
    }

    pub fn retrieve_datastream(&self, token: &DatastreamToken) -> SdkResult<BlobReader> {
        Ok(self.storage.retrieve_datastream(&token.to_token())?)
    }

    pub fn object_size(&self, pid: &Pid) -> SdkResult<u64> {
        Ok(self.storage.object_size(pid.as_str())?)
    }

    pub fn datastream_size(&self, token: &DatastreamToken) -> SdkResult<u64> {
        Ok(self.storage.datastream_size(&token.to_token())?)
    }

    /// Every stored object PID, sorted.
    pub fn list_objects(&self) -> SdkResult<Vec<Pid>> {
        let mut pids = Vec::new();
        for key in self.storage.list_objects()? {
            pids.push(Pid::parse(&key?)?);
        }
        pids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(pids)
    }

    /// Every stored datastream version of `pid`, sorted by token.
    pub fn list_datastreams(&self, pid: &Pid) -> SdkResult<Vec<DatastreamToken>> {
        let prefix = DatastreamToken::prefix_for(pid);
        let mut tokens = Vec::new();
        for key in self.storage.list_datastreams_with_prefix(&prefix)? {
            tokens.push(DatastreamToken::parse(&key?)?);
        }
        tokens.sort_by_key(|t| t.to_token());
        Ok(tokens)
    }

    pub fn state(&self, pid: &Pid) -> SdkResult<ClaimState> {
        Ok(self.claims.state(pid.as_str())?)
    }

    // ---- Modify ----

    /// Replace the object record of an existing object.
    pub fn replace_object(
        &self,
        pid: &Pid,
        content: &mut dyn Read,
        hints: &Hints,
    ) -> SdkResult<u64> {
        let _guard = self.claims.lock(pid.as_str())?;
        let size = self.storage.replace_object(pid.as_str(), content, hints)?;
        debug!(pid = %pid, size, "object record replaced");
        Ok(size)
    }

    /// Replace the content of an existing datastream version.
    pub fn replace_datastream(
        &self,
        token: &DatastreamToken,
        content: &mut dyn Read,
        hints: &Hints,
    ) -> SdkResult<u64> {
        let _guard = self.claims.lock(token.pid().as_str())?;
        let size = self
            .storage
            .replace_datastream(&token.to_token(), content, hints)?;
        debug!(token = %token, size, "datastream replaced");
        Ok(size)
    }

    /// Add a datastream version to an existing object.
    ///
    /// `NotFound` if the object is not stored; the new blob is removed again
    /// if its checksum does not match.
    pub fn add_datastream(&self, token: &DatastreamToken, input: DatastreamInput) -> SdkResult<StoredBlob> {
        let pid = token.pid();
        let _guard = self.claims.lock(pid.as_str())?;
        if !self.storage.object_exists(pid.as_str())? {
            return Err(dor_store::StoreError::NotFound {
                key: pid.to_string(),
            }
            .into());
        }

        let key = token.to_token();
        let mut reader = HashingReader::new(input.content);
        let size = self.storage.add_datastream(&key, &mut reader, &input.hints)?;
        let blob = StoredBlob {
            token: key,
            size,
            digest: reader.digest().to_hex(),
        };
        if let Err(e) = verify_checksum(&blob, input.expected_checksum.as_deref()) {
            self.remove_written(&[Written::Datastream(blob.token.clone())]);
            return Err(e);
        }
        debug!(token = %token, size, "datastream added");
        Ok(blob)
    }

    /// Remove an object, all its datastream versions and its registration.
    pub fn purge(&self, pid: &Pid) -> SdkResult<PurgeReport> {
        let _guard = self.claims.lock(pid.as_str())?;

        let registered = self.claims.state(pid.as_str())? == ClaimState::Registered;
        let object_exists = self.storage.object_exists(pid.as_str())?;
        if !registered && !object_exists {
            return Err(dor_store::StoreError::NotFound {
                key: pid.to_string(),
            }
            .into());
        }

        let tokens = self.list_datastreams(pid)?;
        for token in &tokens {
            self.storage.remove_datastream(&token.to_token())?;
        }
        if object_exists {
            self.storage.remove_object(pid.as_str())?;
        }
        if registered {
            self.claims.release(pid.as_str())?;
        }

        info!(pid = %pid, datastreams = tokens.len(), "object purged");
        Ok(PurgeReport {
            pid: pid.clone(),
            object_removed: object_exists,
            datastreams_removed: tokens.len(),
            unregistered: registered,
        })
    }

    // ---- Maintenance ----

    pub fn audit(&self) -> SdkResult<AuditReport> {
        Ok(self.storage.audit()?)
    }

    pub fn rebuild(&self) -> SdkResult<RebuildReport> {
        Ok(self.storage.rebuild()?)
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

fn verify_checksum(blob: &StoredBlob, expected: Option<&str>) -> SdkResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let expected_digest =
        ContentDigest::from_hex(expected).map_err(|e| SdkError::ChecksumMismatch {
            token: blob.token.clone(),
            expected: expected.to_string(),
            computed: format!("{} ({e})", blob.digest),
        })?;
    if expected_digest.to_hex() != blob.digest {
        return Err(SdkError::ChecksumMismatch {
            token: blob.token.clone(),
            expected: expected.to_string(),
            computed: blob.digest.clone(),
        });
    }
    Ok(())
}
