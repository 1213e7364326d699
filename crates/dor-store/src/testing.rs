//! Fault-injecting blob store for exercising the overwrite recovery paths.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex};

use dor_types::Hints;

use crate::blob::{BlobConnection, BlobId, BlobIdIter, BlobStore};
use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryBlobStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FaultOp {
    Write,
    Rename,
    Delete,
}

/// Holds one call until the test releases it.
#[derive(Default)]
pub(crate) struct Gate {
    /// (reached, released)
    state: Mutex<(bool, bool)>,
    changed: Condvar,
}

impl Gate {
    fn arrive(&self) {
        let mut state = self.state.lock().unwrap();
        state.0 = true;
        self.changed.notify_all();
        while !state.1 {
            state = self.changed.wait(state).unwrap();
        }
    }

    /// Block until the gated call has arrived.
    pub(crate) fn wait_reached(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.0 {
            state = self.changed.wait(state).unwrap();
        }
    }

    pub(crate) fn release(&self) {
        self.state.lock().unwrap().1 = true;
        self.changed.notify_all();
    }
}

#[derive(Default)]
struct Plan {
    calls: HashMap<FaultOp, usize>,
    failures: HashSet<(FaultOp, usize)>,
    late_failures: HashSet<(FaultOp, usize)>,
    gates: HashMap<(FaultOp, usize), Arc<Gate>>,
}

/// Wraps a [`MemoryBlobStore`] and fails or holds chosen calls. Calls are
/// counted per operation across all connections, starting at 1.
pub(crate) struct FaultyBlobStore {
    inner: MemoryBlobStore,
    plan: Arc<Mutex<Plan>>,
}

impl FaultyBlobStore {
    pub(crate) fn new(inner: MemoryBlobStore) -> Self {
        Self {
            inner,
            plan: Arc::new(Mutex::new(Plan::default())),
        }
    }

    /// Make the `nth` call of `op` fail without doing anything.
    pub(crate) fn fail(&self, op: FaultOp, nth: usize) {
        self.plan.lock().unwrap().failures.insert((op, nth));
    }

    /// Make the `nth` call of `op` take effect and then report failure.
    pub(crate) fn fail_after(&self, op: FaultOp, nth: usize) {
        self.plan.lock().unwrap().late_failures.insert((op, nth));
    }

    /// Hold the `nth` call of `op` at a gate before it runs.
    pub(crate) fn pause(&self, op: FaultOp, nth: usize) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.plan
            .lock()
            .unwrap()
            .gates
            .insert((op, nth), Arc::clone(&gate));
        gate
    }

    /// Calls of `op` made so far.
    pub(crate) fn calls(&self, op: FaultOp) -> usize {
        self.plan
            .lock()
            .unwrap()
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn inner(&self) -> &MemoryBlobStore {
        &self.inner
    }
}

impl BlobStore for FaultyBlobStore {
    fn open(&self, hints: &Hints) -> StoreResult<Box<dyn BlobConnection>> {
        Ok(Box::new(FaultyConnection {
            inner: self.inner.open(hints)?,
            plan: Arc::clone(&self.plan),
        }))
    }

    fn atomic_overwrite(&self) -> bool {
        self.inner.atomic_overwrite()
    }

    fn describe(&self) -> String {
        format!("faulty({})", self.inner.describe())
    }
}

struct FaultyConnection {
    inner: Box<dyn BlobConnection>,
    plan: Arc<Mutex<Plan>>,
}

fn injected(op: FaultOp, n: usize, id: &BlobId) -> StoreError {
    StoreError::Io(io::Error::other(format!(
        "injected {op:?} failure #{n} on {id}"
    )))
}

impl FaultyConnection {
    /// `Err` fails the call up front; `Ok(Some(_))` is returned after the
    /// call has run.
    fn check(&self, op: FaultOp, id: &BlobId) -> StoreResult<Option<StoreError>> {
        let (n, gate) = {
            let mut plan = self.plan.lock().unwrap();
            let n = plan.calls.entry(op).or_insert(0);
            *n += 1;
            let n = *n;
            (n, plan.gates.get(&(op, n)).cloned())
        };
        if let Some(gate) = gate {
            gate.arrive();
        }

        let plan = self.plan.lock().unwrap();
        if plan.failures.contains(&(op, n)) {
            return Err(injected(op, n, id));
        }
        Ok(plan
            .late_failures
            .contains(&(op, n))
            .then(|| injected(op, n, id)))
    }
}

fn finish<T>(result: StoreResult<T>, late: Option<StoreError>) -> StoreResult<T> {
    let value = result?;
    match late {
        Some(e) => Err(e),
        None => Ok(value),
    }
}

impl BlobConnection for FaultyConnection {
    fn exists(&mut self, id: &BlobId) -> StoreResult<bool> {
        self.inner.exists(id)
    }

    fn size(&mut self, id: &BlobId) -> StoreResult<u64> {
        self.inner.size(id)
    }

    fn open_reader(&mut self, id: &BlobId) -> StoreResult<Box<dyn Read + Send>> {
        self.inner.open_reader(id)
    }

    fn write(
        &mut self,
        id: &BlobId,
        content: &mut dyn Read,
        overwrite: bool,
        hints: &Hints,
    ) -> StoreResult<u64> {
        let late = self.check(FaultOp::Write, id)?;
        finish(self.inner.write(id, content, overwrite, hints), late)
    }

    fn delete(&mut self, id: &BlobId) -> StoreResult<()> {
        let late = self.check(FaultOp::Delete, id)?;
        finish(self.inner.delete(id), late)
    }

    fn rename(&mut self, from: &BlobId, to: &BlobId) -> StoreResult<()> {
        let late = self.check(FaultOp::Rename, from)?;
        finish(self.inner.rename(from, to), late)
    }

    fn list(&mut self, prefix: Option<&str>) -> StoreResult<BlobIdIter> {
        self.inner.list(prefix)
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
