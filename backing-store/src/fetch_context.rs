//! Fetch attribution: every object served by the [crate::ObjectStore] is
//! attributed to a request context so that per-process fetch volume can be
//! tracked and (eventually) deprioritized (§4.6).

use std::sync::atomic::{AtomicU64, Ordering};

use edenfs_object_model::Origin;

/// The kind of object a fetch attribution event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Tree,
    Blob,
    BlobMetadata,
}

/// The OS process id of the client that triggered a request, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

/// Per-request context threaded through every `ObjectStore`/`BackingStore`
/// call. Implementations record fetch attribution and accept
/// deprioritization requests from the object store when a client process is
/// fetching heavily.
pub trait FetchContext: Send + Sync {
    fn client_pid(&self) -> Option<ProcessId>;

    /// Called once per served request with the kind of object, its id
    /// (rendered as a display string, since `ObjectId` is otherwise opaque),
    /// and where it was ultimately served from.
    fn did_fetch(&self, kind: FetchKind, id_display: &str, origin: Origin);

    /// Lowers this request's priority by `amount`, called when the issuing
    /// process has crossed the configured heavy-fetch threshold.
    fn deprioritize(&self, amount: u64);
}

/// A [FetchContext] that records nothing and is never deprioritized; used by
/// callers (tests, CLI one-shot commands) that don't need attribution.
#[derive(Debug, Default)]
pub struct NullFetchContext;

impl FetchContext for NullFetchContext {
    fn client_pid(&self) -> Option<ProcessId> {
        None
    }

    fn did_fetch(&self, _kind: FetchKind, _id_display: &str, _origin: Origin) {}

    fn deprioritize(&self, _amount: u64) {}
}

/// A [FetchContext] attributed to a specific process, recording fetch counts
/// and accumulated deprioritization so tests and callers can observe the
/// object store's attribution behavior.
#[derive(Debug)]
pub struct ProcessFetchContext {
    pid: ProcessId,
    fetch_count: AtomicU64,
    priority_penalty: AtomicU64,
}

impl ProcessFetchContext {
    pub fn new(pid: ProcessId) -> Self {
        Self {
            pid,
            fetch_count: AtomicU64::new(0),
            priority_penalty: AtomicU64::new(0),
        }
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    pub fn priority_penalty(&self) -> u64 {
        self.priority_penalty.load(Ordering::Relaxed)
    }
}

impl FetchContext for ProcessFetchContext {
    fn client_pid(&self) -> Option<ProcessId> {
        Some(self.pid)
    }

    fn did_fetch(&self, _kind: FetchKind, _id_display: &str, _origin: Origin) {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
    }

    fn deprioritize(&self, amount: u64) {
        self.priority_penalty.fetch_add(amount, Ordering::Relaxed);
    }
}
