//! Thread registry.
//!
//! Every thread that runs transactions registers here and is assigned a
//! 1-based id. The id indexes the bytelock reader slots and composes the
//! orec lock fingerprint, so the id space is capped at the reader-slot
//! count and ids are recycled when a thread shuts down.
//!
//! Each entry also carries the thread's in-flight flag: the quiescence
//! roster an algorithm switch waits on.

use crate::error::ThreadInitError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use weft_core::MAX_THREAD_SLOTS;

/// A registered thread, as seen by the rest of the process.
#[derive(Debug)]
pub struct ThreadEntry {
    id: u32,
    in_flight: AtomicBool,
}

impl ThreadEntry {
    fn new(id: u32) -> Self {
        Self {
            id,
            in_flight: AtomicBool::new(false),
        }
    }

    /// The thread's 1-based id.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the thread is inside a transaction right now.
    #[inline]
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Publish the in-flight state.
    #[inline]
    pub fn set_in_flight(&self, value: bool) {
        self.in_flight.store(value, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    entries: Vec<Arc<ThreadEntry>>,
    free_ids: Vec<u32>,
    next_id: u32,
}

/// Process-wide roster of transactional threads.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    inner: RwLock<RegistryInner>,
}

impl ThreadRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling thread, assigning the lowest free id.
    pub fn register(&self) -> Result<Arc<ThreadEntry>, ThreadInitError> {
        let mut inner = self.inner.write();
        let id = match inner.free_ids.pop() {
            Some(id) => id,
            None => {
                if inner.next_id as usize >= MAX_THREAD_SLOTS {
                    return Err(ThreadInitError::TooManyThreads);
                }
                inner.next_id += 1;
                inner.next_id
            }
        };
        let entry = Arc::new(ThreadEntry::new(id));
        inner.entries.push(Arc::clone(&entry));
        Ok(entry)
    }

    /// Unregister a thread and recycle its id.
    pub fn unregister(&self, id: u32) {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.entries.iter().position(|e| e.id == id) {
            Self::remove_at(&mut inner, pos);
        }
    }

    /// Unregister by entry identity. Safe against id reuse: a recycled id
    /// owned by a different entry is left alone.
    pub fn unregister_entry(&self, entry: &Arc<ThreadEntry>) {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.entries.iter().position(|e| Arc::ptr_eq(e, entry)) {
            Self::remove_at(&mut inner, pos);
        }
    }

    fn remove_at(inner: &mut RegistryInner, pos: usize) {
        let id = inner.entries[pos].id();
        inner.entries.swap_remove(pos);
        inner.free_ids.push(id);
        // Keep the free list sorted descending so pop() hands out the
        // lowest id first.
        inner.free_ids.sort_unstable_by(|a, b| b.cmp(a));
    }

    /// Snapshot of all registered threads (the quiescence roster).
    pub fn snapshot(&self) -> Vec<Arc<ThreadEntry>> {
        self.inner.read().entries.clone()
    }

    /// Number of registered threads.
    pub fn thread_count(&self) -> usize {
        self.inner.read().entries.len()
    }
}
