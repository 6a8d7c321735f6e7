//! Transaction scopes and rollback plumbing.
//!
//! Each thread keeps a stack of scopes: one frame per (possibly nested)
//! transaction. A scope owns the things that must unwind with it — FIFO
//! on-commit and on-rollback callback lists, the logged words protecting
//! stack/frame state, and the optional thrown object declaring a byte range
//! that rollback must not touch.
//!
//! Scopes are pooled: `ScopeStack::push` reuses a retired frame instead of
//! allocating, since transaction begin sits on the hot path.

use crate::checkpoint::Checkpoint;
use weft_core::word::WORD_BYTES;
use weft_core::{ThrownObject, Word};

/// A deferred callback scoped to one transaction frame.
pub type ScopeCallback = Box<dyn FnOnce()>;

/// Per-scope flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeFlags {
    /// This frame is the outermost transaction on its thread.
    pub outermost: bool,
    /// The frame runs (or requested to run) irrevocably.
    pub irrevocable: bool,
    /// The frame contains an exception region (a thrown object may be
    /// declared inside it).
    pub exception_region: bool,
}

/// One word logged for stack/frame protection: `bytes` bytes starting at
/// `addr`, restored from the low bytes of `value` on rollback.
#[derive(Debug, Clone, Copy)]
pub struct LoggedWord {
    addr: usize,
    value: Word,
    bytes: usize,
}

impl LoggedWord {
    fn new(addr: *mut u8, value: Word, bytes: usize) -> Self {
        debug_assert!(bytes <= WORD_BYTES);
        Self {
            addr: addr as usize,
            value,
            bytes,
        }
    }

    #[inline]
    fn begin(&self) -> usize {
        self.addr
    }

    #[inline]
    fn end(&self) -> usize {
        self.addr + self.bytes
    }

    /// Clip this entry against the protected range `[lower, upper)`.
    ///
    /// Full containment empties the entry; an overlap on one side shortens
    /// it (shifting the stored value when the kept bytes start past the
    /// original address). A protected range strictly inside the logged span
    /// has no single-piece clip; that case is a precondition violation and
    /// fails hard.
    fn clip(&mut self, lower: usize, upper: usize) {
        let (b, e) = (self.begin(), self.end());

        // No intersection.
        if e <= lower || b >= upper {
            return;
        }
        // Complete containment in the protected range.
        if b >= lower && e <= upper {
            self.bytes = 0;
            return;
        }
        // Overlap on the high side: keep [b, lower).
        if b < lower && e <= upper {
            self.bytes = lower - b;
            return;
        }
        // Overlap on the low side: keep [upper, e), shifting the value past
        // the protected bytes.
        if b >= lower && e > upper {
            let cut = upper - b;
            self.value >>= 8 * cut;
            self.bytes = e - upper;
            self.addr = upper;
            return;
        }
        // b < lower && e > upper: the protected range sits strictly inside
        // this logged span. Callers must never log a word straddling a
        // thrown object.
        panic!("logged word straddles the protected byte range");
    }

    /// Restore this entry, honoring the thrown range when one is given.
    ///
    /// # Safety
    /// - The logged address range must still be valid for writes.
    unsafe fn undo(&mut self, thrown: Option<&ThrownObject>) {
        if let Some(t) = thrown {
            self.clip(t.start(), t.end());
        }
        if self.bytes == 0 {
            return;
        }
        let src = &self.value as *const Word as *const u8;
        // SAFETY: bytes <= WORD_BYTES so the source read stays inside
        // `value`; the destination is valid per the caller's contract.
        unsafe { std::ptr::copy_nonoverlapping(src, self.addr as *mut u8, self.bytes) };
    }
}

/// One transaction frame.
pub struct Scope {
    checkpoint: Checkpoint,
    flags: ScopeFlags,
    id: u64,
    thrown: Option<ThrownObject>,
    on_rollback: Vec<ScopeCallback>,
    on_commit: Vec<ScopeCallback>,
    logged_words: Vec<LoggedWord>,
    aborted: bool,
}

impl Scope {
    fn fresh() -> Self {
        Self {
            checkpoint: Checkpoint::capture(0),
            flags: ScopeFlags::default(),
            id: 0,
            thrown: None,
            on_rollback: Vec::new(),
            on_commit: Vec::new(),
            logged_words: Vec::new(),
            aborted: false,
        }
    }

    /// Re-initialize a (possibly recycled) frame for a new transaction.
    fn enter(&mut self, id: u64, flags: ScopeFlags, depth: usize) {
        self.checkpoint = Checkpoint::capture(depth);
        self.flags = flags;
        self.id = id;
        self.thrown = None;
        self.on_rollback.clear();
        self.on_commit.clear();
        self.logged_words.clear();
        self.aborted = false;
    }

    /// Frame id (unique per thread).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Frame flags.
    pub fn flags(&self) -> ScopeFlags {
        self.flags
    }

    /// Mark the frame irrevocable.
    pub fn set_irrevocable(&mut self) {
        self.flags.irrevocable = true;
    }

    /// The frame's restart token.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Mutable access to the restart token (the retry driver bumps the
    /// attempt count).
    pub fn checkpoint_mut(&mut self) -> &mut Checkpoint {
        &mut self.checkpoint
    }

    /// Whether this frame has been rolled back and awaits re-entry.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Declare the thrown object for this frame. At most one thrown object
    /// may be live per scope.
    pub fn set_thrown_object(&mut self, thrown: ThrownObject) {
        assert!(
            self.thrown.is_none(),
            "only one thrown object expected per scope"
        );
        self.thrown = Some(thrown);
    }

    /// Clear the declared thrown object.
    pub fn clear_thrown_object(&mut self) {
        self.thrown = None;
    }

    /// The declared thrown object, if any.
    pub fn thrown_object(&self) -> Option<ThrownObject> {
        self.thrown
    }

    /// Queue a callback to run (FIFO) when the outermost frame commits.
    pub fn register_on_commit(&mut self, cb: ScopeCallback) {
        self.on_commit.push(cb);
    }

    /// Queue a callback to run (FIFO) if this frame rolls back.
    pub fn register_on_rollback(&mut self, cb: ScopeCallback) {
        self.on_rollback.push(cb);
    }

    /// Log `bytes` bytes at `addr` (current value `value`) for restoration
    /// on rollback.
    pub fn log_word(&mut self, addr: *mut u8, value: Word, bytes: usize) {
        self.logged_words.push(LoggedWord::new(addr, value, bytes));
    }

    /// Log an arbitrary byte region word-by-word, with a byte-exact tail.
    ///
    /// # Safety
    /// - `[addr, addr + len)` must be valid for reads now and for writes at
    ///   rollback time.
    pub unsafe fn log_region(&mut self, addr: *mut u8, len: usize) {
        let words = len / WORD_BYTES;
        for i in 0..words {
            // SAFETY: in-bounds per the caller's contract; read_unaligned
            // tolerates any alignment.
            let p = unsafe { addr.add(i * WORD_BYTES) };
            let value = unsafe { std::ptr::read_unaligned(p as *const Word) };
            self.log_word(p, value, WORD_BYTES);
        }
        let tail = len % WORD_BYTES;
        if tail != 0 {
            let p = unsafe { addr.add(words * WORD_BYTES) };
            let mut buf = [0u8; WORD_BYTES];
            // SAFETY: `tail` bytes starting at `p` are in-bounds.
            unsafe { std::ptr::copy_nonoverlapping(p, buf.as_mut_ptr(), tail) };
            self.log_word(p, Word::from_ne_bytes(buf), tail);
        }
    }

    /// Roll this frame back: restore logged words LIFO (clipped against the
    /// thrown range when `filter_thrown` is set), run on-rollback callbacks
    /// FIFO, discard on-commit callbacks. Returns the protected range.
    pub fn rollback(&mut self, filter_thrown: bool) -> Option<ThrownObject> {
        let thrown = if filter_thrown { self.thrown } else { None };
        for entry in self.logged_words.iter_mut().rev() {
            // SAFETY: logged ranges are live for the duration of the
            // transaction per log_word/log_region contracts.
            unsafe { entry.undo(thrown.as_ref()) };
        }
        self.logged_words.clear();

        for cb in self.on_rollback.drain(..) {
            cb();
        }
        self.on_commit.clear();
        self.aborted = true;
        self.thrown
    }

    /// Commit the outermost frame: run on-commit callbacks FIFO, discard
    /// the rollback machinery.
    pub fn commit_outermost(&mut self) {
        for cb in self.on_commit.drain(..) {
            cb();
        }
        self.on_rollback.clear();
        self.logged_words.clear();
        self.thrown = None;
    }

    /// Commit a nested frame: merge callbacks and logged words into the
    /// parent, preserving FIFO order.
    pub fn merge_into(&mut self, parent: &mut Scope) {
        parent.on_commit.append(&mut self.on_commit);
        parent.on_rollback.append(&mut self.on_rollback);
        parent.logged_words.append(&mut self.logged_words);
        self.thrown = None;
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("aborted", &self.aborted)
            .field("on_commit", &self.on_commit.len())
            .field("on_rollback", &self.on_rollback.len())
            .finish_non_exhaustive()
    }
}

/// Per-thread stack of transaction frames with a free pool.
#[derive(Debug, Default)]
pub struct ScopeStack {
    active: Vec<Box<Scope>>,
    pool: Vec<Box<Scope>>,
    next_id: u64,
}

impl ScopeStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any frame is active.
    pub fn in_transaction(&self) -> bool {
        !self.active.is_empty()
    }

    /// Active nesting depth.
    pub fn depth(&self) -> usize {
        self.active.len()
    }

    /// Open a new frame (reusing a pooled one when available) and return it.
    pub fn push(&mut self, flags: ScopeFlags) -> &mut Scope {
        self.next_id += 1;
        let id = self.next_id;
        let depth = self.active.len() + 1;
        let mut scope = self.pool.pop().unwrap_or_else(|| Box::new(Scope::fresh()));
        scope.enter(id, flags, depth);
        self.active.push(scope);
        self.active.last_mut().expect("just pushed").as_mut()
    }

    /// Close the innermost frame. The caller recycles it with [`recycle`]
    /// after draining what it needs.
    ///
    /// [`recycle`]: ScopeStack::recycle
    pub fn pop(&mut self) -> Option<Box<Scope>> {
        self.active.pop()
    }

    /// Return a retired frame to the pool.
    pub fn recycle(&mut self, scope: Box<Scope>) {
        self.pool.push(scope);
    }

    /// The innermost active frame.
    pub fn innermost(&self) -> Option<&Scope> {
        self.active.last().map(|b| b.as_ref())
    }

    /// The innermost active frame, mutably.
    pub fn innermost_mut(&mut self) -> Option<&mut Scope> {
        self.active.last_mut().map(|b| b.as_mut())
    }
}
