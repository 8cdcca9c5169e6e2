// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Thread model.
//!
//! Logical threads form a tree. Each thread owns a private memory stack
//! that begins at `mem_base` in the global address space, where `mem_base`
//! equals the parent's base plus the parent's memory top at fork time.
//! A thread therefore sees every ancestor byte below its own base without
//! copying; resolving an address means walking parent links until the
//! address falls at or above the current thread's base:
//!
//! ```text
//! root      [0 ............ top0)
//! child       mem_base = top0   [top0 ........ top0+top1)
//! grandchild          mem_base = top0+top1  [ ... )
//! ```
//!
//! Threads are reference counted because a split places the same thread
//! in two groups at once; the last release frees the three stacks.


use log::trace;

use crate::stack::ByteStack;

/// Handle into the [`ThreadPool`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(u32);

impl ThreadId {
    /// Arena slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A logical thread.
#[derive(Debug)]
pub struct Thread {
    /// Unique id, assigned once at creation and never reused.
    pub tid: u64,
    /// Start of this thread's private memory in the global address space.
    pub mem_base: u32,
    /// Private memory stack.
    pub mem: ByteStack,
    /// Operand stack.
    pub op_stack: ByteStack,
    /// Accumulator stack.
    pub acc_stack: ByteStack,
    /// Parent thread, `None` for the root.
    pub parent: Option<ThreadId>,
    /// Set by `SETR`; a returned thread stops executing per-thread
    /// instructions and no longer counts as live.
    pub returned: bool,
    /// Number of groups holding this thread.
    refcnt: u32,
}

/// Arena of threads with explicit reference counting.
///
/// Slots are reused after the last release; `tid`s are not.
#[derive(Debug, Default)]
pub struct ThreadPool {
    slots: Vec<Option<Thread>>,
    free: Vec<u32>,
    next_tid: u64,
}

impl ThreadPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live threads in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether the arena holds no live thread.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, thread: Thread) -> ThreadId {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(thread);
            ThreadId(slot)
        } else {
            self.slots.push(Some(thread));
            ThreadId(self.slots.len() as u32 - 1)
        }
    }

    /// Create the root thread with `mem_base` 0 and refcount 1.
    pub fn spawn_root(&mut self) -> ThreadId {
        let tid = self.next_tid;
        self.next_tid += 1;
        self.insert(Thread {
            tid,
            mem_base: 0,
            mem: ByteStack::new(),
            op_stack: ByteStack::new(),
            acc_stack: ByteStack::new(),
            parent: None,
            returned: false,
            refcnt: 1,
        })
    }

    /// Fork a child of `parent` with fresh empty stacks.
    ///
    /// The child's `mem_base` is the parent's base plus the parent's
    /// current memory top, so the child extends the address space without
    /// copying any ancestor byte.
    pub fn fork_child(&mut self, parent: ThreadId) -> ThreadId {
        let p = self.get(parent);
        let mem_base = p.mem_base + p.mem.top();
        let tid = self.next_tid;
        self.next_tid += 1;
        trace!("fork thread {tid} (mem_base {mem_base})");
        self.insert(Thread {
            tid,
            mem_base,
            mem: ByteStack::new(),
            op_stack: ByteStack::new(),
            acc_stack: ByteStack::new(),
            parent: Some(parent),
            returned: false,
            refcnt: 1,
        })
    }

    /// Borrow a thread.
    ///
    /// # Panics
    ///
    /// If the handle refers to a freed slot (a group-discipline bug).
    #[must_use]
    pub fn get(&self, id: ThreadId) -> &Thread {
        self.slots[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("stale thread handle {id:?}"))
    }

    /// Mutably borrow a thread.
    ///
    /// # Panics
    ///
    /// If the handle refers to a freed slot.
    pub fn get_mut(&mut self, id: ThreadId) -> &mut Thread {
        self.slots[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale thread handle {id:?}"))
    }

    /// Add one reference (the thread joined another group).
    pub fn retain(&mut self, id: ThreadId) {
        self.get_mut(id).refcnt += 1;
    }

    /// Drop one reference; the thread is freed when none remain.
    pub fn release(&mut self, id: ThreadId) {
        let thread = self.get_mut(id);
        thread.refcnt -= 1;
        if thread.refcnt == 0 {
            trace!("free thread {}", thread.tid);
            self.slots[id.index()] = None;
            self.free.push(id.index() as u32);
        }
    }

    /// Walk parent links to the thread owning address `addr`.
    ///
    /// Returns the owner and the offset of `addr` within its private
    /// memory. The root owns everything below every base, so the walk
    /// always terminates.
    #[must_use]
    pub fn resolve(&self, id: ThreadId, addr: u32) -> (ThreadId, u32) {
        let mut cur = id;
        loop {
            let t = self.get(cur);
            if addr >= t.mem_base {
                return (cur, addr - t.mem_base);
            }
            match t.parent {
                Some(parent) => cur = parent,
                // Root has mem_base 0, so addr >= mem_base always holds
                // there; this arm is unreachable for a well-formed tree.
                None => return (cur, 0),
            }
        }
    }

    /// Resolve `addr` and borrow `len` bytes, growing the owning thread's
    /// memory (zero-filled) so the range is in bounds.
    pub fn get_addr(&mut self, id: ThreadId, addr: u32, len: u32) -> &mut [u8] {
        let (owner, offset) = self.resolve(id, addr);
        self.get_mut(owner).mem.bytes_mut(offset, len)
    }

    /// Load a 4-byte word from `addr` as seen by thread `id`.
    pub fn load_word(&mut self, id: ThreadId, addr: u32) -> u32 {
        let bytes = self.get_addr(id, addr, 4);
        let mut word = [0_u8; 4];
        word.copy_from_slice(bytes);
        u32::from_le_bytes(word)
    }

    /// Store a 4-byte word at `addr` as seen by thread `id`.
    pub fn store_word(&mut self, id: ThreadId, addr: u32, v: u32) {
        self.get_addr(id, addr, 4).copy_from_slice(&v.to_le_bytes());
    }

    /// Load one byte from `addr` as seen by thread `id`.
    pub fn load_byte(&mut self, id: ThreadId, addr: u32) -> u8 {
        self.get_addr(id, addr, 1)[0]
    }

    /// Store one byte at `addr` as seen by thread `id`.
    pub fn store_byte(&mut self, id: ThreadId, addr: u32, v: u8) {
        self.get_addr(id, addr, 1)[0] = v;
    }
}
