// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Concurrent-access tracking for EREW/CREW/cCRCW enforcement.
//!
//! Within one instruction, every byte touched by the active group is keyed
//! by its physical identity: `(owning thread, offset)` for private memory
//! (two sibling threads may use the same logical address for different
//! bytes), plain offset for the heap. The tracker is reset per instruction
//! and only consulted when the group has at least two live threads.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::loader::MemMode;
use crate::thread::ThreadId;

/// Physical identity of one tracked byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ByteKey {
    /// A private-memory byte, resolved to its owning thread.
    Mem(ThreadId, u32),
    /// A heap byte.
    Heap(u32),
}

/// Access state of one byte within the current instruction.
#[derive(Debug, Clone, Copy)]
struct Cell {
    /// First thread (group position) that touched the byte.
    first: usize,
    /// First writer and the byte value it stored.
    write: Option<(usize, u8)>,
}

/// Per-instruction conflict detector.
#[derive(Debug, Default)]
pub(crate) struct AccessTracker {
    cells: HashMap<ByteKey, Cell>,
}

impl AccessTracker {
    /// Forget all accesses of the previous instruction.
    pub(crate) fn reset(&mut self) {
        self.cells.clear();
    }

    /// Record a read of one byte by the thread at group position `thr`.
    ///
    /// Returns `false` on a mode violation.
    pub(crate) fn read(&mut self, mode: MemMode, thr: usize, key: ByteKey) -> bool {
        match self.cells.entry(key) {
            Entry::Vacant(e) => {
                e.insert(Cell {
                    first: thr,
                    write: None,
                });
                true
            }
            Entry::Occupied(e) => !(mode == MemMode::Erew && e.get().first != thr),
        }
    }

    /// Record a write of one byte (value `val`) by the thread at group
    /// position `thr`.
    ///
    /// Returns `false` on a mode violation.
    pub(crate) fn write(&mut self, mode: MemMode, thr: usize, key: ByteKey, val: u8) -> bool {
        match self.cells.entry(key) {
            Entry::Vacant(e) => {
                e.insert(Cell {
                    first: thr,
                    write: Some((thr, val)),
                });
                true
            }
            Entry::Occupied(mut e) => {
                let cell = e.get_mut();
                if mode == MemMode::Erew && cell.first != thr {
                    return false;
                }
                match cell.write {
                    Some((writer, stored)) if writer != thr => match mode {
                        MemMode::Erew | MemMode::Crew => false,
                        MemMode::CommonCrcw => stored == val,
                    },
                    _ => {
                        cell.write = Some((thr, val));
                        true
                    }
                }
            }
        }
    }
}
