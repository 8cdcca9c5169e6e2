// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The WT virtual machine.
//!
//! The VM executes a loaded [`Image`] under the fork/split/join group
//! discipline. One group is *active* at a time; its live members retire
//! each instruction in lockstep (sequentially, in group order). Runs of
//! empty groups at the top of the group stack are represented by a
//! counter instead of being materialized.
//!
//! Two PRAM cost counters accumulate while the machine runs: `T` (time)
//! grows by one per retired instruction, `W` (work) by one per live thread
//! for per-thread instructions and by one per group for the group-level
//! control instructions.
//!
//! [`Vm::execute`] runs until the machine halts, a breakpoint fires, the
//! step budget is exhausted, or a fatal error occurs. Only the first and
//! the error are terminal; the other outcomes are resumable by calling
//! [`Vm::execute`] again.

mod access;
#[cfg(test)]
mod vm_test;

use log::trace;
use thiserror::Error;

use crate::bytecode::{DecodeError, Imm, Op, decode};
use crate::frame::Frame;
use crate::layout::ElemTag;
use crate::loader::{FnEntry, Image, IoVar, LoadError, MemMode};
use crate::stack::ByteStack;
use crate::thread::{ThreadId, ThreadPool};

use access::{AccessTracker, ByteKey};

/// Lifecycle state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Loaded, not yet running.
    Ready,
    /// Between resumable `execute` calls.
    Running,
    /// Halted on `ENDVM`.
    Halted,
    /// A fatal error occurred; the machine stays introspectable but will
    /// not run again.
    Error,
}

/// Resumable or terminal result of [`Vm::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The machine retired `ENDVM`. Terminal.
    Halted,
    /// The step budget was exhausted. Resumable.
    OutOfSteps,
    /// A `BREAK` fired. Resumable; execution continues after the
    /// breakpoint.
    Breakpoint {
        /// Breakpoint id from the instruction's immediate.
        id: u32,
        /// `tid`s of the threads whose condition was non-zero.
        threads: Vec<u64>,
    },
}

/// Fatal runtime error. The program counter is the position of the
/// instruction that faulted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Undefined opcode, truncated immediate, or runaway program counter.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// `SIZE` with a dimension number outside the array header.
    #[error("array dimension {dim} out of range ({n_dim} dimensions) at pc {pc}")]
    DimRange {
        /// Requested dimension number.
        dim: u32,
        /// Number of dimensions in the header.
        n_dim: u32,
        /// Faulting code position.
        pc: usize,
    },
    /// `IDX` with an index at or beyond its dimension size.
    #[error("array index {index} out of range (dimension size {size}) at pc {pc}")]
    IndexRange {
        /// The offending index value.
        index: u32,
        /// Size of the indexed dimension.
        size: u32,
        /// Faulting code position.
        pc: usize,
    },
    /// Concurrent same-byte access forbidden by the memory mode.
    #[error("concurrent access violates {} at pc {pc}", .mode.name())]
    Concurrency {
        /// Memory mode in force.
        mode: MemMode,
        /// Faulting code position.
        pc: usize,
    },
    /// Integer division or modulo by zero.
    #[error("division by zero at pc {pc}")]
    DivisionByZero {
        /// Faulting code position.
        pc: usize,
    },
    /// `CALL` with an index outside the function map.
    #[error("call to undefined function {index} at pc {pc}")]
    UndefinedFunction {
        /// The fnmap index.
        index: u32,
        /// Faulting code position.
        pc: usize,
    },
    /// `RETURN` with only the root frame left.
    #[error("return without a call frame at pc {pc}")]
    FrameUnderflow {
        /// Faulting code position.
        pc: usize,
    },
    /// `MEM_FREE` (or `RETURN`) without a matching `MEM_MARK`.
    #[error("memory free without a matching mark at pc {pc}")]
    MarkUnderflow {
        /// Faulting code position.
        pc: usize,
    },
    /// `JOIN` with only the root group left.
    #[error("join without a matching fork or split at pc {pc}")]
    GroupUnderflow {
        /// Faulting code position.
        pc: usize,
    },
    /// `SORT` with a key type byte that is not a leaf tag.
    #[error("invalid sort key type {ty} at pc {pc}")]
    BadSortKey {
        /// The offending type operand.
        ty: u32,
        /// Faulting code position.
        pc: usize,
    },
    /// `SORT` with a key that does not fit inside one record.
    #[error("sort key at offset {offs} outside record of {size} bytes at pc {pc}")]
    KeyOutsideRecord {
        /// Key byte offset within a record.
        offs: u32,
        /// Record size in bytes.
        size: u32,
        /// Faulting code position.
        pc: usize,
    },
    /// `execute` on a machine that already faulted.
    #[error("vm is not runnable")]
    NotRunnable,
}

/// What one retired instruction did to the control loop.
enum StepEvent {
    Normal,
    Halted,
    Breakpoint { id: u32, threads: Vec<u64> },
}

/// The virtual machine.
#[derive(Debug)]
pub struct Vm {
    in_vars: Vec<IoVar>,
    out_vars: Vec<IoVar>,
    global_size: u32,
    mem_mode: MemMode,
    fnmap: Vec<FnEntry>,
    code: Vec<u8>,
    debug_info: Option<crate::debug::DebugInfo>,

    pub(crate) heap: ByteStack,
    pub(crate) threads: ThreadPool,
    root: ThreadId,
    groups: Vec<Vec<ThreadId>>,
    virtual_grps: u32,
    frames: Vec<Frame>,

    pc: usize,
    stored_pc: usize,
    work: u64,
    time: u64,
    state: VmState,

    tracker: AccessTracker,
}

impl Vm {
    /// Parse a binary image and construct a machine from it.
    ///
    /// # Errors
    ///
    /// [`LoadError`] if the binary is malformed.
    pub fn new(bytes: &[u8]) -> Result<Self, LoadError> {
        Ok(Self::from_image(Image::parse(bytes)?))
    }

    /// Construct a machine from an already-parsed image.
    ///
    /// Pre-allocates the root thread's static memory and sets up the
    /// singleton group and the root frame.
    #[must_use]
    pub fn from_image(image: Image) -> Self {
        let mut threads = ThreadPool::new();
        let root = threads.spawn_root();
        threads.get_mut(root).mem.alloc(image.global_size);

        Self {
            in_vars: image.in_vars,
            out_vars: image.out_vars,
            global_size: image.global_size,
            mem_mode: image.mem_mode,
            fnmap: image.fnmap,
            code: image.code,
            debug_info: image.debug,
            heap: ByteStack::new(),
            threads,
            root,
            groups: vec![vec![root]],
            virtual_grps: 0,
            frames: vec![Frame::new(0, 0)],
            pc: 0,
            stored_pc: 0,
            work: 0,
            time: 0,
            state: VmState::Ready,
            tracker: AccessTracker::default(),
        }
    }

    /// Run at most `limit` instructions (`limit < 0` for no limit).
    ///
    /// # Errors
    ///
    /// A fatal [`VmError`]; afterwards the machine reports
    /// [`VmState::Error`] and refuses further execution.
    pub fn execute(&mut self, limit: i64) -> Result<Outcome, VmError> {
        match self.state {
            VmState::Error => return Err(VmError::NotRunnable),
            VmState::Halted => return Ok(Outcome::Halted),
            VmState::Ready | VmState::Running => {}
        }
        self.state = VmState::Running;

        let mut steps: i64 = 0;
        loop {
            if limit >= 0 && steps >= limit {
                return Ok(Outcome::OutOfSteps);
            }
            match self.step() {
                Ok(StepEvent::Normal) => steps += 1,
                Ok(StepEvent::Halted) => {
                    self.state = VmState::Halted;
                    return Ok(Outcome::Halted);
                }
                Ok(StepEvent::Breakpoint { id, threads }) => {
                    return Ok(Outcome::Breakpoint { id, threads });
                }
                Err(e) => {
                    self.state = VmState::Error;
                    return Err(e);
                }
            }
        }
    }

    // --- Introspection ---

    /// Accumulated work counter.
    #[must_use]
    pub const fn work(&self) -> u64 {
        self.work
    }

    /// Accumulated time counter.
    #[must_use]
    pub const fn time(&self) -> u64 {
        self.time
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> VmState {
        self.state
    }

    /// Current program counter.
    #[must_use]
    pub const fn pc(&self) -> usize {
        self.pc
    }

    /// Code position of the most recently retired instruction.
    #[must_use]
    pub const fn stored_pc(&self) -> usize {
        self.stored_pc
    }

    /// Memory mode from the binary header.
    #[must_use]
    pub const fn mem_mode(&self) -> MemMode {
        self.mem_mode
    }

    /// Static-memory size from the binary header.
    #[must_use]
    pub const fn global_size(&self) -> u32 {
        self.global_size
    }

    /// Input variable records.
    #[must_use]
    pub fn in_vars(&self) -> &[IoVar] {
        &self.in_vars
    }

    /// Output variable records.
    #[must_use]
    pub fn out_vars(&self) -> &[IoVar] {
        &self.out_vars
    }

    /// Function map.
    #[must_use]
    pub fn fnmap(&self) -> &[FnEntry] {
        &self.fnmap
    }

    /// Raw code section.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Debug info, if the binary carried a DEBUG section.
    #[must_use]
    pub const fn debug_info(&self) -> Option<&crate::debug::DebugInfo> {
        self.debug_info.as_ref()
    }

    /// The root thread (owner of static memory).
    #[must_use]
    pub const fn root_thread(&self) -> ThreadId {
        self.root
    }

    /// Number of thread groups, counting elided empty ones.
    #[must_use]
    pub fn group_depth(&self) -> usize {
        self.groups.len() + self.virtual_grps as usize
    }

    // --- Stepping ---

    /// First member of the active group, returned threads included.
    fn first_member(&self) -> Option<ThreadId> {
        if self.virtual_grps > 0 {
            return None;
        }
        self.groups.last().and_then(|g| g.first().copied())
    }

    /// Live (non-returned) members of the active group, in group order.
    fn active_live(&self) -> Vec<ThreadId> {
        if self.virtual_grps > 0 {
            return Vec::new();
        }
        match self.groups.last() {
            Some(group) => group
                .iter()
                .copied()
                .filter(|&t| !self.threads.get(t).returned)
                .collect(),
            None => Vec::new(),
        }
    }

    const fn charge_group(&mut self) {
        self.work += 1;
        self.time += 1;
    }

    const fn charge_per_thread(&mut self, k: usize) {
        self.work += k as u64;
        self.time += 1;
    }

    fn jump_target(&self, d: i32) -> usize {
        // Relative to the immediate position (pc + 1).
        (self.pc as i64 + 1 + i64::from(d)) as usize
    }

    /// Retire one instruction.
    fn step(&mut self) -> Result<StepEvent, VmError> {
        self.stored_pc = self.pc;
        let (op, imm) = decode(&self.code, self.pc)?;
        let advance = 1 + op.imm_len();

        let live = self.active_live();
        let k = live.len();
        // Member count of the active group including returned threads;
        // RETURN and the mark instructions must still unwind for a group
        // whose threads all retired via SETR.
        let members = if self.virtual_grps > 0 {
            0
        } else {
            self.groups.last().map_or(0, Vec::len)
        };
        trace!("{:4}: {} (live {k})", self.pc, op.mnemonic());

        match op {
            Op::EndVm => return Ok(StepEvent::Halted),

            Op::Jmp => {
                let Imm::I32(d) = imm else { unreachable!() };
                if k > 0 {
                    self.charge_group();
                    self.pc = self.jump_target(d);
                } else {
                    self.pc += advance;
                }
            }

            Op::Fork => {
                self.exec_fork(&live);
                self.pc += advance;
            }

            Op::Split => {
                self.exec_split(&live);
                self.pc += advance;
            }

            Op::Join => {
                self.exec_join(k)?;
                self.pc += advance;
            }

            Op::JoinJmp => {
                let Imm::I32(d) = imm else { unreachable!() };
                self.exec_join(k)?;
                self.pc = self.jump_target(d);
            }

            Op::Call => {
                let Imm::U32(f) = imm else { unreachable!() };
                if k > 0 {
                    self.charge_group();
                    let entry =
                        *self
                            .fnmap
                            .get(f as usize)
                            .ok_or(VmError::UndefinedFunction {
                                index: f,
                                pc: self.stored_pc,
                            })?;
                    let first = self.threads.get(live[0]);
                    let base = first.mem_base + first.mem.top();
                    let mem_top = first.mem.top();
                    let mut frame = Frame::new(base, (self.pc + advance) as u32);
                    frame.push_mark(self.heap.top(), mem_top);
                    self.frames.push(frame);
                    self.pc = entry.code_addr as usize;
                } else {
                    self.pc += advance;
                }
            }

            Op::Return => {
                if members > 0 {
                    if k > 0 {
                        self.charge_group();
                    }
                    self.exec_return()?;
                } else {
                    self.pc += advance;
                }
            }

            Op::MemMark => {
                if members > 0 {
                    if k > 0 {
                        self.charge_per_thread(k);
                    }
                    let first = self.first_member();
                    let mem_top = first.map_or(0, |t| self.threads.get(t).mem.top());
                    let heap_top = self.heap.top();
                    if let Some(frame) = self.frames.last_mut() {
                        frame.push_mark(heap_top, mem_top);
                    }
                }
                self.pc += advance;
            }

            Op::MemFree => {
                if members > 0 {
                    if k > 0 {
                        self.charge_per_thread(k);
                    }
                    let mark = self
                        .frames
                        .last_mut()
                        .and_then(Frame::pop_mark)
                        .ok_or(VmError::MarkUnderflow { pc: self.stored_pc })?;
                    self.restore_marks(mark);
                }
                self.pc += advance;
            }

            Op::Setr => {
                if k > 0 {
                    self.charge_per_thread(k);
                    for &t in &live {
                        self.threads.get_mut(t).returned = true;
                    }
                }
                self.pc += advance;
            }

            Op::Break => {
                let Imm::U32(id) = imm else { unreachable!() };
                self.pc += advance;
                if k > 0 {
                    self.charge_per_thread(k);
                    let mut hits = Vec::new();
                    for &t in &live {
                        let thread = self.threads.get_mut(t);
                        if thread.op_stack.pop_i32() != 0 {
                            hits.push(thread.tid);
                        }
                    }
                    if !hits.is_empty() {
                        return Ok(StepEvent::Breakpoint { id, threads: hits });
                    }
                }
            }

            _ => {
                // Per-thread family: every live thread retires the
                // instruction, in group order.
                if k > 0 {
                    self.charge_per_thread(k);
                }
                self.tracker.reset();
                for (pos, &t) in live.iter().enumerate() {
                    self.exec_thread(op, imm, t, pos, k)?;
                }
                self.pc += advance;
            }
        }

        Ok(StepEvent::Normal)
    }

    // --- Group transitions ---

    fn exec_fork(&mut self, live: &[ThreadId]) {
        if live.is_empty() {
            self.virtual_grps += 1;
            return;
        }
        self.charge_group();

        let mut group = Vec::new();
        for &t in live {
            let thread = self.threads.get_mut(t);
            let a = thread.op_stack.pop_u32();
            let n = thread.op_stack.pop_u32();
            for j in 0..n {
                let child = self.threads.fork_child(t);
                self.threads.store_word(child, a, j);
                group.push(child);
            }
        }
        trace!("fork: new group of {}", group.len());
        self.groups.push(group);
    }

    fn exec_split(&mut self, live: &[ThreadId]) {
        if live.is_empty() {
            self.virtual_grps += 2;
            return;
        }
        self.charge_group();

        let mut nonzero = Vec::new();
        let mut zero = Vec::new();
        for &t in live {
            let a = self.threads.get_mut(t).op_stack.pop_i32();
            self.threads.retain(t);
            if a == 0 {
                zero.push(t);
            } else {
                nonzero.push(t);
            }
        }
        trace!("split: {} nonzero / {} zero", nonzero.len(), zero.len());
        self.groups.push(nonzero);
        self.groups.push(zero);
    }

    fn exec_join(&mut self, k: usize) -> Result<(), VmError> {
        if self.virtual_grps > 0 {
            self.virtual_grps -= 1;
            return Ok(());
        }
        if k > 0 {
            self.charge_group();
        }
        if self.groups.len() <= 1 {
            return Err(VmError::GroupUnderflow { pc: self.stored_pc });
        }
        if let Some(group) = self.groups.pop() {
            for t in group {
                self.threads.release(t);
            }
        }
        Ok(())
    }

    fn exec_return(&mut self) -> Result<(), VmError> {
        if self.frames.len() <= 1 {
            return Err(VmError::FrameUnderflow { pc: self.stored_pc });
        }
        let Some(mut frame) = self.frames.pop() else {
            return Err(VmError::FrameUnderflow { pc: self.stored_pc });
        };
        self.pc = frame.ret_addr as usize;
        let mark = frame
            .pop_mark()
            .ok_or(VmError::MarkUnderflow { pc: self.stored_pc })?;
        self.restore_marks(mark);
        // Threads that early-returned inside the callee resume with the
        // caller; the flag clears on every group member, live or not.
        let members = self.groups.last().cloned().unwrap_or_default();
        for t in members {
            self.threads.get_mut(t).returned = false;
        }
        Ok(())
    }

    /// Restore the heap top and every active-group member's memory top.
    fn restore_marks(&mut self, (heap_top, mem_top): (u32, u32)) {
        self.heap.set_top(heap_top);
        if self.virtual_grps > 0 {
            return;
        }
        let members = match self.groups.last() {
            Some(group) => group.clone(),
            None => return,
        };
        for t in members {
            let mem = &mut self.threads.get_mut(t).mem;
            if mem_top <= mem.top() {
                mem.set_top(mem_top);
            } else {
                mem.alloc(mem_top - mem.top());
            }
        }
    }

    // --- Tracked memory helpers ---

    fn violation(&self) -> VmError {
        VmError::Concurrency {
            mode: self.mem_mode,
            pc: self.stored_pc,
        }
    }

    /// Load a private-memory word via thread `t`, recording the read.
    fn read_mem_word(&mut self, t: ThreadId, pos: usize, k: usize, addr: u32) -> Result<u32, VmError> {
        let v = self.threads.load_word(t, addr);
        if k >= 2 {
            let (owner, off) = self.threads.resolve(t, addr);
            for i in 0..4 {
                if !self.tracker.read(self.mem_mode, pos, ByteKey::Mem(owner, off + i)) {
                    return Err(self.violation());
                }
            }
        }
        Ok(v)
    }

    fn read_mem_byte(&mut self, t: ThreadId, pos: usize, k: usize, addr: u32) -> Result<u8, VmError> {
        let v = self.threads.load_byte(t, addr);
        if k >= 2 {
            let (owner, off) = self.threads.resolve(t, addr);
            if !self.tracker.read(self.mem_mode, pos, ByteKey::Mem(owner, off)) {
                return Err(self.violation());
            }
        }
        Ok(v)
    }

    fn write_mem_word(&mut self, t: ThreadId, pos: usize, k: usize, addr: u32, v: u32) -> Result<(), VmError> {
        self.threads.store_word(t, addr, v);
        if k >= 2 {
            let (owner, off) = self.threads.resolve(t, addr);
            for (i, byte) in v.to_le_bytes().iter().enumerate() {
                if !self
                    .tracker
                    .write(self.mem_mode, pos, ByteKey::Mem(owner, off + i as u32), *byte)
                {
                    return Err(self.violation());
                }
            }
        }
        Ok(())
    }

    fn write_mem_byte(&mut self, t: ThreadId, pos: usize, k: usize, addr: u32, v: u8) -> Result<(), VmError> {
        self.threads.store_byte(t, addr, v);
        if k >= 2 {
            let (owner, off) = self.threads.resolve(t, addr);
            if !self.tracker.write(self.mem_mode, pos, ByteKey::Mem(owner, off), v) {
                return Err(self.violation());
            }
        }
        Ok(())
    }

    /// Heap word read with zero-growth past the top.
    pub(crate) fn heap_word(&mut self, addr: u32) -> u32 {
        let bytes = self.heap.bytes_mut(addr, 4);
        let mut word = [0_u8; 4];
        word.copy_from_slice(bytes);
        u32::from_le_bytes(word)
    }

    pub(crate) fn set_heap_word(&mut self, addr: u32, v: u32) {
        self.heap.bytes_mut(addr, 4).copy_from_slice(&v.to_le_bytes());
    }

    fn read_heap_word(&mut self, pos: usize, k: usize, addr: u32) -> Result<u32, VmError> {
        let v = self.heap_word(addr);
        if k >= 2 {
            for i in 0..4 {
                if !self.tracker.read(self.mem_mode, pos, ByteKey::Heap(addr + i)) {
                    return Err(self.violation());
                }
            }
        }
        Ok(v)
    }

    fn read_heap_byte(&mut self, pos: usize, k: usize, addr: u32) -> Result<u8, VmError> {
        let v = self.heap.bytes_mut(addr, 1)[0];
        if k >= 2 && !self.tracker.read(self.mem_mode, pos, ByteKey::Heap(addr)) {
            return Err(self.violation());
        }
        Ok(v)
    }

    fn write_heap_word(&mut self, pos: usize, k: usize, addr: u32, v: u32) -> Result<(), VmError> {
        self.set_heap_word(addr, v);
        if k >= 2 {
            for (i, byte) in v.to_le_bytes().iter().enumerate() {
                if !self
                    .tracker
                    .write(self.mem_mode, pos, ByteKey::Heap(addr + i as u32), *byte)
                {
                    return Err(self.violation());
                }
            }
        }
        Ok(())
    }

    fn write_heap_byte(&mut self, pos: usize, k: usize, addr: u32, v: u8) -> Result<(), VmError> {
        self.heap.bytes_mut(addr, 1)[0] = v;
        if k >= 2 && !self.tracker.write(self.mem_mode, pos, ByteKey::Heap(addr), v) {
            return Err(self.violation());
        }
        Ok(())
    }

    // --- Per-thread execution ---

    fn exec_thread(
        &mut self,
        op: Op,
        imm: Imm,
        t: ThreadId,
        pos: usize,
        k: usize,
    ) -> Result<(), VmError> {
        let pc = self.stored_pc;

        match op {
            Op::Noop | Op::BreakOut | Op::BreakSlot => {}

            Op::PushC => {
                let Imm::I32(v) = imm else { unreachable!() };
                self.threads.get_mut(t).op_stack.push_i32(v);
            }

            Op::PushB => {
                let Imm::U8(v) = imm else { unreachable!() };
                self.threads.get_mut(t).op_stack.push_u32(u32::from(v));
            }

            Op::Fbase => {
                let base = self.frames.last().map_or(0, |f| f.base);
                self.threads.get_mut(t).op_stack.push_u32(base);
            }

            Op::Size => {
                let thread = self.threads.get_mut(t);
                let a = thread.op_stack.pop_u32();
                let d = thread.op_stack.pop_u32();
                let n_dim = self.read_mem_word(t, pos, k, a + 4)?;
                if d >= n_dim {
                    return Err(VmError::DimRange { dim: d, n_dim, pc });
                }
                let size = self.read_mem_word(t, pos, k, a + 4 * (d + 2))?;
                self.threads.get_mut(t).op_stack.push_u32(size);
            }

            Op::Ldc => {
                let a = self.threads.get_mut(t).op_stack.pop_u32();
                let v = self.read_mem_word(t, pos, k, a)?;
                self.threads.get_mut(t).op_stack.push_u32(v);
            }

            Op::Ldb => {
                let a = self.threads.get_mut(t).op_stack.pop_u32();
                let v = self.read_mem_byte(t, pos, k, a)?;
                self.threads.get_mut(t).op_stack.push_u32(u32::from(v));
            }

            Op::Stc => {
                let thread = self.threads.get_mut(t);
                let a = thread.op_stack.pop_u32();
                let v = thread.op_stack.pop_u32();
                self.write_mem_word(t, pos, k, a, v)?;
            }

            Op::Stb => {
                let thread = self.threads.get_mut(t);
                let a = thread.op_stack.pop_u32();
                let v = thread.op_stack.pop_u32();
                self.write_mem_byte(t, pos, k, a, v as u8)?;
            }

            Op::Ldch => {
                let a = self.threads.get_mut(t).op_stack.pop_u32();
                let v = self.read_heap_word(pos, k, a)?;
                self.threads.get_mut(t).op_stack.push_u32(v);
            }

            Op::Ldbh => {
                let a = self.threads.get_mut(t).op_stack.pop_u32();
                let v = self.read_heap_byte(pos, k, a)?;
                self.threads.get_mut(t).op_stack.push_u32(u32::from(v));
            }

            Op::Stch => {
                let thread = self.threads.get_mut(t);
                let a = thread.op_stack.pop_u32();
                let v = thread.op_stack.pop_u32();
                self.write_heap_word(pos, k, a, v)?;
            }

            Op::Stbh => {
                let thread = self.threads.get_mut(t);
                let a = thread.op_stack.pop_u32();
                let v = thread.op_stack.pop_u32();
                self.write_heap_byte(pos, k, a, v as u8)?;
            }

            Op::Idx => {
                let Imm::U8(n) = imm else { unreachable!() };
                let a = self.threads.get_mut(t).op_stack.pop_u32();
                let mut res: u32 = 0;
                for i in 0..u32::from(n) {
                    let size = self.read_mem_word(t, pos, k, a + 4 * (i + 2))?;
                    let index = self.threads.get_mut(t).op_stack.pop_u32();
                    if index >= size {
                        return Err(VmError::IndexRange { index, size, pc });
                    }
                    res = res.wrapping_mul(size).wrapping_add(index);
                }
                self.threads.get_mut(t).op_stack.push_u32(res);
            }

            Op::Alloc => {
                let c = self.threads.get_mut(t).op_stack.pop_u32();
                let addr = self.heap.top();
                self.heap.alloc(c);
                self.threads.get_mut(t).op_stack.push_u32(addr);
            }

            Op::Sort => self.exec_sort(t)?,

            Op::Sws => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_u32();
                let b = stack.pop_u32();
                stack.push_u32(a);
                stack.push_u32(b);
            }

            Op::Pop => {
                self.threads.get_mut(t).op_stack.pop_u32();
            }

            Op::A2s => {
                let thread = self.threads.get_mut(t);
                let v = thread.acc_stack.peek_u32();
                thread.op_stack.push_u32(v);
            }

            Op::PopA => {
                self.threads.get_mut(t).acc_stack.pop_u32();
            }

            Op::S2a => {
                let thread = self.threads.get_mut(t);
                let v = thread.op_stack.peek_u32();
                thread.acc_stack.push_u32(v);
            }

            Op::Rva => {
                let acc = &mut self.threads.get_mut(t).acc_stack;
                let n = acc.words();
                for i in 0..n / 2 {
                    let lo = acc.word_at(4 * i);
                    let hi = acc.word_at(4 * (n - 1 - i));
                    acc.set_word_at(4 * i, hi);
                    acc.set_word_at(4 * (n - 1 - i), lo);
                }
            }

            Op::Swa => {
                let acc = &mut self.threads.get_mut(t).acc_stack;
                let n = acc.words();
                let lo = acc.word_at(4 * (n - 2));
                let hi = acc.word_at(4 * (n - 1));
                acc.set_word_at(4 * (n - 2), hi);
                acc.set_word_at(4 * (n - 1), lo);
            }

            Op::AddInt
            | Op::SubInt
            | Op::MultInt
            | Op::DivInt
            | Op::ModInt
            | Op::PowInt
            | Op::Or
            | Op::And
            | Op::BitOr
            | Op::BitAnd
            | Op::BitXor
            | Op::EqInt
            | Op::GtInt
            | Op::GeqInt
            | Op::LtInt
            | Op::LeqInt => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_i32();
                let b = stack.pop_i32();
                let r = int_binop(op, a, b).ok_or(VmError::DivisionByZero { pc })?;
                self.threads.get_mut(t).op_stack.push_i32(r);
            }

            Op::AddFloat
            | Op::SubFloat
            | Op::MultFloat
            | Op::DivFloat
            | Op::PowFloat
            | Op::EqFloat
            | Op::GtFloat
            | Op::GeqFloat
            | Op::LtFloat
            | Op::LeqFloat => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_f32();
                let b = stack.pop_f32();
                float_binop(op, a, b, &mut self.threads.get_mut(t).op_stack);
            }

            Op::Not => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_i32();
                stack.push_i32(i32::from(a == 0));
            }

            Op::Float2Int => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_f32();
                stack.push_i32(a as i32);
            }

            Op::Int2Float => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_i32();
                stack.push_f32(a as f32);
            }

            Op::Log => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_i32();
                stack.push_i32(ceil_log2(a));
            }

            Op::Sqrt => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_i32();
                stack.push_i32(ceil_sqrt(a));
            }

            Op::LogF => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_f32();
                stack.push_f32(a.log2());
            }

            Op::SqrtF => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_f32();
                stack.push_f32(a.sqrt());
            }

            Op::LastBit => {
                let stack = &mut self.threads.get_mut(t).op_stack;
                let a = stack.pop_i32();
                let r = if a == 0 {
                    -1
                } else {
                    31 - (a as u32).leading_zeros() as i32
                };
                stack.push_i32(r);
            }

            // Group-level opcodes are handled in `step`.
            _ => unreachable!("group-level opcode {op:?} in per-thread dispatch"),
        }
        Ok(())
    }

    /// Stable sort of a 1-D record array resident on the heap.
    fn exec_sort(&mut self, t: ThreadId) -> Result<(), VmError> {
        let pc = self.stored_pc;
        let thread = self.threads.get_mut(t);
        let addr = thread.op_stack.pop_u32();
        let size = thread.op_stack.pop_u32();
        let offs = thread.op_stack.pop_u32();
        let ty = thread.op_stack.pop_u32();

        let tag = u8::try_from(ty)
            .ok()
            .and_then(|b| ElemTag::try_from(b).ok())
            .ok_or(VmError::BadSortKey { ty, pc })?;
        if offs + tag.size() > size || size == 0 {
            return Err(VmError::KeyOutsideRecord { offs, size, pc });
        }

        let base = self.threads.load_word(t, addr);
        let n = self.threads.load_word(t, addr + 8);
        let total = n * size;
        let payload = self.heap.bytes_mut(base, total).to_vec();

        let mut records: Vec<&[u8]> = payload.chunks_exact(size as usize).collect();
        let offs = offs as usize;
        match tag {
            ElemTag::Int => records.sort_by_key(|r| {
                let mut w = [0_u8; 4];
                w.copy_from_slice(&r[offs..offs + 4]);
                i32::from_le_bytes(w)
            }),
            ElemTag::Float => records.sort_by(|x, y| {
                let mut a = [0_u8; 4];
                let mut b = [0_u8; 4];
                a.copy_from_slice(&x[offs..offs + 4]);
                b.copy_from_slice(&y[offs..offs + 4]);
                f32::from_le_bytes(a).total_cmp(&f32::from_le_bytes(b))
            }),
            ElemTag::Char => records.sort_by_key(|r| r[offs]),
        }

        let sorted = records.concat();
        self.heap.bytes_mut(base, total).copy_from_slice(&sorted);
        Ok(())
    }
}

/// Integer binary operation; `None` signals division by zero.
///
/// The first popped operand `a` is the left-hand side. Arithmetic wraps,
/// matching two's-complement machine behavior.
fn int_binop(op: Op, a: i32, b: i32) -> Option<i32> {
    Some(match op {
        Op::AddInt => a.wrapping_add(b),
        Op::SubInt => a.wrapping_sub(b),
        Op::MultInt => a.wrapping_mul(b),
        Op::DivInt => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        Op::ModInt => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        Op::PowInt => ipow(a, b),
        Op::Or => i32::from(a != 0 || b != 0),
        Op::And => i32::from(a != 0 && b != 0),
        Op::BitOr => a | b,
        Op::BitAnd => a & b,
        Op::BitXor => a ^ b,
        Op::EqInt => i32::from(a == b),
        Op::GtInt => i32::from(a > b),
        Op::GeqInt => i32::from(a >= b),
        Op::LtInt => i32::from(a < b),
        Op::LeqInt => i32::from(a <= b),
        _ => unreachable!("not an integer binop: {op:?}"),
    })
}

/// Float binary operation; comparisons push an integer 0/1.
fn float_binop(op: Op, a: f32, b: f32, stack: &mut ByteStack) {
    match op {
        Op::AddFloat => stack.push_f32(a + b),
        Op::SubFloat => stack.push_f32(a - b),
        Op::MultFloat => stack.push_f32(a * b),
        Op::DivFloat => stack.push_f32(a / b),
        Op::PowFloat => stack.push_f32(a.powf(b)),
        Op::EqFloat => stack.push_i32(i32::from(a == b)),
        Op::GtFloat => stack.push_i32(i32::from(a > b)),
        Op::GeqFloat => stack.push_i32(i32::from(a >= b)),
        Op::LtFloat => stack.push_i32(i32::from(a < b)),
        Op::LeqFloat => stack.push_i32(i32::from(a <= b)),
        _ => unreachable!("not a float binop: {op:?}"),
    }
}

/// Exponentiation by squaring with wrapping multiplication.
fn ipow(mut base: i32, mut exp: i32) -> i32 {
    let mut result = 1_i32;
    while exp != 0 {
        if exp & 1 != 0 {
            result = result.wrapping_mul(base);
        }
        exp /= 2;
        base = base.wrapping_mul(base);
    }
    result
}

/// `ceil(log2(a))`, 0 for `a <= 1`.
fn ceil_log2(a: i32) -> i32 {
    if a <= 1 {
        return 0;
    }
    (32 - ((a - 1) as u32).leading_zeros()) as i32
}

/// `ceil(sqrt(a))`, 0 for `a <= 0`.
fn ceil_sqrt(a: i32) -> i32 {
    if a <= 0 {
        return 0;
    }
    // f64 represents every i32 exactly, so the ceiling is exact.
    f64::from(a).sqrt().ceil() as i32
}
