// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # WT VM
//!
//! Bytecode virtual machine for the parallel WT language.
//!
//! This crate provides:
//! - The section-tagged binary container (parse and emit)
//! - The type/layout model with assignment cast masks
//! - The stack-oriented instruction set, decoder, and disassembler
//! - A single-threaded simulator of the fork/split/join thread-group
//!   discipline with per-thread private memory inherited from ancestors,
//!   a shared heap, and EREW/CREW/cCRCW access checking
//! - PRAM-style Work/Time cost accounting
//! - Textual input/output marshalling for typed I/O variables
//!
//! The compiler front-end and the CLI drivers live outside this crate;
//! they talk to the VM through [`Image`], [`Vm`], and the `io` module.

pub mod bytecode;
pub mod debug;
pub mod frame;
pub mod io;
pub mod layout;
pub mod loader;
pub mod stack;
pub mod thread;
pub mod vm;

// Re-export commonly used types at crate root
pub use bytecode::{CodeBuf, Op, disassemble};
pub use layout::{CastMask, ElemTag, InferredType, StaticType};
pub use loader::{FnEntry, Image, IoVar, LoadError, MemMode};
pub use vm::{Outcome, Vm, VmError, VmState};
