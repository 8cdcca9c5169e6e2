// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the virtual machine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod arithmetic_test;

use crate::bytecode::CodeBuf;
use crate::loader::{Image, MemMode};

use super::*;

/// Image with the given static-memory size and code, CREW mode.
fn image(global_size: u32, code: CodeBuf) -> Image {
    image_mode(global_size, MemMode::Crew, code)
}

fn image_mode(global_size: u32, mem_mode: MemMode, code: CodeBuf) -> Image {
    Image {
        global_size,
        mem_mode,
        code: code.into_bytes(),
        ..Image::default()
    }
}

/// Build a machine and run it to the halt.
fn run(global_size: u32, code: CodeBuf) -> Vm {
    let mut vm = Vm::from_image(image(global_size, code));
    let outcome = vm.execute(-1).expect("program should not fault");
    assert_eq!(outcome, Outcome::Halted);
    vm
}

/// Run a machine expected to fault, returning the error.
fn run_err(global_size: u32, code: CodeBuf) -> VmError {
    let mut vm = Vm::from_image(image(global_size, code));
    let err = vm.execute(-1).expect_err("program should fault");
    assert_eq!(vm.state(), VmState::Error);
    err
}

/// Top of the root thread's operand stack as a signed word.
fn top_i32(vm: &Vm) -> i32 {
    vm.threads.get(vm.root_thread()).op_stack.peek_u32() as i32
}

/// Top of the root thread's operand stack as a float.
fn top_f32(vm: &Vm) -> f32 {
    f32::from_bits(vm.threads.get(vm.root_thread()).op_stack.peek_u32())
}

/// Operand-stack depth (in words) of the root thread.
fn depth(vm: &Vm) -> u32 {
    vm.threads.get(vm.root_thread()).op_stack.words()
}

/// Word of static memory as seen by the root thread.
fn mem_i32(vm: &mut Vm, addr: u32) -> i32 {
    let root = vm.root_thread();
    vm.threads.load_word(root, addr) as i32
}
