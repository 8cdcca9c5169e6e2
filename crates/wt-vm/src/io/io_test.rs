// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for input/output marshalling.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::bytecode::Op;
use crate::layout::ElemTag;
use crate::loader::{Image, IoVar, MemMode};
use crate::vm::Vm;

use super::*;

fn vm_with_io(global_size: u32, in_vars: Vec<IoVar>, out_vars: Vec<IoVar>) -> Vm {
    Vm::from_image(Image {
        global_size,
        mem_mode: MemMode::Crew,
        in_vars,
        out_vars,
        fnmap: Vec::new(),
        code: vec![Op::EndVm as u8],
        debug: None,
    })
}

fn scalar(addr: u32, layout: Vec<ElemTag>) -> IoVar {
    IoVar {
        addr,
        num_dim: 0,
        layout,
    }
}

fn array(addr: u32, num_dim: u8, layout: Vec<ElemTag>) -> IoVar {
    IoVar {
        addr,
        num_dim,
        layout,
    }
}

#[test]
fn scalar_int_round_trip() {
    let var = scalar(0, vec![ElemTag::Int]);
    let mut vm = vm_with_io(4, vec![var.clone()], vec![var]);

    read_input(&mut "-17".as_bytes(), &mut vm).unwrap();
    let root = vm.root_thread();
    assert_eq!(vm.threads.load_word(root, 0) as i32, -17);

    let mut out = Vec::new();
    write_outputs(&mut out, &mut vm).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "-17\n");
}

#[test]
fn scalar_record_reads_all_leaves() {
    // A record {int, float, char} occupies 9 bytes.
    let var = scalar(0, vec![ElemTag::Int, ElemTag::Float, ElemTag::Char]);
    let mut vm = vm_with_io(9, vec![var.clone()], vec![var]);

    read_input(&mut "3 1.5 x".as_bytes(), &mut vm).unwrap();
    let root = vm.root_thread();
    assert_eq!(vm.threads.load_word(root, 0), 3);
    assert_eq!(f32::from_bits(vm.threads.load_word(root, 4)), 1.5);
    assert_eq!(vm.threads.load_byte(root, 8), b'x');

    let mut out = Vec::new();
    write_outputs(&mut out, &mut vm).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "3 1.5 x\n");
}

#[test]
fn array_allocates_heap_and_writes_header() {
    let var = array(0, 1, vec![ElemTag::Int]);
    let mut vm = vm_with_io(12, vec![var], vec![]);

    read_input(&mut "3 10 20 30".as_bytes(), &mut vm).unwrap();
    let root = vm.root_thread();

    let base = vm.threads.load_word(root, 0);
    assert_eq!(vm.threads.load_word(root, 4), 1, "n_dim");
    assert_eq!(vm.threads.load_word(root, 8), 3, "dim_0");
    assert_eq!(vm.heap_word(base) as i32, 10);
    assert_eq!(vm.heap_word(base + 4) as i32, 20);
    assert_eq!(vm.heap_word(base + 8) as i32, 30);
    assert_eq!(vm.heap.top(), base + 12);
}

#[test]
fn array_round_trip() {
    let var = array(0, 1, vec![ElemTag::Int]);
    let mut vm = vm_with_io(12, vec![var.clone()], vec![var]);

    read_input(&mut "4 5 -6 7 8".as_bytes(), &mut vm).unwrap();
    let mut out = Vec::new();
    write_outputs(&mut out, &mut vm).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "5 -6 7 8\n");
}

#[test]
fn two_dim_array_reads_one_size_per_dimension() {
    let var = array(0, 2, vec![ElemTag::Int]);
    let mut vm = vm_with_io(16, vec![var.clone()], vec![var]);

    read_input(&mut "2 3 1 2 3 4 5 6".as_bytes(), &mut vm).unwrap();
    let root = vm.root_thread();
    assert_eq!(vm.threads.load_word(root, 4), 2, "n_dim");
    assert_eq!(vm.threads.load_word(root, 8), 2, "dim_0");
    assert_eq!(vm.threads.load_word(root, 12), 3, "dim_1");

    let mut out = Vec::new();
    write_outputs(&mut out, &mut vm).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "1 2 3 4 5 6\n");
}

#[test]
fn record_array_payload_is_packed() {
    // Records of {int, char} are 5 bytes each on the heap.
    let var = array(0, 1, vec![ElemTag::Int, ElemTag::Char]);
    let mut vm = vm_with_io(12, vec![var], vec![]);

    read_input(&mut "2 7 a 9 b".as_bytes(), &mut vm).unwrap();
    let root = vm.root_thread();
    let base = vm.threads.load_word(root, 0);
    assert_eq!(vm.heap_word(base) as i32, 7);
    assert_eq!(vm.heap.bytes_mut(base + 4, 1)[0], b'a');
    assert_eq!(vm.heap_word(base + 5) as i32, 9);
    assert_eq!(vm.heap.bytes_mut(base + 9, 1)[0], b'b');
}

#[test]
fn multiple_variables_in_declaration_order() {
    let a = scalar(0, vec![ElemTag::Int]);
    let b = array(4, 1, vec![ElemTag::Int]);
    let mut vm = vm_with_io(16, vec![a.clone(), b], vec![a]);

    read_input(&mut "9 2 1 2".as_bytes(), &mut vm).unwrap();
    let root = vm.root_thread();
    assert_eq!(vm.threads.load_word(root, 0), 9);
    assert_eq!(vm.threads.load_word(root, 8), 1, "array n_dim");
}

#[test]
fn missing_token_fails() {
    let var = scalar(0, vec![ElemTag::Int, ElemTag::Int]);
    let mut vm = vm_with_io(8, vec![var], vec![]);
    assert!(matches!(
        read_input(&mut "1".as_bytes(), &mut vm),
        Err(IoError::MissingToken)
    ));
}

#[test]
fn bad_int_token_fails() {
    let var = scalar(0, vec![ElemTag::Int]);
    let mut vm = vm_with_io(4, vec![var], vec![]);
    assert!(matches!(
        read_input(&mut "abc".as_bytes(), &mut vm),
        Err(IoError::BadToken { kind: "int", .. })
    ));
}

#[test]
fn float_accepts_integer_tokens() {
    let var = scalar(0, vec![ElemTag::Float]);
    let mut vm = vm_with_io(4, vec![var], vec![]);
    read_input(&mut "2".as_bytes(), &mut vm).unwrap();
    let root = vm.root_thread();
    assert_eq!(f32::from_bits(vm.threads.load_word(root, 0)), 2.0);
}

#[test]
fn write_output_single_variable() {
    let a = scalar(0, vec![ElemTag::Int]);
    let b = scalar(4, vec![ElemTag::Int]);
    let mut vm = vm_with_io(8, vec![], vec![a, b]);
    let root = vm.root_thread();
    vm.threads.store_word(root, 0, 1);
    vm.threads.store_word(root, 4, 2);

    let mut out = Vec::new();
    write_output(&mut out, &mut vm, 1).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "2\n");
}
