// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Arithmetic, logic, comparison, and conversion instructions.

use crate::bytecode::{CodeBuf, Op};

use super::*;

/// Run `lhs OP rhs` on a single thread and return the result word.
///
/// The right operand is pushed first; the left operand ends up on top.
fn int_binop(op: Op, lhs: i32, rhs: i32) -> i32 {
    let mut code = CodeBuf::new();
    code.op_i32(Op::PushC, rhs)
        .op_i32(Op::PushC, lhs)
        .op(op)
        .op(Op::EndVm);
    let vm = run(0, code);
    top_i32(&vm)
}

fn float_binop(op: Op, lhs: f32, rhs: f32) -> f32 {
    let mut code = CodeBuf::new();
    code.pushc_f32(rhs).pushc_f32(lhs).op(op).op(Op::EndVm);
    let vm = run(0, code);
    top_f32(&vm)
}

fn int_unop(op: Op, a: i32) -> i32 {
    let mut code = CodeBuf::new();
    code.op_i32(Op::PushC, a).op(op).op(Op::EndVm);
    let vm = run(0, code);
    top_i32(&vm)
}

#[test]
fn integer_arithmetic() {
    assert_eq!(int_binop(Op::AddInt, 2, 3), 5);
    assert_eq!(int_binop(Op::SubInt, 2, 3), -1);
    assert_eq!(int_binop(Op::MultInt, -4, 3), -12);
    assert_eq!(int_binop(Op::DivInt, 7, 2), 3);
    assert_eq!(int_binop(Op::DivInt, -7, 2), -3);
    assert_eq!(int_binop(Op::ModInt, 7, 3), 1);
    assert_eq!(int_binop(Op::ModInt, -7, 3), -1);
}

#[test]
fn integer_arithmetic_wraps() {
    assert_eq!(int_binop(Op::AddInt, i32::MAX, 1), i32::MIN);
    assert_eq!(int_binop(Op::MultInt, i32::MIN, -1), i32::MIN);
}

#[test]
fn integer_power() {
    assert_eq!(int_binop(Op::PowInt, 2, 10), 1024);
    assert_eq!(int_binop(Op::PowInt, 3, 0), 1);
    assert_eq!(int_binop(Op::PowInt, -2, 3), -8);
    assert_eq!(int_binop(Op::PowInt, 1, 31), 1);
}

#[test]
fn division_by_zero_is_fatal() {
    let mut code = CodeBuf::new();
    code.op_i32(Op::PushC, 0)
        .op_i32(Op::PushC, 1)
        .op(Op::DivInt)
        .op(Op::EndVm);
    assert!(matches!(
        run_err(0, code),
        VmError::DivisionByZero { pc: 10 }
    ));
}

#[test]
fn modulo_by_zero_is_fatal() {
    let mut code = CodeBuf::new();
    code.op_i32(Op::PushC, 0)
        .op_i32(Op::PushC, 1)
        .op(Op::ModInt)
        .op(Op::EndVm);
    assert!(matches!(run_err(0, code), VmError::DivisionByZero { .. }));
}

#[test]
fn float_arithmetic() {
    assert_eq!(float_binop(Op::AddFloat, 1.5, 2.25), 3.75);
    assert_eq!(float_binop(Op::SubFloat, 1.0, 0.5), 0.5);
    assert_eq!(float_binop(Op::MultFloat, 2.0, 3.5), 7.0);
    assert_eq!(float_binop(Op::DivFloat, 1.0, 4.0), 0.25);
    assert_eq!(float_binop(Op::PowFloat, 2.0, 0.5), 2.0_f32.sqrt());
}

#[test]
fn boolean_logic() {
    assert_eq!(int_binop(Op::Or, 0, 0), 0);
    assert_eq!(int_binop(Op::Or, 3, 0), 1);
    assert_eq!(int_binop(Op::And, 3, 0), 0);
    assert_eq!(int_binop(Op::And, 3, -1), 1);
    assert_eq!(int_unop(Op::Not, 0), 1);
    assert_eq!(int_unop(Op::Not, 5), 0);
}

#[test]
fn bitwise_ops() {
    assert_eq!(int_binop(Op::BitOr, 0b1100, 0b1010), 0b1110);
    assert_eq!(int_binop(Op::BitAnd, 0b1100, 0b1010), 0b1000);
    assert_eq!(int_binop(Op::BitXor, 0b1100, 0b1010), 0b0110);
}

#[test]
fn integer_comparisons() {
    assert_eq!(int_binop(Op::EqInt, 4, 4), 1);
    assert_eq!(int_binop(Op::EqInt, 4, 5), 0);
    assert_eq!(int_binop(Op::GtInt, 5, 4), 1);
    assert_eq!(int_binop(Op::GtInt, 4, 4), 0);
    assert_eq!(int_binop(Op::GeqInt, 4, 4), 1);
    assert_eq!(int_binop(Op::LtInt, -1, 0), 1);
    assert_eq!(int_binop(Op::LeqInt, 1, 0), 0);
}

#[test]
fn float_comparisons() {
    let cmp = |op, lhs: f32, rhs: f32| {
        let mut code = CodeBuf::new();
        code.pushc_f32(rhs).pushc_f32(lhs).op(op).op(Op::EndVm);
        top_i32(&run(0, code))
    };
    assert_eq!(cmp(Op::EqFloat, 1.5, 1.5), 1);
    assert_eq!(cmp(Op::GtFloat, 2.0, 1.0), 1);
    assert_eq!(cmp(Op::GeqFloat, 1.0, 1.0), 1);
    assert_eq!(cmp(Op::LtFloat, -0.5, 0.0), 1);
    assert_eq!(cmp(Op::LeqFloat, 0.5, 0.0), 0);
}

#[test]
fn conversions_truncate_and_extend() {
    let mut code = CodeBuf::new();
    code.pushc_f32(2.9).op(Op::Float2Int).op(Op::EndVm);
    assert_eq!(top_i32(&run(0, code)), 2);

    let mut code = CodeBuf::new();
    code.pushc_f32(-2.9).op(Op::Float2Int).op(Op::EndVm);
    assert_eq!(top_i32(&run(0, code)), -2);

    let mut code = CodeBuf::new();
    code.op_i32(Op::PushC, -3).op(Op::Int2Float).op(Op::EndVm);
    assert_eq!(top_f32(&run(0, code)), -3.0);
}

#[test]
fn extended_numerics() {
    assert_eq!(int_unop(Op::Log, 1), 0);
    assert_eq!(int_unop(Op::Log, 2), 1);
    assert_eq!(int_unop(Op::Log, 3), 2);
    assert_eq!(int_unop(Op::Log, 8), 3);
    assert_eq!(int_unop(Op::Log, 9), 4);

    assert_eq!(int_unop(Op::Sqrt, 0), 0);
    assert_eq!(int_unop(Op::Sqrt, 16), 4);
    assert_eq!(int_unop(Op::Sqrt, 17), 5);

    assert_eq!(int_unop(Op::LastBit, 0), -1);
    assert_eq!(int_unop(Op::LastBit, 1), 0);
    assert_eq!(int_unop(Op::LastBit, 8), 3);
    assert_eq!(int_unop(Op::LastBit, 12), 3);
}

#[test]
fn float_numerics() {
    let mut code = CodeBuf::new();
    code.pushc_f32(8.0).op(Op::LogF).op(Op::EndVm);
    assert_eq!(top_f32(&run(0, code)), 3.0);

    let mut code = CodeBuf::new();
    code.pushc_f32(2.25).op(Op::SqrtF).op(Op::EndVm);
    assert_eq!(top_f32(&run(0, code)), 1.5);
}

#[test]
fn pushb_zero_extends() {
    let mut code = CodeBuf::new();
    code.op_u8(Op::PushB, 0xff).op(Op::EndVm);
    let vm = run(0, code);
    assert_eq!(top_i32(&vm), 255);
}

#[test]
fn stack_shuffling() {
    // SWS swaps the two top words.
    let mut code = CodeBuf::new();
    code.op_i32(Op::PushC, 1)
        .op_i32(Op::PushC, 2)
        .op(Op::Sws)
        .op(Op::Pop)
        .op(Op::EndVm);
    let vm = run(0, code);
    assert_eq!(top_i32(&vm), 2, "POP discarded the swapped-down 1");
}

#[test]
fn accumulator_staging() {
    // S2A copies without popping; A2S copies back; POPA discards.
    let mut code = CodeBuf::new();
    code.op_i32(Op::PushC, 7)
        .op(Op::S2a)
        .op(Op::Pop)
        .op(Op::A2s)
        .op(Op::PopA)
        .op(Op::EndVm);
    let vm = run(0, code);
    assert_eq!(top_i32(&vm), 7);
    assert_eq!(depth(&vm), 1);
    assert_eq!(vm.threads.get(vm.root_thread()).acc_stack.top(), 0);
}

#[test]
fn accumulator_reverse_and_swap() {
    // Stage 1,2,3 on the accumulator, reverse, and drain via A2S/POPA.
    let mut code = CodeBuf::new();
    for v in [1, 2, 3] {
        code.op_i32(Op::PushC, v).op(Op::S2a).op(Op::Pop);
    }
    code.op(Op::Rva); // acc now 3,2,1 (top = 1)
    code.op(Op::Swa); // acc now 3,1,2 (top = 2)
    code.op(Op::A2s).op(Op::PopA);
    code.op(Op::A2s).op(Op::PopA);
    code.op(Op::A2s).op(Op::PopA);
    code.op(Op::EndVm);
    let vm = run(0, code);

    let stack = &vm.threads.get(vm.root_thread()).op_stack;
    assert_eq!(stack.words(), 3);
    assert_eq!(stack.word_at(0), 2, "first drained: old acc top after SWA");
    assert_eq!(stack.word_at(4), 1);
    assert_eq!(stack.word_at(8), 3);
}
