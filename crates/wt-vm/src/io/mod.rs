// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Input and output marshalling.
//!
//! The textual format is a whitespace-separated token stream. For each
//! input variable in declaration order: a scalar reads one token per
//! layout leaf; an array first reads one size token per declared
//! dimension, allocates the payload on the heap, writes the array header
//! `[heap_base, n_dim, dim_0 ..]` to static memory, and then reads the
//! payload records in row-major order. Output mirrors input, one line per
//! output variable.

#[cfg(test)]
mod io_test;

use std::io::{BufRead, Write};

use thiserror::Error;

use crate::layout::ElemTag;
use crate::vm::Vm;

/// Input marshalling failure.
#[derive(Debug, Error)]
pub enum IoError {
    /// The token stream ended before all input variables were read.
    #[error("unexpected end of input")]
    MissingToken,
    /// A token does not parse as the expected leaf type.
    #[error("invalid {kind} token `{token}`")]
    BadToken {
        /// Expected token kind (`int`, `float`, `size`).
        kind: &'static str,
        /// The offending token.
        token: String,
    },
    /// Underlying reader or writer failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn parse_i32(token: &str) -> Result<i32, IoError> {
    token.parse().map_err(|_| IoError::BadToken {
        kind: "int",
        token: token.to_string(),
    })
}

fn parse_f32(token: &str) -> Result<f32, IoError> {
    token.parse().map_err(|_| IoError::BadToken {
        kind: "float",
        token: token.to_string(),
    })
}

fn parse_dim(token: &str) -> Result<u32, IoError> {
    token.parse().map_err(|_| IoError::BadToken {
        kind: "size",
        token: token.to_string(),
    })
}

/// Read all input variables from `r` into the machine's initial memory.
///
/// # Errors
///
/// [`IoError`] on a short or unparsable token stream.
pub fn read_input<R: BufRead>(r: &mut R, vm: &mut Vm) -> Result<(), IoError> {
    let mut text = String::new();
    r.read_to_string(&mut text)?;
    let mut tokens = text.split_whitespace();
    let mut next = || tokens.next().ok_or(IoError::MissingToken);

    let root = vm.root_thread();
    let vars = vm.in_vars().to_vec();

    for var in &vars {
        if var.num_dim == 0 {
            let mut offs = 0;
            for tag in &var.layout {
                let token = next()?;
                match tag {
                    ElemTag::Int => {
                        let v = parse_i32(token)?;
                        vm.threads.store_word(root, var.addr + offs, v as u32);
                    }
                    ElemTag::Float => {
                        let v = parse_f32(token)?;
                        vm.threads.store_word(root, var.addr + offs, v.to_bits());
                    }
                    ElemTag::Char => {
                        let v = token.as_bytes()[0];
                        vm.threads.store_byte(root, var.addr + offs, v);
                    }
                }
                offs += tag.size();
            }
        } else {
            let mut dims = Vec::with_capacity(var.num_dim as usize);
            let mut count: u32 = 1;
            for _ in 0..var.num_dim {
                let dim = parse_dim(next()?)?;
                count = count.saturating_mul(dim);
                dims.push(dim);
            }

            let elem_size = var.elem_size();
            let base = vm.heap.top();
            vm.heap.alloc(count.saturating_mul(elem_size));

            vm.threads.store_word(root, var.addr, base);
            vm.threads
                .store_word(root, var.addr + 4, u32::from(var.num_dim));
            for (i, dim) in dims.iter().enumerate() {
                vm.threads
                    .store_word(root, var.addr + 4 * (2 + i as u32), *dim);
            }

            for rec in 0..count {
                let mut offs = base + rec * elem_size;
                for tag in &var.layout {
                    let token = next()?;
                    match tag {
                        ElemTag::Int => {
                            let v = parse_i32(token)?;
                            vm.set_heap_word(offs, v as u32);
                        }
                        ElemTag::Float => {
                            let v = parse_f32(token)?;
                            vm.set_heap_word(offs, v.to_bits());
                        }
                        ElemTag::Char => {
                            vm.heap.bytes_mut(offs, 1)[0] = token.as_bytes()[0];
                        }
                    }
                    offs += tag.size();
                }
            }
        }
    }
    Ok(())
}

/// Render one leaf value from raw little-endian bytes.
fn format_leaf(tag: ElemTag, bytes: &[u8]) -> String {
    match tag {
        ElemTag::Int => {
            let mut w = [0_u8; 4];
            w.copy_from_slice(bytes);
            i32::from_le_bytes(w).to_string()
        }
        ElemTag::Float => {
            let mut w = [0_u8; 4];
            w.copy_from_slice(bytes);
            f32::from_le_bytes(w).to_string()
        }
        ElemTag::Char => char::from(bytes[0]).to_string(),
    }
}

/// Write output variable `i` as whitespace-separated tokens plus a
/// newline.
///
/// # Errors
///
/// Propagates writer failures.
///
/// # Panics
///
/// If `i` is not a valid output-variable index.
pub fn write_output<W: Write>(w: &mut W, vm: &mut Vm, i: usize) -> Result<(), IoError> {
    let var = vm.out_vars()[i].clone();
    let root = vm.root_thread();
    let mut tokens = Vec::new();

    if var.num_dim == 0 {
        let mut offs = 0;
        for tag in &var.layout {
            let bytes = vm.threads.get_addr(root, var.addr + offs, tag.size());
            tokens.push(format_leaf(*tag, bytes));
            offs += tag.size();
        }
    } else {
        let base = vm.threads.load_word(root, var.addr);
        let mut count: u32 = 1;
        for j in 0..u32::from(var.num_dim) {
            count = count.saturating_mul(vm.threads.load_word(root, var.addr + 4 * (2 + j)));
        }

        let elem_size = var.elem_size();
        for rec in 0..count {
            let mut offs = base + rec * elem_size;
            for tag in &var.layout {
                let bytes = vm.heap.bytes_mut(offs, tag.size());
                tokens.push(format_leaf(*tag, bytes));
                offs += tag.size();
            }
        }
    }

    writeln!(w, "{}", tokens.join(" "))?;
    Ok(())
}

/// Write every output variable, one line each.
///
/// # Errors
///
/// Propagates writer failures.
pub fn write_outputs<W: Write>(w: &mut W, vm: &mut Vm) -> Result<(), IoError> {
    for i in 0..vm.out_vars().len() {
        write_output(w, vm, i)?;
    }
    Ok(())
}
