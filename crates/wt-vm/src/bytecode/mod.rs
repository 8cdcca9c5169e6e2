// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Instruction set of the WT virtual machine.
//!
//! Instructions are a single opcode byte optionally followed by one
//! little-endian immediate (1 or 4 bytes). Operand stack slots are 4 bytes
//! wide; memory holds 4-byte `int`/`float` values and 1-byte `char` values.
//!
//! The decoder is pattern driven: [`decode`] yields the opcode and its typed
//! immediate, [`CodeBuf`] is the matching emitter used by tests and external
//! code generators.


use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Opcode bytes.
///
/// The discriminants are the wire encoding and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Op {
    /// Empty instruction.
    Noop = 0x00,
    /// Push a 4-byte immediate.
    PushC,
    /// Push a 1-byte immediate, zero-extended to 4 bytes.
    PushB,
    /// Push the current frame's base.
    Fbase,
    /// `a, d -> s`: size of array `a` in dimension `d`.
    Size,
    /// `a -> val(a)`: load a 4-byte value from private memory.
    Ldc,
    /// `a -> val(a)`: load 1 byte from private memory, zero-extended.
    Ldb,
    /// `a, v -> `: store a 4-byte value to private memory.
    Stc,
    /// `a, v -> `: store the low byte of `v` to private memory.
    Stb,
    /// As `Ldc`, address relative to the heap.
    Ldch,
    /// As `Ldb`, address relative to the heap.
    Ldbh,
    /// As `Stc`, address relative to the heap.
    Stch,
    /// As `Stb`, address relative to the heap.
    Stbh,
    /// `addr, i_0, ..., i_{n-1} -> hoffs`: row-major element index of an
    /// array access; `n` is the 1-byte immediate.
    Idx,
    /// Swap the two top operand-stack words.
    Sws,
    /// Discard the top operand-stack word.
    Pop,
    /// Copy the accumulator top onto the operand stack.
    A2s,
    /// Discard the accumulator top.
    PopA,
    /// Copy the operand-stack top onto the accumulator.
    S2a,
    /// Reverse the whole accumulator stack.
    Rva,
    /// Swap the two top accumulator words.
    Swa,
    /// `a, b -> a + b` (`i32`).
    AddInt,
    /// `a, b -> a - b` (`i32`).
    SubInt,
    /// `a, b -> a * b` (`i32`).
    MultInt,
    /// `a, b -> a / b` (`i32`).
    DivInt,
    /// `a, b -> a % b` (`i32`).
    ModInt,
    /// `a, b -> a + b` (`f32`).
    AddFloat,
    /// `a, b -> a - b` (`f32`).
    SubFloat,
    /// `a, b -> a * b` (`f32`).
    MultFloat,
    /// `a, b -> a / b` (`f32`).
    DivFloat,
    /// `a, b -> a ^ b` (`i32`, exponentiation by squaring).
    PowInt,
    /// `a, b -> a ^ b` (`f32`).
    PowFloat,
    /// `a -> !a` (0 becomes 1, non-zero becomes 0).
    Not,
    /// `a, b -> a || b` (logical, result 0/1).
    Or,
    /// `a, b -> a && b` (logical, result 0/1).
    And,
    /// `a, b -> a | b` (bitwise).
    BitOr,
    /// `a, b -> a & b` (bitwise).
    BitAnd,
    /// `a, b -> a ^ b` (bitwise).
    BitXor,
    /// `a, b -> a == b` (`i32`).
    EqInt,
    /// `a, b -> a == b` (`f32`).
    EqFloat,
    /// `a, b -> a > b` (`i32`).
    GtInt,
    /// `a, b -> a > b` (`f32`).
    GtFloat,
    /// `a, b -> a >= b` (`i32`).
    GeqInt,
    /// `a, b -> a >= b` (`f32`).
    GeqFloat,
    /// `a, b -> a < b` (`i32`).
    LtInt,
    /// `a, b -> a < b` (`f32`).
    LtFloat,
    /// `a, b -> a <= b` (`i32`).
    LeqInt,
    /// `a, b -> a <= b` (`f32`).
    LeqFloat,
    /// Relative jump (4-byte signed immediate), taken only by a non-empty
    /// group.
    Jmp,
    /// Call the function with the given fnmap index (4-byte immediate).
    Call,
    /// Return from the current frame.
    Return,
    /// Cast the operand-stack top from `f32` to `i32`.
    Float2Int,
    /// Cast the operand-stack top from `i32` to `f32`.
    Int2Float,
    /// `addr, n -> `: fork `n` child threads per thread; child `j` stores
    /// `j` at its private `addr`.
    Fork,
    /// `c -> `: partition the active group on `c` (non-zero group first,
    /// zero group on top).
    Split,
    /// Remove the active group.
    Join,
    /// Remove the active group, then relative jump (4-byte immediate).
    JoinJmp,
    /// Set the `returned` flag on every member of the active group.
    Setr,
    /// Snapshot heap and private-memory tops onto the current frame.
    MemMark,
    /// Restore heap and private-memory tops from the current frame.
    MemFree,
    /// `c -> addr`: allocate `c` heap bytes, push the old heap top.
    Alloc,
    /// Halt the machine.
    EndVm,
    /// `c -> d`: 0-based index of the most significant set bit (-1 for 0).
    LastBit,
    /// `addr, size, offs, type -> `: stable sort of the 1-D array at
    /// `addr` by the key of `type` found at byte `offs` of each `size`-byte
    /// record.
    Sort,
    /// `a -> log2(a)` (`f32`).
    LogF,
    /// `a -> ceil(log2(a))` (`i32`).
    Log,
    /// `a -> ceil(sqrt(a))` (`i32`).
    Sqrt,
    /// `a -> sqrt(a)` (`f32`).
    SqrtF,
    /// `a -> `: fire breakpoint `id` (4-byte immediate) if `a` is non-zero.
    Break,
    /// Debugger hint, retired as a no-op.
    BreakOut,
    /// Debugger hint, retired as a no-op.
    BreakSlot,
}

/// Width class of an opcode's immediate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmKind {
    /// No immediate.
    None,
    /// One unsigned byte (`PushB`, `Idx`).
    U8,
    /// Four-byte signed word (`PushC`, `Jmp`, `JoinJmp`).
    I32,
    /// Four-byte unsigned word (`Call`, `Break`).
    U32,
}

/// A decoded immediate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imm {
    /// No immediate.
    None,
    /// One unsigned byte.
    U8(u8),
    /// Four-byte signed word.
    I32(i32),
    /// Four-byte unsigned word.
    U32(u32),
}

impl Op {
    /// Immediate class of this opcode.
    #[must_use]
    pub const fn imm_kind(self) -> ImmKind {
        match self {
            Self::PushC | Self::Jmp | Self::JoinJmp => ImmKind::I32,
            Self::Call | Self::Break => ImmKind::U32,
            Self::PushB | Self::Idx => ImmKind::U8,
            _ => ImmKind::None,
        }
    }

    /// Immediate length in bytes.
    #[must_use]
    pub const fn imm_len(self) -> usize {
        match self.imm_kind() {
            ImmKind::None => 0,
            ImmKind::U8 => 1,
            ImmKind::I32 | ImmKind::U32 => 4,
        }
    }

    /// Assembly mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Noop => "NOOP",
            Self::PushC => "PUSHC",
            Self::PushB => "PUSHB",
            Self::Fbase => "FBASE",
            Self::Size => "SIZE",
            Self::Ldc => "LDC",
            Self::Ldb => "LDB",
            Self::Stc => "STC",
            Self::Stb => "STB",
            Self::Ldch => "LDCH",
            Self::Ldbh => "LDBH",
            Self::Stch => "STCH",
            Self::Stbh => "STBH",
            Self::Idx => "IDX",
            Self::Sws => "SWS",
            Self::Pop => "POP",
            Self::A2s => "A2S",
            Self::PopA => "POPA",
            Self::S2a => "S2A",
            Self::Rva => "RVA",
            Self::Swa => "SWA",
            Self::AddInt => "ADD_INT",
            Self::SubInt => "SUB_INT",
            Self::MultInt => "MULT_INT",
            Self::DivInt => "DIV_INT",
            Self::ModInt => "MOD_INT",
            Self::AddFloat => "ADD_FLOAT",
            Self::SubFloat => "SUB_FLOAT",
            Self::MultFloat => "MULT_FLOAT",
            Self::DivFloat => "DIV_FLOAT",
            Self::PowInt => "POW_INT",
            Self::PowFloat => "POW_FLOAT",
            Self::Not => "NOT",
            Self::Or => "OR",
            Self::And => "AND",
            Self::BitOr => "BIT_OR",
            Self::BitAnd => "BIT_AND",
            Self::BitXor => "BIT_XOR",
            Self::EqInt => "EQ_INT",
            Self::EqFloat => "EQ_FLOAT",
            Self::GtInt => "GT_INT",
            Self::GtFloat => "GT_FLOAT",
            Self::GeqInt => "GEQ_INT",
            Self::GeqFloat => "GEQ_FLOAT",
            Self::LtInt => "LT_INT",
            Self::LtFloat => "LT_FLOAT",
            Self::LeqInt => "LEQ_INT",
            Self::LeqFloat => "LEQ_FLOAT",
            Self::Jmp => "JMP",
            Self::Call => "CALL",
            Self::Return => "RETURN",
            Self::Float2Int => "FLOAT2INT",
            Self::Int2Float => "INT2FLOAT",
            Self::Fork => "FORK",
            Self::Split => "SPLIT",
            Self::Join => "JOIN",
            Self::JoinJmp => "JOIN_JMP",
            Self::Setr => "SETR",
            Self::MemMark => "MEM_MARK",
            Self::MemFree => "MEM_FREE",
            Self::Alloc => "ALLOC",
            Self::EndVm => "ENDVM",
            Self::LastBit => "LAST_BIT",
            Self::Sort => "SORT",
            Self::LogF => "LOGF",
            Self::Log => "LOG",
            Self::Sqrt => "SQRT",
            Self::SqrtF => "SQRTF",
            Self::Break => "BREAK",
            Self::BreakOut => "BREAKOUT",
            Self::BreakSlot => "BREAKSLOT",
        }
    }
}

/// Decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The byte at `pos` is not a defined opcode.
    #[error("unknown opcode {byte:#04x} at code position {pos}")]
    UnknownOpcode {
        /// The offending byte.
        byte: u8,
        /// Code position of the byte.
        pos: usize,
    },
    /// The code section ends inside an immediate operand.
    #[error("truncated immediate for {op} at code position {pos}")]
    TruncatedImmediate {
        /// Mnemonic of the instruction being decoded.
        op: &'static str,
        /// Code position of the opcode byte.
        pos: usize,
    },
    /// The decode position lies past the end of the code section.
    #[error("code position {pos} is out of bounds")]
    OutOfBounds {
        /// The offending position.
        pos: usize,
    },
}

/// Decode the instruction at `pos`.
///
/// Returns the opcode and its immediate; the instruction occupies
/// `1 + op.imm_len()` bytes.
///
/// # Errors
///
/// [`DecodeError::UnknownOpcode`] for an undefined opcode byte,
/// [`DecodeError::TruncatedImmediate`] if the code ends mid-operand.
pub fn decode(code: &[u8], pos: usize) -> Result<(Op, Imm), DecodeError> {
    let byte = *code.get(pos).ok_or(DecodeError::OutOfBounds { pos })?;
    let op = Op::try_from(byte).map_err(|_| DecodeError::UnknownOpcode { byte, pos })?;

    let imm_bytes = &code[pos + 1..];
    let truncated = DecodeError::TruncatedImmediate {
        op: op.mnemonic(),
        pos,
    };
    let imm = match op.imm_kind() {
        ImmKind::None => Imm::None,
        ImmKind::U8 => Imm::U8(*imm_bytes.first().ok_or(truncated)?),
        ImmKind::I32 => Imm::I32(i32::from_le_bytes(word(imm_bytes).ok_or(truncated)?)),
        ImmKind::U32 => Imm::U32(u32::from_le_bytes(word(imm_bytes).ok_or(truncated)?)),
    };
    Ok((op, imm))
}

fn word(bytes: &[u8]) -> Option<[u8; 4]> {
    let mut w = [0_u8; 4];
    w.copy_from_slice(bytes.get(..4)?);
    Some(w)
}

/// Growable code buffer with typed emit helpers.
///
/// The counterpart of [`decode`]; external code generators and the test
/// suite assemble code sections through it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeBuf {
    code: Vec<u8>,
}

impl CodeBuf {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { code: Vec::new() }
    }

    /// Current emit position in bytes.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.code.len()
    }

    /// Emit an instruction without an immediate.
    pub fn op(&mut self, op: Op) -> &mut Self {
        debug_assert_eq!(op.imm_kind(), ImmKind::None);
        self.code.push(op as u8);
        self
    }

    /// Emit an instruction with a 1-byte immediate.
    pub fn op_u8(&mut self, op: Op, imm: u8) -> &mut Self {
        debug_assert_eq!(op.imm_kind(), ImmKind::U8);
        self.code.push(op as u8);
        self.code.push(imm);
        self
    }

    /// Emit an instruction with a 4-byte signed immediate.
    pub fn op_i32(&mut self, op: Op, imm: i32) -> &mut Self {
        debug_assert_eq!(op.imm_kind(), ImmKind::I32);
        self.code.push(op as u8);
        self.code.extend_from_slice(&imm.to_le_bytes());
        self
    }

    /// Emit an instruction with a 4-byte unsigned immediate.
    pub fn op_u32(&mut self, op: Op, imm: u32) -> &mut Self {
        debug_assert_eq!(op.imm_kind(), ImmKind::U32);
        self.code.push(op as u8);
        self.code.extend_from_slice(&imm.to_le_bytes());
        self
    }

    /// Emit `PUSHC` with a float immediate (its bit pattern).
    pub fn pushc_f32(&mut self, imm: f32) -> &mut Self {
        self.op_i32(Op::PushC, imm.to_bits() as i32)
    }

    /// Finish and take the raw code bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.code
    }

    /// Raw code bytes emitted so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.code
    }
}

/// Render a code section as one mnemonic line per instruction.
///
/// Undecodable bytes are rendered as `???` and skipped one byte at a time,
/// so a partially corrupt section still dumps.
#[must_use]
pub fn disassemble(code: &[u8]) -> String {
    use core::fmt::Write as _;

    let mut out = String::new();
    let mut pos = 0;
    while pos < code.len() {
        match decode(code, pos) {
            Ok((op, imm)) => {
                let _ = write!(out, "{pos:04} {}", op.mnemonic());
                match imm {
                    Imm::None => {}
                    Imm::U8(v) => {
                        let _ = write!(out, " {v}");
                    }
                    Imm::I32(v) => {
                        let _ = write!(out, " {v}");
                    }
                    Imm::U32(v) => {
                        let _ = write!(out, " {v}");
                    }
                }
                out.push('\n');
                pos += 1 + op.imm_len();
            }
            Err(_) => {
                let _ = writeln!(out, "{pos:04} ???");
                pos += 1;
            }
        }
    }
    out
}
