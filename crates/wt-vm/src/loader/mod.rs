// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Binary container for compiled WT programs.
//!
//! A binary is a sequence of one-byte-tagged sections in arbitrary order:
//! HEADER (version, global memory size, memory mode), INPUT and OUTPUT
//! (typed I/O variable records), FNMAP (function addresses and operand
//! stack deltas), CODE (raw instructions, runs to the end of the file),
//! and an optional DEBUG section.
//!
//! Parsing is lenient about order and about missing INPUT/OUTPUT/FNMAP
//! (treated as empty); a missing HEADER or CODE section, a bad version
//! byte, or any truncation is a [`LoadError`] carrying the byte offset.


use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::debug::DebugInfo;
use crate::layout::ElemTag;

/// Container format version this implementation reads and writes.
pub const VERSION: u8 = 1;

/// Section tag bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum SectionTag {
    /// Version, global memory size, memory mode.
    Header = 0x77,
    /// Input variable records.
    Input = 0x88,
    /// Output variable records.
    Output = 0x99,
    /// Function map records.
    Fnmap = 0xaa,
    /// Raw instruction bytes, running to the end of the binary.
    Code = 0xbb,
    /// Optional debugging information.
    Debug = 0xcc,
}

/// Concurrent-memory-access policy, recorded in the HEADER section.
///
/// The mode byte shares the numeric value `0x77` with
/// [`SectionTag::Header`]; the two live in separate namespaces and are
/// never decoded from the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum MemMode {
    /// Exclusive read, exclusive write.
    Erew = 0x75,
    /// Concurrent read, exclusive write (the default).
    Crew = 0x76,
    /// Concurrent read, concurrent write when all writers agree.
    CommonCrcw = 0x77,
}

impl MemMode {
    /// Human-readable mode name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Erew => "EREW",
            Self::Crew => "CREW",
            Self::CommonCrcw => "cCRCW",
        }
    }
}

/// An input or output variable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoVar {
    /// Address of the value (scalar) or array header in static memory.
    pub addr: u32,
    /// 0 for scalars, the number of dimensions for arrays.
    pub num_dim: u8,
    /// Leaf layout of the base type.
    pub layout: Vec<ElemTag>,
}

impl IoVar {
    /// Serialized byte size of one element of the base type.
    #[must_use]
    pub fn elem_size(&self) -> u32 {
        self.layout.iter().map(|tag| tag.size()).sum()
    }
}

/// A function map record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FnEntry {
    /// Absolute address of the function in the code section.
    pub code_addr: u32,
    /// Net operand-stack change of a full call:
    /// `sizeof(return) - sum(sizeof(params))`.
    pub stack_change: i32,
}

/// A parsed binary image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    /// Size of static (global) memory pre-allocated at startup.
    pub global_size: u32,
    /// Concurrent-access policy.
    pub mem_mode: MemMode,
    /// Input variables in declaration order.
    pub in_vars: Vec<IoVar>,
    /// Output variables in declaration order.
    pub out_vars: Vec<IoVar>,
    /// Function map, indexed by `CALL` immediates.
    pub fnmap: Vec<FnEntry>,
    /// Raw instruction bytes.
    pub code: Vec<u8>,
    /// Debugging information, if the binary carries any.
    pub debug: Option<DebugInfo>,
}

impl Default for MemMode {
    fn default() -> Self {
        Self::Crew
    }
}

/// Malformed-binary failure, with the byte offset where parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The binary ends inside a section.
    #[error("unexpected end of binary at offset {offset}")]
    UnexpectedEof {
        /// Offset of the first missing byte.
        offset: usize,
    },
    /// The HEADER version byte is not [`VERSION`].
    #[error("unsupported binary version {0}")]
    BadVersion(u8),
    /// A section tag byte is not defined.
    #[error("unknown section tag {tag:#04x} at offset {offset}")]
    UnknownSection {
        /// The offending byte.
        tag: u8,
        /// Offset of the tag byte.
        offset: usize,
    },
    /// The HEADER memory-mode byte is not defined.
    #[error("unknown memory mode {0:#04x}")]
    UnknownMemMode(u8),
    /// A layout byte in an INPUT/OUTPUT record is not a leaf tag.
    #[error("unknown element tag {tag:#04x} at offset {offset}")]
    UnknownElemTag {
        /// The offending byte.
        tag: u8,
        /// Offset of the tag byte.
        offset: usize,
    },
    /// No HEADER section was found.
    #[error("binary has no header section")]
    MissingHeader,
    /// No CODE section was found.
    #[error("binary has no code section")]
    MissingCode,
    /// A string in the DEBUG section is not valid UTF-8.
    #[error("malformed string at offset {offset}")]
    BadString {
        /// Offset of the string start.
        offset: usize,
    },
}

/// Forward-only reader over the binary with offset tracking.
pub(crate) struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub(crate) const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) const fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn eof(&self) -> LoadError {
        LoadError::UnexpectedEof {
            offset: self.buf.len(),
        }
    }

    pub(crate) fn u8(&mut self) -> Result<u8, LoadError> {
        let mut rest = &self.buf[self.pos..];
        let v = rest.read_u8().map_err(|_| self.eof())?;
        self.pos += 1;
        Ok(v)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, LoadError> {
        let mut rest = &self.buf[self.pos..];
        let v = rest.read_u32::<LittleEndian>().map_err(|_| self.eof())?;
        self.pos += 4;
        Ok(v)
    }

    pub(crate) fn i32(&mut self) -> Result<i32, LoadError> {
        let mut rest = &self.buf[self.pos..];
        let v = rest.read_i32::<LittleEndian>().map_err(|_| self.eof())?;
        self.pos += 4;
        Ok(v)
    }

    /// Read the rest of the binary.
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Read a 0-terminated UTF-8 string.
    pub(crate) fn cstr(&mut self) -> Result<String, LoadError> {
        let start = self.pos;
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.eof())?;
        self.pos += nul + 1;
        String::from_utf8(rest[..nul].to_vec())
            .map_err(|_| LoadError::BadString { offset: start })
    }
}

/// Little-endian append helpers for the emit path.
pub(crate) fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

impl Image {
    /// Parse a binary image.
    ///
    /// # Errors
    ///
    /// A [`LoadError`] describing the malformation and where it was found.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        let mut r = SliceReader::new(bytes);
        let mut image = Self::default();
        let mut seen_header = false;
        let mut seen_code = false;

        while r.remaining() > 0 {
            let tag_offset = r.pos();
            let tag_byte = r.u8()?;
            let tag = SectionTag::try_from(tag_byte).map_err(|_| LoadError::UnknownSection {
                tag: tag_byte,
                offset: tag_offset,
            })?;
            debug!("section {tag:?} at offset {tag_offset}");

            match tag {
                SectionTag::Header => {
                    let version = r.u8()?;
                    if version != VERSION {
                        return Err(LoadError::BadVersion(version));
                    }
                    image.global_size = r.u32()?;
                    let mode = r.u8()?;
                    image.mem_mode =
                        MemMode::try_from(mode).map_err(|_| LoadError::UnknownMemMode(mode))?;
                    seen_header = true;
                }
                SectionTag::Input => image.in_vars = parse_io_vars(&mut r)?,
                SectionTag::Output => image.out_vars = parse_io_vars(&mut r)?,
                SectionTag::Fnmap => {
                    let n = r.u32()?;
                    let mut fnmap = Vec::with_capacity(n as usize);
                    for _ in 0..n {
                        fnmap.push(FnEntry {
                            code_addr: r.u32()?,
                            stack_change: r.i32()?,
                        });
                    }
                    image.fnmap = fnmap;
                }
                SectionTag::Code => {
                    image.code = r.rest().to_vec();
                    seen_code = true;
                }
                SectionTag::Debug => image.debug = Some(DebugInfo::parse(&mut r)?),
            }
        }

        if !seen_header {
            return Err(LoadError::MissingHeader);
        }
        if !seen_code {
            return Err(LoadError::MissingCode);
        }
        Ok(image)
    }

    /// Serialize the image.
    ///
    /// Sections are written in canonical order with CODE last, since CODE
    /// runs to the end of the binary.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.push(SectionTag::Header as u8);
        out.push(VERSION);
        put_u32(&mut out, self.global_size);
        out.push(self.mem_mode as u8);

        if !self.in_vars.is_empty() {
            out.push(SectionTag::Input as u8);
            write_io_vars(&mut out, &self.in_vars);
        }
        if !self.out_vars.is_empty() {
            out.push(SectionTag::Output as u8);
            write_io_vars(&mut out, &self.out_vars);
        }
        if !self.fnmap.is_empty() {
            out.push(SectionTag::Fnmap as u8);
            put_u32(&mut out, self.fnmap.len() as u32);
            for entry in &self.fnmap {
                put_u32(&mut out, entry.code_addr);
                put_i32(&mut out, entry.stack_change);
            }
        }
        if let Some(debug) = &self.debug {
            out.push(SectionTag::Debug as u8);
            debug.write(&mut out);
        }

        out.push(SectionTag::Code as u8);
        out.extend_from_slice(&self.code);
        out
    }
}

fn parse_io_vars(r: &mut SliceReader<'_>) -> Result<Vec<IoVar>, LoadError> {
    let n = r.u32()?;
    let mut vars = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let addr = r.u32()?;
        let num_dim = r.u8()?;
        let layout_len = r.u8()?;
        let mut layout = Vec::with_capacity(layout_len as usize);
        for _ in 0..layout_len {
            let tag_offset = r.pos();
            let tag = r.u8()?;
            layout.push(ElemTag::try_from(tag).map_err(|_| LoadError::UnknownElemTag {
                tag,
                offset: tag_offset,
            })?);
        }
        vars.push(IoVar {
            addr,
            num_dim,
            layout,
        });
    }
    Ok(vars)
}

fn write_io_vars(out: &mut Vec<u8>, vars: &[IoVar]) {
    put_u32(out, vars.len() as u32);
    for var in vars {
        put_u32(out, var.addr);
        out.push(var.num_dim);
        out.push(var.layout.len() as u8);
        for tag in &var.layout {
            out.push(*tag as u8);
        }
    }
}
