// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Debugging information carried in the optional DEBUG section.
//!
//! The section records where code came from: source file names, function
//! names, lexical items with source ranges, two run-length code maps
//! (code position to lexical item, code position to scope), a static-type
//! table, and per-scope variable tables. The VM only requires that the
//! section parses and re-emits position-consistently; interpretation is
//! the debugger's business.

#[cfg(test)]
mod debug_test;

use crate::loader::{LoadError, SliceReader, put_cstr, put_i32, put_u32};

/// Source range of one lexical item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemInfo {
    /// Index into the file table.
    pub file: u32,
    /// First line of the item.
    pub first_line: u32,
    /// First column of the item.
    pub first_col: u32,
    /// Last line of the item.
    pub last_line: u32,
    /// Last column of the item.
    pub last_col: u32,
}

/// Run-length map from code positions to values.
///
/// Stores breakpoints `bp[0] < bp[1] < ...`; every code position in
/// `bp[i]..bp[i+1]` maps to `val[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeMap {
    /// Sorted code positions where the value changes.
    pub bp: Vec<u32>,
    /// Value for each run.
    pub val: Vec<i32>,
}

impl CodeMap {
    /// Index of the run covering `pos`, or `None` before the first
    /// breakpoint.
    #[must_use]
    pub fn find(&self, pos: u32) -> Option<usize> {
        match self.bp.binary_search(&pos) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        }
    }

    /// Value at code position `pos`, if covered.
    #[must_use]
    pub fn value_at(&self, pos: u32) -> Option<i32> {
        self.find(pos).map(|i| self.val[i])
    }

    fn parse(r: &mut SliceReader<'_>) -> Result<Self, LoadError> {
        let n = r.u32()?;
        let mut map = Self::default();
        for _ in 0..n {
            map.bp.push(r.u32()?);
            map.val.push(r.i32()?);
        }
        Ok(map)
    }

    fn write(&self, out: &mut Vec<u8>) {
        put_u32(out, self.bp.len() as u32);
        for (bp, val) in self.bp.iter().zip(&self.val) {
            put_u32(out, *bp);
            put_i32(out, *val);
        }
    }
}

/// One entry of the static-type table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeInfo {
    /// Type name.
    pub name: String,
    /// Member names in declaration order.
    pub member_names: Vec<String>,
    /// Member type indices, parallel to `member_names`.
    pub member_types: Vec<u32>,
}

/// One variable of a lexical scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarInfo {
    /// Variable name.
    pub name: String,
    /// Index into the type table.
    pub type_idx: u32,
    /// Number of array dimensions (0 for scalars).
    pub num_dim: u32,
    /// Code position where the variable becomes live.
    pub from_code: u32,
    /// Address in static memory.
    pub addr: u32,
}

/// One lexical scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeInfo {
    /// Index of the parent scope.
    pub parent: u32,
    /// Variables declared in this scope.
    pub vars: Vec<VarInfo>,
}

/// Parsed DEBUG section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugInfo {
    /// Names of the source files.
    pub files: Vec<String>,
    /// Function names.
    pub fn_names: Vec<String>,
    /// Lexical-item index of each function, parallel to `fn_names`.
    pub fn_items: Vec<u32>,
    /// Lexical items with source ranges.
    pub items: Vec<ItemInfo>,
    /// Map from code position to lexical item.
    pub source_map: CodeMap,
    /// Static-type table.
    pub types: Vec<TypeInfo>,
    /// Map from code position to scope.
    pub scope_map: CodeMap,
    /// Scope table.
    pub scopes: Vec<ScopeInfo>,
}

impl DebugInfo {
    /// Parse the section body (after the tag byte).
    ///
    /// # Errors
    ///
    /// A [`LoadError`] on truncation or malformed strings.
    pub(crate) fn parse(r: &mut SliceReader<'_>) -> Result<Self, LoadError> {
        let mut info = Self::default();

        let n_files = r.u32()?;
        for _ in 0..n_files {
            info.files.push(r.cstr()?);
        }

        let n_fn = r.u32()?;
        for _ in 0..n_fn {
            info.fn_items.push(r.u32()?);
            info.fn_names.push(r.cstr()?);
        }

        let n_items = r.u32()?;
        for _ in 0..n_items {
            info.items.push(ItemInfo {
                file: r.u32()?,
                first_line: r.u32()?,
                first_col: r.u32()?,
                last_line: r.u32()?,
                last_col: r.u32()?,
            });
        }

        info.source_map = CodeMap::parse(r)?;

        let n_types = r.u32()?;
        for _ in 0..n_types {
            let name = r.cstr()?;
            let n_members = r.u32()?;
            let mut ty = TypeInfo {
                name,
                ..TypeInfo::default()
            };
            for _ in 0..n_members {
                ty.member_names.push(r.cstr()?);
                ty.member_types.push(r.u32()?);
            }
            info.types.push(ty);
        }

        info.scope_map = CodeMap::parse(r)?;

        let n_scopes = r.u32()?;
        for _ in 0..n_scopes {
            let parent = r.u32()?;
            let n_vars = r.u32()?;
            let mut scope = ScopeInfo {
                parent,
                vars: Vec::with_capacity(n_vars as usize),
            };
            for _ in 0..n_vars {
                scope.vars.push(VarInfo {
                    name: r.cstr()?,
                    type_idx: r.u32()?,
                    num_dim: r.u32()?,
                    from_code: r.u32()?,
                    addr: r.u32()?,
                });
            }
            info.scopes.push(scope);
        }

        Ok(info)
    }

    /// Serialize the section body (after the tag byte).
    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        put_u32(out, self.files.len() as u32);
        for file in &self.files {
            put_cstr(out, file);
        }

        put_u32(out, self.fn_names.len() as u32);
        for (item, name) in self.fn_items.iter().zip(&self.fn_names) {
            put_u32(out, *item);
            put_cstr(out, name);
        }

        put_u32(out, self.items.len() as u32);
        for item in &self.items {
            put_u32(out, item.file);
            put_u32(out, item.first_line);
            put_u32(out, item.first_col);
            put_u32(out, item.last_line);
            put_u32(out, item.last_col);
        }

        self.source_map.write(out);

        put_u32(out, self.types.len() as u32);
        for ty in &self.types {
            put_cstr(out, &ty.name);
            put_u32(out, ty.member_names.len() as u32);
            for (name, idx) in ty.member_names.iter().zip(&ty.member_types) {
                put_cstr(out, name);
                put_u32(out, *idx);
            }
        }

        self.scope_map.write(out);

        put_u32(out, self.scopes.len() as u32);
        for scope in &self.scopes {
            put_u32(out, scope.parent);
            put_u32(out, scope.vars.len() as u32);
            for var in &scope.vars {
                put_cstr(out, &var.name);
                put_u32(out, var.type_idx);
                put_u32(out, var.num_dim);
                put_u32(out, var.from_code);
                put_u32(out, var.addr);
            }
        }
    }
}
