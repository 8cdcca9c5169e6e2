// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for DEBUG section parsing and emission.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::loader::SliceReader;

use super::*;

fn sample_info() -> DebugInfo {
    DebugInfo {
        files: vec!["main.wt".into(), "lib/util.wt".into()],
        fn_names: vec!["main".into(), "helper".into()],
        fn_items: vec![0, 1],
        items: vec![
            ItemInfo {
                file: 0,
                first_line: 1,
                first_col: 1,
                last_line: 4,
                last_col: 2,
            },
            ItemInfo {
                file: 1,
                first_line: 10,
                first_col: 3,
                last_line: 12,
                last_col: 1,
            },
        ],
        source_map: CodeMap {
            bp: vec![0, 8, 20],
            val: vec![0, 1, -1],
        },
        types: vec![TypeInfo {
            name: "point".into(),
            member_names: vec!["x".into(), "y".into()],
            member_types: vec![0, 0],
        }],
        scope_map: CodeMap {
            bp: vec![0],
            val: vec![0],
        },
        scopes: vec![ScopeInfo {
            parent: 0,
            vars: vec![VarInfo {
                name: "n".into(),
                type_idx: 0,
                num_dim: 0,
                from_code: 4,
                addr: 16,
            }],
        }],
    }
}

#[test]
fn round_trip() {
    let info = sample_info();
    let mut bytes = Vec::new();
    info.write(&mut bytes);

    let mut r = SliceReader::new(&bytes);
    let parsed = DebugInfo::parse(&mut r).unwrap();
    assert_eq!(parsed, info);
    assert_eq!(r.remaining(), 0, "parse must consume the whole section");
}

#[test]
fn empty_round_trip() {
    let info = DebugInfo::default();
    let mut bytes = Vec::new();
    info.write(&mut bytes);

    let mut r = SliceReader::new(&bytes);
    assert_eq!(DebugInfo::parse(&mut r).unwrap(), info);
}

#[test]
fn truncated_fails() {
    let info = sample_info();
    let mut bytes = Vec::new();
    info.write(&mut bytes);
    bytes.truncate(bytes.len() - 3);

    let mut r = SliceReader::new(&bytes);
    assert!(DebugInfo::parse(&mut r).is_err());
}

#[test]
fn code_map_find() {
    let map = CodeMap {
        bp: vec![0, 8, 20],
        val: vec![7, 8, 9],
    };
    assert_eq!(map.find(0), Some(0));
    assert_eq!(map.find(5), Some(0));
    assert_eq!(map.find(8), Some(1));
    assert_eq!(map.find(19), Some(1));
    assert_eq!(map.find(20), Some(2));
    assert_eq!(map.find(1000), Some(2));
}

#[test]
fn code_map_find_before_first() {
    let map = CodeMap {
        bp: vec![4],
        val: vec![1],
    };
    assert_eq!(map.find(0), None);
    assert_eq!(map.value_at(0), None);
    assert_eq!(map.value_at(4), Some(1));
}

#[test]
fn empty_code_map() {
    let map = CodeMap::default();
    assert_eq!(map.find(0), None);
}
