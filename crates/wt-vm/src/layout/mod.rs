// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Type and layout model.
//!
//! Every WT type decomposes into an ordered sequence of primitive leaves
//! (`int`, `float`, `char`): its *layout*. A value of a type occupies
//! exactly the sum of its leaf sizes, serialized in layout order. The code
//! generator drives assignments through per-leaf cast masks computed by
//! [`compatible`].


use bitflags::bitflags;
use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Primitive leaf tag, as stored in INPUT/OUTPUT layout records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum ElemTag {
    /// 4-byte signed integer.
    Int = 0,
    /// 4-byte IEEE float.
    Float = 1,
    /// 1-byte character.
    Char = 2,
}

impl ElemTag {
    /// Serialized size in bytes.
    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            Self::Int | Self::Float => 4,
            Self::Char => 1,
        }
    }
}

/// A named static type.
///
/// `int`, `float`, and `char` are the only leaves; `void` has an empty
/// layout; every other type is a record of members in declaration order.
/// A member's byte offset is the sum of the sizes of the members before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticType {
    /// The `int` leaf.
    Int,
    /// The `float` leaf.
    Float,
    /// The `char` leaf.
    Char,
    /// The empty type.
    Void,
    /// A user-defined record type.
    Record {
        /// Type name.
        name: String,
        /// Ordered member list (name, type).
        members: Vec<(String, StaticType)>,
    },
}

impl StaticType {
    /// Flatten to the ordered leaf-tag sequence.
    #[must_use]
    pub fn layout(&self) -> Vec<ElemTag> {
        let mut tags = Vec::new();
        self.flatten(&mut tags);
        tags
    }

    fn flatten(&self, tags: &mut Vec<ElemTag>) {
        match self {
            Self::Int => tags.push(ElemTag::Int),
            Self::Float => tags.push(ElemTag::Float),
            Self::Char => tags.push(ElemTag::Char),
            Self::Void => {}
            Self::Record { members, .. } => {
                for (_, member) in members {
                    member.flatten(tags);
                }
            }
        }
    }

    /// Total serialized size in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.layout().iter().map(|tag| tag.size()).sum()
    }

    /// Leaf classification.
    ///
    /// # Errors
    ///
    /// [`TypeError::NotBasic`] for `void` and record types.
    pub fn basic(&self) -> Result<ElemTag, TypeError> {
        match self {
            Self::Int => Ok(ElemTag::Int),
            Self::Float => Ok(ElemTag::Float),
            Self::Char => Ok(ElemTag::Char),
            Self::Void | Self::Record { .. } => Err(TypeError::NotBasic(self.name())),
        }
    }

    /// Display name of the type.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Int => "int".into(),
            Self::Float => "float".into(),
            Self::Char => "char".into(),
            Self::Void => "void".into(),
            Self::Record { name, .. } => name.clone(),
        }
    }
}

/// Type inferred for an expression during type checking.
///
/// Either a static type, or the compound shape of an initializer or
/// parameter tuple. Its layout is the concatenation of component layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferredType {
    /// A resolved static type.
    Static(StaticType),
    /// An ordered compound of inferred types.
    List(Vec<InferredType>),
}

impl InferredType {
    /// Flatten to the ordered leaf-tag sequence.
    #[must_use]
    pub fn layout(&self) -> Vec<ElemTag> {
        match self {
            Self::Static(ty) => ty.layout(),
            Self::List(parts) => parts.iter().flat_map(InferredType::layout).collect(),
        }
    }

    /// Total serialized size in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.layout().iter().map(|tag| tag.size()).sum()
    }
}

bitflags! {
    /// Conversion mask for one leaf pair of an assignment, in layout order.
    ///
    /// The source half records how the value sits on the operand stack
    /// (`char` loads zero-extend, so a `char` source is `FROM_INT`); the
    /// destination half selects the conversion and store width.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CastMask: u32 {
        /// Source slot holds an integer word.
        const FROM_INT = 1;
        /// Source slot holds a float word.
        const FROM_FLOAT = 2;
        /// Destination leaf is `int`.
        const TO_INT = 4;
        /// Destination leaf is `float`.
        const TO_FLOAT = 8;
        /// Destination leaf is `char` (1-byte store).
        const TO_CHAR = 16;
    }
}

impl CastMask {
    /// Mask for one allowed leaf pair.
    ///
    /// # Errors
    ///
    /// [`TypeError::FloatToChar`] for the single forbidden conversion.
    pub fn for_pair(dst: ElemTag, src: ElemTag) -> Result<Self, TypeError> {
        if src == ElemTag::Float && dst == ElemTag::Char {
            return Err(TypeError::FloatToChar);
        }
        let from = match src {
            ElemTag::Int | ElemTag::Char => Self::FROM_INT,
            ElemTag::Float => Self::FROM_FLOAT,
        };
        let to = match dst {
            ElemTag::Int => Self::TO_INT,
            ElemTag::Float => Self::TO_FLOAT,
            ElemTag::Char => Self::TO_CHAR,
        };
        Ok(from | to)
    }
}

/// Type-model error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// The two types do not share a branching shape.
    #[error("incompatible types: expected `{expected}`, found `{found}`")]
    ShapeMismatch {
        /// Name of the assignment destination type.
        expected: String,
        /// Name or shape of the source type.
        found: String,
    },
    /// The one forbidden numeric conversion.
    #[error("cannot convert float to char")]
    FloatToChar,
    /// Leaf classification of a non-leaf type.
    #[error("`{0}` is not a basic type")]
    NotBasic(String),
}

/// Structural compatibility of an assignment `dst = src`.
///
/// Compatible types have identical branching shape and only allowed leaf
/// conversions. On success returns one [`CastMask`] per leaf pair in
/// layout order.
///
/// # Errors
///
/// [`TypeError::ShapeMismatch`] or [`TypeError::FloatToChar`].
pub fn compatible(dst: &StaticType, src: &InferredType) -> Result<Vec<CastMask>, TypeError> {
    let mut masks = Vec::new();
    compatible_into(dst, src, &mut masks)?;
    Ok(masks)
}

/// Structural compatibility of two static types.
///
/// # Errors
///
/// As [`compatible`].
pub fn compatible_static(dst: &StaticType, src: &StaticType) -> Result<Vec<CastMask>, TypeError> {
    let mut masks = Vec::new();
    compatible_static_into(dst, src, &mut masks)?;
    Ok(masks)
}

fn compatible_into(
    dst: &StaticType,
    src: &InferredType,
    masks: &mut Vec<CastMask>,
) -> Result<(), TypeError> {
    match src {
        InferredType::Static(src_ty) => compatible_static_into(dst, src_ty, masks),
        InferredType::List(parts) => match dst {
            StaticType::Record { members, .. } if members.len() == parts.len() => {
                for ((_, member), part) in members.iter().zip(parts) {
                    compatible_into(member, part, masks)?;
                }
                Ok(())
            }
            _ => Err(TypeError::ShapeMismatch {
                expected: dst.name(),
                found: format!("{{{} components}}", parts.len()),
            }),
        },
    }
}

fn compatible_static_into(
    dst: &StaticType,
    src: &StaticType,
    masks: &mut Vec<CastMask>,
) -> Result<(), TypeError> {
    let mismatch = || TypeError::ShapeMismatch {
        expected: dst.name(),
        found: src.name(),
    };
    match (dst, src) {
        (StaticType::Void, StaticType::Void) => Ok(()),
        (
            StaticType::Record { members: dm, .. },
            StaticType::Record { members: sm, .. },
        ) => {
            if dm.len() != sm.len() {
                return Err(mismatch());
            }
            for ((_, d), (_, s)) in dm.iter().zip(sm) {
                compatible_static_into(d, s, masks)?;
            }
            Ok(())
        }
        _ => {
            let d = dst.basic().map_err(|_| mismatch())?;
            let s = src.basic().map_err(|_| mismatch())?;
            masks.push(CastMask::for_pair(d, s)?);
            Ok(())
        }
    }
}
