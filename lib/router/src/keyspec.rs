// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Keyspec accessor types.
//!
//! A keyspec is an ordered path of [`PathElement`]s, each identified by a
//! namespace+tag pair and carrying zero or more key values, any of which may be
//! wildcard. The schema parser that produces keyspecs lives outside this crate;
//! this module is the accessor contract the routing core consumes: per-element
//! namespace+tag, per-key packed bytes or "no value", and typed numeric
//! extraction for range comparisons.

use serde::{Deserialize, Serialize};

/// Namespace+tag pair identifying a path element within the schema tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId {
    pub namespace: u32,
    pub tag: u32,
}

impl ElementId {
    pub fn new(namespace: u32, tag: u32) -> Self {
        Self { namespace, tag }
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.tag)
    }
}

/// Declared scalar type of a key's field, used for range extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    F32,
    F64,
    I32,
    I64,
    U32,
    U64,
    /// Packed bytes with no numeric interpretation.
    Opaque,
}

/// A concrete key value: the packed big-endian byte representation plus the
/// field's declared scalar type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    packed: Vec<u8>,
    scalar: ScalarType,
}

impl KeyValue {
    pub fn from_bytes(packed: impl Into<Vec<u8>>) -> Self {
        Self {
            packed: packed.into(),
            scalar: ScalarType::Opaque,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        Self {
            packed: value.to_be_bytes().to_vec(),
            scalar: ScalarType::I32,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        Self {
            packed: value.to_be_bytes().to_vec(),
            scalar: ScalarType::I64,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        Self {
            packed: value.to_be_bytes().to_vec(),
            scalar: ScalarType::U32,
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            packed: value.to_be_bytes().to_vec(),
            scalar: ScalarType::U64,
        }
    }

    pub fn from_f32(value: f32) -> Self {
        Self {
            packed: value.to_be_bytes().to_vec(),
            scalar: ScalarType::F32,
        }
    }

    pub fn from_f64(value: f64) -> Self {
        Self {
            packed: value.to_be_bytes().to_vec(),
            scalar: ScalarType::F64,
        }
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    pub fn scalar(&self) -> ScalarType {
        self.scalar
    }

    /// Decode the packed bytes per the declared scalar type into the signed
    /// 64-bit domain used by range chunks.
    ///
    /// Unsigned values above `i64::MAX` saturate; floats truncate toward zero.
    /// Returns `None` for opaque keys or a packed length that does not match
    /// the scalar type.
    pub fn as_range_value(&self) -> Option<i64> {
        match self.scalar {
            ScalarType::I32 => {
                let bytes: [u8; 4] = self.packed.as_slice().try_into().ok()?;
                Some(i64::from(i32::from_be_bytes(bytes)))
            }
            ScalarType::I64 => {
                let bytes: [u8; 8] = self.packed.as_slice().try_into().ok()?;
                Some(i64::from_be_bytes(bytes))
            }
            ScalarType::U32 => {
                let bytes: [u8; 4] = self.packed.as_slice().try_into().ok()?;
                Some(i64::from(u32::from_be_bytes(bytes)))
            }
            ScalarType::U64 => {
                let bytes: [u8; 8] = self.packed.as_slice().try_into().ok()?;
                Some(i64::try_from(u64::from_be_bytes(bytes)).unwrap_or(i64::MAX))
            }
            ScalarType::F32 => {
                let bytes: [u8; 4] = self.packed.as_slice().try_into().ok()?;
                Some(f32::from_be_bytes(bytes) as i64)
            }
            ScalarType::F64 => {
                let bytes: [u8; 8] = self.packed.as_slice().try_into().ok()?;
                Some(f64::from_be_bytes(bytes) as i64)
            }
            ScalarType::Opaque => None,
        }
    }
}

/// One element of a keyspec path: a namespace+tag pair and its key slots.
/// A `None` key slot is a wildcard ("any value at this position").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathElement {
    element: ElementId,
    keys: Vec<Option<KeyValue>>,
}

impl PathElement {
    pub fn new(namespace: u32, tag: u32) -> Self {
        Self {
            element: ElementId::new(namespace, tag),
            keys: Vec::new(),
        }
    }

    pub fn with_key(mut self, value: KeyValue) -> Self {
        self.keys.push(Some(value));
        self
    }

    pub fn with_wildcard(mut self) -> Self {
        self.keys.push(None);
        self
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// The concrete value at a key slot, or `None` for a wildcard slot (and
    /// for an out-of-range index; callers bound `idx` by [`Self::num_keys`]).
    pub fn key(&self, idx: usize) -> Option<&KeyValue> {
        self.keys.get(idx).and_then(|k| k.as_ref())
    }
}

/// An ordered path of [`PathElement`]s describing the location of an object in
/// the schema tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeySpec {
    elems: Vec<PathElement>,
}

impl KeySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_element(mut self, elem: PathElement) -> Self {
        self.elems.push(elem);
        self
    }

    pub fn push_element(&mut self, elem: PathElement) {
        self.elems.push(elem);
    }

    pub fn depth(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn elem(&self, idx: usize) -> Option<&PathElement> {
        self.elems.get(idx)
    }
}
