// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The three matching algorithms over the routing trie.
//!
//! - [`match_chunk`]: single-shard chunk lookup per the shard's flavor.
//! - [`match_keyspec`]: full top-down walk with wildcard fallback; the first
//!   chunk found at any depth wins (shallow beats deep).
//! - [`match_longest_prefix`]: resolves to the deepest concrete leaf, falling
//!   back to the last wildcard node passed; used by deregistration when only
//!   the original registration keyspec is known.
//!
//! All three are read-only with respect to tree shape. `match_keyspec` can be
//! re-entered with a previously returned shard as the root, which is how the
//! record iterator advances across shards.

use crate::chunk::ChunkRef;
use crate::keyspec::KeySpec;
use crate::protocols::{Flavor, RoutingError};
use crate::shard::{KeyType, ShardKey, ShardRef};

/// Concatenated packed key bytes of the keyspec element at the shard's path
/// index, forming the IDENT chunk key. A wildcard slot cannot form an
/// ident key.
pub(crate) fn ident_key_for(shard: &ShardRef, keyspec: &KeySpec) -> Result<Vec<u8>, RoutingError> {
    let pe_index = shard.borrow().pe_index();
    let elem = keyspec.elem(pe_index).ok_or(RoutingError::InvalidKeySpec)?;
    if elem.num_keys() == 0 {
        return Err(RoutingError::InvalidKeySpec);
    }
    let mut packed = Vec::new();
    for key_idx in 0..elem.num_keys() {
        let value = elem.key(key_idx).ok_or(RoutingError::InvalidKeySpec)?;
        packed.extend_from_slice(value.packed());
    }
    Ok(packed)
}

/// First numerically-typed key of the keyspec element at the shard's path
/// index, decoded into the signed 64-bit range domain.
pub(crate) fn range_value_for(shard: &ShardRef, keyspec: &KeySpec) -> Option<i64> {
    let pe_index = shard.borrow().pe_index();
    let elem = keyspec.elem(pe_index)?;
    for key_idx in 0..elem.num_keys() {
        if let Some(value) = elem.key(key_idx)
            && let Some(numeric) = value.as_range_value()
        {
            return Some(numeric);
        }
    }
    None
}

/// Single-shard chunk lookup.
///
/// IDENT derives the packed key from the keyspec and does a direct map
/// lookup. NULL returns the first chunk in id order: arbitrary but stable
/// within one run; callers needing all chunks iterate explicitly. RANGE is a
/// linear scan of the shard's chunks against the keyspec's numeric value,
/// acceptable only for small chunk counts (a scaling limit rather than a
/// correctness one).
pub fn match_chunk(shard: &ShardRef, keyspec: &KeySpec) -> Option<ChunkRef> {
    let flavor = shard.borrow().flavor()?;
    match flavor {
        Flavor::Ident => {
            let key = ident_key_for(shard, keyspec).ok()?;
            shard.borrow().chunks().get_ident(&key)
        }
        Flavor::Null => shard.borrow().chunks().first(),
        Flavor::Range => {
            let value = range_value_for(shard, keyspec)?;
            let chunks = shard.borrow().chunks().snapshot();
            chunks
                .into_iter()
                .find(|chunk| chunk.borrow().chunk_key().contains(value))
        }
    }
}

/// One step of the keyspec traversal: descend into the element node for path
/// index `p`, or into the key-level node for slot `k` of element `p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Element(usize),
    Key(usize, usize),
}

/// The step following `step`, or `None` once the keyspec is exhausted.
fn next_step(keyspec: &KeySpec, step: Step) -> Option<Step> {
    let advance_element = |p: usize| {
        if p + 1 < keyspec.depth() {
            Some(Step::Element(p + 1))
        } else {
            None
        }
    };
    match step {
        Step::Element(p) => {
            if keyspec.elem(p).is_some_and(|e| e.num_keys() > 0) {
                Some(Step::Key(p, 0))
            } else {
                advance_element(p)
            }
        }
        Step::Key(p, k) => {
            if keyspec.elem(p).is_some_and(|e| k + 1 < e.num_keys()) {
                Some(Step::Key(p, k + 1))
            } else {
                advance_element(p)
            }
        }
    }
}

/// The first step of a walk rooted at `root`: the tree root starts at the
/// keyspec's first element; a re-entry root resumes from its own coordinates.
fn initial_step(root: &ShardRef, keyspec: &KeySpec) -> Option<Step> {
    let shard = root.borrow();
    if shard.is_root() {
        return Some(Step::Element(0));
    }
    let resumed = match shard.key_type() {
        KeyType::ElementId => Step::Element(shard.pe_index()),
        KeyType::Key => Step::Key(shard.pe_index(), shard.key_index().unwrap_or(0)),
    };
    next_step(keyspec, resumed)
}

/// Full keyspec match with wildcard fallback.
///
/// Mirrors the builder's traversal, but at every key level first tries the
/// wildcard child's chunk match as a short-circuit, then commits to the
/// concrete child (falling back to the wildcard child when no concrete child
/// exists). The first chunk found at any depth is returned, with "first
/// sufficient match" semantics, not longest-prefix.
pub fn match_keyspec(root: &ShardRef, keyspec: &KeySpec) -> Option<(ShardRef, ChunkRef)> {
    if keyspec.is_empty() {
        return None;
    }
    let mut step = initial_step(root, keyspec)?;
    let mut current = root.clone();
    loop {
        match step {
            Step::Element(p) => {
                let elem = keyspec.elem(p)?;
                let child = current
                    .borrow()
                    .children
                    .get(&ShardKey::Element(elem.element()))
                    .cloned();
                let Some(child) = child else {
                    tracing::trace!(pe_index = p, "keyspec walk fell off the tree");
                    return None;
                };
                current = child;
            }
            Step::Key(p, k) => {
                let wildcard = current.borrow().wildcard_child.clone();
                if let Some(w) = &wildcard
                    && let Some(chunk) = match_chunk(w, keyspec)
                {
                    return Some((w.clone(), chunk));
                }
                let elem = keyspec.elem(p)?;
                let next = match elem.key(k) {
                    Some(value) => current
                        .borrow()
                        .children
                        .get(&ShardKey::Value(value.packed().to_vec()))
                        .cloned()
                        .or(wildcard),
                    None => wildcard,
                };
                let Some(next) = next else {
                    tracing::trace!(pe_index = p, key_index = k, "keyspec walk fell off the tree");
                    return None;
                };
                current = next;
            }
        }
        if let Some(chunk) = match_chunk(&current, keyspec) {
            return Some((current, chunk));
        }
        step = match next_step(keyspec, step) {
            Some(s) => s,
            None => return None,
        };
    }
}

/// Longest-prefix match.
///
/// Walks the full path without stopping at intermediate matches, remembering
/// the deepest wildcard node passed along the way. Returns the leaf shard
/// only when the whole path resolves concretely; otherwise falls back to the
/// remembered wildcard node. Concrete children always win over the wildcard
/// child here; the wildcard is a fallback, never a short-circuit.
pub fn match_longest_prefix(root: &ShardRef, keyspec: &KeySpec) -> Option<ShardRef> {
    if keyspec.is_empty() {
        return None;
    }
    let mut step = initial_step(root, keyspec)?;
    let mut current = root.clone();
    let mut last_wildcard: Option<ShardRef> = None;
    loop {
        match step {
            Step::Element(p) => {
                let elem = keyspec.elem(p)?;
                let child = current
                    .borrow()
                    .children
                    .get(&ShardKey::Element(elem.element()))
                    .cloned();
                match child {
                    Some(child) => current = child,
                    None => return last_wildcard,
                }
            }
            Step::Key(p, k) => {
                let wildcard = current.borrow().wildcard_child.clone();
                if let Some(w) = &wildcard {
                    last_wildcard = Some(w.clone());
                }
                let elem = keyspec.elem(p)?;
                match elem.key(k) {
                    Some(value) => {
                        let child = current
                            .borrow()
                            .children
                            .get(&ShardKey::Value(value.packed().to_vec()))
                            .cloned();
                        match child {
                            Some(child) => current = child,
                            None => return last_wildcard,
                        }
                    }
                    None => match wildcard {
                        Some(w) => current = w,
                        None => return last_wildcard,
                    },
                }
            }
        }
        step = match next_step(keyspec, step) {
            Some(s) => s,
            None => return Some(current),
        };
    }
}
