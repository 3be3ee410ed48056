// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reference-counted teardown of the routing trie.
//!
//! [`prune`] is the bulk cleanup: post-order over the subtree, stripping
//! router records that are neither internal nor permanent, deleting chunks
//! whose record count reaches zero, and detaching shards left with no
//! children, no wildcard child, and no chunks. Bootstrap registrations (the
//! routing infrastructure's own self-registration) survive it.
//!
//! [`sweep`] is the structural variant with no record stripping — empty
//! chunks and empty shards collapse, live records are never touched. It backs
//! bulk member purges.
//!
//! [`prune_path`] walks the parent chain upward from one leaf, used after a
//! single deregistration so that only the affected path can collapse.

use std::rc::Rc;

use crate::protocols::RecordKind;
use crate::shard::{ShardKey, ShardRef};

/// Bulk teardown of the subtree under `shard`. Returns true when the shard
/// itself ended up empty and should be detached by its owner; the caller
/// holding the root simply ignores the result.
pub fn prune(shard: &ShardRef) -> bool {
    prune_inner(shard, true)
}

/// Structural collapse of the subtree under `shard` without touching any
/// live record.
pub fn sweep(shard: &ShardRef) -> bool {
    prune_inner(shard, false)
}

fn prune_inner(shard: &ShardRef, strip: bool) -> bool {
    // Children first; each recursive call may clear its slot.
    let child_keys: Vec<ShardKey> = shard.borrow().children.keys().cloned().collect();
    for key in child_keys {
        let child = shard.borrow().children.get(&key).cloned();
        if let Some(child) = child
            && prune_inner(&child, strip)
        {
            shard.borrow_mut().children.remove(&key);
            tracing::debug!(%key, "pruned shard");
        }
    }
    let wildcard = shard.borrow().wildcard_child.clone();
    if let Some(wildcard) = wildcard
        && prune_inner(&wildcard, strip)
    {
        shard.borrow_mut().wildcard_child = None;
        tracing::debug!("pruned wildcard shard");
    }

    // A node only considers its own chunks once no children remain.
    {
        let s = shard.borrow();
        if !s.children.is_empty() || s.wildcard_child.is_some() {
            return false;
        }
    }

    let chunks = shard.borrow().chunks().snapshot();
    for chunk in chunks {
        if strip && chunk.borrow().kind() == RecordKind::Router {
            chunk
                .borrow_mut()
                .records_mut()
                .retain(|record| record.flags.is_durable());
        }
        let (empty, key) = {
            let c = chunk.borrow();
            (c.records().total() == 0, c.chunk_key().clone())
        };
        if empty {
            shard.borrow_mut().chunks.remove(&key);
            tracing::debug!(key = %key, "pruned chunk");
        }
    }

    shard.borrow().chunks().is_empty()
}

/// Collapse the parent chain upward from `leaf` after a record deletion.
///
/// At each level: a shard with children keeps everything; otherwise its empty
/// chunks are deleted, and once chunkless it is detached from its parent's
/// index (or the parent's wildcard slot, whichever edge it occupies).
pub fn prune_path(leaf: &ShardRef) {
    let mut current = leaf.clone();
    loop {
        {
            let s = current.borrow();
            if !s.children.is_empty() || s.wildcard_child.is_some() {
                return;
            }
        }
        let chunks = current.borrow().chunks().snapshot();
        for chunk in chunks {
            let (empty, key) = {
                let c = chunk.borrow();
                (c.records().total() == 0, c.chunk_key().clone())
            };
            if empty {
                current.borrow_mut().chunks.remove(&key);
                tracing::debug!(key = %key, "pruned chunk");
            }
        }
        if !current.borrow().chunks().is_empty() {
            return;
        }
        let parent = current.borrow().parent().upgrade();
        let Some(parent) = parent else {
            // The root stays in place even when empty.
            return;
        };
        detach_child(&parent, &current);
        current = parent;
    }
}

/// Remove the parent→child edge for `child`, whichever edge it occupies.
fn detach_child(parent: &ShardRef, child: &ShardRef) {
    let key = child.borrow().key().cloned();
    let mut p = parent.borrow_mut();
    match key {
        Some(key) => {
            p.children.remove(&key);
            tracing::debug!(%key, "pruned shard");
        }
        None => {
            let is_wildcard = p
                .wildcard_child
                .as_ref()
                .is_some_and(|w| Rc::ptr_eq(w, child));
            if is_wildcard {
                p.wildcard_child = None;
                tracing::debug!("pruned wildcard shard");
            }
        }
    }
}
