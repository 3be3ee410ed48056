// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shard nodes of the routing trie.
//!
//! Every node corresponds to one path-element level or one key level of a
//! keyspec. Ownership runs strictly downward: a shard owns its keyed children,
//! its single wildcard child, and its chunks; parent pointers (and the chunks'
//! back-pointers) are weak. `Rc` strong counts are the reference counts of the
//! original design — the parent edge plus every external handle — so dropping
//! the last handle after the parent edge is removed frees the node, and the
//! compiler rejects cross-thread sharing outright (`Rc` is `!Send`), which is
//! exactly the single-writer discipline this core assumes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkIndex, ChunkKey, ChunkRef};
use crate::keyspec::ElementId;
use crate::protocols::{AnycastPolicy, Flavor, HashFunction, RecordKind};

/// Shared (owning) reference to a shard.
pub type ShardRef = Rc<RefCell<Shard>>;
/// Non-owning back-reference to a shard.
pub type WeakShardRef = Weak<RefCell<Shard>>;

/// Key identifying a shard among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShardKey {
    /// Namespace+tag of a path element.
    Element(ElementId),
    /// Packed key value at a key level.
    Value(Vec<u8>),
}

impl std::fmt::Display for ShardKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardKey::Element(id) => write!(f, "{id}"),
            ShardKey::Value(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Which traversal rule applies at this node's level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    ElementId,
    Key,
}

/// A node in the routing trie.
#[derive(Debug)]
pub struct Shard {
    /// `None` for the root and for wildcard children.
    pub(crate) key: Option<ShardKey>,
    pub(crate) key_type: KeyType,
    /// Keyspec coordinates of this node; set once at creation, stable after.
    pub(crate) pe_index: usize,
    pub(crate) key_index: Option<usize>,
    pub(crate) parent: WeakShardRef,
    pub(crate) children: HashMap<ShardKey, ShardRef>,
    pub(crate) wildcard_child: Option<ShardRef>,
    /// Sharding discipline of this leaf's chunks; unset until the first
    /// registration reaches this node as a leaf.
    pub(crate) flavor: Option<Flavor>,
    pub(crate) hash_func: HashFunction,
    pub(crate) keyfunc_params: Option<Vec<u8>>,
    pub(crate) anycast_policy: AnycastPolicy,
    pub(crate) chunks: ChunkIndex,
    pub(crate) next_chunk_id: u64,
}

impl Shard {
    pub fn new_root() -> ShardRef {
        Rc::new(RefCell::new(Self {
            key: None,
            key_type: KeyType::ElementId,
            pe_index: 0,
            key_index: None,
            parent: Weak::new(),
            children: HashMap::new(),
            wildcard_child: None,
            flavor: None,
            hash_func: HashFunction::default(),
            keyfunc_params: None,
            anycast_policy: AnycastPolicy::default(),
            chunks: ChunkIndex::default(),
            next_chunk_id: 0,
        }))
    }

    fn new_child(
        parent: &ShardRef,
        key: Option<ShardKey>,
        key_type: KeyType,
        pe_index: usize,
        key_index: Option<usize>,
    ) -> ShardRef {
        Rc::new(RefCell::new(Self {
            key,
            key_type,
            pe_index,
            key_index,
            parent: Rc::downgrade(parent),
            children: HashMap::new(),
            wildcard_child: None,
            flavor: None,
            hash_func: HashFunction::default(),
            keyfunc_params: None,
            anycast_policy: AnycastPolicy::default(),
            chunks: ChunkIndex::default(),
            next_chunk_id: 0,
        }))
    }

    /// Find the keyed child for `key`, creating it if absent. The parent's map
    /// entry is the owning edge.
    pub fn find_or_create_child(
        this: &ShardRef,
        key: ShardKey,
        key_type: KeyType,
        pe_index: usize,
        key_index: Option<usize>,
    ) -> ShardRef {
        if let Some(existing) = this.borrow().children.get(&key) {
            let shard = existing.borrow();
            debug_assert_eq!(shard.key_type, key_type, "child key type drifted");
            debug_assert_eq!(shard.pe_index, pe_index, "child path index drifted");
            debug_assert_eq!(shard.key_index, key_index, "child key index drifted");
            return existing.clone();
        }
        let child = Self::new_child(this, Some(key.clone()), key_type, pe_index, key_index);
        tracing::debug!(%key, pe_index, ?key_index, "created shard");
        this.borrow_mut().children.insert(key, child.clone());
        child
    }

    /// Find the wildcard child, creating it if absent.
    pub fn find_or_create_wildcard(
        this: &ShardRef,
        pe_index: usize,
        key_index: Option<usize>,
    ) -> ShardRef {
        if let Some(existing) = this.borrow().wildcard_child.as_ref() {
            let shard = existing.borrow();
            debug_assert_eq!(shard.pe_index, pe_index, "wildcard path index drifted");
            debug_assert_eq!(shard.key_index, key_index, "wildcard key index drifted");
            return existing.clone();
        }
        let child = Self::new_child(this, None, KeyType::Key, pe_index, key_index);
        tracing::debug!(pe_index, ?key_index, "created wildcard shard");
        this.borrow_mut().wildcard_child = Some(child.clone());
        child
    }

    /// Allocate the next NULL/RANGE chunk id.
    pub fn allocate_chunk_id(&mut self) -> u64 {
        let id = self.next_chunk_id;
        self.next_chunk_id += 1;
        id
    }

    /// Create a chunk under this shard and index it.
    pub fn add_chunk(this: &ShardRef, chunk_key: ChunkKey, kind: RecordKind) -> ChunkRef {
        let chunk = Chunk::new(chunk_key.clone(), Rc::downgrade(this), kind);
        tracing::debug!(key = %chunk_key, "created chunk");
        this.borrow_mut().chunks.insert(chunk.clone());
        chunk
    }

    pub fn key(&self) -> Option<&ShardKey> {
        self.key.as_ref()
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn pe_index(&self) -> usize {
        self.pe_index
    }

    pub fn key_index(&self) -> Option<usize> {
        self.key_index
    }

    pub fn parent(&self) -> WeakShardRef {
        self.parent.clone()
    }

    pub fn flavor(&self) -> Option<Flavor> {
        self.flavor
    }

    pub fn hash_func(&self) -> HashFunction {
        self.hash_func
    }

    pub fn keyfunc_params(&self) -> Option<&[u8]> {
        self.keyfunc_params.as_deref()
    }

    pub fn anycast_policy(&self) -> AnycastPolicy {
        self.anycast_policy
    }

    pub fn chunks(&self) -> &ChunkIndex {
        &self.chunks
    }

    pub fn num_children(&self) -> usize {
        self.children.len() + usize::from(self.wildcard_child.is_some())
    }

    /// Whether this node is a tree root (no key, no live parent).
    pub fn is_root(&self) -> bool {
        self.key.is_none() && self.parent.strong_count() == 0
    }

    /// Total number of nodes in this subtree, including this one.
    pub fn subtree_size(this: &ShardRef) -> usize {
        let (children, wildcard) = {
            let shard = this.borrow();
            (
                shard.children.values().cloned().collect::<Vec<_>>(),
                shard.wildcard_child.clone(),
            )
        };
        let mut count = 1;
        for child in &children {
            count += Self::subtree_size(child);
        }
        if let Some(w) = &wildcard {
            count += Self::subtree_size(w);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_or_create_child_is_idempotent() {
        let root = Shard::new_root();
        let key = ShardKey::Element(ElementId::new(1, 10));

        let a = Shard::find_or_create_child(&root, key.clone(), KeyType::ElementId, 0, None);
        let b = Shard::find_or_create_child(&root, key, KeyType::ElementId, 0, None);

        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(root.borrow().children.len(), 1);
        assert_eq!(Shard::subtree_size(&root), 2);
    }

    #[test]
    fn test_wildcard_child_is_single() {
        let root = Shard::new_root();
        let elem =
            Shard::find_or_create_child(&root, ShardKey::Element(ElementId::new(1, 10)), KeyType::ElementId, 0, None);

        let w1 = Shard::find_or_create_wildcard(&elem, 0, Some(0));
        let w2 = Shard::find_or_create_wildcard(&elem, 0, Some(0));

        assert!(Rc::ptr_eq(&w1, &w2));
        assert!(w1.borrow().key().is_none());
        assert_eq!(w1.borrow().key_type(), KeyType::Key);
        assert_eq!(elem.borrow().num_children(), 1);
    }

    #[test]
    fn test_parent_edge_is_weak() {
        let root = Shard::new_root();
        let child = Shard::find_or_create_child(
            &root,
            ShardKey::Element(ElementId::new(1, 10)),
            KeyType::ElementId,
            0,
            None,
        );

        // Parent edge + our handle
        assert_eq!(Rc::strong_count(&child), 2);
        // The child's back-reference does not keep the root alive
        assert_eq!(Rc::strong_count(&root), 1);
        assert!(child.borrow().parent().upgrade().is_some());
    }

    #[test]
    fn test_chunk_id_allocation_is_monotonic() {
        let root = Shard::new_root();
        let first = root.borrow_mut().allocate_chunk_id();
        let second = root.borrow_mut().allocate_chunk_id();
        assert_eq!((first, second), (0, 1));
    }

    #[test]
    fn test_dropping_last_handle_frees_subtree() {
        let root = Shard::new_root();
        let child = Shard::find_or_create_child(
            &root,
            ShardKey::Element(ElementId::new(1, 10)),
            KeyType::ElementId,
            0,
            None,
        );
        let observer = Rc::downgrade(&child);
        drop(child);

        // Still reachable through the parent edge
        assert!(observer.upgrade().is_some());

        drop(root);
        assert!(observer.upgrade().is_none());
    }
}
