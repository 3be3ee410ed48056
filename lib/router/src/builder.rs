// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tree builder: walks a keyspec's path elements and keys, extending the trie
//! as needed, and configures the flavor of the leaf shard it lands on.
//!
//! Building is idempotent — re-walking the same keyspec returns the same leaf
//! shard identity without duplicating nodes. Intermediate nodes created by a
//! walk that later fails validation are left in place: they are reusable trie
//! structure, not leaked per-call state.

use crate::chunk::ChunkKey;
use crate::keyspec::KeySpec;
use crate::protocols::{AnycastPolicy, Flavor, FlavorParams, HashFunction, RecordKind, RoutingError};
use crate::registry;
use crate::shard::{KeyType, Shard, ShardKey, ShardRef};

/// Walk `keyspec` from `root`, creating missing shards, and return the leaf.
///
/// `depth_limit` bounds the walk to the first N path elements; `None` walks
/// the full keyspec depth. The flavor and its companion parameters are applied
/// to the leaf; a leaf that already carries a different flavor goes through
/// the destructive flavor-change transition first.
#[allow(clippy::too_many_arguments)]
pub fn build_or_extend(
    root: &ShardRef,
    keyspec: &KeySpec,
    depth_limit: Option<usize>,
    params: &FlavorParams,
    hash_func: HashFunction,
    keyfunc_params: Option<Vec<u8>>,
    anycast_policy: AnycastPolicy,
    kind: RecordKind,
) -> Result<ShardRef, RoutingError> {
    if keyspec.is_empty() {
        return Err(RoutingError::InvalidKeySpec);
    }
    let depth = match depth_limit {
        None => keyspec.depth(),
        Some(limit) if limit >= 1 && limit <= keyspec.depth() => limit,
        Some(_) => return Err(RoutingError::InvalidKeySpec),
    };

    let flavor = params.flavor();
    let mut current = root.clone();
    for pe_idx in 0..depth {
        let elem = keyspec.elem(pe_idx).expect("depth bounded by keyspec");
        current = Shard::find_or_create_child(
            &current,
            ShardKey::Element(elem.element()),
            KeyType::ElementId,
            pe_idx,
            None,
        );

        let last_element = pe_idx + 1 == depth;
        for key_idx in 0..elem.num_keys() {
            let leaf = last_element && key_idx + 1 == elem.num_keys();
            match elem.key(key_idx) {
                Some(value) => {
                    current = Shard::find_or_create_child(
                        &current,
                        ShardKey::Value(value.packed().to_vec()),
                        KeyType::Key,
                        pe_idx,
                        Some(key_idx),
                    );
                }
                None => {
                    current = Shard::find_or_create_wildcard(&current, pe_idx, Some(key_idx));
                    // A NULL-flavor wildcard leaf gets one zero-key chunk up
                    // front so wildcard matches have something to return.
                    if leaf && flavor == Flavor::Null && current.borrow().chunks().is_empty() {
                        current.borrow_mut().flavor = Some(Flavor::Null);
                        let id = current.borrow_mut().allocate_chunk_id();
                        Shard::add_chunk(&current, ChunkKey::Auto(id), kind);
                    }
                }
            }
        }
    }

    let existing = current.borrow().flavor();
    if let Some(existing) = existing
        && existing != flavor
    {
        registry::change_flavor(&current, flavor);
    }
    {
        let mut leaf = current.borrow_mut();
        leaf.flavor = Some(flavor);
        leaf.hash_func = hash_func;
        leaf.keyfunc_params = keyfunc_params;
        leaf.anycast_policy = anycast_policy;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspec::{KeyValue, PathElement};
    use std::rc::Rc;

    fn keyspec_ab() -> KeySpec {
        KeySpec::new()
            .with_element(PathElement::new(1, 10).with_key(KeyValue::from_u32(1)))
            .with_element(PathElement::new(1, 20).with_key(KeyValue::from_u32(2)))
    }

    fn build(root: &ShardRef, ks: &KeySpec, params: FlavorParams) -> ShardRef {
        build_or_extend(
            root,
            ks,
            None,
            &params,
            HashFunction::default(),
            None,
            AnycastPolicy::default(),
            RecordKind::Member,
        )
        .unwrap()
    }

    #[test]
    fn test_build_creates_element_and_key_levels() {
        let root = Shard::new_root();
        let leaf = build(&root, &keyspec_ab(), FlavorParams::Ident);

        // root -> elem a -> key 1 -> elem b -> key 2
        assert_eq!(Shard::subtree_size(&root), 5);
        assert_eq!(leaf.borrow().key_type(), KeyType::Key);
        assert_eq!(leaf.borrow().pe_index(), 1);
        assert_eq!(leaf.borrow().key_index(), Some(0));
        assert_eq!(leaf.borrow().flavor(), Some(Flavor::Ident));
    }

    #[test]
    fn test_build_is_idempotent() {
        let root = Shard::new_root();
        let ks = keyspec_ab();

        let first = build(&root, &ks, FlavorParams::Ident);
        let size = Shard::subtree_size(&root);
        let second = build(&root, &ks, FlavorParams::Ident);

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(Shard::subtree_size(&root), size);
    }

    #[test]
    fn test_empty_keyspec_is_rejected() {
        let root = Shard::new_root();
        let err = build_or_extend(
            &root,
            &KeySpec::new(),
            None,
            &FlavorParams::Null,
            HashFunction::default(),
            None,
            AnycastPolicy::default(),
            RecordKind::Member,
        )
        .unwrap_err();
        assert_eq!(err, RoutingError::InvalidKeySpec);
        assert_eq!(Shard::subtree_size(&root), 1);
    }

    #[test]
    fn test_depth_limit_stops_short() {
        let root = Shard::new_root();
        let leaf = build_or_extend(
            &root,
            &keyspec_ab(),
            Some(1),
            &FlavorParams::Null,
            HashFunction::default(),
            None,
            AnycastPolicy::default(),
            RecordKind::Member,
        )
        .unwrap();

        assert_eq!(leaf.borrow().pe_index(), 0);
        // root -> elem a -> key 1
        assert_eq!(Shard::subtree_size(&root), 3);

        let err = build_or_extend(
            &root,
            &keyspec_ab(),
            Some(3),
            &FlavorParams::Null,
            HashFunction::default(),
            None,
            AnycastPolicy::default(),
            RecordKind::Member,
        )
        .unwrap_err();
        assert_eq!(err, RoutingError::InvalidKeySpec);
    }

    #[test]
    fn test_null_wildcard_leaf_gets_eager_chunk() {
        let root = Shard::new_root();
        let ks = KeySpec::new().with_element(PathElement::new(1, 10).with_wildcard());
        let leaf = build(&root, &ks, FlavorParams::Null);

        assert!(leaf.borrow().key().is_none());
        assert_eq!(leaf.borrow().chunks().len(), 1);

        // Rebuilding does not stack a second chunk
        let again = build(&root, &ks, FlavorParams::Null);
        assert!(Rc::ptr_eq(&leaf, &again));
        assert_eq!(leaf.borrow().chunks().len(), 1);
    }

    #[test]
    fn test_ident_wildcard_leaf_gets_no_eager_chunk() {
        let root = Shard::new_root();
        let ks = KeySpec::new().with_element(PathElement::new(1, 10).with_wildcard());
        let leaf = build(&root, &ks, FlavorParams::Ident);
        assert!(leaf.borrow().chunks().is_empty());
    }

    #[test]
    fn test_flavor_change_drops_chunks() {
        let root = Shard::new_root();
        let ks = keyspec_ab();

        let leaf = build(&root, &ks, FlavorParams::Null);
        let id = leaf.borrow_mut().allocate_chunk_id();
        Shard::add_chunk(&leaf, ChunkKey::Auto(id), RecordKind::Member);
        assert_eq!(leaf.borrow().chunks().len(), 1);

        let releaf = build(&root, &ks, FlavorParams::Ident);
        assert!(Rc::ptr_eq(&leaf, &releaf));
        assert_eq!(leaf.borrow().flavor(), Some(Flavor::Ident));
        assert!(leaf.borrow().chunks().is_empty());
    }
}
