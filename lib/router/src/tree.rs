// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The routing tree facade: registration/deregistration entry points over the
//! builder, matcher, registry, and teardown, plus bulk member purge and an
//! introspection dump.
//!
//! One `RoutingTree` instance serves one logical writer; the core types are
//! `!Send`, so multi-threaded callers go through
//! [`crate::service::ThreadedRouter`] instead.

use derive_getters::Getters;
use serde::Serialize;

use crate::builder;
use crate::chunk::ChunkRef;
use crate::config::RouterConfig;
use crate::iter::RouterRecordIter;
use crate::keyspec::KeySpec;
use crate::matcher;
use crate::protocols::{
    AnycastPolicy, FlavorParams, HashFunction, MemberHandle, MemberRecord, RecordFlags,
    RecordKind, RoutingError,
};
use crate::registry;
use crate::shard::{Shard, ShardRef};
use crate::teardown;

/// A registration request: the owning member handle, the parsed keyspec, the
/// role flags, the message path identifying the caller, and the sharding
/// parameters to apply at the leaf.
#[derive(Debug, Clone, Getters)]
pub struct Registration {
    #[getter(copy)]
    member: MemberHandle,
    keyspec: KeySpec,
    #[getter(copy)]
    flags: RecordFlags,
    message_path: String,
    #[getter(copy)]
    params: FlavorParams,
    #[getter(copy)]
    depth_limit: Option<usize>,
    #[getter(copy)]
    hash_func: HashFunction,
    keyfunc_params: Option<Vec<u8>>,
    #[getter(copy)]
    anycast_policy: AnycastPolicy,
}

impl Registration {
    pub fn new(
        member: MemberHandle,
        keyspec: KeySpec,
        flags: RecordFlags,
        message_path: impl Into<String>,
    ) -> Self {
        Self {
            member,
            keyspec,
            flags,
            message_path: message_path.into(),
            params: FlavorParams::Null,
            depth_limit: None,
            hash_func: HashFunction::default(),
            keyfunc_params: None,
            anycast_policy: AnycastPolicy::default(),
        }
    }

    pub fn with_params(mut self, params: FlavorParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_depth_limit(mut self, depth_limit: usize) -> Self {
        self.depth_limit = Some(depth_limit);
        self
    }

    pub fn with_hash_func(mut self, hash_func: HashFunction) -> Self {
        self.hash_func = hash_func;
        self
    }

    pub fn with_keyfunc_params(mut self, keyfunc_params: Vec<u8>) -> Self {
        self.keyfunc_params = Some(keyfunc_params);
        self
    }

    pub fn with_anycast_policy(mut self, anycast_policy: AnycastPolicy) -> Self {
        self.anycast_policy = anycast_policy;
        self
    }
}

/// Handles returned by a successful registration: the leaf shard, the chunk
/// the record landed in, and the chunk's id (NULL/RANGE only).
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub shard: ShardRef,
    pub chunk: ChunkRef,
    pub chunk_id: Option<u64>,
}

impl RegisterOutcome {
    /// Thread-safe summary of the outcome, for callers that cannot hold the
    /// `!Send` handles.
    pub fn summary(&self) -> ChunkSummary {
        let chunk = self.chunk.borrow();
        ChunkSummary {
            chunk_id: self.chunk_id,
            publishers: chunk.records().publisher_count(),
            subscribers: chunk.records().subscriber_count(),
        }
    }
}

/// Plain-data view of one matched chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkSummary {
    pub chunk_id: Option<u64>,
    pub publishers: usize,
    pub subscribers: usize,
}

/// Introspection snapshot of one chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkDump {
    pub key: String,
    pub publishers: usize,
    pub subscribers: usize,
}

/// Introspection snapshot of one shard subtree.
#[derive(Debug, Clone, Serialize)]
pub struct ShardDump {
    pub key: Option<String>,
    pub key_type: crate::shard::KeyType,
    pub pe_index: usize,
    pub key_index: Option<usize>,
    pub flavor: Option<crate::protocols::Flavor>,
    pub anycast_policy: AnycastPolicy,
    pub chunks: Vec<ChunkDump>,
    pub children: Vec<ShardDump>,
    pub wildcard: Option<Box<ShardDump>>,
}

/// The subscription/publication routing tree.
#[derive(Debug, Getters)]
pub struct RoutingTree {
    #[getter(skip)]
    root: ShardRef,
    config: RouterConfig,
    #[getter(copy)]
    kind: RecordKind,
}

impl RoutingTree {
    pub fn new(kind: RecordKind) -> Self {
        Self::with_config(RouterConfig::default(), kind)
    }

    pub fn with_config(config: RouterConfig, kind: RecordKind) -> Self {
        Self {
            root: Shard::new_root(),
            config,
            kind,
        }
    }

    /// The root shard. Cloning the returned ref takes an owner's stake in the
    /// node, exactly like any other handle.
    pub fn root(&self) -> &ShardRef {
        &self.root
    }

    /// A registration pre-seeded with this tree's configured defaults.
    pub fn registration(
        &self,
        member: MemberHandle,
        keyspec: KeySpec,
        flags: RecordFlags,
        message_path: impl Into<String>,
    ) -> Registration {
        Registration::new(member, keyspec, flags, message_path)
            .with_hash_func(self.config.default_hash_func)
            .with_anycast_policy(self.config.default_anycast_policy)
    }

    /// Build (or extend) the trie for the registration's keyspec, ensure the
    /// flavor-appropriate chunk, and insert the record.
    pub fn register(&self, reg: &Registration) -> Result<RegisterOutcome, RoutingError> {
        let shard = builder::build_or_extend(
            &self.root,
            reg.keyspec(),
            reg.depth_limit(),
            &reg.params(),
            reg.hash_func(),
            reg.keyfunc_params().clone(),
            reg.anycast_policy(),
            self.kind,
        )?;
        let chunk = registry::ensure_chunk(&shard, reg.keyspec(), &reg.params(), self.kind)?;
        let record = MemberRecord::new(reg.member(), reg.message_path().clone(), reg.flags());
        let chunk = registry::add_record(&shard, &chunk, record, self.config.chunk_capacity)?;
        let chunk_id = chunk.borrow().chunk_key().id();
        tracing::debug!(
            member = reg.member(),
            path = %reg.message_path(),
            role = ?reg.flags().role,
            chunk_id,
            "registered record"
        );
        Ok(RegisterOutcome {
            shard,
            chunk,
            chunk_id,
        })
    }

    /// Remove the registration's record, resolving the leaf by longest-prefix
    /// match (the caller holds only its original keyspec, not a live shard),
    /// then collapse the now-unused part of the path.
    pub fn deregister(&self, reg: &Registration) -> Result<(), RoutingError> {
        let shard = matcher::match_longest_prefix(&self.root, reg.keyspec())
            .ok_or(RoutingError::NoMatch)?;
        registry::delete_record(&shard, reg.keyspec(), reg.message_path(), reg.flags().role)?;
        teardown::prune_path(&shard);
        tracing::debug!(
            member = reg.member(),
            path = %reg.message_path(),
            role = ?reg.flags().role,
            "deregistered record"
        );
        Ok(())
    }

    /// Promote the registration's subscriber record to publisher.
    pub fn promote(&self, reg: &Registration) -> Result<(), RoutingError> {
        let shard = matcher::match_longest_prefix(&self.root, reg.keyspec())
            .ok_or(RoutingError::NoMatch)?;
        registry::promote_record(&shard, reg.keyspec(), reg.message_path())
    }

    /// Remove every record owned by `member` across the whole tree and
    /// collapse whatever that leaves empty. Returns the number of records
    /// removed. Used when a member disconnects.
    pub fn purge_member(&self, member: MemberHandle) -> usize {
        let removed = purge_walk(&self.root, member);
        teardown::sweep(&self.root);
        if removed > 0 {
            tracing::debug!(member, removed, "purged member records");
        }
        removed
    }

    /// Bulk teardown: strip non-durable router records and collapse the tree
    /// down to whatever bootstrap registrations pin in place.
    pub fn prune(&self) {
        teardown::prune(&self.root);
    }

    /// Full-tree match; see [`matcher::match_keyspec`].
    pub fn match_keyspec(&self, keyspec: &KeySpec) -> Option<(ShardRef, ChunkRef)> {
        matcher::match_keyspec(&self.root, keyspec)
    }

    /// Plain-data view of the first chunk the keyspec matches.
    pub fn match_summary(&self, keyspec: &KeySpec) -> Option<ChunkSummary> {
        let (_, chunk) = matcher::match_keyspec(&self.root, keyspec)?;
        let chunk = chunk.borrow();
        Some(ChunkSummary {
            chunk_id: chunk.chunk_key().id(),
            publishers: chunk.records().publisher_count(),
            subscribers: chunk.records().subscriber_count(),
        })
    }

    /// Iterate the records of every chunk the keyspec resolves through.
    pub fn router_records(&self, keyspec: &KeySpec) -> RouterRecordIter {
        RouterRecordIter::new(self.root.clone(), keyspec.clone())
    }

    /// Snapshot of the whole tree for introspection.
    pub fn dump(&self) -> ShardDump {
        dump_shard(&self.root)
    }
}

// Dropping a deep trie through `Rc` cascades recursively; break the edges
// iteratively instead so pathological depths cannot overflow the stack.
impl Drop for RoutingTree {
    fn drop(&mut self) {
        let mut stack: Vec<ShardRef> = Vec::new();
        {
            let mut root = self.root.borrow_mut();
            stack.extend(root.children.drain().map(|(_, child)| child));
            stack.extend(root.wildcard_child.take());
        }
        while let Some(shard) = stack.pop() {
            let mut s = shard.borrow_mut();
            stack.extend(s.children.drain().map(|(_, child)| child));
            stack.extend(s.wildcard_child.take());
        }
    }
}

fn purge_walk(shard: &ShardRef, member: MemberHandle) -> usize {
    let mut removed = 0;
    let chunks = shard.borrow().chunks().snapshot();
    for chunk in chunks {
        let mut c = chunk.borrow_mut();
        let before = c.records().total();
        c.records_mut().retain(|record| record.member != member);
        removed += before - c.records().total();
    }
    let children: Vec<ShardRef> = shard.borrow().children.values().cloned().collect();
    for child in children {
        removed += purge_walk(&child, member);
    }
    let wildcard = shard.borrow().wildcard_child.clone();
    if let Some(wildcard) = wildcard {
        removed += purge_walk(&wildcard, member);
    }
    removed
}

fn dump_shard(shard: &ShardRef) -> ShardDump {
    let (key, key_type, pe_index, key_index, flavor, anycast_policy, chunks, children, wildcard) = {
        let s = shard.borrow();
        (
            s.key().map(|k| k.to_string()),
            s.key_type(),
            s.pe_index(),
            s.key_index(),
            s.flavor(),
            s.anycast_policy(),
            s.chunks().snapshot(),
            s.children.values().cloned().collect::<Vec<_>>(),
            s.wildcard_child.clone(),
        )
    };
    ShardDump {
        key,
        key_type,
        pe_index,
        key_index,
        flavor,
        anycast_policy,
        chunks: chunks
            .iter()
            .map(|chunk| {
                let c = chunk.borrow();
                ChunkDump {
                    key: c.chunk_key().to_string(),
                    publishers: c.records().publisher_count(),
                    subscribers: c.records().subscriber_count(),
                }
            })
            .collect(),
        children: children.iter().map(dump_shard).collect(),
        wildcard: wildcard.map(|w| Box::new(dump_shard(&w))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspec::{KeyValue, PathElement};
    use crate::protocols::{Flavor, RecordRole};
    use std::rc::Rc;

    fn svc_keyspec(id: u32) -> KeySpec {
        KeySpec::new().with_element(PathElement::new(1, 10).with_key(KeyValue::from_u32(id)))
    }

    #[test]
    fn test_end_to_end_ident_registration() {
        let tree = RoutingTree::new(RecordKind::Member);
        let ks = svc_keyspec(7);
        let reg = tree
            .registration(3, ks.clone(), RecordFlags::subscriber(), "path/A")
            .with_params(FlavorParams::Ident);

        let outcome = tree.register(&reg).unwrap();
        assert_eq!(outcome.chunk_id, None);

        let (shard, chunk) = tree.match_keyspec(&ks).unwrap();
        assert!(Rc::ptr_eq(&shard, &outcome.shard));
        assert!(Rc::ptr_eq(&chunk, &outcome.chunk));
        {
            let c = chunk.borrow();
            let record = c.records().get("path/A", RecordRole::Subscriber).unwrap();
            assert_eq!(record.flags.role, RecordRole::Subscriber);
            assert_eq!(record.member, 3);
            assert_eq!(c.records().publisher_count(), 0);
        }

        // Another key resolves no chunk
        assert!(tree.match_keyspec(&svc_keyspec(8)).is_none());
    }

    #[test]
    fn test_register_then_deregister_collapses_tree() {
        let tree = RoutingTree::new(RecordKind::Member);
        let reg = tree
            .registration(1, svc_keyspec(7), RecordFlags::subscriber(), "path/A")
            .with_params(FlavorParams::Ident);

        tree.register(&reg).unwrap();
        tree.deregister(&reg).unwrap();

        assert_eq!(Shard::subtree_size(tree.root()), 1);
        assert!(tree.match_keyspec(&svc_keyspec(7)).is_none());
    }

    #[test]
    fn test_deregister_through_wildcard_fallback() {
        let tree = RoutingTree::new(RecordKind::Member);
        let wild = KeySpec::new().with_element(PathElement::new(1, 10).with_wildcard());
        let reg = tree
            .registration(1, wild, RecordFlags::subscriber(), "path/A")
            .with_params(FlavorParams::Null);
        tree.register(&reg).unwrap();

        // The member deregisters with a concrete keyspec; longest-prefix
        // resolution lands on the wildcard leaf.
        let concrete = tree
            .registration(1, svc_keyspec(9), RecordFlags::subscriber(), "path/A")
            .with_params(FlavorParams::Null);
        tree.deregister(&concrete).unwrap();

        assert_eq!(Shard::subtree_size(tree.root()), 1);
    }

    #[test]
    fn test_deregister_unknown_path_fails() {
        let tree = RoutingTree::new(RecordKind::Member);
        let reg = tree
            .registration(1, svc_keyspec(7), RecordFlags::subscriber(), "path/A")
            .with_params(FlavorParams::Ident);
        assert_eq!(tree.deregister(&reg).unwrap_err(), RoutingError::NoMatch);
    }

    #[test]
    fn test_promote_via_tree() {
        let tree = RoutingTree::new(RecordKind::Member);
        let ks = svc_keyspec(7);
        let reg = tree
            .registration(1, ks.clone(), RecordFlags::subscriber(), "path/A")
            .with_params(FlavorParams::Ident);
        tree.register(&reg).unwrap();

        tree.promote(&reg).unwrap();

        let summary = tree.match_summary(&ks).unwrap();
        assert_eq!(summary.publishers, 1);
        assert_eq!(summary.subscribers, 0);
    }

    #[test]
    fn test_purge_member_removes_only_their_records() {
        let tree = RoutingTree::new(RecordKind::Member);
        for id in [7u32, 8] {
            let reg = tree
                .registration(1, svc_keyspec(id), RecordFlags::subscriber(), "path/m1")
                .with_params(FlavorParams::Ident);
            tree.register(&reg).unwrap();
        }
        let other = tree
            .registration(2, svc_keyspec(7), RecordFlags::publisher(), "path/m2")
            .with_params(FlavorParams::Ident);
        tree.register(&other).unwrap();

        assert_eq!(tree.purge_member(1), 2);

        // Member 2 survives; the id-8 branch is gone
        let summary = tree.match_summary(&svc_keyspec(7)).unwrap();
        assert_eq!(summary.publishers, 1);
        assert_eq!(summary.subscribers, 0);
        assert!(tree.match_keyspec(&svc_keyspec(8)).is_none());

        assert_eq!(tree.purge_member(1), 0);
    }

    #[test]
    fn test_dump_reflects_structure() {
        let tree = RoutingTree::new(RecordKind::Member);
        let reg = tree
            .registration(1, svc_keyspec(7), RecordFlags::subscriber(), "path/A")
            .with_params(FlavorParams::Ident);
        tree.register(&reg).unwrap();

        let dump = tree.dump();
        assert!(dump.key.is_none());
        assert_eq!(dump.children.len(), 1);
        let elem = &dump.children[0];
        assert_eq!(elem.key.as_deref(), Some("1:10"));
        let leaf = &elem.children[0];
        assert_eq!(leaf.flavor, Some(Flavor::Ident));
        assert_eq!(leaf.chunks.len(), 1);
        assert_eq!(leaf.chunks[0].subscribers, 1);

        // Dumps serialize for external tooling
        let json = serde_json::to_string(&dump).unwrap();
        assert!(json.contains("\"pe_index\""));
    }

    #[test]
    fn test_registration_seeded_with_config_defaults() {
        let config = RouterConfig {
            chunk_capacity: 4,
            default_hash_func: HashFunction::Fnv1a,
            default_anycast_policy: AnycastPolicy::Closest,
        };
        let tree = RoutingTree::with_config(config, RecordKind::Member);
        let reg = tree.registration(1, svc_keyspec(7), RecordFlags::subscriber(), "path/A");
        assert_eq!(reg.hash_func(), HashFunction::Fnv1a);
        assert_eq!(reg.anycast_policy(), AnycastPolicy::Closest);

        let outcome = tree
            .register(&reg.with_params(FlavorParams::Ident))
            .unwrap();
        assert_eq!(outcome.shard.borrow().hash_func(), HashFunction::Fnv1a);
        assert_eq!(outcome.shard.borrow().anycast_policy(), AnycastPolicy::Closest);
    }

    #[test]
    fn test_register_deregister_churn_leaves_clean_tree() {
        use rand::Rng as _;

        let tree = RoutingTree::new(RecordKind::Member);
        let mut rng = rand::rng();
        let mut live: Vec<Registration> = Vec::new();

        for i in 0..200 {
            let id: u32 = rng.random_range(0..16);
            let reg = tree
                .registration(
                    u64::from(id),
                    svc_keyspec(id),
                    RecordFlags::subscriber(),
                    format!("path/{i}"),
                )
                .with_params(FlavorParams::Ident);
            tree.register(&reg).unwrap();
            live.push(reg);

            if rng.random_bool(0.5) {
                let victim = live.swap_remove(rng.random_range(0..live.len()));
                tree.deregister(&victim).unwrap();
            }
        }
        for reg in live.drain(..) {
            tree.deregister(&reg).unwrap();
        }

        assert_eq!(Shard::subtree_size(tree.root()), 1);
    }

    #[test]
    fn test_iterator_releases_refs_on_exhaustion() {
        let tree = RoutingTree::new(RecordKind::Router);
        let ks = svc_keyspec(7);
        let reg = tree
            .registration(1, ks.clone(), RecordFlags::subscriber(), "path/A")
            .with_params(FlavorParams::Ident);
        let outcome = tree.register(&reg).unwrap();
        let baseline = Rc::strong_count(&outcome.shard);

        let mut iter = tree.router_records(&ks);
        let batch = iter.next_batch().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(Rc::strong_count(&outcome.shard), baseline + 1);

        assert!(iter.next_batch().is_none());
        assert_eq!(Rc::strong_count(&outcome.shard), baseline);
    }
}
