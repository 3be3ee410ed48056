// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Databus Router - the subscription/publication routing core of the databus.
//!
//! This crate maps a structured path specification (a keyspec) to the shard
//! responsible for an object and tracks which publishers and subscribers (or,
//! at router level, which peer routers) are interested in it. Lookups are
//! sub-microsecond tree walks over a trie of [`shard::Shard`]s whose leaves
//! partition their records into [`chunk::Chunk`]s per sharding flavor: exact
//! keys, auto-generated capacity-bounded partitions, and numeric ranges, with
//! wildcard children and longest-prefix fallback.
//!
//! The core is strictly single-writer — `Rc`-based and `!Send` — with
//! [`service::ThreadedRouter`] as the channel-fed writer-thread front for
//! async callers.

pub mod builder;
pub mod chunk;
pub mod config;
pub mod iter;
pub mod keyspec;
pub mod matcher;
pub mod protocols;
pub mod registry;
pub mod service;
pub mod shard;
pub mod teardown;
pub mod tree;

// Re-export key types for convenience
pub use builder::build_or_extend;
pub use chunk::{Chunk, ChunkIndex, ChunkKey, ChunkRef, RecordMaps};
pub use config::RouterConfig;
pub use iter::{RecordBatch, RouterRecordIter};
pub use keyspec::{ElementId, KeySpec, KeyValue, PathElement, ScalarType};
pub use matcher::{match_chunk, match_keyspec, match_longest_prefix};
pub use protocols::{
    AnycastPolicy, CHUNK_CAPACITY, Flavor, FlavorParams, HashFunction, MAX_IDENT_KEY_LEN,
    MemberHandle, MemberRecord, RecordFlags, RecordKind, RecordRole, RouterError, RoutingError,
};
pub use service::{RoutingInterface, ThreadedRouter};
pub use shard::{KeyType, Shard, ShardKey, ShardRef, WeakShardRef};
pub use tree::{
    ChunkDump, ChunkSummary, RegisterOutcome, Registration, RoutingTree, ShardDump,
};
