// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared types for the routing core: flavors, record flags, member records,
//! and the error enums split per the two-class error model (expected runtime
//! outcomes are `Result`s; contract violations panic at the point of breach).

use serde::{Deserialize, Serialize};

/// Maximum number of records (publishers + subscribers) a chunk holds before
/// the registry opens a new chunk for NULL/RANGE flavors.
pub const CHUNK_CAPACITY: usize = 32;

/// Upper bound on the packed key length of an IDENT chunk.
pub const MAX_IDENT_KEY_LEN: usize = 255;

/// Opaque handle identifying a connected member (an application endpoint, or a
/// peer router at router level). Assigned by the transport layer.
pub type MemberHandle = u64;

/// Sharding discipline for a shard's chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    /// Auto-id, capacity-bounded partitions.
    Null,
    /// Exact-key partitions: one chunk per packed key value.
    Ident,
    /// Numeric-interval partitions over signed 64-bit bounds.
    Range,
}

/// Flavor selector plus the flavor-specific parameters a registration carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlavorParams {
    Null,
    /// The chunk key is derived from the keyspec at the leaf shard's path index.
    Ident,
    Range { start: i64, end: i64 },
}

impl FlavorParams {
    pub fn flavor(&self) -> Flavor {
        match self {
            FlavorParams::Null => Flavor::Null,
            FlavorParams::Ident => Flavor::Ident,
            FlavorParams::Range { .. } => Flavor::Range,
        }
    }
}

/// Anycast delivery policy. Stored on the shard and surfaced to the transport
/// layer; never interpreted by the routing core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnycastPolicy {
    #[default]
    None,
    Closest,
    All,
}

/// Hash-function selector carried from the original registration request.
///
/// The in-process child index uses the standard hasher regardless; the
/// selector is recorded as shard metadata for the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashFunction {
    #[default]
    SipHash,
    Fnv1a,
    Crc32,
}

/// Whether a tree's chunks hold application member records or peer-router
/// records. Fixed per tree instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Member,
    Router,
}

/// Which of the two record maps a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordRole {
    Publisher,
    Subscriber,
}

/// Per-record flags. `internal` marks bootstrap records (the routing
/// infrastructure's own self-registration); `permanent` pins a record across
/// bulk teardown. Both survive [`crate::teardown::prune`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFlags {
    pub role: RecordRole,
    pub internal: bool,
    pub permanent: bool,
}

impl RecordFlags {
    pub fn publisher() -> Self {
        Self {
            role: RecordRole::Publisher,
            internal: false,
            permanent: false,
        }
    }

    pub fn subscriber() -> Self {
        Self {
            role: RecordRole::Subscriber,
            internal: false,
            permanent: false,
        }
    }

    pub fn with_internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn with_permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn is_durable(&self) -> bool {
        self.internal || self.permanent
    }
}

/// A publisher or subscriber entry inside a chunk, keyed by its message path.
///
/// Exclusively owned by the map entry it lives in; promotion moves it between
/// the subscriber and publisher maps rather than copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    pub member: MemberHandle,
    pub message_path: String,
    pub flags: RecordFlags,
}

impl MemberRecord {
    pub fn new(member: MemberHandle, message_path: impl Into<String>, flags: RecordFlags) -> Self {
        Self {
            member,
            message_path: message_path.into(),
            flags,
        }
    }
}

/// Expected runtime outcomes of routing-core operations. Contract violations
/// (record-count underflow, index corruption) panic instead — they indicate a
/// caller bug, not a runtime condition.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoutingError {
    /// The keyspec is empty or cannot drive the requested traversal.
    #[error("keyspec is empty or malformed")]
    InvalidKeySpec,

    /// An IDENT chunk key exceeded [`MAX_IDENT_KEY_LEN`].
    #[error("ident key of {0} bytes exceeds the {MAX_IDENT_KEY_LEN}-byte limit")]
    KeyTooLong(usize),

    /// No shard matches the keyspec.
    #[error("no shard matches the keyspec")]
    NoMatch,

    /// A shard matched but holds no chunk for the key.
    #[error("no chunk matches the key")]
    NoChunk,

    /// No record for the message path under the given role.
    #[error("no {role:?} record for message path {path:?}")]
    RecordNotFound { role: RecordRole, path: String },

    /// The shard has no flavor yet; a registration must set one first.
    #[error("shard has no flavor set")]
    FlavorUnset,

    /// The registration's flavor parameters do not fit the shard's flavor.
    #[error("flavor parameters for {requested:?} do not fit shard flavor {shard:?}")]
    FlavorMismatch { shard: Flavor, requested: Flavor },
}

/// Channel-level failures of the threaded router front-end.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("router service offline")]
    ServiceOffline,

    #[error("router service dropped the request")]
    DroppedRequest,

    #[error(transparent)]
    Routing(#[from] RoutingError),
}
