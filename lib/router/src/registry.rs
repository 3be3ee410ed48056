// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Member/router registry: record create, update, promote, and delete inside
//! a shard's chunks, unified behind flavor dispatch.
//!
//! Capacity overflow is handled here, not surfaced: when the current NULL or
//! RANGE chunk is full, a fresh chunk is opened (NULL under a new auto id,
//! RANGE under the same bounds with a new id) before the record goes in.
//! Repeated registration of one message path under the same role is additive:
//! this layer does not deduplicate, it relies on the caller not to
//! double-register.

use crate::chunk::{ChunkIndex, ChunkKey, ChunkRef};
use crate::keyspec::KeySpec;
use crate::matcher;
use crate::protocols::{
    Flavor, FlavorParams, MemberHandle, MemberRecord, RecordFlags, RecordKind, RecordRole,
    RoutingError, MAX_IDENT_KEY_LEN,
};
use crate::shard::{Shard, ShardRef};

/// Switch a leaf shard to a new flavor.
///
/// Destructive: all existing chunks are dropped and their records are not
/// salvaged. Treated as a rare administrative action; only the transition
/// from the unset default is silent.
pub(crate) fn change_flavor(shard: &ShardRef, new_flavor: Flavor) {
    let mut s = shard.borrow_mut();
    if !s.chunks.is_empty() {
        tracing::warn!(
            old = ?s.flavor,
            new = ?new_flavor,
            dropped_chunks = s.chunks.len(),
            "flavor change drops existing chunks"
        );
    }
    s.chunks = ChunkIndex::default();
    s.next_chunk_id = 0;
    s.flavor = Some(new_flavor);
}

/// Find or create the chunk a new registration should land in.
///
/// IDENT finds or creates the chunk for the key derived from the keyspec;
/// NULL and RANGE use the shard's current (highest-id) chunk, creating the
/// first one on demand. RANGE needs its bounds from `params` when creating.
pub fn ensure_chunk(
    shard: &ShardRef,
    keyspec: &KeySpec,
    params: &FlavorParams,
    kind: RecordKind,
) -> Result<ChunkRef, RoutingError> {
    let flavor = shard.borrow().flavor().ok_or(RoutingError::FlavorUnset)?;
    match flavor {
        Flavor::Ident => {
            let key = matcher::ident_key_for(shard, keyspec)?;
            if key.len() > MAX_IDENT_KEY_LEN {
                return Err(RoutingError::KeyTooLong(key.len()));
            }
            if let Some(chunk) = shard.borrow().chunks().get_ident(&key) {
                return Ok(chunk);
            }
            Ok(Shard::add_chunk(shard, ChunkKey::Ident(key), kind))
        }
        Flavor::Null => {
            if let Some(chunk) = shard.borrow().chunks().highest() {
                return Ok(chunk);
            }
            let id = shard.borrow_mut().allocate_chunk_id();
            Ok(Shard::add_chunk(shard, ChunkKey::Auto(id), kind))
        }
        Flavor::Range => {
            if let Some(chunk) = shard.borrow().chunks().highest() {
                return Ok(chunk);
            }
            let FlavorParams::Range { start, end } = params else {
                return Err(RoutingError::FlavorMismatch {
                    shard: flavor,
                    requested: params.flavor(),
                });
            };
            let id = shard.borrow_mut().allocate_chunk_id();
            Ok(Shard::add_chunk(
                shard,
                ChunkKey::Range {
                    id,
                    start: *start,
                    end: *end,
                },
                kind,
            ))
        }
    }
}

/// Insert a record, overflowing to a fresh chunk when the current NULL/RANGE
/// chunk is at capacity. Returns the chunk the record actually landed in.
pub fn add_record(
    shard: &ShardRef,
    chunk: &ChunkRef,
    record: MemberRecord,
    capacity: usize,
) -> Result<ChunkRef, RoutingError> {
    let flavor = shard.borrow().flavor().ok_or(RoutingError::FlavorUnset)?;
    let target = if chunk.borrow().is_full(capacity) {
        match flavor {
            // Exact-key partitions are one-chunk-per-key; no overflow split.
            Flavor::Ident => chunk.clone(),
            Flavor::Null => {
                let id = shard.borrow_mut().allocate_chunk_id();
                Shard::add_chunk(shard, ChunkKey::Auto(id), chunk.borrow().kind())
            }
            Flavor::Range => {
                let key = chunk.borrow().chunk_key().clone();
                let ChunkKey::Range { start, end, .. } = key else {
                    panic!("range shard holds a non-range chunk");
                };
                let id = shard.borrow_mut().allocate_chunk_id();
                Shard::add_chunk(
                    shard,
                    ChunkKey::Range { id, start, end },
                    chunk.borrow().kind(),
                )
            }
        }
    } else {
        chunk.clone()
    };

    {
        let target_ref = target.borrow();
        if target_ref
            .records()
            .get(&record.message_path, record.flags.role)
            .is_some()
        {
            tracing::debug!(
                path = %record.message_path,
                role = ?record.flags.role,
                "repeated registration for message path; keeping both records"
            );
        }
    }
    target.borrow_mut().records_mut().insert(record);
    Ok(target)
}

/// Overwrite the member handle and flags of an existing record, leaving its
/// role and storage untouched.
pub fn update_record(
    shard: &ShardRef,
    keyspec: &KeySpec,
    path: &str,
    role: RecordRole,
    member: MemberHandle,
    flags: RecordFlags,
) -> Result<(), RoutingError> {
    let chunk = find_record_chunk(shard, keyspec, path, role)?;
    let mut chunk = chunk.borrow_mut();
    let record = chunk
        .records_mut()
        .get_mut(path, role)
        .expect("record located by find_record_chunk");
    record.member = member;
    record.flags = RecordFlags { role, ..flags };
    Ok(())
}

/// Remove one record for the message path under the given role.
pub fn delete_record(
    shard: &ShardRef,
    keyspec: &KeySpec,
    path: &str,
    role: RecordRole,
) -> Result<MemberRecord, RoutingError> {
    let chunk = find_record_chunk(shard, keyspec, path, role)?;
    let removed = chunk.borrow_mut().records_mut().remove(path, role);
    removed.ok_or_else(|| RoutingError::RecordNotFound {
        role,
        path: path.to_string(),
    })
}

/// Move the subscriber record for the message path into the publisher map:
/// "first subscriber becomes the writer".
pub fn promote_record(
    shard: &ShardRef,
    keyspec: &KeySpec,
    path: &str,
) -> Result<(), RoutingError> {
    let chunk = find_record_chunk(shard, keyspec, path, RecordRole::Subscriber)?;
    let mut chunk = chunk.borrow_mut();
    chunk
        .records_mut()
        .promote(path)
        .map(|_| ())
        .ok_or_else(|| RoutingError::RecordNotFound {
            role: RecordRole::Subscriber,
            path: path.to_string(),
        })
}

/// Locate the chunk holding the record for `path` under `role`.
///
/// IDENT goes through the exact chunk match; NULL and RANGE scan the shard's
/// chunks in id order, since the record may sit in any overflow chunk.
fn find_record_chunk(
    shard: &ShardRef,
    keyspec: &KeySpec,
    path: &str,
    role: RecordRole,
) -> Result<ChunkRef, RoutingError> {
    let flavor = shard.borrow().flavor().ok_or(RoutingError::FlavorUnset)?;
    match flavor {
        Flavor::Ident => {
            let chunk = matcher::match_chunk(shard, keyspec).ok_or(RoutingError::NoChunk)?;
            if chunk.borrow().records().get(path, role).is_none() {
                return Err(RoutingError::RecordNotFound {
                    role,
                    path: path.to_string(),
                });
            }
            Ok(chunk)
        }
        Flavor::Null | Flavor::Range => {
            let chunks = shard.borrow().chunks().snapshot();
            chunks
                .into_iter()
                .find(|chunk| chunk.borrow().records().get(path, role).is_some())
                .ok_or_else(|| RoutingError::RecordNotFound {
                    role,
                    path: path.to_string(),
                })
        }
    }
}
