// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Resumable iteration over the records of every chunk a keyspec resolves
//! through.
//!
//! The iterator is a `NotStarted → Scanning → Exhausted` state machine. Each
//! batch is one chunk's records. Advancing inside a NULL shard follows chunk
//! id order; advancing across shards re-enters [`crate::matcher::match_keyspec`]
//! with the previous shard as the new root. The sequence is finite,
//! forward-only, and non-restartable; the held shard ref is released on
//! exhaustion or early drop.

use crate::chunk::ChunkKey;
use crate::keyspec::KeySpec;
use crate::matcher;
use crate::protocols::{Flavor, MemberRecord};
use crate::shard::ShardRef;

/// One batch: the records of a single matched chunk, publishers first.
pub type RecordBatch = Vec<MemberRecord>;

#[derive(Debug)]
enum IterState {
    NotStarted { root: ShardRef },
    Scanning { shard: ShardRef, chunk_key: ChunkKey },
    Exhausted,
}

/// Iterator over the router records of every chunk matched by a keyspec.
#[derive(Debug)]
pub struct RouterRecordIter {
    keyspec: KeySpec,
    state: IterState,
}

impl RouterRecordIter {
    pub(crate) fn new(root: ShardRef, keyspec: KeySpec) -> Self {
        Self {
            keyspec,
            state: IterState::NotStarted { root },
        }
    }

    /// Emit the next chunk's records, or `None` once the scan is exhausted.
    pub fn next_batch(&mut self) -> Option<RecordBatch> {
        let state = std::mem::replace(&mut self.state, IterState::Exhausted);
        match state {
            IterState::NotStarted { root } => self.enter(&root),
            IterState::Scanning { shard, chunk_key } => {
                // NULL shards walk their chunk list in id order first.
                if shard.borrow().flavor() == Some(Flavor::Null)
                    && let Some(id) = chunk_key.id()
                {
                    let next = shard.borrow().chunks().next_after(id);
                    if let Some(next) = next {
                        let batch = collect_records(&next);
                        let key = next.borrow().chunk_key().clone();
                        self.state = IterState::Scanning {
                            shard,
                            chunk_key: key,
                        };
                        return Some(batch);
                    }
                }
                // Cross-shard advance: previous shard becomes the new root.
                self.enter(&shard)
            }
            IterState::Exhausted => None,
        }
    }

    fn enter(&mut self, root: &ShardRef) -> Option<RecordBatch> {
        match matcher::match_keyspec(root, &self.keyspec) {
            Some((shard, chunk)) => {
                let batch = collect_records(&chunk);
                let key = chunk.borrow().chunk_key().clone();
                self.state = IterState::Scanning {
                    shard,
                    chunk_key: key,
                };
                Some(batch)
            }
            None => {
                // State already replaced with Exhausted; the shard ref died
                // with the old state.
                None
            }
        }
    }
}

fn collect_records(chunk: &crate::chunk::ChunkRef) -> RecordBatch {
    chunk.borrow().records().iter().cloned().collect()
}

impl Iterator for RouterRecordIter {
    type Item = RecordBatch;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}
