// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Router configuration knobs with serde-friendly defaults.

use serde::{Deserialize, Serialize};

use crate::protocols::{AnycastPolicy, HashFunction, CHUNK_CAPACITY};

fn default_chunk_capacity() -> usize {
    CHUNK_CAPACITY
}

/// Tunables of one routing tree instance. Deserializing `{}` yields the same
/// values as [`RouterConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Records per chunk before NULL/RANGE registrations overflow into a new
    /// chunk.
    #[serde(default = "default_chunk_capacity")]
    pub chunk_capacity: usize,

    /// Hash-function selector stamped on new leaves when the registration
    /// does not specify one.
    #[serde(default)]
    pub default_hash_func: HashFunction,

    /// Anycast policy stamped on new leaves when the registration does not
    /// specify one.
    #[serde(default)]
    pub default_anycast_policy: AnycastPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: default_chunk_capacity(),
            default_hash_func: HashFunction::default(),
            default_anycast_policy: AnycastPolicy::default(),
        }
    }
}
