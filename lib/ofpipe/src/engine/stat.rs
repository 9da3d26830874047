// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Packet counters for flow entries, tables, groups and meters.
//!
//! Counters are written on the packet path by many workers at once and
//! read rarely, by stats requests and the idle timer. Each counter is
//! split into cache-line sized shards; a worker always writes the
//! shard chosen by its thread index, and readers sum every shard.

use crate::api::PacketCounter as ApiPktCounter;
use crate::ddi::time::Moment;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;
use std::num::NonZeroUsize;

static NEXT_THREAD_INDEX: AtomicUsize = AtomicUsize::new(0);

std::thread_local! {
    static THREAD_INDEX: usize =
        NEXT_THREAD_INDEX.fetch_add(1, Ordering::Relaxed);
}

/// A small, stable, per-thread number used to pick a shard.
fn thread_index() -> usize {
    THREAD_INDEX.with(|idx| *idx)
}

/// The shard count used when the configuration asks for one per CPU.
pub fn default_shards() -> usize {
    std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

#[derive(Debug, Default)]
#[repr(align(64))]
struct Shard {
    packets: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Debug)]
pub struct ShardedCounter {
    shards: Box<[Shard]>,
}

impl ShardedCounter {
    /// Create a counter with `shards` shards, or one per CPU when
    /// `shards` is zero.
    pub fn new(shards: usize) -> Self {
        let n = if shards == 0 { default_shards() } else { shards };
        Self { shards: (0..n).map(|_| Shard::default()).collect() }
    }

    #[inline]
    fn shard(&self) -> &Shard {
        &self.shards[thread_index() % self.shards.len()]
    }

    /// Count one packet of `bytes` length.
    #[inline]
    pub fn hit(&self, bytes: u64) {
        self.add(1, bytes);
    }

    #[inline]
    pub fn add(&self, packets: u64, bytes: u64) {
        let shard = self.shard();
        shard.packets.fetch_add(packets, Ordering::Relaxed);
        shard.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn packets(&self) -> u64 {
        self.shards.iter().map(|s| s.packets.load(Ordering::Relaxed)).sum()
    }

    pub fn read(&self) -> ApiPktCounter {
        let mut out = ApiPktCounter::default();
        for s in self.shards.iter() {
            out.packets += s.packets.load(Ordering::Relaxed);
            out.bytes += s.bytes.load(Ordering::Relaxed);
        }
        out
    }

    /// Overwrite the totals. Concurrent hits may land on either side
    /// of the reset.
    pub fn set(&self, val: ApiPktCounter) {
        for s in self.shards.iter() {
            s.packets.store(0, Ordering::Relaxed);
            s.bytes.store(0, Ordering::Relaxed);
        }
        self.shards[0].packets.store(val.packets, Ordering::Relaxed);
        self.shards[0].bytes.store(val.bytes, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(ApiPktCounter::default());
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }
}

/// The statistics of one installed flow entry.
#[derive(Debug)]
pub struct FlowStats {
    pub counter: ShardedCounter,
    pub created_at: Moment,
}

impl FlowStats {
    pub fn new(shards: usize, created_at: Moment) -> Self {
        Self { counter: ShardedCounter::new(shards), created_at }
    }
}

/// Lookup counters of a flow table.
#[derive(Debug)]
pub struct TableStats {
    pub lookups: ShardedCounter,
    pub matched: ShardedCounter,
}

impl TableStats {
    pub fn new(shards: usize) -> Self {
        Self {
            lookups: ShardedCounter::new(shards),
            matched: ShardedCounter::new(shards),
        }
    }
}
